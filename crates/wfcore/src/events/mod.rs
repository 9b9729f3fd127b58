mod base;

pub use base::{DomainEvent, EventBus};
