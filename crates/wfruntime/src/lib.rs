//! Workflow execution runtime
//!
//! Resolves definitions into graphs through the node registry, runs instance
//! turns with the executor and persists the resulting state through a
//! pluggable repository.

pub mod builder;
pub mod cache;
mod executor;
mod registry;
pub mod repository;
mod runtime;
pub mod triggers;

pub use builder::ContextBuilder;
pub use cache::GraphCache;
pub use executor::{Trigger, TurnOutcome, WorkflowExecutor};
pub use registry::{FlowFactory, NodeFactory, NodeMetadata, NodeRegistry};
pub use repository::{InMemoryStateRepository, StateRepository};
pub use runtime::{FlowRuntime, RuntimeConfig, StartOptions, TurnReport};
pub use triggers::InMemoryTriggerRegistrar;
