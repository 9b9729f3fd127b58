//! Standard node library
//!
//! Behaviors for the BPMN-style node types the engine understands, plus the
//! sequence flow.

mod activity;
mod events;
mod flow;
mod gateway;
mod subprocess;

pub use activity::{ActivityNode, ActivityNodeFactory, ACTIVITY_TYPES};
pub use events::{
    BoundaryEventNode, CatchEventNode, EndEventNode, EventNodeFactory, StartEventNode,
    ThrowEventNode, RACE_LOST,
};
pub use flow::{SequenceFlow, SequenceFlowFactory};
pub use gateway::{ExclusiveGatewayNode, GatewayNodeFactory, InclusiveGatewayNode, ParallelGatewayNode};
pub use subprocess::{SubProcessNode, SubProcessNodeFactory};

use std::sync::Arc;
use wfruntime::NodeRegistry;

/// Register all standard nodes and flows with a registry
pub fn register_all(registry: &mut NodeRegistry) {
    for factory in ActivityNodeFactory::all() {
        registry.register(Arc::new(factory));
    }
    for factory in EventNodeFactory::all() {
        registry.register(Arc::new(factory));
    }
    for factory in GatewayNodeFactory::all() {
        registry.register(Arc::new(factory));
    }
    registry.register(Arc::new(SubProcessNodeFactory));
    registry.register_flow(Arc::new(SequenceFlowFactory));
}

/// A registry holding every standard type
pub fn standard_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    register_all(&mut registry);
    registry
}
