//! Core abstractions for the workflow engine
//!
//! This crate provides the graph model, execution state and the traits node
//! behaviors implement. It performs no I/O and knows nothing about storage.

mod context;
mod error;
pub mod events;
mod graph;
mod node;
mod state;
mod status;
mod trigger;
mod workflow;

pub use context::WorkflowContext;
pub use error::{FlowError, NodeError, WorkflowError};
pub use events::*;
pub use graph::{
    BoundaryTrigger, CatchTrigger, EndEventKind, FlowContext, NodeContext, NodeKind, WorkflowGraph,
};
pub use node::{FlowBehavior, NodeBehavior, ResumeSignal};
pub use state::{FlowSnapshot, NodeSnapshot, PendingStep, WorkflowRecord, WorkflowState};
pub use status::{NodeExecutionResult, Outcome, WorkflowStatus};
pub use trigger::{
    NoopTriggerRegistrar, RegistrationResult, TriggerKind, TriggerRegistrar, TriggerRequest,
};
pub use workflow::{
    FlowId, FlowRecord, NodeId, NodeRecord, ProcessDefinition, ProcessRecord, WorkflowId,
    SEQUENCE_FLOW,
};

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
