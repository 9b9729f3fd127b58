use crate::{
    FlowRecord, NodeContext, NodeError, NodeExecutionResult, NodeKind, NodeRecord, Outcome,
    WorkflowContext,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Behavior shared by every node of one type.
///
/// Behaviors are stateless with respect to a running instance: everything they
/// read or write goes through the [`WorkflowContext`] they are handed, so one
/// instance of a behavior is shared by every workflow built from a definition.
#[async_trait]
pub trait NodeBehavior: Send + Sync {
    /// Closed classification used by flow selection and join rules
    fn kind(&self) -> NodeKind;

    /// Outcomes this node can produce when it finishes
    fn possible_outcomes(&self) -> Vec<Outcome>;

    /// First execution of the node, entered through `incoming` (or none for
    /// start and boundary events).
    async fn start(
        &self,
        ctx: &mut WorkflowContext,
        node: &NodeRecord,
        incoming: Option<&FlowRecord>,
    ) -> Result<NodeExecutionResult, NodeError>;

    /// Continuation of a halted execution
    async fn resume(
        &self,
        _ctx: &mut WorkflowContext,
        node: &NodeRecord,
        _signal: &ResumeSignal,
    ) -> Result<NodeExecutionResult, NodeError> {
        Ok(NodeExecutionResult::faulted(format!(
            "node '{}' cannot be resumed",
            node.id
        )))
    }

    /// Gate evaluated before a boundary event may fire next to its host.
    async fn pre_start_check(
        &self,
        _ctx: &WorkflowContext,
        _node: &NodeRecord,
        _ancestor: &NodeRecord,
    ) -> Result<bool, NodeError> {
        Ok(true)
    }

    /// Invariant checked after a node's outgoing flows were selected.
    async fn post_execute_check(
        &self,
        _ctx: &WorkflowContext,
        _node: &NodeRecord,
    ) -> Result<(), NodeError> {
        Ok(())
    }
}

/// Decides whether a flow may be traversed given the current graph state
#[async_trait]
pub trait FlowBehavior: Send + Sync {
    fn flow_type(&self) -> &str;

    async fn pre_select_check(
        &self,
        ctx: &WorkflowContext,
        source: &NodeContext,
        destination: &NodeContext,
        flow: &FlowRecord,
    ) -> Result<bool, NodeError>;
}

/// External wake-up delivered to a halted node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResumeSignal {
    /// Outcomes reported by whoever completed the work
    #[serde(default)]
    pub outcomes: Vec<String>,
    /// Values merged into the workflow output
    #[serde(default)]
    pub output: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub user: Option<String>,
    /// Set when the external work failed
    #[serde(default)]
    pub fault: Option<String>,
}

impl ResumeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_outcome(mut self, outcome: impl Into<String>) -> Self {
        self.outcomes.push(outcome.into());
        self
    }

    pub fn with_output(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.output.insert(key.into(), value.into());
        self
    }

    pub fn by_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn failed(mut self, message: impl Into<String>) -> Self {
        self.fault = Some(message.into());
        self
    }
}
