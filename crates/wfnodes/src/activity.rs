use async_trait::async_trait;
use wfcore::{
    FlowRecord, NodeBehavior, NodeError, NodeExecutionResult, NodeKind, NodeRecord, Outcome,
    ResumeSignal, WorkflowContext,
};
use wfruntime::{NodeFactory, NodeMetadata};
use std::sync::Arc;

/// Node types executed as external work items
pub const ACTIVITY_TYPES: &[&str] = &[
    "task",
    "userTask",
    "serviceTask",
    "manualTask",
    "scriptTask",
    "sendTask",
    "receiveTask",
    "businessRuleTask",
];

/// Work done outside the engine. The node halts until whoever performs the
/// work resumes it.
pub struct ActivityNode;

#[async_trait]
impl NodeBehavior for ActivityNode {
    fn kind(&self) -> NodeKind {
        NodeKind::Activity
    }

    fn possible_outcomes(&self) -> Vec<Outcome> {
        vec![Outcome::new(Outcome::DONE)]
    }

    async fn start(
        &self,
        _ctx: &mut WorkflowContext,
        node: &NodeRecord,
        incoming: Option<&FlowRecord>,
    ) -> Result<NodeExecutionResult, NodeError> {
        if incoming.is_none() {
            return Ok(NodeExecutionResult::faulted(format!(
                "activity '{}' was started without an incoming sequence flow",
                node.id
            )));
        }
        tracing::debug!("Activity {} waiting for completion", node.display_name());
        Ok(NodeExecutionResult::halted())
    }

    async fn resume(
        &self,
        _ctx: &mut WorkflowContext,
        node: &NodeRecord,
        signal: &ResumeSignal,
    ) -> Result<NodeExecutionResult, NodeError> {
        if let Some(fault) = &signal.fault {
            return Ok(NodeExecutionResult::faulted(fault.clone()));
        }
        tracing::debug!("Activity {} completed by {:?}", node.display_name(), signal.user);
        if signal.outcomes.is_empty() {
            Ok(NodeExecutionResult::finished([Outcome::DONE]))
        } else {
            Ok(NodeExecutionResult::finished(signal.outcomes.iter().cloned()))
        }
    }
}

pub struct ActivityNodeFactory {
    node_type: &'static str,
}

impl ActivityNodeFactory {
    pub fn new(node_type: &'static str) -> Self {
        Self { node_type }
    }

    /// One factory per activity type
    pub fn all() -> Vec<Self> {
        ACTIVITY_TYPES.iter().map(|t| Self::new(t)).collect()
    }
}

impl NodeFactory for ActivityNodeFactory {
    fn create(&self, _record: &NodeRecord) -> Result<Arc<dyn NodeBehavior>, NodeError> {
        Ok(Arc::new(ActivityNode))
    }

    fn node_type(&self) -> &str {
        self.node_type
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Halts until the work item is completed externally".to_string(),
            category: "activity".to_string(),
            outcomes: vec![Outcome::DONE.to_string()],
        }
    }
}
