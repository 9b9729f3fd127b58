use async_trait::async_trait;
use std::sync::Arc;
use wfcore::{
    EndEventKind, FlowRecord, NodeBehavior, NodeError, NodeExecutionResult, NodeKind, NodeRecord,
    Outcome, ResumeSignal, WorkflowContext, WorkflowStatus,
};
use wfruntime::{NodeFactory, NodeMetadata};

/// Embedded process scope. Starting it starts the nested start event; it
/// completes once one of its end events did and nothing inside still waits.
pub struct SubProcessNode;

#[async_trait]
impl NodeBehavior for SubProcessNode {
    fn kind(&self) -> NodeKind {
        NodeKind::SubProcess
    }

    fn possible_outcomes(&self) -> Vec<Outcome> {
        vec![Outcome::new(Outcome::DONE)]
    }

    async fn start(
        &self,
        ctx: &mut WorkflowContext,
        node: &NodeRecord,
        incoming: Option<&FlowRecord>,
    ) -> Result<NodeExecutionResult, NodeError> {
        if incoming.is_none() {
            return Ok(NodeExecutionResult::faulted(format!(
                "sub-process '{}' was started without an incoming sequence flow",
                node.id
            )));
        }
        if ctx.get_start_node(&node.id).is_none() {
            return Err(NodeError::Modeling(format!(
                "sub-process '{}' has no start event",
                node.id
            )));
        }
        ctx.request_scope_start(node.id.clone());
        Ok(NodeExecutionResult::halted())
    }

    async fn resume(
        &self,
        ctx: &mut WorkflowContext,
        node: &NodeRecord,
        _signal: &ResumeSignal,
    ) -> Result<NodeExecutionResult, NodeError> {
        let Some(began) = ctx.state().last_node_snapshot(&node.id).map(|s| s.sequence) else {
            return Ok(NodeExecutionResult::halted());
        };
        if ctx.has_blocking_in_scope(&node.id) {
            return Ok(NodeExecutionResult::halted());
        }

        let ended = ctx
            .graph()
            .end_events(&node.id)
            .into_iter()
            .filter_map(|end| {
                ctx.state()
                    .last_completed(&end.record.id)
                    .filter(|s| s.sequence > began)
                    .map(|s| (end.kind, s.status))
            })
            .collect::<Vec<_>>();

        if ended.is_empty() {
            return Ok(NodeExecutionResult::halted());
        }
        let cancelled = ended.iter().any(|(kind, status)| {
            *kind == NodeKind::EndEvent(EndEventKind::Cancel) && *status == WorkflowStatus::Aborted
        });
        if cancelled {
            tracing::info!("Sub-process {} was cancelled", node.display_name());
            return Ok(NodeExecutionResult::aborted("sub-process cancelled"));
        }
        tracing::debug!("Sub-process {} completed", node.display_name());
        Ok(NodeExecutionResult::finished([Outcome::DONE]))
    }
}

pub struct SubProcessNodeFactory;

impl NodeFactory for SubProcessNodeFactory {
    fn create(&self, _record: &NodeRecord) -> Result<Arc<dyn NodeBehavior>, NodeError> {
        Ok(Arc::new(SubProcessNode))
    }

    fn node_type(&self) -> &str {
        "subProcess"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Runs an embedded process scope".to_string(),
            category: "activity".to_string(),
            outcomes: vec![Outcome::DONE.to_string()],
        }
    }
}
