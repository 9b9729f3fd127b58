use async_trait::async_trait;
use std::sync::Arc;
use wfcore::{
    FlowBehavior, FlowRecord, NodeContext, NodeError, WorkflowContext, SEQUENCE_FLOW,
};
use wfruntime::FlowFactory;

/// Standard sequence flow. Conditions name an outcome the source must have
/// recorded; default flows are taken only when no sibling was.
pub struct SequenceFlow;

#[async_trait]
impl FlowBehavior for SequenceFlow {
    fn flow_type(&self) -> &str {
        SEQUENCE_FLOW
    }

    async fn pre_select_check(
        &self,
        ctx: &WorkflowContext,
        source: &NodeContext,
        destination: &NodeContext,
        flow: &FlowRecord,
    ) -> Result<bool, NodeError> {
        if source.kind.is_exclusive()
            && !source.kind.is_event_based()
            && ctx.any_active_flow_from(source.id())
        {
            return Ok(false);
        }
        if destination.kind.is_exclusive() && ctx.any_active_flow_to(destination.id(), None) {
            return Ok(false);
        }
        if ctx.is_default_outgoing(flow, source.id()) {
            return Ok(!ctx.any_active_flow_from(source.id()));
        }
        if source.kind.is_parallel() || destination.kind.is_parallel() {
            return Ok(true);
        }
        if source.kind.is_event_based() {
            if !destination.kind.is_catching() {
                return Err(NodeError::Modeling(format!(
                    "event-based gateway '{}' targets '{}', which is not an intermediate catch event",
                    source.id(),
                    destination.id()
                )));
            }
            return Ok(true);
        }

        match flow.condition_expression.as_deref() {
            None | Some("") => Ok(true),
            Some(condition) => Ok(ctx
                .get_outcomes(source.id())
                .iter()
                .any(|outcome| outcome == condition)),
        }
    }
}

pub struct SequenceFlowFactory;

impl FlowFactory for SequenceFlowFactory {
    fn create(&self, _record: &FlowRecord) -> Result<Arc<dyn FlowBehavior>, NodeError> {
        Ok(Arc::new(SequenceFlow))
    }

    fn flow_type(&self) -> &str {
        SEQUENCE_FLOW
    }
}
