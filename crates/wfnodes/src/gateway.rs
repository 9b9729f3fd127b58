//! Gateways route tokens without doing work of their own.
//!
//! Exclusive and event-based gateways pass exactly one token through.
//! Parallel gateways wait for every incoming flow before firing all outgoing
//! flows; inclusive gateways wait for the incoming flows that can still
//! arrive and fire every outgoing flow whose condition holds.

use async_trait::async_trait;
use std::sync::Arc;
use wfcore::{
    FlowRecord, NodeBehavior, NodeError, NodeExecutionResult, NodeKind, NodeRecord, Outcome,
    WorkflowContext,
};
use wfruntime::{NodeFactory, NodeMetadata};

/// Union of the outcomes recorded by the sources of the active incoming
/// flows, first occurrence first.
fn merged_outcomes(ctx: &WorkflowContext, node_id: &str) -> Vec<String> {
    let mut outcomes: Vec<String> = Vec::new();
    for flow_id in ctx.active_incoming_flows(node_id) {
        let Some(flow) = ctx.graph().flow(&flow_id) else {
            continue;
        };
        for outcome in ctx.get_outcomes(&flow.record.source_ref) {
            if !outcomes.contains(&outcome) {
                outcomes.push(outcome);
            }
        }
    }
    outcomes
}

fn require_selection(ctx: &WorkflowContext, node: &NodeRecord) -> Result<(), NodeError> {
    if ctx.any_active_flow_from(&node.id) {
        Ok(())
    } else {
        Err(NodeError::Modeling(format!(
            "no sequence flow can be selected from gateway '{}'",
            node.id
        )))
    }
}

pub struct ExclusiveGatewayNode {
    event_based: bool,
}

#[async_trait]
impl NodeBehavior for ExclusiveGatewayNode {
    fn kind(&self) -> NodeKind {
        if self.event_based {
            NodeKind::EventBasedGateway
        } else {
            NodeKind::ExclusiveGateway
        }
    }

    fn possible_outcomes(&self) -> Vec<Outcome> {
        Vec::new()
    }

    async fn start(
        &self,
        ctx: &mut WorkflowContext,
        node: &NodeRecord,
        incoming: Option<&FlowRecord>,
    ) -> Result<NodeExecutionResult, NodeError> {
        let Some(flow) = incoming else {
            return Ok(NodeExecutionResult::faulted(format!(
                "gateway '{}' was started without an incoming sequence flow",
                node.id
            )));
        };
        if ctx.any_active_flow_to(&node.id, Some(&flow.id)) {
            return Ok(NodeExecutionResult::faulted(format!(
                "gateway '{}' received more than one token",
                node.id
            )));
        }
        Ok(NodeExecutionResult::finished(ctx.get_outcomes(&flow.source_ref)))
    }

    async fn post_execute_check(
        &self,
        ctx: &WorkflowContext,
        node: &NodeRecord,
    ) -> Result<(), NodeError> {
        require_selection(ctx, node)
    }
}

pub struct ParallelGatewayNode;

#[async_trait]
impl NodeBehavior for ParallelGatewayNode {
    fn kind(&self) -> NodeKind {
        NodeKind::ParallelGateway
    }

    fn possible_outcomes(&self) -> Vec<Outcome> {
        Vec::new()
    }

    async fn start(
        &self,
        ctx: &mut WorkflowContext,
        node: &NodeRecord,
        incoming: Option<&FlowRecord>,
    ) -> Result<NodeExecutionResult, NodeError> {
        if let Some(flow) = incoming {
            if ctx.is_flow_consumed(&flow.id, &node.id) {
                return Ok(NodeExecutionResult::noop("already finished"));
            }
        }
        if !ctx.all_flow_active_to(&node.id) {
            tracing::debug!("Parallel gateway {} waiting for incoming flows", node.id);
            return Ok(NodeExecutionResult::noop("waiting for incoming flows"));
        }
        Ok(NodeExecutionResult::finished(merged_outcomes(ctx, &node.id)))
    }
}

pub struct InclusiveGatewayNode;

#[async_trait]
impl NodeBehavior for InclusiveGatewayNode {
    fn kind(&self) -> NodeKind {
        NodeKind::InclusiveGateway
    }

    fn possible_outcomes(&self) -> Vec<Outcome> {
        Vec::new()
    }

    async fn start(
        &self,
        ctx: &mut WorkflowContext,
        node: &NodeRecord,
        _incoming: Option<&FlowRecord>,
    ) -> Result<NodeExecutionResult, NodeError> {
        let joined = ctx.all_flow_active_to(&node.id)
            || (ctx.is_quiescent()
                && ctx.any_active_flow_to(&node.id, None)
                && !ctx.has_pending_upstream(&node.id));
        if !joined {
            tracing::debug!("Inclusive gateway {} waiting for incoming flows", node.id);
            return Ok(NodeExecutionResult::noop("waiting for incoming flows"));
        }
        Ok(NodeExecutionResult::finished(merged_outcomes(ctx, &node.id)))
    }

    async fn post_execute_check(
        &self,
        ctx: &WorkflowContext,
        node: &NodeRecord,
    ) -> Result<(), NodeError> {
        require_selection(ctx, node)
    }
}

pub struct GatewayNodeFactory {
    node_type: &'static str,
    kind: NodeKind,
}

impl GatewayNodeFactory {
    pub fn new(node_type: &'static str, kind: NodeKind) -> Self {
        Self { node_type, kind }
    }

    pub fn all() -> Vec<Self> {
        vec![
            Self::new("exclusiveGateway", NodeKind::ExclusiveGateway),
            Self::new("eventBasedGateway", NodeKind::EventBasedGateway),
            Self::new("parallelGateway", NodeKind::ParallelGateway),
            Self::new("inclusiveGateway", NodeKind::InclusiveGateway),
        ]
    }
}

impl NodeFactory for GatewayNodeFactory {
    fn create(&self, record: &NodeRecord) -> Result<Arc<dyn NodeBehavior>, NodeError> {
        let behavior: Arc<dyn NodeBehavior> = match self.kind {
            NodeKind::ExclusiveGateway => Arc::new(ExclusiveGatewayNode { event_based: false }),
            NodeKind::EventBasedGateway => Arc::new(ExclusiveGatewayNode { event_based: true }),
            NodeKind::ParallelGateway => Arc::new(ParallelGatewayNode),
            NodeKind::InclusiveGateway => Arc::new(InclusiveGatewayNode),
            other => {
                return Err(NodeError::Registration(format!(
                    "'{}' is not a gateway ({:?})",
                    record.id, other
                )))
            }
        };
        Ok(behavior)
    }

    fn node_type(&self) -> &str {
        self.node_type
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: format!("{:?}", self.kind),
            category: "gateway".to_string(),
            outcomes: Vec::new(),
        }
    }
}
