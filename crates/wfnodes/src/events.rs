use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use wfcore::{
    BoundaryTrigger, CatchTrigger, DomainEvent, EndEventKind, FlowRecord, NodeBehavior, NodeError,
    NodeExecutionResult, NodeKind, NodeRecord, Outcome, ResumeSignal, TriggerKind, TriggerRequest,
    WorkflowContext, WorkflowStatus,
};
use wfruntime::{NodeFactory, NodeMetadata};

/// Message reported when a racing branch of an event-based gateway lost
pub const RACE_LOST: &str = "Another flow branch was happened";

/// Arm a wait through the registrar and halt; a failed registration faults.
async fn register_wait(
    ctx: &mut WorkflowContext,
    node: &NodeRecord,
    kind: TriggerKind,
) -> NodeExecutionResult {
    let request = TriggerRequest {
        workflow_id: ctx.workflow_id().to_string(),
        correlation_id: ctx.workflow().correlation_id.clone(),
        node_id: node.id.clone(),
        kind,
        config: node.config.clone(),
    };
    let registration = ctx.triggers().register(request).await;
    if !registration.succeeded {
        let message = registration
            .message
            .unwrap_or_else(|| format!("cannot register {:?} trigger", kind));
        tracing::warn!("Registration for {} failed: {}", node.id, message);
        return NodeExecutionResult::faulted(message);
    }

    if kind == TriggerKind::Timer {
        let workflow_id = ctx.workflow_id().to_string();
        ctx.add_domain_event(DomainEvent::TimerEventStart {
            workflow_id,
            node: node.clone(),
            timestamp: Utc::now(),
        });
    }
    NodeExecutionResult::halted()
}

pub struct StartEventNode;

#[async_trait]
impl NodeBehavior for StartEventNode {
    fn kind(&self) -> NodeKind {
        NodeKind::StartEvent
    }

    fn possible_outcomes(&self) -> Vec<Outcome> {
        vec![Outcome::new(Outcome::CATCHED)]
    }

    async fn start(
        &self,
        ctx: &mut WorkflowContext,
        node: &NodeRecord,
        _incoming: Option<&FlowRecord>,
    ) -> Result<NodeExecutionResult, NodeError> {
        let workflow_id = ctx.workflow_id().to_string();
        ctx.add_domain_event(DomainEvent::ProcessStarted {
            workflow_id,
            node: node.clone(),
            timestamp: Utc::now(),
        });
        Ok(NodeExecutionResult::finished([Outcome::CATCHED]))
    }
}

pub struct EndEventNode {
    kind: EndEventKind,
}

#[async_trait]
impl NodeBehavior for EndEventNode {
    fn kind(&self) -> NodeKind {
        NodeKind::EndEvent(self.kind)
    }

    fn possible_outcomes(&self) -> Vec<Outcome> {
        vec![Outcome::new(Outcome::THROWED)]
    }

    async fn start(
        &self,
        ctx: &mut WorkflowContext,
        node: &NodeRecord,
        _incoming: Option<&FlowRecord>,
    ) -> Result<NodeExecutionResult, NodeError> {
        let status = match self.kind {
            EndEventKind::Plain => WorkflowStatus::Finished,
            EndEventKind::Terminate | EndEventKind::Cancel => WorkflowStatus::Aborted,
        };
        let workflow_id = ctx.workflow_id().to_string();
        ctx.add_domain_event(DomainEvent::ProcessFinished {
            workflow_id,
            node: node.clone(),
            status,
            timestamp: Utc::now(),
        });

        if self.kind == EndEventKind::Plain {
            if node.is_top_level() {
                ctx.finish(node, WorkflowStatus::Finished);
            }
            return Ok(NodeExecutionResult::finished([Outcome::THROWED]));
        }

        let aborted = ctx.terminate(&node.owner_id);
        tracing::info!(
            "End event {} terminated scope '{}' ({} nodes aborted)",
            node.id,
            node.owner_id,
            aborted.len()
        );
        if node.is_top_level() {
            ctx.finish(node, WorkflowStatus::Aborted);
        }
        Ok(NodeExecutionResult {
            outcomes: vec![Outcome::THROWED.to_string()],
            ..NodeExecutionResult::aborted("terminated")
        })
    }
}

/// Timer or message wait inside a flow
pub struct CatchEventNode {
    trigger: CatchTrigger,
}

impl CatchEventNode {
    fn trigger_kind(&self) -> TriggerKind {
        match self.trigger {
            CatchTrigger::Timer => TriggerKind::Timer,
            CatchTrigger::Message => TriggerKind::Message,
        }
    }
}

#[async_trait]
impl NodeBehavior for CatchEventNode {
    fn kind(&self) -> NodeKind {
        NodeKind::IntermediateCatch(self.trigger)
    }

    fn possible_outcomes(&self) -> Vec<Outcome> {
        vec![Outcome::new(Outcome::CATCHED)]
    }

    async fn start(
        &self,
        ctx: &mut WorkflowContext,
        node: &NodeRecord,
        _incoming: Option<&FlowRecord>,
    ) -> Result<NodeExecutionResult, NodeError> {
        Ok(register_wait(ctx, node, self.trigger_kind()).await)
    }

    async fn resume(
        &self,
        ctx: &mut WorkflowContext,
        node: &NodeRecord,
        signal: &ResumeSignal,
    ) -> Result<NodeExecutionResult, NodeError> {
        if let Some(fault) = &signal.fault {
            return Ok(NodeExecutionResult::faulted(fault.clone()));
        }

        let gateway = ctx
            .current_incoming_flow(&node.id)
            .and_then(|flow_id| ctx.graph().flow(flow_id))
            .map(|flow| flow.record.source_ref.clone())
            .filter(|source| {
                ctx.get_node(source)
                    .map(|n| n.kind.is_event_based())
                    .unwrap_or(false)
            });

        if let Some(gateway) = gateway {
            let siblings: Vec<String> = ctx
                .get_outgoings(&gateway)
                .into_iter()
                .map(|f| f.record.destination_ref.clone())
                .filter(|d| *d != node.id)
                .collect();
            if siblings.iter().any(|s| ctx.is_finished(s)) {
                tracing::debug!("Catch event {} lost the race at {}", node.id, gateway);
                return Ok(NodeExecutionResult::aborted(RACE_LOST));
            }
            for sibling in &siblings {
                ctx.cancel_blocking_event(sibling);
            }
        }

        Ok(NodeExecutionResult::finished(signal.outcomes.iter().cloned()))
    }
}

pub struct ThrowEventNode;

#[async_trait]
impl NodeBehavior for ThrowEventNode {
    fn kind(&self) -> NodeKind {
        NodeKind::IntermediateThrow
    }

    fn possible_outcomes(&self) -> Vec<Outcome> {
        vec![Outcome::new(Outcome::THROWED)]
    }

    async fn start(
        &self,
        _ctx: &mut WorkflowContext,
        _node: &NodeRecord,
        _incoming: Option<&FlowRecord>,
    ) -> Result<NodeExecutionResult, NodeError> {
        Ok(NodeExecutionResult::finished([Outcome::THROWED]))
    }
}

/// Event attached to an activity, fired by a fault of the host or by a timer
/// armed while the host waits.
pub struct BoundaryEventNode {
    trigger: BoundaryTrigger,
}

#[async_trait]
impl NodeBehavior for BoundaryEventNode {
    fn kind(&self) -> NodeKind {
        NodeKind::Boundary(self.trigger)
    }

    fn possible_outcomes(&self) -> Vec<Outcome> {
        vec![Outcome::new(Outcome::CATCHED)]
    }

    async fn pre_start_check(
        &self,
        ctx: &WorkflowContext,
        _node: &NodeRecord,
        ancestor: &NodeRecord,
    ) -> Result<bool, NodeError> {
        Ok(match self.trigger {
            BoundaryTrigger::Error => ctx.last_status(&ancestor.id) == Some(WorkflowStatus::Faulted),
            BoundaryTrigger::Timer => true,
        })
    }

    async fn start(
        &self,
        ctx: &mut WorkflowContext,
        node: &NodeRecord,
        _incoming: Option<&FlowRecord>,
    ) -> Result<NodeExecutionResult, NodeError> {
        match self.trigger {
            BoundaryTrigger::Error => Ok(NodeExecutionResult::finished([Outcome::CATCHED])),
            BoundaryTrigger::Timer => Ok(register_wait(ctx, node, TriggerKind::Timer).await),
        }
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
        tracing::debug!("Boundary timer {} fired", node.id);
        Ok(NodeExecutionResult::finished([Outcome::CATCHED]))
    }
}

/// Factory for every event node type, keyed by its classification
pub struct EventNodeFactory {
    node_type: &'static str,
    kind: NodeKind,
}

impl EventNodeFactory {
    pub fn new(node_type: &'static str, kind: NodeKind) -> Self {
        Self { node_type, kind }
    }

    pub fn all() -> Vec<Self> {
        vec![
            Self::new("startEvent", NodeKind::StartEvent),
            Self::new("endEvent", NodeKind::EndEvent(EndEventKind::Plain)),
            Self::new("terminateEndEvent", NodeKind::EndEvent(EndEventKind::Terminate)),
            Self::new("cancelEndEvent", NodeKind::EndEvent(EndEventKind::Cancel)),
            Self::new(
                "timerIntermediateCatchEvent",
                NodeKind::IntermediateCatch(CatchTrigger::Timer),
            ),
            Self::new(
                "messageIntermediateCatchEvent",
                NodeKind::IntermediateCatch(CatchTrigger::Message),
            ),
            Self::new("intermediateThrowEvent", NodeKind::IntermediateThrow),
            Self::new("errorBoundaryEvent", NodeKind::Boundary(BoundaryTrigger::Error)),
            Self::new("timerBoundaryEvent", NodeKind::Boundary(BoundaryTrigger::Timer)),
        ]
    }
}

impl NodeFactory for EventNodeFactory {
    fn create(&self, record: &NodeRecord) -> Result<Arc<dyn NodeBehavior>, NodeError> {
        let behavior: Arc<dyn NodeBehavior> = match self.kind {
            NodeKind::StartEvent => Arc::new(StartEventNode),
            NodeKind::EndEvent(kind) => Arc::new(EndEventNode { kind }),
            NodeKind::IntermediateCatch(trigger) => Arc::new(CatchEventNode { trigger }),
            NodeKind::IntermediateThrow => Arc::new(ThrowEventNode),
            NodeKind::Boundary(trigger) => Arc::new(BoundaryEventNode { trigger }),
            other => {
                return Err(NodeError::Registration(format!(
                    "'{}' is not an event ({:?})",
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
        let outcome = match self.kind {
            NodeKind::EndEvent(_) | NodeKind::IntermediateThrow => Outcome::THROWED,
            _ => Outcome::CATCHED,
        };
        NodeMetadata {
            description: format!("{:?} event", self.kind),
            category: "event".to_string(),
            outcomes: vec![outcome.to_string()],
        }
    }
}
