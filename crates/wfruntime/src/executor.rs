use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use wfcore::{
    BoundaryTrigger, DomainEvent, FlowError, NodeContext, NodeError, NodeExecutionResult,
    NodeKind, PendingStep, ResumeSignal, WorkflowContext, WorkflowError, WorkflowGraph,
    WorkflowState, WorkflowStatus,
};

/// What starts a turn
#[derive(Debug, Clone)]
pub enum Trigger {
    /// Run the start event owned by `owner_id` (`""` for the root process)
    Start { owner_id: String },
    /// Continue a halted node
    Resume { node_id: String, signal: ResumeSignal },
    /// Run the steps an interrupted turn left pending
    Continue,
}

impl Trigger {
    pub fn start() -> Self {
        Trigger::Start {
            owner_id: String::new(),
        }
    }

    pub fn resume(node_id: impl Into<String>, signal: ResumeSignal) -> Self {
        Trigger::Resume {
            node_id: node_id.into(),
            signal,
        }
    }
}

/// Result of one turn: the state to persist and the events to dispatch
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub state: WorkflowState,
    pub events: Vec<DomainEvent>,
    pub steps: usize,
    /// The turn was cancelled before running out of work
    pub interrupted: bool,
    /// Set when the trigger did not apply (e.g. a duplicate resume)
    pub skipped: Option<String>,
}

enum Frame {
    StartScope(String),
    Visit {
        node_id: String,
        incoming: Option<String>,
    },
    Resume {
        node_id: String,
        signal: ResumeSignal,
        internal: bool,
    },
    Settle(String),
}

impl Frame {
    fn node_id(&self) -> &str {
        match self {
            Frame::StartScope(owner_id) => owner_id,
            Frame::Visit { node_id, .. }
            | Frame::Resume { node_id, .. }
            | Frame::Settle(node_id) => node_id,
        }
    }

    /// Frames worth keeping across an interruption. Settle frames are
    /// recomputed, and an external resume can simply be sent again.
    fn into_pending(self) -> Option<PendingStep> {
        match self {
            Frame::StartScope(owner_id) => Some(PendingStep::StartScope { owner_id }),
            Frame::Visit { node_id, incoming } => Some(PendingStep::Visit {
                node_id,
                incoming_flow: incoming,
            }),
            Frame::Resume {
                node_id,
                internal: true,
                ..
            } => Some(PendingStep::ResumeHost { node_id }),
            Frame::Resume { .. } | Frame::Settle(_) => None,
        }
    }
}

impl From<PendingStep> for Frame {
    fn from(step: PendingStep) -> Self {
        match step {
            PendingStep::StartScope { owner_id } => Frame::StartScope(owner_id),
            PendingStep::Visit {
                node_id,
                incoming_flow,
            } => Frame::Visit {
                node_id,
                incoming: incoming_flow,
            },
            PendingStep::ResumeHost { node_id } => Frame::Resume {
                node_id,
                signal: ResumeSignal::new(),
                internal: true,
            },
        }
    }
}

#[derive(Default)]
struct Turn {
    stack: Vec<Frame>,
    /// Sub-process resumes, run once the synchronous work of the turn drained
    deferred: Vec<Frame>,
    traversed: HashSet<(String, u64)>,
    settled: HashSet<(String, u64)>,
    steps: usize,
}

/// Drives a workflow instance through one turn
pub struct WorkflowExecutor {
    max_steps: usize,
}

impl WorkflowExecutor {
    pub fn new(max_steps: usize) -> Self {
        Self { max_steps }
    }

    /// Execute one turn. Modeling faults abort the turn with an error; node
    /// failures are recorded in the returned state.
    pub async fn execute(
        &self,
        mut ctx: WorkflowContext,
        trigger: Trigger,
        cancellation: &CancellationToken,
    ) -> Result<TurnOutcome, FlowError> {
        let status = ctx.workflow().status;
        if status.is_terminal() {
            return Err(WorkflowError::Terminated {
                workflow_id: ctx.workflow_id().to_string(),
                status,
            }
            .into());
        }

        let mut turn = Turn::default();
        let first = match trigger {
            Trigger::Start { owner_id } => {
                tracing::info!("Starting workflow {} at scope '{}'", ctx.workflow_id(), owner_id);
                Some(Frame::StartScope(owner_id))
            }
            Trigger::Continue => {
                if ctx.state().pending_steps.is_empty() {
                    return Ok(Self::skip(ctx, "no pending steps".to_string()));
                }
                tracing::info!(
                    "Continuing workflow {} with {} pending steps",
                    ctx.workflow_id(),
                    ctx.state().pending_steps.len()
                );
                None
            }
            Trigger::Resume { node_id, signal } => {
                if ctx.get_node(&node_id).is_none() {
                    return Err(WorkflowError::NodeNotFound(node_id).into());
                }
                let last = ctx.last_status(&node_id);
                if last != Some(WorkflowStatus::Halted) {
                    let reason = format!("node '{}' is not halted ({:?})", node_id, last);
                    tracing::info!("Skipping resume of workflow {}: {}", ctx.workflow_id(), reason);
                    return Ok(Self::skip(ctx, reason));
                }
                tracing::info!("Resuming workflow {} at node {}", ctx.workflow_id(), node_id);
                Some(Frame::Resume {
                    node_id,
                    signal,
                    internal: false,
                })
            }
        };
        turn.stack
            .extend(ctx.take_pending_steps().into_iter().map(Frame::from));
        turn.stack.extend(first);
        ctx.set_workflow_status(WorkflowStatus::Executing);

        let mut interrupted = false;
        'turn: loop {
            while let Some(frame) = turn.stack.pop() {
                if cancellation.is_cancelled() {
                    tracing::warn!("Turn of workflow {} cancelled", ctx.workflow_id());
                    turn.stack.push(frame);
                    interrupted = true;
                    break 'turn;
                }
                if ctx.workflow().status.is_terminal() {
                    tracing::debug!(
                        "Workflow {} became {}, dropping {} pending steps",
                        ctx.workflow_id(),
                        ctx.workflow().status,
                        turn.stack.len() + 1
                    );
                    turn.stack.clear();
                    turn.deferred.clear();
                    break 'turn;
                }
                if ctx.is_in_terminated_scope(frame.node_id()) {
                    tracing::debug!("Dropping step for {}: its scope was terminated", frame.node_id());
                    continue;
                }
                turn.steps += 1;
                if turn.steps > self.max_steps {
                    return Err(WorkflowError::StepLimitExceeded(self.max_steps).into());
                }
                self.step(&mut ctx, frame, &mut turn).await?;
            }

            if !turn.deferred.is_empty() {
                let deferred = std::mem::take(&mut turn.deferred);
                turn.stack.extend(deferred.into_iter().rev());
                continue;
            }

            let waiting = Self::settle_candidates(&ctx, &mut turn);
            if waiting.is_empty() {
                break;
            }
            turn.stack
                .extend(waiting.into_iter().rev().map(Frame::Settle));
        }

        ctx.settle_fault();
        if interrupted {
            if !ctx.workflow().status.is_terminal() {
                let mut frames: Vec<Frame> = turn.deferred.drain(..).rev().collect();
                frames.append(&mut turn.stack);
                let pending: Vec<PendingStep> =
                    frames.into_iter().filter_map(Frame::into_pending).collect();
                tracing::info!(
                    "Workflow {} keeps {} pending steps",
                    ctx.workflow_id(),
                    pending.len()
                );
                ctx.set_pending_steps(pending);
            }
        } else {
            ctx.settle_finish();
        }
        if !ctx.workflow().status.is_terminal() {
            let status = if ctx.state().blocking_nodes().is_empty() {
                WorkflowStatus::Idle
            } else {
                WorkflowStatus::Halted
            };
            ctx.set_workflow_status(status);
        }

        tracing::info!(
            "Workflow {} turn ended {:?} after {} steps",
            ctx.workflow_id(),
            ctx.workflow().status,
            turn.steps
        );
        let (state, events) = ctx.into_parts();
        Ok(TurnOutcome {
            state,
            events,
            steps: turn.steps,
            interrupted,
            skipped: None,
        })
    }

    fn skip(ctx: WorkflowContext, reason: String) -> TurnOutcome {
        let (state, events) = ctx.into_parts();
        TurnOutcome {
            state,
            events,
            steps: 0,
            interrupted: false,
            skipped: Some(reason),
        }
    }

    async fn step(
        &self,
        ctx: &mut WorkflowContext,
        frame: Frame,
        turn: &mut Turn,
    ) -> Result<(), FlowError> {
        let graph = Arc::clone(ctx.graph());
        match frame {
            Frame::StartScope(owner_id) => {
                ctx.reopen_scope(&owner_id);
                let start = graph.start_node(&owner_id).ok_or_else(|| {
                    FlowError::Modeling(format!("scope '{}' has no start event", owner_id))
                })?;
                turn.stack.push(Frame::Visit {
                    node_id: start.record.id.clone(),
                    incoming: None,
                });
            }
            Frame::Visit { node_id, incoming } => {
                let node = lookup(&graph, &node_id)?;
                let flow = match &incoming {
                    Some(flow_id) => Some(
                        &graph
                            .flow(flow_id)
                            .ok_or_else(|| WorkflowError::FlowNotFound(flow_id.clone()))?
                            .record,
                    ),
                    None => None,
                };
                ctx.begin_execution(&node_id, incoming.clone());
                tracing::debug!("Starting node {} ({:?})", node_id, node.kind);
                let result = guard(&node_id, node.behavior.start(ctx, &node.record, flow).await)?;
                ctx.complete_execution(&node_id, &result, None);
                self.after_node(ctx, &graph, node, result, true, turn).await?;
            }
            Frame::Resume {
                node_id,
                signal,
                internal,
            } => {
                let node = lookup(&graph, &node_id)?;
                if ctx.last_status(&node_id) != Some(WorkflowStatus::Halted) {
                    tracing::debug!("Node {} is no longer halted, resume dropped", node_id);
                    return Ok(());
                }
                tracing::debug!("Resuming node {} ({:?})", node_id, node.kind);
                let result =
                    guard(&node_id, node.behavior.resume(ctx, &node.record, &signal).await)?;
                if !internal && result.status != WorkflowStatus::Faulted {
                    ctx.merge_output(&signal.output);
                }
                ctx.complete_execution(&node_id, &result, signal.user.clone());
                self.after_node(ctx, &graph, node, result, false, turn).await?;
            }
            Frame::Settle(node_id) => {
                let node = lookup(&graph, &node_id)?;
                if ctx.last_status(&node_id) != Some(WorkflowStatus::Idle) {
                    return Ok(());
                }
                ctx.begin_execution(&node_id, None);
                ctx.set_quiescent(true);
                let result = node.behavior.start(ctx, &node.record, None).await;
                ctx.set_quiescent(false);
                let result = guard(&node_id, result)?;
                ctx.complete_execution(&node_id, &result, None);
                self.after_node(ctx, &graph, node, result, true, turn).await?;
            }
        }
        Ok(())
    }

    async fn after_node(
        &self,
        ctx: &mut WorkflowContext,
        graph: &WorkflowGraph,
        node: &NodeContext,
        result: NodeExecutionResult,
        started: bool,
        turn: &mut Turn,
    ) -> Result<(), FlowError> {
        let node_id = node.record.id.as_str();
        let scopes = ctx.take_scope_requests();

        match result.status {
            WorkflowStatus::Finished => {
                tracing::debug!("Node {} finished with {:?}", node_id, result.outcomes);
                let selected = self.select_flows(ctx, graph, node, turn).await?;
                if node.kind.is_gateway() {
                    node.behavior
                        .post_execute_check(ctx, &node.record)
                        .await
                        .map_err(|e| modeling(node_id, e))?;
                } else if selected.is_empty() && !node.kind.is_end() {
                    return Err(FlowError::Modeling(format!(
                        "no sequence flow can be selected from node '{}'",
                        node_id
                    )));
                }

                if node.kind.is_activity() {
                    cancel_boundaries(ctx, graph, node_id);
                }
                if node.kind.is_boundary() {
                    interrupt_host(ctx, graph, node);
                }
                if node.kind.is_end() {
                    defer_owner_resume(node, turn);
                }
                for (flow_id, destination) in selected.into_iter().rev() {
                    turn.stack.push(Frame::Visit {
                        node_id: destination,
                        incoming: Some(flow_id),
                    });
                }
            }
            WorkflowStatus::Halted => {
                tracing::debug!("Node {} halted", node_id);
                if started && node.kind.is_activity() {
                    for boundary in graph.boundary_events(node_id).into_iter().rev() {
                        let armed = boundary
                            .behavior
                            .pre_start_check(ctx, &boundary.record, &node.record)
                            .await
                            .map_err(|e| modeling(&boundary.record.id, e))?;
                        if armed {
                            turn.stack.push(Frame::Visit {
                                node_id: boundary.record.id.clone(),
                                incoming: None,
                            });
                        }
                    }
                }
            }
            WorkflowStatus::Faulted => {
                let message = result
                    .message
                    .clone()
                    .unwrap_or_else(|| format!("node '{}' faulted", node_id));
                self.handle_fault(ctx, graph, node, message, turn).await?;
            }
            WorkflowStatus::Aborted => {
                tracing::debug!("Node {} aborted: {:?}", node_id, result.message);
                if node.kind.is_end() {
                    defer_owner_resume(node, turn);
                }
            }
            WorkflowStatus::Idle | WorkflowStatus::Executing => {
                tracing::debug!("Node {} idle: {:?}", node_id, result.message);
            }
        }

        for scope in scopes.into_iter().rev() {
            turn.stack.push(Frame::StartScope(scope));
        }
        Ok(())
    }

    /// Evaluate outgoing flows in definition order, default flows last, and
    /// record every selected flow. Returns `(flow id, destination id)` pairs.
    async fn select_flows(
        &self,
        ctx: &mut WorkflowContext,
        graph: &WorkflowGraph,
        node: &NodeContext,
        turn: &mut Turn,
    ) -> Result<Vec<(String, String)>, FlowError> {
        let node_id = node.record.id.as_str();
        let execution = ctx
            .state()
            .last_node_snapshot(node_id)
            .map(|s| s.sequence)
            .unwrap_or(0);

        let mut flows = graph.outgoings(node_id);
        flows.sort_by_key(|f| f.record.is_default);

        let mut selected = Vec::new();
        for flow in flows {
            if !turn.traversed.insert((flow.record.id.clone(), execution)) {
                continue;
            }
            let destination = lookup(graph, &flow.record.destination_ref)?;
            let eligible = flow
                .behavior
                .pre_select_check(ctx, node, destination, &flow.record)
                .await
                .map_err(|e| modeling(&flow.record.id, e))?;
            if eligible {
                tracing::debug!(
                    "Taking flow {} from {} to {}",
                    flow.record.id,
                    node_id,
                    flow.record.destination_ref
                );
                ctx.record_flow(&flow.record);
                selected.push((flow.record.id.clone(), flow.record.destination_ref.clone()));
            }
        }
        Ok(selected)
    }

    /// Offer a fault to the error boundaries of the node, then of each
    /// enclosing sub-process. Uncaught faults fault the workflow.
    async fn handle_fault(
        &self,
        ctx: &mut WorkflowContext,
        graph: &WorkflowGraph,
        node: &NodeContext,
        message: String,
        turn: &mut Turn,
    ) -> Result<(), FlowError> {
        tracing::warn!("Node {} faulted: {}", node.record.id, message);
        let mut current = node;
        loop {
            if current.kind.is_activity() {
                for boundary in graph.boundary_events(&current.record.id) {
                    if boundary.kind != NodeKind::Boundary(BoundaryTrigger::Error) {
                        continue;
                    }
                    let catches = boundary
                        .behavior
                        .pre_start_check(ctx, &boundary.record, &current.record)
                        .await
                        .map_err(|e| modeling(&boundary.record.id, e))?;
                    if catches {
                        tracing::info!(
                            "Fault of {} caught by boundary event {}",
                            current.record.id,
                            boundary.record.id
                        );
                        turn.stack.push(Frame::Visit {
                            node_id: boundary.record.id.clone(),
                            incoming: None,
                        });
                        return Ok(());
                    }
                }
            }

            let owner = current.record.owner_id.as_str();
            if owner.is_empty() {
                ctx.fault_workflow(message);
                return Ok(());
            }
            let host = lookup(graph, owner)?;
            let host_catches = graph
                .boundary_events(owner)
                .iter()
                .any(|b| b.kind == NodeKind::Boundary(BoundaryTrigger::Error));
            if host_catches && ctx.last_status(owner) == Some(WorkflowStatus::Halted) {
                ctx.terminate(owner);
                ctx.mark_faulted(owner, message.clone());
            }
            current = host;
        }
    }

    fn settle_candidates(ctx: &WorkflowContext, turn: &mut Turn) -> Vec<String> {
        ctx.state()
            .idling_nodes()
            .into_iter()
            .filter(|s| {
                ctx.get_node(&s.node_id)
                    .map(|n| n.kind.is_inclusive())
                    .unwrap_or(false)
            })
            .filter(|s| ctx.any_active_flow_to(&s.node_id, None))
            .filter(|s| !ctx.has_pending_upstream(&s.node_id))
            .filter(|s| turn.settled.insert((s.node_id.clone(), s.sequence)))
            .map(|s| s.node_id.clone())
            .collect()
    }
}

fn lookup<'g>(graph: &'g WorkflowGraph, node_id: &str) -> Result<&'g NodeContext, FlowError> {
    graph
        .node(node_id)
        .ok_or_else(|| WorkflowError::NodeNotFound(node_id.to_string()).into())
}

fn modeling(id: &str, error: NodeError) -> FlowError {
    match error {
        NodeError::Modeling(message) => FlowError::Modeling(message),
        other => FlowError::Modeling(format!("'{}': {}", id, other)),
    }
}

/// Behavior errors become faulted results; only modeling faults escape.
fn guard(
    node_id: &str,
    result: Result<NodeExecutionResult, NodeError>,
) -> Result<NodeExecutionResult, FlowError> {
    match result {
        Ok(result) => Ok(result),
        Err(e) if e.is_modeling() => Err(modeling(node_id, e)),
        Err(e) => {
            tracing::warn!("Node {} failed: {}", node_id, e);
            Ok(NodeExecutionResult::faulted(e.to_string()))
        }
    }
}

fn cancel_boundaries(ctx: &mut WorkflowContext, graph: &WorkflowGraph, host_id: &str) {
    for boundary in graph.boundary_events(host_id) {
        if ctx.cancel_blocking_event(&boundary.record.id) {
            tracing::debug!("Cancelled boundary event {} of {}", boundary.record.id, host_id);
        }
    }
}

/// A fired boundary event aborts the host still running next to it.
fn interrupt_host(ctx: &mut WorkflowContext, graph: &WorkflowGraph, boundary: &NodeContext) {
    let Some(host_id) = boundary.record.attached_to_ref.as_deref() else {
        return;
    };
    if ctx.last_status(host_id) == Some(WorkflowStatus::Halted) {
        if graph.node(host_id).map(|n| n.kind) == Some(NodeKind::SubProcess) {
            ctx.terminate(host_id);
        }
        ctx.cancel_blocking_event(host_id);
        tracing::info!("Boundary event {} interrupted {}", boundary.record.id, host_id);
    }
    cancel_boundaries(ctx, graph, host_id);
}

fn defer_owner_resume(node: &NodeContext, turn: &mut Turn) {
    if node.record.owner_id.is_empty() {
        return;
    }
    turn.deferred.push(Frame::Resume {
        node_id: node.record.owner_id.clone(),
        signal: ResumeSignal::default(),
        internal: true,
    });
}
