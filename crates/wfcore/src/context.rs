//! Per-instance runtime context.
//!
//! A [`WorkflowContext`] joins the shared graph of a definition with the
//! execution state of one instance for the duration of a single turn. Node and
//! flow behaviors read the graph and the snapshot history through it and
//! record their effects on it; nothing here performs I/O. At the end of a turn
//! the context is consumed into the new state and the events it buffered.

use crate::{
    DomainEvent, FlowContext, FlowRecord, NodeContext, NodeExecutionResult, NodeRecord,
    PendingStep, TriggerRegistrar, WorkflowGraph, WorkflowRecord, WorkflowState, WorkflowStatus,
};
use chrono::Utc;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

pub struct WorkflowContext {
    graph: Arc<WorkflowGraph>,
    state: WorkflowState,
    events: Vec<DomainEvent>,
    triggers: Arc<dyn TriggerRegistrar>,
    scope_requests: Vec<String>,
    pending_finish: Option<NodeRecord>,
    pending_fault: Option<String>,
    terminated_scopes: HashSet<String>,
    quiescent: bool,
}

impl WorkflowContext {
    pub fn new(
        graph: Arc<WorkflowGraph>,
        state: WorkflowState,
        triggers: Arc<dyn TriggerRegistrar>,
    ) -> Self {
        Self {
            graph,
            state,
            events: Vec::new(),
            triggers,
            scope_requests: Vec::new(),
            pending_finish: None,
            pending_fault: None,
            terminated_scopes: HashSet::new(),
            quiescent: false,
        }
    }

    pub fn graph(&self) -> &Arc<WorkflowGraph> {
        &self.graph
    }

    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    pub fn workflow(&self) -> &WorkflowRecord {
        &self.state.workflow
    }

    pub fn workflow_id(&self) -> &str {
        &self.state.workflow.workflow_id
    }

    pub fn triggers(&self) -> Arc<dyn TriggerRegistrar> {
        Arc::clone(&self.triggers)
    }

    pub fn events(&self) -> &[DomainEvent] {
        &self.events
    }

    pub fn into_parts(self) -> (WorkflowState, Vec<DomainEvent>) {
        (self.state, self.events)
    }

    // ---- graph navigation ----

    pub fn get_node(&self, id: &str) -> Option<&NodeContext> {
        self.graph.node(id)
    }

    pub fn get_incomings(&self, node_id: &str) -> Vec<&FlowContext> {
        self.graph.incomings(node_id)
    }

    pub fn get_outgoings(&self, node_id: &str) -> Vec<&FlowContext> {
        self.graph.outgoings(node_id)
    }

    /// Start event owned by a process scope (`""` for the root process)
    pub fn get_start_node(&self, owner_id: &str) -> Option<&NodeContext> {
        self.graph.start_node(owner_id)
    }

    // ---- execution state queries ----

    pub fn last_status(&self, node_id: &str) -> Option<WorkflowStatus> {
        self.state.last_node_snapshot(node_id).map(|s| s.status)
    }

    /// Outcomes recorded by the node's latest execution
    pub fn get_outcomes(&self, node_id: &str) -> Vec<String> {
        self.state
            .last_node_snapshot(node_id)
            .map(|s| s.outcomes.clone())
            .unwrap_or_default()
    }

    pub fn is_finished(&self, node_id: &str) -> bool {
        self.last_status(node_id) == Some(WorkflowStatus::Finished)
    }

    pub fn is_default_outgoing(&self, flow: &FlowRecord, source_id: &str) -> bool {
        flow.is_default && flow.source_ref == source_id
    }

    /// Flow through which the node's latest execution was entered
    pub fn current_incoming_flow(&self, node_id: &str) -> Option<&str> {
        self.state
            .last_node_snapshot(node_id)
            .and_then(|s| s.incoming_flow.as_deref())
    }

    fn completion_baseline(&self, node_id: &str) -> u64 {
        self.state
            .last_completed(node_id)
            .and_then(|s| s.completed_sequence)
            .unwrap_or(0)
    }

    /// Distinct incoming flows fired since the node last completed
    pub fn active_incoming_flows(&self, node_id: &str) -> BTreeSet<String> {
        let baseline = self.completion_baseline(node_id);
        self.state
            .flow_snapshots
            .iter()
            .filter(|s| s.destination_ref == node_id && s.sequence > baseline)
            .map(|s| s.flow_id.clone())
            .collect()
    }

    /// Whether the node's current execution already sent a flow out
    pub fn any_active_flow_from(&self, node_id: &str) -> bool {
        let Some(current) = self.state.last_node_snapshot(node_id) else {
            return false;
        };
        self.state
            .flow_snapshots
            .iter()
            .any(|s| s.source_ref == node_id && s.sequence > current.sequence)
    }

    pub fn any_active_flow_to(&self, node_id: &str, excluding: Option<&str>) -> bool {
        self.active_incoming_flows(node_id)
            .iter()
            .any(|f| Some(f.as_str()) != excluding)
    }

    /// True once every distinct incoming flow fired since the last completion
    pub fn all_flow_active_to(&self, node_id: &str) -> bool {
        let incomings = self.graph.incomings(node_id);
        if incomings.is_empty() {
            return false;
        }
        let active = self.active_incoming_flows(node_id);
        incomings.iter().all(|f| active.contains(&f.record.id))
    }

    /// Whether the last completed execution of `node_id` already consumed the
    /// latest firing of `flow_id`.
    pub fn is_flow_consumed(&self, flow_id: &str, node_id: &str) -> bool {
        let Some(flow) = self.state.last_flow_snapshot(flow_id) else {
            return false;
        };
        match self.state.last_completed(node_id) {
            Some(done) if done.status == WorkflowStatus::Finished => {
                done.completed_sequence.unwrap_or(0) > flow.sequence
            }
            _ => false,
        }
    }

    /// Whether a halted node remains inside the scope (nested scopes included)
    pub fn has_blocking_in_scope(&self, scope: &str) -> bool {
        self.state
            .blocking_nodes()
            .iter()
            .any(|s| s.node_id != scope && self.graph.is_owned_by(&s.node_id, scope))
    }

    /// Whether a halted or idle node could still fire one of the incoming
    /// flows of `node_id` that has not arrived yet.
    pub fn has_pending_upstream(&self, node_id: &str) -> bool {
        let active = self.active_incoming_flows(node_id);
        let missing: Vec<&str> = self
            .graph
            .incomings(node_id)
            .into_iter()
            .filter(|f| !active.contains(&f.record.id))
            .map(|f| f.record.source_ref.as_str())
            .collect();
        if missing.is_empty() {
            return false;
        }
        self.state
            .latest_snapshots()
            .into_iter()
            .filter(|s| s.node_id != node_id)
            .filter(|s| matches!(s.status, WorkflowStatus::Halted | WorkflowStatus::Idle))
            .any(|s| missing.iter().any(|source| self.graph.has_path(&s.node_id, source)))
    }

    /// Set while the executor re-evaluates waiting joins after all branches of
    /// the turn have settled.
    pub fn is_quiescent(&self) -> bool {
        self.quiescent
    }

    pub fn set_quiescent(&mut self, quiescent: bool) {
        self.quiescent = quiescent;
    }

    // ---- writes ----

    pub fn add_domain_event(&mut self, event: DomainEvent) {
        self.events.push(event);
    }

    /// Complete the workflow with `status`.
    ///
    /// A normal finish only takes effect through [`settle_finish`] once the
    /// turn ran out of work, so branches still queued behind the end event
    /// can halt first. Abnormal statuses apply immediately.
    ///
    /// [`settle_finish`]: WorkflowContext::settle_finish
    pub fn finish(&mut self, node: &NodeRecord, status: WorkflowStatus) -> bool {
        if self.state.workflow.status.is_terminal() {
            return false;
        }
        if status == WorkflowStatus::Finished {
            self.pending_finish = Some(node.clone());
            return true;
        }
        self.complete_workflow(node, status);
        true
    }

    /// Apply a requested normal finish. Refused while branches are halted.
    pub fn settle_finish(&mut self) -> bool {
        let Some(node) = self.pending_finish.take() else {
            return false;
        };
        if self.state.workflow.status.is_terminal() {
            return false;
        }
        if !self.state.blocking_nodes().is_empty() {
            tracing::debug!(
                "Workflow {} reached {} but still has halted branches",
                self.workflow_id(),
                node.id
            );
            return false;
        }
        self.complete_workflow(&node, WorkflowStatus::Finished);
        true
    }

    fn complete_workflow(&mut self, node: &NodeRecord, status: WorkflowStatus) {
        self.set_workflow_status(status);
        let workflow_id = self.workflow_id().to_string();
        self.add_domain_event(DomainEvent::WorkflowFinished {
            workflow_id,
            node: node.clone(),
            status,
            timestamp: Utc::now(),
        });
    }

    /// Abort every halted or idle node owned, directly or through nested
    /// sub-processes, by `process_id` (`""` aborts the whole instance).
    ///
    /// Work still queued inside the scope in this turn is dropped too, see
    /// [`is_in_terminated_scope`](WorkflowContext::is_in_terminated_scope).
    pub fn terminate(&mut self, process_id: &str) -> Vec<String> {
        self.terminated_scopes.insert(process_id.to_string());
        let targets: Vec<(String, WorkflowStatus)> = self
            .state
            .latest_snapshots()
            .into_iter()
            .filter(|s| matches!(s.status, WorkflowStatus::Halted | WorkflowStatus::Idle))
            .filter(|s| s.node_id != process_id && self.graph.is_owned_by(&s.node_id, process_id))
            .map(|s| (s.node_id.clone(), s.status))
            .collect();
        for (node_id, status) in &targets {
            self.state
                .close_execution(node_id, WorkflowStatus::Aborted, "terminated");
            if *status == WorkflowStatus::Halted {
                self.raise_cancelled(node_id);
            }
        }
        targets.into_iter().map(|(id, _)| id).collect()
    }

    /// Whether `node_id` lies inside a scope terminated during this turn
    pub fn is_in_terminated_scope(&self, node_id: &str) -> bool {
        self.terminated_scopes
            .iter()
            .any(|scope| scope != node_id && self.graph.is_owned_by(node_id, scope))
    }

    /// A terminated scope that is started again runs normally.
    pub fn reopen_scope(&mut self, owner_id: &str) {
        self.terminated_scopes.remove(owner_id);
    }

    /// Abort a halted node without running its resume behavior.
    pub fn cancel_blocking_event(&mut self, node_id: &str) -> bool {
        if self.last_status(node_id) != Some(WorkflowStatus::Halted) {
            return false;
        }
        self.state
            .close_execution(node_id, WorkflowStatus::Aborted, "cancelled");
        self.raise_cancelled(node_id);
        true
    }

    fn raise_cancelled(&mut self, node_id: &str) {
        let workflow_id = self.workflow_id().to_string();
        self.add_domain_event(DomainEvent::NodeCancelled {
            workflow_id,
            node_id: node_id.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// Ask the executor to start the scope owned by `owner_id` in this turn.
    pub fn request_scope_start(&mut self, owner_id: impl Into<String>) {
        self.scope_requests.push(owner_id.into());
    }

    pub fn take_scope_requests(&mut self) -> Vec<String> {
        std::mem::take(&mut self.scope_requests)
    }

    pub fn merge_output(&mut self, output: &HashMap<String, serde_json::Value>) {
        for (key, value) in output {
            self.state.output.insert(key.clone(), value.clone());
        }
    }

    pub fn begin_execution(&mut self, node_id: &str, incoming_flow: Option<String>) -> u64 {
        self.state.begin_execution(node_id, incoming_flow)
    }

    pub fn complete_execution(
        &mut self,
        node_id: &str,
        result: &NodeExecutionResult,
        user: Option<String>,
    ) {
        self.state.complete_execution(node_id, result, user);
    }

    /// Close a node's latest record as faulted outside of its own behavior
    pub fn mark_faulted(&mut self, node_id: &str, message: impl Into<String>) {
        self.state
            .close_execution(node_id, WorkflowStatus::Faulted, message);
    }

    pub fn record_flow(&mut self, flow: &FlowRecord) -> u64 {
        self.state
            .record_flow(&flow.id, &flow.source_ref, &flow.destination_ref)
    }

    pub fn set_workflow_status(&mut self, status: WorkflowStatus) {
        self.state.workflow.status = status;
        self.state.workflow.updated_at = Utc::now();
    }

    /// Record an uncaught fault. The workflow becomes Faulted through
    /// [`settle_fault`] at the end of the turn; sibling branches already
    /// queued still run. The first fault of a turn wins.
    ///
    /// [`settle_fault`]: WorkflowContext::settle_fault
    pub fn fault_workflow(&mut self, message: impl Into<String>) {
        if self.state.workflow.status.is_terminal() || self.pending_fault.is_some() {
            return;
        }
        self.pending_fault = Some(message.into());
    }

    pub fn has_pending_fault(&self) -> bool {
        self.pending_fault.is_some()
    }

    /// Apply a fault recorded by [`fault_workflow`](WorkflowContext::fault_workflow).
    pub fn settle_fault(&mut self) -> bool {
        let Some(message) = self.pending_fault.take() else {
            return false;
        };
        if self.state.workflow.status.is_terminal() {
            return false;
        }
        tracing::warn!("Workflow {} faulted: {}", self.workflow_id(), message);
        self.state.workflow.fault_message = Some(message);
        self.set_workflow_status(WorkflowStatus::Faulted);
        true
    }

    pub fn take_pending_steps(&mut self) -> Vec<PendingStep> {
        std::mem::take(&mut self.state.pending_steps)
    }

    pub fn set_pending_steps(&mut self, steps: Vec<PendingStep>) {
        self.state.pending_steps = steps;
    }
}
