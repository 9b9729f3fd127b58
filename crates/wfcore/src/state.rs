use crate::{NodeExecutionResult, WorkflowStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// One running instance of a definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub workflow_id: String,
    /// Definition the instance was started from
    pub ref_workflow_id: Option<String>,
    /// External business key that can be used instead of the workflow id
    pub correlation_id: Option<String>,
    pub status: WorkflowStatus,
    pub fault_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowRecord {
    pub fn new(ref_workflow_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            workflow_id: Uuid::new_v4().to_string(),
            ref_workflow_id: Some(ref_workflow_id.into()),
            correlation_id: None,
            status: WorkflowStatus::Idle,
            fault_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

/// One execution record of a node. Re-entering a node creates a new record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub execution_id: Uuid,
    pub node_id: String,
    /// Position in the instance history when the execution began
    pub sequence: u64,
    /// Position when the record reached a terminal status
    pub completed_sequence: Option<u64>,
    pub status: WorkflowStatus,
    pub outcomes: Vec<String>,
    pub message: Option<String>,
    pub user: Option<String>,
    pub incoming_flow: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A traversed flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowSnapshot {
    pub flow_id: String,
    pub source_ref: String,
    pub destination_ref: String,
    pub sequence: u64,
    pub taken_at: DateTime<Utc>,
}

/// Work an interrupted turn left queued, oldest last
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "camelCase")]
pub enum PendingStep {
    StartScope {
        owner_id: String,
    },
    Visit {
        node_id: String,
        incoming_flow: Option<String>,
    },
    /// Completion check of a sub-process host
    ResumeHost {
        node_id: String,
    },
}

impl PendingStep {
    pub fn node_id(&self) -> &str {
        match self {
            PendingStep::StartScope { owner_id } => owner_id,
            PendingStep::Visit { node_id, .. } | PendingStep::ResumeHost { node_id } => node_id,
        }
    }
}

/// Persisted execution history and data of one instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub workflow: WorkflowRecord,
    pub node_snapshots: Vec<NodeSnapshot>,
    pub flow_snapshots: Vec<FlowSnapshot>,
    pub input: HashMap<String, serde_json::Value>,
    pub output: HashMap<String, serde_json::Value>,
    /// Steps a cancelled turn did not get to, in stack order
    #[serde(default)]
    pub pending_steps: Vec<PendingStep>,
    next_sequence: u64,
}

impl WorkflowState {
    pub fn new(workflow: WorkflowRecord, input: HashMap<String, serde_json::Value>) -> Self {
        Self {
            workflow,
            node_snapshots: Vec::new(),
            flow_snapshots: Vec::new(),
            input,
            output: HashMap::new(),
            pending_steps: Vec::new(),
            next_sequence: 1,
        }
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow.workflow_id
    }

    fn advance(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }

    /// Latest execution record of a node
    pub fn last_node_snapshot(&self, node_id: &str) -> Option<&NodeSnapshot> {
        self.node_snapshots.iter().rev().find(|s| s.node_id == node_id)
    }

    fn last_node_snapshot_mut(&mut self, node_id: &str) -> Option<&mut NodeSnapshot> {
        self.node_snapshots
            .iter_mut()
            .rev()
            .find(|s| s.node_id == node_id)
    }

    /// Latest execution record of a node that reached a terminal status
    pub fn last_completed(&self, node_id: &str) -> Option<&NodeSnapshot> {
        self.node_snapshots
            .iter()
            .rev()
            .find(|s| s.node_id == node_id && s.status.is_terminal())
    }

    pub fn last_flow_snapshot(&self, flow_id: &str) -> Option<&FlowSnapshot> {
        self.flow_snapshots.iter().rev().find(|s| s.flow_id == flow_id)
    }

    /// Open an execution record for `node_id`. A record left idle by a
    /// waiting join is reused instead of stacking a new one.
    pub fn begin_execution(&mut self, node_id: &str, incoming_flow: Option<String>) -> u64 {
        let now = Utc::now();
        if let Some(snapshot) = self.last_node_snapshot_mut(node_id) {
            if snapshot.status == WorkflowStatus::Idle {
                snapshot.status = WorkflowStatus::Executing;
                snapshot.incoming_flow = incoming_flow;
                snapshot.updated_at = now;
                return snapshot.sequence;
            }
        }
        let sequence = self.advance();
        self.node_snapshots.push(NodeSnapshot {
            execution_id: Uuid::new_v4(),
            node_id: node_id.to_string(),
            sequence,
            completed_sequence: None,
            status: WorkflowStatus::Executing,
            outcomes: Vec::new(),
            message: None,
            user: None,
            incoming_flow,
            started_at: now,
            updated_at: now,
        });
        sequence
    }

    /// Apply a node result to the node's latest execution record.
    pub fn complete_execution(
        &mut self,
        node_id: &str,
        result: &NodeExecutionResult,
        user: Option<String>,
    ) {
        let completed = if result.status.is_terminal() {
            Some(self.advance())
        } else {
            None
        };
        if let Some(snapshot) = self.last_node_snapshot_mut(node_id) {
            snapshot.status = result.status;
            snapshot.outcomes = result.outcomes.clone();
            snapshot.message = result.message.clone();
            if user.is_some() {
                snapshot.user = user;
            }
            snapshot.completed_sequence = completed;
            snapshot.updated_at = Utc::now();
        }
    }

    /// Force the latest record of a node to a terminal status.
    pub fn close_execution(&mut self, node_id: &str, status: WorkflowStatus, message: impl Into<String>) {
        let sequence = self.advance();
        if let Some(snapshot) = self.last_node_snapshot_mut(node_id) {
            snapshot.status = status;
            snapshot.message = Some(message.into());
            snapshot.completed_sequence = Some(sequence);
            snapshot.updated_at = Utc::now();
        }
    }

    pub fn record_flow(&mut self, flow_id: &str, source_ref: &str, destination_ref: &str) -> u64 {
        let sequence = self.advance();
        self.flow_snapshots.push(FlowSnapshot {
            flow_id: flow_id.to_string(),
            source_ref: source_ref.to_string(),
            destination_ref: destination_ref.to_string(),
            sequence,
            taken_at: Utc::now(),
        });
        sequence
    }

    /// Latest record of every node that ran, in history order
    pub fn latest_snapshots(&self) -> Vec<&NodeSnapshot> {
        let mut latest: HashMap<&str, usize> = HashMap::new();
        for (idx, snapshot) in self.node_snapshots.iter().enumerate() {
            latest.insert(snapshot.node_id.as_str(), idx);
        }
        let mut indices: Vec<usize> = latest.into_values().collect();
        indices.sort_unstable();
        indices.into_iter().map(|i| &self.node_snapshots[i]).collect()
    }

    fn latest_with(&self, status: WorkflowStatus) -> Vec<&NodeSnapshot> {
        self.latest_snapshots()
            .into_iter()
            .filter(|s| s.status == status)
            .collect()
    }

    /// Halted nodes awaiting a resume
    pub fn blocking_nodes(&self) -> Vec<&NodeSnapshot> {
        self.latest_with(WorkflowStatus::Halted)
    }

    /// Gateways waiting for more incoming branches
    pub fn idling_nodes(&self) -> Vec<&NodeSnapshot> {
        self.latest_with(WorkflowStatus::Idle)
    }

    pub fn faulted_nodes(&self) -> Vec<&NodeSnapshot> {
        self.latest_with(WorkflowStatus::Faulted)
    }

    /// Every finished execution record
    pub fn executed_nodes(&self) -> Vec<&NodeSnapshot> {
        self.node_snapshots
            .iter()
            .filter(|s| s.status == WorkflowStatus::Finished)
            .collect()
    }
}
