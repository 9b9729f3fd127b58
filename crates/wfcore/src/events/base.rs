use crate::{NodeRecord, WorkflowStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Notifications raised while a turn executes, dispatched by the host after
/// the turn's state has been saved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DomainEvent {
    ProcessStarted {
        workflow_id: String,
        node: NodeRecord,
        timestamp: DateTime<Utc>,
    },
    ProcessFinished {
        workflow_id: String,
        node: NodeRecord,
        status: WorkflowStatus,
        timestamp: DateTime<Utc>,
    },
    WorkflowFinished {
        workflow_id: String,
        node: NodeRecord,
        status: WorkflowStatus,
        timestamp: DateTime<Utc>,
    },
    TimerEventStart {
        workflow_id: String,
        node: NodeRecord,
        timestamp: DateTime<Utc>,
    },
    /// A halted wait was cancelled; its timer or subscription can be dropped
    NodeCancelled {
        workflow_id: String,
        node_id: String,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::ProcessStarted { .. } => "process.started",
            DomainEvent::ProcessFinished { .. } => "process.finished",
            DomainEvent::WorkflowFinished { .. } => "workflow.finished",
            DomainEvent::TimerEventStart { .. } => "timer.started",
            DomainEvent::NodeCancelled { .. } => "node.cancelled",
        }
    }

    pub fn workflow_id(&self) -> &str {
        match self {
            DomainEvent::ProcessStarted { workflow_id, .. }
            | DomainEvent::ProcessFinished { workflow_id, .. }
            | DomainEvent::WorkflowFinished { workflow_id, .. }
            | DomainEvent::TimerEventStart { workflow_id, .. }
            | DomainEvent::NodeCancelled { workflow_id, .. } => workflow_id,
        }
    }
}

/// Global event bus
pub struct EventBus {
    sender: broadcast::Sender<DomainEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: DomainEvent) {
        let _ = self.sender.send(event);
    }

    /// Publish a turn's events in the order they were raised
    pub fn publish(&self, events: &[DomainEvent]) {
        for event in events {
            tracing::debug!("Publishing {} for workflow {}", event.event_type(), event.workflow_id());
            self.emit(event.clone());
        }
    }
}
