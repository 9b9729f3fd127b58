use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a workflow instance or of a single node execution record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkflowStatus {
    Idle,
    Executing,
    Halted,
    Finished,
    Faulted,
    Aborted,
}

impl WorkflowStatus {
    /// `Finished`, `Faulted` and `Aborted` close an execution record.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Finished | WorkflowStatus::Faulted | WorkflowStatus::Aborted
        )
    }
}

impl Default for WorkflowStatus {
    fn default() -> Self {
        WorkflowStatus::Idle
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A named signal a node can produce on completion
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Outcome(pub String);

impl Outcome {
    pub const DONE: &'static str = "Done";
    pub const THROWED: &'static str = "Throwed";
    pub const CATCHED: &'static str = "Catched";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Outcome {
    fn from(s: &str) -> Self {
        Outcome(s.to_string())
    }
}

/// What a node operation decided. Drives the executor's next action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeExecutionResult {
    pub status: WorkflowStatus,
    pub outcomes: Vec<String>,
    pub message: Option<String>,
}

impl NodeExecutionResult {
    pub fn finished<I, S>(outcomes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            status: WorkflowStatus::Finished,
            outcomes: outcomes.into_iter().map(Into::into).collect(),
            message: None,
        }
    }

    pub fn halted() -> Self {
        Self {
            status: WorkflowStatus::Halted,
            outcomes: Vec::new(),
            message: None,
        }
    }

    pub fn faulted(message: impl Into<String>) -> Self {
        Self {
            status: WorkflowStatus::Faulted,
            outcomes: Vec::new(),
            message: Some(message.into()),
        }
    }

    pub fn aborted(message: impl Into<String>) -> Self {
        Self {
            status: WorkflowStatus::Aborted,
            outcomes: Vec::new(),
            message: Some(message.into()),
        }
    }

    /// Nothing to do yet; the node stays idle (e.g. a join waiting for branches).
    pub fn noop(message: impl Into<String>) -> Self {
        Self {
            status: WorkflowStatus::Idle,
            outcomes: Vec::new(),
            message: Some(message.into()),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn is_noop(&self) -> bool {
        self.status == WorkflowStatus::Idle
    }
}
