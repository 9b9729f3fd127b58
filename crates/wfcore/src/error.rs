use crate::WorkflowStatus;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    /// The graph cannot be executed as modeled. Fatal to the current turn.
    #[error("Modeling fault: {0}")]
    Modeling(String),

    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FlowError {
    pub fn is_modeling(&self) -> bool {
        matches!(
            self,
            FlowError::Modeling(_)
                | FlowError::Node(NodeError::Modeling(_))
                | FlowError::Workflow(WorkflowError::StepLimitExceeded(_))
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    #[error("Modeling fault: {0}")]
    Modeling(String),

    #[error("Trigger registration failed: {0}")]
    Registration(String),
}

impl NodeError {
    pub fn is_modeling(&self) -> bool {
        matches!(self, NodeError::Modeling(_))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("Workflow not found: {0}")]
    NotFound(String),

    #[error("Invalid workflow: {0}")]
    Invalid(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Flow not found: {0}")]
    FlowNotFound(String),

    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    #[error("Unknown flow type: {0}")]
    UnknownFlowType(String),

    #[error("Invalid connection: {0}")]
    InvalidConnection(String),

    #[error("Duplicate id: {0}")]
    DuplicateId(String),

    #[error("Workflow {workflow_id} is already {status:?}")]
    Terminated {
        workflow_id: String,
        status: WorkflowStatus,
    },

    #[error("Turn exceeded {0} steps")]
    StepLimitExceeded(usize),
}
