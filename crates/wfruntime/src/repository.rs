use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use wfcore::{FlowError, WorkflowState};

/// Durable storage for instance state.
///
/// `key` is either the workflow id or the correlation id of the instance.
/// Implementations must give read-your-last-write for a given workflow id
/// and refuse to move a correlation id to another workflow.
#[async_trait]
pub trait StateRepository: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<WorkflowState>, FlowError>;

    /// Atomically replace the stored state of the instance
    async fn save(&self, key: &str, state: &WorkflowState) -> Result<(), FlowError>;
}

/// In-memory implementation of the state repository
pub struct InMemoryStateRepository {
    states: RwLock<HashMap<String, WorkflowState>>,
    correlations: RwLock<HashMap<String, String>>,
}

impl InMemoryStateRepository {
    pub fn new() -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            correlations: RwLock::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.states.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.states.read().await.is_empty()
    }
}

impl Default for InMemoryStateRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateRepository for InMemoryStateRepository {
    async fn get(&self, key: &str) -> Result<Option<WorkflowState>, FlowError> {
        let states = self.states.read().await;
        if let Some(state) = states.get(key) {
            return Ok(Some(state.clone()));
        }
        let correlations = self.correlations.read().await;
        Ok(correlations
            .get(key)
            .and_then(|workflow_id| states.get(workflow_id))
            .cloned())
    }

    async fn save(&self, key: &str, state: &WorkflowState) -> Result<(), FlowError> {
        let workflow_id = state.workflow_id().to_string();
        if key != workflow_id && state.workflow.correlation_id.as_deref() != Some(key) {
            return Err(FlowError::Repository(format!(
                "key '{}' does not identify workflow {}",
                key, workflow_id
            )));
        }

        let mut states = self.states.write().await;
        if let Some(correlation_id) = &state.workflow.correlation_id {
            let mut correlations = self.correlations.write().await;
            match correlations.get(correlation_id) {
                Some(owner) if *owner != workflow_id => {
                    return Err(FlowError::Repository(format!(
                        "correlation id '{}' already belongs to workflow {}",
                        correlation_id, owner
                    )));
                }
                Some(_) => {}
                None => {
                    correlations.insert(correlation_id.clone(), workflow_id.clone());
                }
            }
        }
        tracing::debug!(
            "Saved workflow {} ({} node snapshots)",
            workflow_id,
            state.node_snapshots.len()
        );
        states.insert(workflow_id, state.clone());
        Ok(())
    }
}
