use async_trait::async_trait;
use tokio::sync::Mutex;
use wfcore::{RegistrationResult, TriggerRegistrar, TriggerRequest};

/// Records every registration so a host (or a test) can fire them later
#[derive(Default)]
pub struct InMemoryTriggerRegistrar {
    requests: Mutex<Vec<TriggerRequest>>,
}

impl InMemoryTriggerRegistrar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registrations made so far, oldest first
    pub async fn requests(&self) -> Vec<TriggerRequest> {
        self.requests.lock().await.clone()
    }

    /// Registrations for a given workflow
    pub async fn pending_for(&self, workflow_id: &str) -> Vec<TriggerRequest> {
        self.requests
            .lock()
            .await
            .iter()
            .filter(|r| r.workflow_id == workflow_id)
            .cloned()
            .collect()
    }

    /// Forget a registration once its node was resumed or cancelled
    pub async fn remove(&self, workflow_id: &str, node_id: &str) {
        self.requests
            .lock()
            .await
            .retain(|r| !(r.workflow_id == workflow_id && r.node_id == node_id));
    }
}

#[async_trait]
impl TriggerRegistrar for InMemoryTriggerRegistrar {
    async fn register(&self, request: TriggerRequest) -> RegistrationResult {
        tracing::debug!(
            "Registered {:?} trigger for node {} of workflow {}",
            request.kind,
            request.node_id,
            request.workflow_id
        );
        self.requests.lock().await.push(request);
        RegistrationResult::success()
    }
}
