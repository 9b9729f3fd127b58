use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriggerKind {
    Timer,
    Message,
}

/// Request to arm an external wake-up for a halted node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerRequest {
    pub workflow_id: String,
    pub correlation_id: Option<String>,
    pub node_id: String,
    pub kind: TriggerKind,
    /// Node configuration (timer duration, message name, ...)
    pub config: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationResult {
    pub succeeded: bool,
    pub message: Option<String>,
}

impl RegistrationResult {
    pub fn success() -> Self {
        Self {
            succeeded: true,
            message: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            message: Some(message.into()),
        }
    }
}

/// Timer and message subsystems implement this to receive wait registrations.
/// The matching callback re-enters the engine through a resume of `node_id`.
#[async_trait]
pub trait TriggerRegistrar: Send + Sync {
    async fn register(&self, request: TriggerRequest) -> RegistrationResult;
}

/// Accepts every registration without arming anything
pub struct NoopTriggerRegistrar;

#[async_trait]
impl TriggerRegistrar for NoopTriggerRegistrar {
    async fn register(&self, request: TriggerRequest) -> RegistrationResult {
        tracing::debug!(
            "Ignoring {:?} registration for node {} of workflow {}",
            request.kind,
            request.node_id,
            request.workflow_id
        );
        RegistrationResult::success()
    }
}
