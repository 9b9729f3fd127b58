use crate::builder::ContextBuilder;
use crate::cache::GraphCache;
use crate::executor::{Trigger, TurnOutcome, WorkflowExecutor};
use crate::registry::NodeRegistry;
use crate::repository::StateRepository;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use wfcore::{
    DomainEvent, EventBus, FlowError, ProcessDefinition, ResumeSignal, TriggerRegistrar,
    WorkflowContext, WorkflowError, WorkflowRecord, WorkflowState, WorkflowStatus,
};

/// Main runtime: owns definitions and drives instance turns
pub struct FlowRuntime {
    builder: ContextBuilder,
    cache: GraphCache,
    executor: WorkflowExecutor,
    repository: Arc<dyn StateRepository>,
    triggers: Arc<dyn TriggerRegistrar>,
    event_bus: Arc<EventBus>,
    definitions: RwLock<HashMap<String, ProcessDefinition>>,
    instance_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    config: RuntimeConfig,
}

impl FlowRuntime {
    pub fn new(
        registry: Arc<NodeRegistry>,
        repository: Arc<dyn StateRepository>,
        triggers: Arc<dyn TriggerRegistrar>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            builder: ContextBuilder::new(registry),
            cache: GraphCache::new(Duration::from_secs(config.graph_cache_ttl_secs)),
            executor: WorkflowExecutor::new(config.max_steps),
            repository,
            triggers,
            event_bus: Arc::new(EventBus::new(config.event_buffer_size)),
            definitions: RwLock::new(HashMap::new()),
            instance_locks: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        self.builder.registry()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Validate and register a definition. Re-registering an id replaces it.
    pub async fn register_definition(&self, definition: ProcessDefinition) -> Result<(), FlowError> {
        self.cache
            .get_or_build(&definition, |d| self.builder.build(d))
            .await?;
        tracing::info!("Registered definition {}", definition.id);
        self.definitions
            .write()
            .await
            .insert(definition.id.clone(), definition);
        Ok(())
    }

    pub async fn definition_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.definitions.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Create an instance of a registered definition and run its first turn
    pub async fn start_workflow(
        &self,
        definition_id: &str,
        options: StartOptions,
    ) -> Result<TurnReport, FlowError> {
        // Held from the uniqueness check until the first save
        let correlation_lock = match &options.correlation_id {
            Some(correlation_id) => {
                Some(self.instance_lock(&format!("correlation:{}", correlation_id)).await)
            }
            None => None,
        };
        let report = {
            let _correlation_guard = match &correlation_lock {
                Some(lock) => Some(lock.lock().await),
                None => None,
            };
            self.create_and_start(definition_id, options).await
        };
        drop(correlation_lock);
        self.prune_locks().await;
        report
    }

    async fn create_and_start(
        &self,
        definition_id: &str,
        options: StartOptions,
    ) -> Result<TurnReport, FlowError> {
        let mut record = WorkflowRecord::new(definition_id);
        if let Some(correlation_id) = &options.correlation_id {
            if self.repository.get(correlation_id).await?.is_some() {
                return Err(FlowError::Execution(format!(
                    "correlation id '{}' is already in use",
                    correlation_id
                )));
            }
            record = record.with_correlation(correlation_id.clone());
        }
        let state = WorkflowState::new(record, options.input);
        let workflow_id = state.workflow_id().to_string();
        tracing::info!("Created workflow {} from definition {}", workflow_id, definition_id);

        let lock = self.instance_lock(&workflow_id).await;
        let _guard = lock.lock().await;
        let cancellation = options.cancellation.unwrap_or_default();
        self.run_turn(state, Trigger::start(), &cancellation).await
    }

    /// Continue a halted node of the instance identified by `key`
    /// (workflow id or correlation id)
    pub async fn resume(
        &self,
        key: &str,
        node_id: &str,
        signal: ResumeSignal,
    ) -> Result<TurnReport, FlowError> {
        self.resume_with_cancellation(key, node_id, signal, &CancellationToken::new())
            .await
    }

    pub async fn resume_with_cancellation(
        &self,
        key: &str,
        node_id: &str,
        signal: ResumeSignal,
        cancellation: &CancellationToken,
    ) -> Result<TurnReport, FlowError> {
        self.locked_turn(key, Trigger::resume(node_id, signal), cancellation)
            .await
    }

    /// Run the steps an interrupted turn of the instance left pending
    pub async fn continue_workflow(
        &self,
        key: &str,
        cancellation: &CancellationToken,
    ) -> Result<TurnReport, FlowError> {
        self.locked_turn(key, Trigger::Continue, cancellation).await
    }

    async fn locked_turn(
        &self,
        key: &str,
        trigger: Trigger,
        cancellation: &CancellationToken,
    ) -> Result<TurnReport, FlowError> {
        let workflow_id = self.load(key).await?.workflow.workflow_id;

        let lock = self.instance_lock(&workflow_id).await;
        let report = {
            let _guard = lock.lock().await;
            // Re-read under the lock so the turn sees the last committed state
            match self.load(&workflow_id).await {
                Ok(state) => self.run_turn(state, trigger, cancellation).await,
                Err(e) => Err(e),
            }
        };
        drop(lock);
        self.prune_locks().await;
        report
    }

    pub async fn state(&self, key: &str) -> Result<Option<WorkflowState>, FlowError> {
        self.repository.get(key).await
    }

    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<DomainEvent> {
        self.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    async fn load(&self, key: &str) -> Result<WorkflowState, FlowError> {
        self.repository
            .get(key)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(key.to_string()).into())
    }

    async fn instance_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.instance_locks.lock().await;
        Arc::clone(locks.entry(key.to_string()).or_default())
    }

    /// Forget locks nobody holds or waits for. Clones are only handed out
    /// under the map lock, so a count of one means the map is the sole owner.
    async fn prune_locks(&self) {
        let mut locks = self.instance_locks.lock().await;
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    /// Number of per-instance locks currently tracked
    pub async fn tracked_locks(&self) -> usize {
        self.instance_locks.lock().await.len()
    }

    async fn run_turn(
        &self,
        state: WorkflowState,
        trigger: Trigger,
        cancellation: &CancellationToken,
    ) -> Result<TurnReport, FlowError> {
        let definition_id = state
            .workflow
            .ref_workflow_id
            .clone()
            .ok_or_else(|| WorkflowError::Invalid("instance has no definition".to_string()))?;
        let definition = self
            .definitions
            .read()
            .await
            .get(&definition_id)
            .cloned()
            .ok_or_else(|| WorkflowError::NotFound(definition_id.clone()))?;
        let graph = self
            .cache
            .get_or_build(&definition, |d| self.builder.build(d))
            .await?;

        let ctx = WorkflowContext::new(graph, state, Arc::clone(&self.triggers));
        let outcome = match self.executor.execute(ctx, trigger, cancellation).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("Turn of definition {} failed: {}", definition_id, e);
                return Err(e);
            }
        };

        if outcome.skipped.is_none() {
            let workflow_id = outcome.state.workflow_id().to_string();
            self.repository.save(&workflow_id, &outcome.state).await?;
            self.event_bus.publish(&outcome.events);
        }
        Ok(TurnReport::from(outcome))
    }
}

/// Options for [`FlowRuntime::start_workflow`]
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub correlation_id: Option<String>,
    pub input: HashMap<String, serde_json::Value>,
    pub cancellation: Option<CancellationToken>,
}

impl StartOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_input(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.input.insert(key.into(), value.into());
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

/// Summary of a committed turn
#[derive(Debug, Clone)]
pub struct TurnReport {
    pub workflow_id: String,
    pub status: WorkflowStatus,
    /// Nodes waiting for a resume, in execution order
    pub blocking_nodes: Vec<String>,
    pub events: Vec<DomainEvent>,
    pub steps: usize,
    pub interrupted: bool,
    pub skipped: Option<String>,
    /// Nodes an interrupted turn did not reach, see [`FlowRuntime::continue_workflow`]
    pub pending: Vec<String>,
    pub state: WorkflowState,
}

impl From<TurnOutcome> for TurnReport {
    fn from(outcome: TurnOutcome) -> Self {
        Self {
            workflow_id: outcome.state.workflow_id().to_string(),
            status: outcome.state.workflow.status,
            blocking_nodes: outcome
                .state
                .blocking_nodes()
                .iter()
                .map(|s| s.node_id.clone())
                .collect(),
            events: outcome.events,
            steps: outcome.steps,
            interrupted: outcome.interrupted,
            skipped: outcome.skipped,
            pending: outcome
                .state
                .pending_steps
                .iter()
                .map(|s| s.node_id().to_string())
                .collect(),
            state: outcome.state,
        }
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Upper bound on node steps in one turn
    pub max_steps: usize,
    pub event_buffer_size: usize,
    pub graph_cache_ttl_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_steps: 10_000,
            event_buffer_size: 1000,
            graph_cache_ttl_secs: 300,
        }
    }
}
