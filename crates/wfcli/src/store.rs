use async_trait::async_trait;
use std::path::{Path, PathBuf};
use wfcore::{FlowError, ProcessDefinition, WorkflowState};
use wfruntime::StateRepository;

/// State repository keeping one JSON document per instance under a
/// directory. Correlation ids map to workflow ids through small index files.
pub struct JsonFileStateRepository {
    root: PathBuf,
}

impl JsonFileStateRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn instance_path(&self, workflow_id: &str) -> PathBuf {
        self.root.join("instances").join(format!("{}.json", workflow_id))
    }

    fn correlation_path(&self, correlation_id: &str) -> PathBuf {
        self.root.join("correlations").join(correlation_id)
    }

    fn definitions_dir(&self) -> PathBuf {
        self.root.join("definitions")
    }

    /// Keep a copy of a started definition so later resumes can rebuild it
    pub async fn store_definition(&self, definition: &ProcessDefinition) -> Result<(), FlowError> {
        check_key(&definition.id)?;
        let path = self.definitions_dir().join(format!("{}.json", definition.id));
        write_atomic(&path, &serde_json::to_vec_pretty(definition)?).await
    }

    pub async fn load_definitions(&self) -> Result<Vec<ProcessDefinition>, FlowError> {
        let dir = self.definitions_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut definitions = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            definitions.push(serde_json::from_slice(&bytes)?);
        }
        Ok(definitions)
    }

    async fn read_state(&self, workflow_id: &str) -> Result<Option<WorkflowState>, FlowError> {
        let path = self.instance_path(workflow_id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl StateRepository for JsonFileStateRepository {
    async fn get(&self, key: &str) -> Result<Option<WorkflowState>, FlowError> {
        check_key(key)?;
        if let Some(state) = self.read_state(key).await? {
            return Ok(Some(state));
        }
        match tokio::fs::read_to_string(self.correlation_path(key)).await {
            Ok(workflow_id) => self.read_state(workflow_id.trim()).await,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, key: &str, state: &WorkflowState) -> Result<(), FlowError> {
        check_key(key)?;
        let workflow_id = state.workflow_id();
        if key != workflow_id && state.workflow.correlation_id.as_deref() != Some(key) {
            return Err(FlowError::Repository(format!(
                "key '{}' does not identify workflow {}",
                key, workflow_id
            )));
        }

        if let Some(correlation_id) = &state.workflow.correlation_id {
            check_key(correlation_id)?;
            match tokio::fs::read_to_string(self.correlation_path(correlation_id)).await {
                Ok(owner) if owner.trim() != workflow_id => {
                    return Err(FlowError::Repository(format!(
                        "correlation id '{}' already belongs to workflow {}",
                        correlation_id,
                        owner.trim()
                    )));
                }
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        let bytes = serde_json::to_vec_pretty(state)?;
        write_atomic(&self.instance_path(workflow_id), &bytes).await?;
        if let Some(correlation_id) = &state.workflow.correlation_id {
            write_atomic(&self.correlation_path(correlation_id), workflow_id.as_bytes()).await?;
        }
        tracing::debug!("Wrote workflow {} to {}", workflow_id, self.root.display());
        Ok(())
    }
}

fn check_key(key: &str) -> Result<(), FlowError> {
    if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
        return Err(FlowError::Repository(format!("invalid key '{}'", key)));
    }
    Ok(())
}

/// Replace `path` with `bytes` through a temporary file and a rename
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), FlowError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
