use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use wfcore::{ProcessDefinition, WorkflowError, WorkflowGraph};

struct CacheEntry {
    hash: u64,
    graph: Arc<WorkflowGraph>,
    inserted_at: Instant,
}

/// Built graphs keyed by definition id.
///
/// An entry is rebuilt when its time-to-live elapsed or when the definition
/// content no longer hashes to the cached value.
pub struct GraphCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl GraphCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn content_hash(definition: &ProcessDefinition) -> Result<u64, WorkflowError> {
        let bytes = serde_json::to_vec(definition)
            .map_err(|e| WorkflowError::Invalid(format!("cannot hash definition: {}", e)))?;
        let mut hasher = DefaultHasher::new();
        bytes.hash(&mut hasher);
        Ok(hasher.finish())
    }

    pub async fn get_or_build<F>(
        &self,
        definition: &ProcessDefinition,
        build: F,
    ) -> Result<Arc<WorkflowGraph>, WorkflowError>
    where
        F: FnOnce(&ProcessDefinition) -> Result<WorkflowGraph, WorkflowError>,
    {
        let hash = Self::content_hash(definition)?;
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(&definition.id) {
                if entry.hash == hash && entry.inserted_at.elapsed() < self.ttl {
                    return Ok(Arc::clone(&entry.graph));
                }
            }
        }

        let graph = Arc::new(build(definition)?);
        tracing::debug!("Caching graph for definition {}", definition.id);
        self.entries.write().await.insert(
            definition.id.clone(),
            CacheEntry {
                hash,
                graph: Arc::clone(&graph),
                inserted_at: Instant::now(),
            },
        );
        Ok(graph)
    }

    pub async fn invalidate(&self, definition_id: &str) -> bool {
        self.entries.write().await.remove(definition_id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
