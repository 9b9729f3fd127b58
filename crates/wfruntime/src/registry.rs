use std::collections::HashMap;
use std::sync::Arc;
use wfcore::{FlowBehavior, FlowRecord, NodeBehavior, NodeError, NodeRecord, WorkflowError};

/// Factory trait for creating node behaviors
pub trait NodeFactory: Send + Sync {
    /// Create the behavior for a node record of this type
    fn create(&self, record: &NodeRecord) -> Result<Arc<dyn NodeBehavior>, NodeError>;

    /// Get node type identifier
    fn node_type(&self) -> &str;

    /// Optional: Get node metadata (description, category, outcomes)
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::default()
    }
}

/// Factory trait for creating flow behaviors
pub trait FlowFactory: Send + Sync {
    fn create(&self, record: &FlowRecord) -> Result<Arc<dyn FlowBehavior>, NodeError>;

    fn flow_type(&self) -> &str;
}

/// Metadata about a node type
#[derive(Debug, Clone)]
pub struct NodeMetadata {
    pub description: String,
    pub category: String,
    pub outcomes: Vec<String>,
}

impl Default for NodeMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
            outcomes: Vec::new(),
        }
    }
}

/// Registry of available node and flow types
pub struct NodeRegistry {
    factories: HashMap<String, Arc<dyn NodeFactory>>,
    flow_factories: HashMap<String, Arc<dyn FlowFactory>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            flow_factories: HashMap::new(),
        }
    }

    /// Register a node factory
    pub fn register(&mut self, factory: Arc<dyn NodeFactory>) {
        let node_type = factory.node_type().to_string();
        tracing::info!("Registering node type: {}", node_type);
        self.factories.insert(node_type, factory);
    }

    /// Register a flow factory
    pub fn register_flow(&mut self, factory: Arc<dyn FlowFactory>) {
        let flow_type = factory.flow_type().to_string();
        tracing::info!("Registering flow type: {}", flow_type);
        self.flow_factories.insert(flow_type, factory);
    }

    /// Create a node behavior for a record
    pub fn create_node(&self, record: &NodeRecord) -> Result<Arc<dyn NodeBehavior>, WorkflowError> {
        let factory = self
            .factories
            .get(&record.node_type)
            .ok_or_else(|| WorkflowError::UnknownNodeType(record.node_type.clone()))?;

        factory.create(record).map_err(|e| {
            WorkflowError::Invalid(format!("Failed to create node '{}': {}", record.id, e))
        })
    }

    /// Create a flow behavior for a record
    pub fn create_flow(&self, record: &FlowRecord) -> Result<Arc<dyn FlowBehavior>, WorkflowError> {
        let factory = self
            .flow_factories
            .get(&record.flow_type)
            .ok_or_else(|| WorkflowError::UnknownFlowType(record.flow_type.clone()))?;

        factory.create(record).map_err(|e| {
            WorkflowError::Invalid(format!("Failed to create flow '{}': {}", record.id, e))
        })
    }

    /// Get all registered node types, sorted
    pub fn list_node_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn list_flow_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.flow_factories.keys().cloned().collect();
        types.sort();
        types
    }

    /// Get metadata for a node type
    pub fn get_metadata(&self, node_type: &str) -> Option<NodeMetadata> {
        self.factories.get(node_type).map(|f| f.metadata())
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
