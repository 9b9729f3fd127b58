use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type WorkflowId = String;
pub type NodeId = String;
pub type FlowId = String;

pub const SEQUENCE_FLOW: &str = "sequenceFlow";

/// Complete process definition, the shape a definition parser must produce
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessDefinition {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub processes: Vec<ProcessRecord>,
    #[serde(default)]
    pub nodes: Vec<NodeRecord>,
    #[serde(default)]
    pub flows: Vec<FlowRecord>,
}

impl ProcessDefinition {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            processes: Vec::new(),
            nodes: Vec::new(),
            flows: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn add_process(&mut self, process: ProcessRecord) {
        self.processes.push(process);
    }

    pub fn add_node(&mut self, node: NodeRecord) -> NodeId {
        let id = node.id.clone();
        self.nodes.push(node);
        id
    }

    pub fn add_flow(&mut self, flow: FlowRecord) -> FlowId {
        let id = flow.id.clone();
        self.flows.push(flow);
        id
    }

    /// Add an unconditional sequence flow owned by the source's scope.
    pub fn connect(
        &mut self,
        id: impl Into<String>,
        source: impl Into<String>,
        destination: impl Into<String>,
    ) -> FlowId {
        let source = source.into();
        let owner = self
            .find_node(&source)
            .map(|n| n.owner_id.clone())
            .unwrap_or_default();
        self.add_flow(FlowRecord::new(id, source, destination).with_owner(owner))
    }

    pub fn find_node(&self, id: &str) -> Option<&NodeRecord> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn find_flow(&self, id: &str) -> Option<&FlowRecord> {
        self.flows.iter().find(|f| f.id == id)
    }
}

/// A process or sub-process scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Empty for the root process, otherwise the owning sub-process node id
    #[serde(default)]
    pub owner_id: String,
}

impl ProcessRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            owner_id: String::new(),
        }
    }

    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = owner_id.into();
        self
    }
}

/// Node declaration in a definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Empty for top-level nodes, otherwise the id of the owning sub-process
    #[serde(default)]
    pub owner_id: String,
    #[serde(default)]
    pub attached_to_ref: Option<NodeId>,
    #[serde(default)]
    pub config: BTreeMap<String, serde_json::Value>,
}

impl NodeRecord {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            name: None,
            owner_id: String::new(),
            attached_to_ref: None,
            config: BTreeMap::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = owner_id.into();
        self
    }

    pub fn attached_to(mut self, host: impl Into<String>) -> Self {
        self.attached_to_ref = Some(host.into());
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    pub fn is_top_level(&self) -> bool {
        self.owner_id.is_empty()
    }
}

/// Directed edge between two nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowRecord {
    pub id: FlowId,
    #[serde(default = "default_flow_type")]
    pub flow_type: String,
    pub source_ref: NodeId,
    pub destination_ref: NodeId,
    #[serde(default)]
    pub condition_expression: Option<String>,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub owner_id: String,
}

fn default_flow_type() -> String {
    SEQUENCE_FLOW.to_string()
}

impl FlowRecord {
    pub fn new(
        id: impl Into<String>,
        source_ref: impl Into<String>,
        destination_ref: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            flow_type: default_flow_type(),
            source_ref: source_ref.into(),
            destination_ref: destination_ref.into(),
            condition_expression: None,
            is_default: false,
            owner_id: String::new(),
        }
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition_expression = Some(condition.into());
        self
    }

    pub fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }

    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = owner_id.into();
        self
    }
}
