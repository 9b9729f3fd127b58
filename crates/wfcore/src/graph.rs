//! Frozen node/flow graph of one definition.
//!
//! Nodes and flows live in arenas indexed by position. Adjacency lists keep
//! definition order so traversal is deterministic; a petgraph `DiGraph`
//! mirrors the topology (plus host → boundary attachment edges) for
//! reachability questions.

use crate::{FlowBehavior, FlowRecord, NodeBehavior, NodeRecord, ProcessRecord, WorkflowError};
use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndEventKind {
    Plain,
    Terminate,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CatchTrigger {
    Timer,
    Message,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoundaryTrigger {
    Error,
    Timer,
}

/// Closed set of node families understood by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Activity,
    SubProcess,
    StartEvent,
    EndEvent(EndEventKind),
    IntermediateCatch(CatchTrigger),
    IntermediateThrow,
    Boundary(BoundaryTrigger),
    ExclusiveGateway,
    ParallelGateway,
    EventBasedGateway,
    InclusiveGateway,
}

impl NodeKind {
    pub fn is_activity(&self) -> bool {
        matches!(self, NodeKind::Activity | NodeKind::SubProcess)
    }

    pub fn is_event(&self) -> bool {
        matches!(
            self,
            NodeKind::StartEvent
                | NodeKind::EndEvent(_)
                | NodeKind::IntermediateCatch(_)
                | NodeKind::IntermediateThrow
                | NodeKind::Boundary(_)
        )
    }

    pub fn is_gateway(&self) -> bool {
        matches!(
            self,
            NodeKind::ExclusiveGateway
                | NodeKind::ParallelGateway
                | NodeKind::EventBasedGateway
                | NodeKind::InclusiveGateway
        )
    }

    /// At most one incoming and one outgoing branch per execution
    pub fn is_exclusive(&self) -> bool {
        matches!(self, NodeKind::ExclusiveGateway | NodeKind::EventBasedGateway)
    }

    pub fn is_event_based(&self) -> bool {
        matches!(self, NodeKind::EventBasedGateway)
    }

    pub fn is_parallel(&self) -> bool {
        matches!(self, NodeKind::ParallelGateway)
    }

    pub fn is_inclusive(&self) -> bool {
        matches!(self, NodeKind::InclusiveGateway)
    }

    pub fn is_catching(&self) -> bool {
        matches!(self, NodeKind::IntermediateCatch(_))
    }

    pub fn is_boundary(&self) -> bool {
        matches!(self, NodeKind::Boundary(_))
    }

    pub fn is_start(&self) -> bool {
        matches!(self, NodeKind::StartEvent)
    }

    pub fn is_end(&self) -> bool {
        matches!(self, NodeKind::EndEvent(_))
    }
}

/// A node of the graph: its record plus the behavior built for it
#[derive(Clone)]
pub struct NodeContext {
    pub record: NodeRecord,
    pub kind: NodeKind,
    pub behavior: Arc<dyn NodeBehavior>,
}

impl NodeContext {
    pub fn new(record: NodeRecord, behavior: Arc<dyn NodeBehavior>) -> Self {
        Self {
            kind: behavior.kind(),
            record,
            behavior,
        }
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }
}

impl PartialEq for NodeContext {
    fn eq(&self, other: &Self) -> bool {
        self.record == other.record && self.kind == other.kind
    }
}

impl fmt::Debug for NodeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeContext")
            .field("record", &self.record)
            .field("kind", &self.kind)
            .finish()
    }
}

#[derive(Clone)]
pub struct FlowContext {
    pub record: FlowRecord,
    pub behavior: Arc<dyn FlowBehavior>,
}

impl FlowContext {
    pub fn new(record: FlowRecord, behavior: Arc<dyn FlowBehavior>) -> Self {
        Self { record, behavior }
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }
}

impl PartialEq for FlowContext {
    fn eq(&self, other: &Self) -> bool {
        self.record == other.record
    }
}

impl fmt::Debug for FlowContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowContext")
            .field("record", &self.record)
            .finish()
    }
}

/// Immutable graph shared by every instance of a definition
pub struct WorkflowGraph {
    definition_id: String,
    name: Option<String>,
    processes: Vec<ProcessRecord>,
    nodes: Vec<NodeContext>,
    flows: Vec<FlowContext>,
    node_index: HashMap<String, usize>,
    flow_index: HashMap<String, usize>,
    incoming: Vec<Vec<usize>>,
    outgoing: Vec<Vec<usize>>,
    boundaries: Vec<Vec<usize>>,
    topology: DiGraph<usize, ()>,
}

impl WorkflowGraph {
    /// Freeze a set of built nodes and flows, validating the structure.
    pub fn new(
        definition_id: impl Into<String>,
        name: Option<String>,
        processes: Vec<ProcessRecord>,
        nodes: Vec<NodeContext>,
        flows: Vec<FlowContext>,
    ) -> Result<Self, WorkflowError> {
        let mut node_index = HashMap::with_capacity(nodes.len());
        let mut topology = DiGraph::with_capacity(nodes.len(), flows.len());
        for (idx, node) in nodes.iter().enumerate() {
            if node_index.insert(node.record.id.clone(), idx).is_some() {
                return Err(WorkflowError::DuplicateId(node.record.id.clone()));
            }
            topology.add_node(idx);
        }

        let mut flow_index = HashMap::with_capacity(flows.len());
        let mut incoming = vec![Vec::new(); nodes.len()];
        let mut outgoing = vec![Vec::new(); nodes.len()];
        for (idx, flow) in flows.iter().enumerate() {
            let record = &flow.record;
            if node_index.contains_key(&record.id) || flow_index.insert(record.id.clone(), idx).is_some() {
                return Err(WorkflowError::DuplicateId(record.id.clone()));
            }
            let source = *node_index.get(&record.source_ref).ok_or_else(|| {
                WorkflowError::InvalidConnection(format!(
                    "flow '{}' references unknown source '{}'",
                    record.id, record.source_ref
                ))
            })?;
            let destination = *node_index.get(&record.destination_ref).ok_or_else(|| {
                WorkflowError::InvalidConnection(format!(
                    "flow '{}' references unknown destination '{}'",
                    record.id, record.destination_ref
                ))
            })?;
            outgoing[source].push(idx);
            incoming[destination].push(idx);
            topology.add_edge(NodeIndex::new(source), NodeIndex::new(destination), ());
        }

        let mut boundaries = vec![Vec::new(); nodes.len()];
        for (idx, node) in nodes.iter().enumerate() {
            match (&node.record.attached_to_ref, node.kind.is_boundary()) {
                (Some(host), true) => {
                    let host_idx = *node_index.get(host).ok_or_else(|| {
                        WorkflowError::Invalid(format!(
                            "boundary event '{}' is attached to unknown node '{}'",
                            node.record.id, host
                        ))
                    })?;
                    if !nodes[host_idx].kind.is_activity() {
                        return Err(WorkflowError::Invalid(format!(
                            "boundary event '{}' must be attached to an activity, '{}' is not",
                            node.record.id, host
                        )));
                    }
                    boundaries[host_idx].push(idx);
                    topology.add_edge(NodeIndex::new(host_idx), NodeIndex::new(idx), ());
                }
                (None, true) => {
                    return Err(WorkflowError::Invalid(format!(
                        "boundary event '{}' has no attachedToRef",
                        node.record.id
                    )));
                }
                (Some(_), false) => {
                    return Err(WorkflowError::Invalid(format!(
                        "only boundary events can be attached, '{}' is {:?}",
                        node.record.id, node.kind
                    )));
                }
                (None, false) => {}
            }
        }

        let graph = Self {
            definition_id: definition_id.into(),
            name,
            processes,
            nodes,
            flows,
            node_index,
            flow_index,
            incoming,
            outgoing,
            boundaries,
            topology,
        };
        graph.validate()?;
        Ok(graph)
    }

    fn validate(&self) -> Result<(), WorkflowError> {
        let mut process_ids = HashSet::new();
        for process in &self.processes {
            if !process_ids.insert(process.id.as_str()) {
                return Err(WorkflowError::DuplicateId(process.id.clone()));
            }
            if !process.owner_id.is_empty()
                && self.node(&process.owner_id).map(|n| n.kind) != Some(NodeKind::SubProcess)
            {
                return Err(WorkflowError::Invalid(format!(
                    "process '{}' is owned by '{}', which is not a sub-process",
                    process.id, process.owner_id
                )));
            }
        }

        let mut scopes: HashSet<&str> = HashSet::new();
        scopes.insert("");
        for node in &self.nodes {
            let owner = node.record.owner_id.as_str();
            if !owner.is_empty() {
                match self.node(owner) {
                    Some(host) if host.kind == NodeKind::SubProcess => {}
                    _ => {
                        return Err(WorkflowError::Invalid(format!(
                            "node '{}' is owned by '{}', which is not a sub-process",
                            node.record.id, owner
                        )))
                    }
                }
            }
            if node.kind == NodeKind::SubProcess {
                scopes.insert(node.record.id.as_str());
            }
        }

        for scope in scopes {
            let starts = self
                .nodes
                .iter()
                .filter(|n| n.kind.is_start() && n.record.owner_id == scope)
                .count();
            if starts != 1 {
                let label = if scope.is_empty() { "<root>" } else { scope };
                return Err(WorkflowError::Invalid(format!(
                    "scope '{}' must own exactly one start event, found {}",
                    label, starts
                )));
            }
        }

        for (idx, node) in self.nodes.iter().enumerate() {
            let outgoing = &self.outgoing[idx];
            if outgoing.is_empty() && !node.kind.is_end() {
                return Err(WorkflowError::Invalid(format!(
                    "node '{}' has no outgoing flow",
                    node.record.id
                )));
            }
            if node.kind.is_end() && !outgoing.is_empty() {
                return Err(WorkflowError::Invalid(format!(
                    "end event '{}' cannot have outgoing flows",
                    node.record.id
                )));
            }
            if node.kind.is_start() && !self.incoming[idx].is_empty() {
                return Err(WorkflowError::Invalid(format!(
                    "start event '{}' cannot have incoming flows",
                    node.record.id
                )));
            }
            let defaults = outgoing
                .iter()
                .filter(|f| self.flows[**f].record.is_default)
                .count();
            if defaults > 1 {
                return Err(WorkflowError::Invalid(format!(
                    "node '{}' declares {} default flows",
                    node.record.id, defaults
                )));
            }
            if node.kind.is_event_based() {
                for f in outgoing {
                    let destination = &self.flows[*f].record.destination_ref;
                    let catching = self.node(destination).map(|d| d.kind.is_catching());
                    if catching != Some(true) {
                        return Err(WorkflowError::Invalid(format!(
                            "event-based gateway '{}' must lead to intermediate catch events, '{}' is not one",
                            node.record.id, destination
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn definition_id(&self) -> &str {
        &self.definition_id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn processes(&self) -> &[ProcessRecord] {
        &self.processes
    }

    pub fn nodes(&self) -> &[NodeContext] {
        &self.nodes
    }

    pub fn flows(&self) -> &[FlowContext] {
        &self.flows
    }

    pub fn node(&self, id: &str) -> Option<&NodeContext> {
        self.node_index.get(id).map(|idx| &self.nodes[*idx])
    }

    pub fn flow(&self, id: &str) -> Option<&FlowContext> {
        self.flow_index.get(id).map(|idx| &self.flows[*idx])
    }

    /// Incoming flows of a node in definition order
    pub fn incomings(&self, node_id: &str) -> Vec<&FlowContext> {
        self.node_index
            .get(node_id)
            .map(|idx| self.incoming[*idx].iter().map(|f| &self.flows[*f]).collect())
            .unwrap_or_default()
    }

    /// Outgoing flows of a node in definition order
    pub fn outgoings(&self, node_id: &str) -> Vec<&FlowContext> {
        self.node_index
            .get(node_id)
            .map(|idx| self.outgoing[*idx].iter().map(|f| &self.flows[*f]).collect())
            .unwrap_or_default()
    }

    /// Boundary events attached to a host activity
    pub fn boundary_events(&self, host_id: &str) -> Vec<&NodeContext> {
        self.node_index
            .get(host_id)
            .map(|idx| self.boundaries[*idx].iter().map(|b| &self.nodes[*b]).collect())
            .unwrap_or_default()
    }

    pub fn start_node(&self, owner_id: &str) -> Option<&NodeContext> {
        self.nodes
            .iter()
            .find(|n| n.kind.is_start() && n.record.owner_id == owner_id)
    }

    pub fn end_events(&self, owner_id: &str) -> Vec<&NodeContext> {
        self.nodes
            .iter()
            .filter(|n| n.kind.is_end() && n.record.owner_id == owner_id)
            .collect()
    }

    /// True when `node_id` sits inside `scope`, directly or through nested
    /// sub-processes. Every node belongs to the root scope `""`.
    pub fn is_owned_by(&self, node_id: &str, scope: &str) -> bool {
        if scope.is_empty() {
            return true;
        }
        let mut owner = match self.node(node_id) {
            Some(node) => node.record.owner_id.as_str(),
            None => return false,
        };
        while !owner.is_empty() {
            if owner == scope {
                return true;
            }
            owner = match self.node(owner) {
                Some(node) => node.record.owner_id.as_str(),
                None => return false,
            };
        }
        false
    }

    /// Whether `to` can be reached from `from` following flows and boundary
    /// attachments. A node reaches itself.
    pub fn has_path(&self, from: &str, to: &str) -> bool {
        match (self.node_index.get(from), self.node_index.get(to)) {
            (Some(a), Some(b)) => has_path_connecting(
                &self.topology,
                NodeIndex::new(*a),
                NodeIndex::new(*b),
                None,
            ),
            _ => false,
        }
    }
}

impl fmt::Debug for WorkflowGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowGraph")
            .field("definition_id", &self.definition_id)
            .field("nodes", &self.nodes)
            .field("flows", &self.flows)
            .finish()
    }
}
