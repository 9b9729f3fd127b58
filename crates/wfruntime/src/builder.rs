use crate::registry::NodeRegistry;
use std::sync::Arc;
use wfcore::{FlowContext, NodeContext, ProcessDefinition, WorkflowError, WorkflowGraph};

/// Turns a process definition into a frozen [`WorkflowGraph`]
#[derive(Clone)]
pub struct ContextBuilder {
    registry: Arc<NodeRegistry>,
}

impl ContextBuilder {
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Resolve every record through the registry and freeze the result.
    ///
    /// Building is pure: the same definition always yields equal node and
    /// flow contexts.
    pub fn build(&self, definition: &ProcessDefinition) -> Result<WorkflowGraph, WorkflowError> {
        tracing::debug!(
            "Building definition {} ({} nodes, {} flows)",
            definition.id,
            definition.nodes.len(),
            definition.flows.len()
        );

        let nodes = definition
            .nodes
            .iter()
            .map(|record| {
                let behavior = self.registry.create_node(record)?;
                Ok(NodeContext::new(record.clone(), behavior))
            })
            .collect::<Result<Vec<_>, WorkflowError>>()?;

        let flows = definition
            .flows
            .iter()
            .map(|record| {
                let behavior = self.registry.create_flow(record)?;
                Ok(FlowContext::new(record.clone(), behavior))
            })
            .collect::<Result<Vec<_>, WorkflowError>>()?;

        let graph = WorkflowGraph::new(
            definition.id.clone(),
            definition.name.clone(),
            definition.processes.clone(),
            nodes,
            flows,
        )?;

        tracing::info!("Built definition {}", definition.id);
        Ok(graph)
    }
}
