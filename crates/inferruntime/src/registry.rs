use infercore::{NodeExecutor, NodeKind, ParamSpec, PortSpec};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Metadata about a node type
#[derive(Debug, Clone, Serialize)]
pub struct ExecutorMetadata {
    pub node_type: String,
    pub kind: NodeKind,
    pub description: String,
    pub category: String,
    pub parameters: Vec<ParamSpec>,
    pub inputs: Vec<PortSpec>,
    pub outputs: Vec<PortSpec>,
}

/// Registry of available node types.
///
/// Populated once at startup and then shared read-only behind an `Arc`.
pub struct ExecutorRegistry {
    executors: BTreeMap<String, Arc<dyn NodeExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self {
            executors: BTreeMap::new(),
        }
    }

    /// Register an executor under its own type tag, replacing any previous one.
    pub fn register(&mut self, executor: Arc<dyn NodeExecutor>) {
        let node_type = executor.node_type().to_string();
        tracing::debug!("Registering node type: {}", node_type);
        if self.executors.insert(node_type.clone(), executor).is_some() {
            tracing::warn!("Node type {} registered twice; keeping the latest", node_type);
        }
    }

    /// Look up the executor for a tag. Unknown tags are a plain miss.
    pub fn get(&self, node_type: &str) -> Option<Arc<dyn NodeExecutor>> {
        self.executors.get(node_type).cloned()
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.executors.contains_key(node_type)
    }

    /// All registered tags, sorted.
    pub fn get_all_types(&self) -> Vec<String> {
        self.executors.keys().cloned().collect()
    }

    pub fn get_metadata(&self, node_type: &str) -> Option<ExecutorMetadata> {
        self.executors.get(node_type).map(|e| ExecutorMetadata {
            node_type: node_type.to_string(),
            kind: e.kind(),
            description: e.description().to_string(),
            category: e.category().to_string(),
            parameters: e.parameters(),
            inputs: e.input_schema(),
            outputs: e.output_schema(),
        })
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
