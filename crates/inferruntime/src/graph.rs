//! Submission-time checks and the execution plan derived from a workflow.

use crate::registry::ExecutorRegistry;
use infercore::schema::ports_compatible;
use infercore::{NodeExecutor, NodeId, NodeKind, WorkflowDefinition, WorkflowError};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, Reversed};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub const BRANCH_TRUE: &str = "true";
pub const BRANCH_FALSE: &str = "false";

/// A validated workflow, ready to be scheduled.
pub struct ExecutionPlan {
    /// Node ids in topological order.
    pub order: Vec<NodeId>,
    /// Indices into `workflow.edges` of the edges entering each node.
    pub incoming: HashMap<NodeId, Vec<usize>>,
    /// Every node from which each node is reachable.
    pub ancestors: HashMap<NodeId, HashSet<NodeId>>,
    /// Nodes whose outcome decides between a `partial` and a `failed` run.
    pub outputs: Vec<NodeId>,
    /// For each branch node, the nodes reachable from each of its handles.
    /// Unconditional edges leaving a branch node count for every handle.
    pub branch_reach: HashMap<NodeId, HashMap<String, HashSet<NodeId>>>,
    pub executors: HashMap<NodeId, Arc<dyn NodeExecutor>>,
}

impl ExecutionPlan {
    pub fn executor(&self, node_id: &str) -> Option<&Arc<dyn NodeExecutor>> {
        self.executors.get(node_id)
    }

    pub fn kind(&self, node_id: &str) -> NodeKind {
        self.executors
            .get(node_id)
            .map(|e| e.kind())
            .unwrap_or(NodeKind::Task)
    }

    /// Whether `node_id` lies below branch node `branch` on handle `handle`.
    pub fn reachable_from_handle(&self, branch: &str, handle: &str, node_id: &str) -> bool {
        self.branch_reach
            .get(branch)
            .and_then(|handles| handles.get(handle))
            .is_some_and(|reach| reach.contains(node_id))
    }

    /// Whether `node_id` lies below branch node `branch` on any handle.
    pub fn reachable_from_branch(&self, branch: &str, node_id: &str) -> bool {
        self.branch_reach
            .get(branch)
            .is_some_and(|handles| handles.values().any(|reach| reach.contains(node_id)))
    }
}

/// Validate a workflow against the registry and derive its execution plan.
///
/// Everything checked here rejects the whole run: unknown node types,
/// dangling or malformed edges, cycles, incompatible ports, invalid
/// parameters on structural nodes (merge, loop) and, recursively, invalid
/// loop bodies.
pub fn plan(
    workflow: &WorkflowDefinition,
    registry: &ExecutorRegistry,
) -> Result<ExecutionPlan, WorkflowError> {
    let mut graph: DiGraph<NodeId, usize> = DiGraph::new();
    let mut node_to_index: HashMap<NodeId, NodeIndex> = HashMap::new();
    let mut executors = HashMap::new();

    for node in &workflow.nodes {
        if node.id.is_empty() {
            return Err(WorkflowError::Invalid("node with empty id".to_string()));
        }
        if node_to_index.contains_key(&node.id) {
            return Err(WorkflowError::DuplicateNode(node.id.clone()));
        }
        let executor = registry
            .get(&node.node_type)
            .ok_or_else(|| WorkflowError::UnknownNodeType {
                node_id: node.id.clone(),
                node_type: node.node_type.clone(),
            })?;

        match executor.kind() {
            NodeKind::Merge => executor.validate_parameters(&node.parameters).map_err(|message| {
                WorkflowError::InvalidParameters {
                    node_id: node.id.clone(),
                    message,
                }
            })?,
            NodeKind::Loop => validate_loop(workflow, node, executor.as_ref(), registry)?,
            NodeKind::Task | NodeKind::Branch => {}
        }

        node_to_index.insert(node.id.clone(), graph.add_node(node.id.clone()));
        executors.insert(node.id.clone(), executor);
    }

    let mut incoming: HashMap<NodeId, Vec<usize>> = HashMap::new();
    for (i, edge) in workflow.edges.iter().enumerate() {
        let from = *node_to_index
            .get(&edge.source)
            .ok_or_else(|| WorkflowError::NodeNotFound(edge.source.clone()))?;
        let to = *node_to_index
            .get(&edge.target)
            .ok_or_else(|| WorkflowError::NodeNotFound(edge.target.clone()))?;

        let source_exec = &executors[&edge.source];
        let target_exec = &executors[&edge.target];

        if source_exec.kind() == NodeKind::Branch {
            if let Some(handle) = edge.source_handle.as_deref() {
                if handle != BRANCH_TRUE && handle != BRANCH_FALSE {
                    return Err(WorkflowError::InvalidConnection(format!(
                        "edge {} leaves branch node {} from unknown handle '{}'",
                        edge.id, edge.source, handle
                    )));
                }
            }
        }

        if !ports_compatible(&source_exec.output_schema(), &target_exec.input_schema()) {
            return Err(WorkflowError::InvalidConnection(format!(
                "edge {}: outputs of {} ({}) cannot feed inputs of {} ({})",
                edge.id,
                edge.source,
                source_exec.node_type(),
                edge.target,
                target_exec.node_type()
            )));
        }

        graph.add_edge(from, to, i);
        incoming.entry(edge.target.clone()).or_default().push(i);
    }

    let order = toposort(&graph, None)
        .map_err(|_| WorkflowError::CyclicDependency)?
        .into_iter()
        .map(|idx| graph[idx].clone())
        .collect::<Vec<_>>();

    let mut ancestors = HashMap::new();
    let reversed = Reversed(&graph);
    for (node_id, idx) in &node_to_index {
        let mut seen = HashSet::new();
        let mut dfs = Dfs::new(reversed, *idx);
        while let Some(visited) = dfs.next(reversed) {
            if visited != *idx {
                seen.insert(graph[visited].clone());
            }
        }
        ancestors.insert(node_id.clone(), seen);
    }

    let outputs = match &workflow.settings.output_node {
        Some(output) => {
            if !node_to_index.contains_key(output) {
                return Err(WorkflowError::NodeNotFound(output.clone()));
            }
            vec![output.clone()]
        }
        None => order
            .iter()
            .filter(|id| {
                graph
                    .neighbors_directed(node_to_index[*id], petgraph::Direction::Outgoing)
                    .next()
                    .is_none()
            })
            .cloned()
            .collect(),
    };

    let mut branch_reach: HashMap<NodeId, HashMap<String, HashSet<NodeId>>> = HashMap::new();
    for edge in &workflow.edges {
        if executors[&edge.source].kind() != NodeKind::Branch {
            continue;
        }
        let handles = match edge.source_handle.as_deref() {
            Some(handle) => vec![handle],
            None => vec![BRANCH_TRUE, BRANCH_FALSE],
        };
        let mut reached = HashSet::new();
        let mut dfs = Dfs::new(&graph, node_to_index[&edge.target]);
        while let Some(visited) = dfs.next(&graph) {
            reached.insert(graph[visited].clone());
        }
        let per_handle = branch_reach.entry(edge.source.clone()).or_default();
        for handle in handles {
            per_handle
                .entry(handle.to_string())
                .or_default()
                .extend(reached.iter().cloned());
        }
    }

    Ok(ExecutionPlan {
        order,
        incoming,
        ancestors,
        outputs,
        branch_reach,
        executors,
    })
}

fn validate_loop(
    workflow: &WorkflowDefinition,
    node: &infercore::NodeSpec,
    executor: &dyn NodeExecutor,
    registry: &ExecutorRegistry,
) -> Result<(), WorkflowError> {
    let invalid = |message: String| WorkflowError::InvalidParameters {
        node_id: node.id.clone(),
        message,
    };
    executor.validate_parameters(&node.parameters).map_err(invalid)?;

    let body = node
        .parameters
        .get("body")
        .ok_or_else(|| invalid("missing required parameter 'body'".to_string()))?;
    let body = WorkflowDefinition::from_body(&workflow.name, body).map_err(invalid)?;
    plan(&body, registry).map_err(|e| invalid(format!("body: {e}")))?;
    Ok(())
}
