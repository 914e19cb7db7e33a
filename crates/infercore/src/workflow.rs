use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

pub type WorkflowId = String;
pub type NodeId = String;

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Complete workflow definition as submitted for a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowDefinition {
    #[serde(default = "new_id")]
    pub id: WorkflowId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub edges: Vec<EdgeSpec>,
    #[serde(default)]
    pub settings: WorkflowSettings,
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            description: None,
            nodes: Vec::new(),
            edges: Vec::new(),
            settings: WorkflowSettings::default(),
        }
    }

    pub fn add_node(&mut self, node: NodeSpec) -> NodeId {
        let id = node.id.clone();
        self.nodes.push(node);
        id
    }

    pub fn connect(&mut self, source: impl Into<NodeId>, target: impl Into<NodeId>) {
        self.edges.push(EdgeSpec::new(source, target));
    }

    /// Connect from one branch (`"true"` / `"false"`) of an `if` node.
    pub fn connect_branch(
        &mut self,
        source: impl Into<NodeId>,
        branch: impl Into<String>,
        target: impl Into<NodeId>,
    ) {
        let mut edge = EdgeSpec::new(source, target);
        edge.source_handle = Some(branch.into());
        self.edges.push(edge);
    }

    /// Build a nested workflow from a `{nodes, edges}` parameter, as carried
    /// by loop nodes. The nested workflow inherits `parent_name` when the
    /// body does not name itself.
    pub fn from_body(parent_name: &str, body: &Value) -> Result<Self, String> {
        let mut body = body
            .as_object()
            .cloned()
            .ok_or_else(|| "body must be an object with 'nodes' and 'edges'".to_string())?;
        body.entry("name")
            .or_insert_with(|| Value::String(format!("{parent_name} (body)")));
        serde_json::from_value(Value::Object(body)).map_err(|e| format!("invalid body: {e}"))
    }
}

/// Node specification in a workflow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeSpec {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl NodeSpec {
    pub fn new(id: impl Into<NodeId>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            label: String::new(),
            parameters: Map::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

/// Edge between nodes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EdgeSpec {
    #[serde(default = "new_id")]
    pub id: String,
    pub source: NodeId,
    pub target: NodeId,
    /// Branch this edge leaves an `if` node from.
    #[serde(
        default,
        alias = "sourceHandle",
        skip_serializing_if = "Option::is_none"
    )]
    pub source_handle: Option<String>,
}

impl EdgeSpec {
    pub fn new(source: impl Into<NodeId>, target: impl Into<NodeId>) -> Self {
        let source = source.into();
        let target = target.into();
        Self {
            id: format!("{source}->{target}"),
            source,
            target,
            source_handle: None,
        }
    }
}

/// Per-workflow execution settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowSettings {
    #[serde(default = "default_max_parallel")]
    pub max_parallel_nodes: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_timeout_ms: Option<u64>,
    /// Node whose outcome decides between `partial` and `failed`. Defaults
    /// to every sink of the graph.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_node: Option<NodeId>,
}

fn default_max_parallel() -> usize {
    10
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            max_parallel_nodes: default_max_parallel(),
            node_timeout_ms: None,
            output_node: None,
        }
    }
}

/// Why a node was skipped without running.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    InactiveBranch,
    UpstreamFailed,
    Cancelled,
}

/// Lifecycle state of a node within one run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "status", content = "reason")]
pub enum NodeStatus {
    Pending,
    Ready,
    Running,
    Completed,
    Failed,
    Skipped(SkipReason),
}

impl NodeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NodeStatus::Completed | NodeStatus::Failed | NodeStatus::Skipped(_)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NodeStatus::Pending => "pending",
            NodeStatus::Ready => "ready",
            NodeStatus::Running => "running",
            NodeStatus::Completed => "completed",
            NodeStatus::Failed => "failed",
            NodeStatus::Skipped(_) => "skipped",
        }
    }
}

/// Overall outcome of a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Partial,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}
