use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failures local to a single node. These never escape `run_node`; they are
/// folded into the node's result envelope.
#[derive(Error, Debug, Clone)]
pub enum NodeError {
    #[error("{0}")]
    Validation(String),

    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Invalid input type for '{field}': expected {expected}, got {actual}")]
    InvalidInputType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Service '{service}' returned HTTP {status}: {body}")]
    HttpStatus {
        service: String,
        status: u16,
        body: String,
    },

    #[error("Malformed response from '{service}': {reason}")]
    MalformedResponse { service: String, reason: String },

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Timeout after {millis}ms")]
    Timeout { millis: u64 },

    #[error("Cancelled")]
    Cancelled,
}

/// Structural problems with a submitted graph. Any of these rejects the whole
/// run before a single node executes.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkflowError {
    #[error("Invalid workflow: {0}")]
    Invalid(String),

    #[error("Cyclic dependency detected")]
    CyclicDependency,

    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Unknown node type '{node_type}' on node {node_id}")]
    UnknownNodeType { node_id: String, node_type: String },

    #[error("Invalid connection: {0}")]
    InvalidConnection(String),

    #[error("Invalid parameters on node {node_id}: {message}")]
    InvalidParameters { node_id: String, message: String },
}
