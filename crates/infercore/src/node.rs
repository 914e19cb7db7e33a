use crate::events::EventEmitter;
use crate::schema::{resolve_params, validate_params, ParamSpec, PortSpec};
use crate::{NodeError, NodeId, RunStatus, WorkflowDefinition};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// How the engine schedules a node type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Ordinary step: runs once all predecessors completed.
    Task,
    /// Emits a `branch` output choosing which outgoing edges stay active.
    Branch,
    /// Runs a nested sub-workflow repeatedly.
    Loop,
    /// Runs once every incoming branch is terminal, with whatever completed.
    Merge,
}

/// Core trait that all executable nodes implement
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Unique type tag (e.g., "model.detect", "control.if")
    fn node_type(&self) -> &str;

    fn kind(&self) -> NodeKind {
        NodeKind::Task
    }

    fn description(&self) -> &str {
        ""
    }

    fn category(&self) -> &str {
        "general"
    }

    /// Declared parameters, with defaults and ranges.
    fn parameters(&self) -> Vec<ParamSpec> {
        Vec::new()
    }

    fn input_schema(&self) -> Vec<PortSpec> {
        Vec::new()
    }

    fn output_schema(&self) -> Vec<PortSpec> {
        Vec::new()
    }

    /// Check parameters before any side effect. The message names the
    /// offending field.
    fn validate_parameters(&self, params: &Map<String, Value>) -> Result<(), String> {
        validate_params(&self.parameters(), params)
    }

    /// Execute the node. Parameters in `ctx` already carry declared defaults.
    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError>;
}

/// A backend endpoint resolved for one call.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedService {
    pub id: String,
    pub base_url: String,
    /// `base_url` joined with the service's inference endpoint.
    pub url: String,
    pub method: String,
}

/// Binds a service id to a concrete backend at dispatch time.
pub trait ServiceResolver: Send + Sync {
    fn resolve(&self, service_id: &str) -> Result<ResolvedService, NodeError>;
}

/// Result of a nested workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubflowResult {
    pub status: RunStatus,
    /// Combined data of the sub-workflow's output nodes.
    pub outputs: Map<String, Value>,
    pub node_results: Vec<NodeResult>,
}

/// Runs nested workflows (loop bodies) on behalf of an executor.
#[async_trait]
pub trait SubflowRunner: Send + Sync {
    async fn run_subflow(
        &self,
        workflow: WorkflowDefinition,
        inputs: Map<String, Value>,
        cancellation: CancellationToken,
    ) -> Result<SubflowResult, NodeError>;
}

struct NoServices;

impl ServiceResolver for NoServices {
    fn resolve(&self, service_id: &str) -> Result<ResolvedService, NodeError> {
        Err(NodeError::ServiceUnavailable(format!(
            "no service registry attached (wanted '{service_id}')"
        )))
    }
}

struct NoSubflows;

#[async_trait]
impl SubflowRunner for NoSubflows {
    async fn run_subflow(
        &self,
        _workflow: WorkflowDefinition,
        _inputs: Map<String, Value>,
        _cancellation: CancellationToken,
    ) -> Result<SubflowResult, NodeError> {
        Err(NodeError::Configuration(
            "nested workflows are not available in this context".to_string(),
        ))
    }
}

/// Output of a direct predecessor, in completion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamOutput {
    pub node_id: NodeId,
    pub data: Map<String, Value>,
}

/// Execution context passed to each node
#[derive(Clone)]
pub struct NodeContext {
    pub node_id: NodeId,
    pub node_type: String,
    pub label: String,

    /// Node parameters; defaults are filled in by `run_node`.
    pub parameters: Map<String, Value>,

    /// Workflow inputs overlaid with the data of every completed ancestor.
    pub inputs: Map<String, Value>,

    /// Outputs of direct predecessors that completed.
    pub upstream: Vec<UpstreamOutput>,

    pub services: Arc<dyn ServiceResolver>,
    pub subflows: Arc<dyn SubflowRunner>,

    /// Event emitter for real-time updates
    pub events: EventEmitter,

    pub cancellation: CancellationToken,
}

impl NodeContext {
    pub fn new(node_id: impl Into<NodeId>, node_type: impl Into<String>) -> Self {
        let node_id = node_id.into();
        Self {
            events: EventEmitter::detached(node_id.clone()),
            node_id,
            node_type: node_type.into(),
            label: String::new(),
            parameters: Map::new(),
            inputs: Map::new(),
            upstream: Vec::new(),
            services: Arc::new(NoServices),
            subflows: Arc::new(NoSubflows),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_parameters(mut self, parameters: Map<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_inputs(mut self, inputs: Map<String, Value>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_services(mut self, services: Arc<dyn ServiceResolver>) -> Self {
        self.services = services;
        self
    }

    pub fn with_subflows(mut self, subflows: Arc<dyn SubflowRunner>) -> Self {
        self.subflows = subflows;
        self
    }

    /// Get required input or return error
    pub fn require_input(&self, name: &str) -> Result<&Value, NodeError> {
        self.inputs
            .get(name)
            .filter(|v| !v.is_null())
            .ok_or_else(|| NodeError::MissingInput(name.to_string()))
    }

    pub fn require_input_str(&self, name: &str) -> Result<&str, NodeError> {
        let value = self.require_input(name)?;
        value.as_str().ok_or_else(|| NodeError::InvalidInputType {
            field: name.to_string(),
            expected: "string".to_string(),
            actual: type_name(value).to_string(),
        })
    }

    pub fn param(&self, name: &str) -> Option<&Value> {
        self.parameters.get(name).filter(|v| !v.is_null())
    }

    /// Get a parameter or return a configuration error
    pub fn require_param(&self, name: &str) -> Result<&Value, NodeError> {
        self.param(name)
            .ok_or_else(|| NodeError::Configuration(format!("missing parameter '{name}'")))
    }

    pub fn param_str(&self, name: &str) -> Option<&str> {
        self.param(name).and_then(Value::as_str)
    }

    pub fn param_f64(&self, name: &str) -> Option<f64> {
        self.param(name).and_then(Value::as_f64)
    }

    pub fn param_u64(&self, name: &str) -> Option<u64> {
        self.param(name).and_then(Value::as_u64)
    }
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Output from node execution
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NodeOutput {
    pub outputs: Map<String, Value>,
}

impl NodeOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(outputs: Map<String, Value>) -> Self {
        Self { outputs }
    }

    pub fn with_output(mut self, port: impl Into<String>, value: impl Into<Value>) -> Self {
        self.outputs.insert(port.into(), value.into());
        self
    }
}

/// The standard result envelope: exactly one per node attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeResult {
    pub success: bool,
    pub node_id: NodeId,
    pub node_type: String,
    pub data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl NodeResult {
    /// Wrap an execution outcome into an envelope.
    pub fn from_outcome(
        node_id: impl Into<NodeId>,
        node_type: impl Into<String>,
        outcome: Result<NodeOutput, NodeError>,
        execution_time_ms: u64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let (success, data, error) = match outcome {
            Ok(output) => (true, output.outputs, None),
            Err(NodeError::Validation(message)) => (
                false,
                Map::new(),
                Some(format!("parameter validation failed: {message}")),
            ),
            Err(e) => {
                let message = e.to_string();
                let message = if message.is_empty() {
                    "node execution failed".to_string()
                } else {
                    message
                };
                (false, Map::new(), Some(message))
            }
        };
        Self {
            success,
            node_id: node_id.into(),
            node_type: node_type.into(),
            data,
            error,
            execution_time_ms,
            timestamp,
        }
    }
}

/// Validate, execute and wrap a node. Never panics and never returns an
/// error: every predictable or unpredictable failure becomes a failure
/// envelope.
pub async fn run_node(
    executor: &dyn NodeExecutor,
    mut ctx: NodeContext,
    timeout: Option<Duration>,
) -> NodeResult {
    let node_id = ctx.node_id.clone();
    let node_type = executor.node_type().to_string();

    if let Err(message) = executor.validate_parameters(&ctx.parameters) {
        tracing::warn!("Node {} rejected parameters: {}", node_id, message);
        return NodeResult::from_outcome(
            node_id,
            node_type,
            Err(NodeError::Validation(message)),
            0,
            Utc::now(),
        );
    }
    ctx.parameters = resolve_params(&executor.parameters(), &ctx.parameters);

    let cancellation = ctx.cancellation.clone();
    let start = Instant::now();
    let guarded = async {
        match AssertUnwindSafe(executor.execute(ctx)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => Err(NodeError::ExecutionFailed(format!(
                "executor panicked: {}",
                panic_message(panic.as_ref())
            ))),
        }
    };
    let bounded = async {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, guarded)
                .await
                .unwrap_or(Err(NodeError::Timeout {
                    millis: limit.as_millis() as u64,
                })),
            None => guarded.await,
        }
    };
    let outcome = tokio::select! {
        _ = cancellation.cancelled() => Err(NodeError::Cancelled),
        outcome = bounded => outcome,
    };

    NodeResult::from_outcome(
        node_id,
        node_type,
        outcome,
        start.elapsed().as_millis() as u64,
        Utc::now(),
    )
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
