// crates/infercore/tests/node_contract_test.rs

use async_trait::async_trait;
use infercore::{
    run_node, NodeContext, NodeError, NodeExecutor, NodeOutput, NodeResult, ParamSpec,
};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Executor with a confidence/IoU pair, counting how often execute runs.
struct ThresholdNode {
    calls: Arc<AtomicUsize>,
    behaviour: Behaviour,
}

#[derive(Clone, Copy)]
enum Behaviour {
    EchoParams,
    Fail,
    Panic,
    Hang,
}

impl ThresholdNode {
    fn new(behaviour: Behaviour) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                calls: calls.clone(),
                behaviour,
            },
            calls,
        )
    }
}

#[async_trait]
impl NodeExecutor for ThresholdNode {
    fn node_type(&self) -> &str {
        "test.threshold"
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::unit("confidence", 0.25),
            ParamSpec::unit("iou", 0.45),
            ParamSpec::choice("mode", &["fast", "accurate"]).with_default("fast"),
        ]
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behaviour {
            Behaviour::EchoParams => Ok(NodeOutput::from_map(ctx.parameters.clone())),
            Behaviour::Fail => Err(NodeError::ExecutionFailed("backend exploded".to_string())),
            Behaviour::Panic => panic!("unexpected state"),
            Behaviour::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(NodeOutput::new())
            }
        }
    }
}

fn params(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

#[test]
fn test_empty_parameters_validate_when_defaults_exist() {
    let (node, _) = ThresholdNode::new(Behaviour::EchoParams);
    assert!(node.validate_parameters(&Map::new()).is_ok());
}

#[test]
fn test_out_of_range_parameters_name_the_field() {
    let (node, _) = ThresholdNode::new(Behaviour::EchoParams);

    let err = node
        .validate_parameters(&params(json!({"confidence": 1.5})))
        .unwrap_err();
    assert!(err.contains("confidence"), "got: {err}");

    let err = node
        .validate_parameters(&params(json!({"iou": -0.1})))
        .unwrap_err();
    assert!(err.contains("iou"), "got: {err}");

    let err = node
        .validate_parameters(&params(json!({"mode": "sloppy"})))
        .unwrap_err();
    assert!(err.contains("mode"), "got: {err}");
}

#[tokio::test]
async fn test_run_fills_defaults_and_wraps_success() {
    let (node, calls) = ThresholdNode::new(Behaviour::EchoParams);
    let ctx = NodeContext::new("n1", "test.threshold")
        .with_parameters(params(json!({"confidence": 0.9})));

    let result = run_node(&node, ctx, None).await;

    assert!(result.success);
    assert_eq!(result.node_id, "n1");
    assert_eq!(result.node_type, "test.threshold");
    assert_eq!(result.data["confidence"], json!(0.9));
    assert_eq!(result.data["iou"], json!(0.45));
    assert_eq!(result.data["mode"], json!("fast"));
    assert!(result.error.is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_validation_failure_skips_execute() {
    let (node, calls) = ThresholdNode::new(Behaviour::EchoParams);
    let ctx = NodeContext::new("n1", "test.threshold")
        .with_parameters(params(json!({"confidence": 1.5})));

    let result = run_node(&node, ctx, None).await;

    assert!(!result.success);
    let error = result.error.unwrap();
    assert!(error.starts_with("parameter validation failed: "));
    assert!(error.contains("confidence"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_execution_errors_become_failure_envelopes() {
    let (node, _) = ThresholdNode::new(Behaviour::Fail);
    let result = run_node(&node, NodeContext::new("n1", "test.threshold"), None).await;

    assert!(!result.success);
    assert!(result.data.is_empty());
    assert!(result.error.unwrap().contains("backend exploded"));
}

#[tokio::test]
async fn test_panics_become_failure_envelopes() {
    let (node, _) = ThresholdNode::new(Behaviour::Panic);
    let result = run_node(&node, NodeContext::new("n1", "test.threshold"), None).await;

    assert!(!result.success);
    assert!(result.error.unwrap().contains("unexpected state"));
}

#[tokio::test]
async fn test_timeouts_are_node_local_failures() {
    let (node, _) = ThresholdNode::new(Behaviour::Hang);
    let result = run_node(
        &node,
        NodeContext::new("n1", "test.threshold"),
        Some(Duration::from_millis(50)),
    )
    .await;

    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("Timeout after 50ms"));
}

#[tokio::test]
async fn test_cancellation_abandons_the_call() {
    let (node, _) = ThresholdNode::new(Behaviour::Hang);
    let ctx = NodeContext::new("n1", "test.threshold");
    let token = ctx.cancellation.clone();

    let handle = tokio::spawn(async move { run_node(&node, ctx, None).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    token.cancel();

    let result = handle.await.unwrap();
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("Cancelled"));
}

#[test]
fn test_envelope_serializes_with_expected_fields() {
    let result = NodeResult::from_outcome(
        "a",
        "model.detect",
        Err(NodeError::Timeout { millis: 10 }),
        10,
        chrono::Utc::now(),
    );
    let json = serde_json::to_value(&result).unwrap();

    for field in ["success", "node_id", "node_type", "data", "error", "execution_time_ms", "timestamp"] {
        assert!(json.get(field).is_some(), "missing {field}");
    }
    assert_eq!(json["success"], json!(false));
}
