use async_trait::async_trait;
use infercore::{
    DataType, NodeContext, NodeError, NodeExecutor, NodeKind, NodeOutput, ParamSpec, PortSpec,
};
use inferruntime::ExecutorRegistry;
use std::sync::Arc;

struct Named(&'static str);

#[async_trait]
impl NodeExecutor for Named {
    fn node_type(&self) -> &str {
        self.0
    }

    fn description(&self) -> &str {
        "test executor"
    }

    fn category(&self) -> &str {
        "testing"
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::unit("confidence", 0.25)]
    }

    fn output_schema(&self) -> Vec<PortSpec> {
        vec![PortSpec::new("detections", DataType::Detections)]
    }

    async fn execute(&self, _ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        Ok(NodeOutput::new())
    }
}

fn registry() -> ExecutorRegistry {
    let mut registry = ExecutorRegistry::new();
    registry.register(Arc::new(Named("model.detect")));
    registry.register(Arc::new(Named("input.image")));
    registry.register(Arc::new(Named("control.if")));
    registry
}

#[test]
fn test_unknown_type_is_none() {
    let registry = registry();
    assert!(registry.get("unknown-type").is_none());
    assert!(!registry.contains("unknown-type"));
    assert!(registry.get_metadata("unknown-type").is_none());
}

#[test]
fn test_types_are_sorted_and_stable() {
    let registry = registry();
    let types = registry.get_all_types();
    assert_eq!(types, vec!["control.if", "input.image", "model.detect"]);
    assert_eq!(types, registry.get_all_types());
    assert_eq!(registry.len(), 3);
}

#[test]
fn test_duplicate_registration_replaces() {
    let mut registry = registry();
    registry.register(Arc::new(Named("control.if")));
    assert_eq!(registry.len(), 3);
}

#[test]
fn test_metadata_describes_executor() {
    let registry = registry();
    let metadata = registry.get_metadata("model.detect").unwrap();
    assert_eq!(metadata.node_type, "model.detect");
    assert_eq!(metadata.kind, NodeKind::Task);
    assert_eq!(metadata.category, "testing");
    assert_eq!(metadata.parameters[0].name, "confidence");
    assert_eq!(metadata.outputs[0].data_type, DataType::Detections);
}
