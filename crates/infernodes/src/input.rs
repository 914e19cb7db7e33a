use async_trait::async_trait;
use infercore::{DataType, NodeContext, NodeError, NodeExecutor, NodeOutput, ParamSpec, PortSpec};
use serde_json::Value;

/// Feeds an image into the graph, either from the run inputs or from the
/// node's own `image` parameter.
pub struct ImageInputNode;

#[async_trait]
impl NodeExecutor for ImageInputNode {
    fn node_type(&self) -> &str {
        "input.image"
    }

    fn description(&self) -> &str {
        "Base64 image from the run inputs or parameters"
    }

    fn category(&self) -> &str {
        "input"
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::string("field")
                .with_default("image")
                .describe("Run input holding the image"),
            ParamSpec::string("image").describe("Inline base64 image, used when the input is absent"),
        ]
    }

    fn output_schema(&self) -> Vec<PortSpec> {
        vec![PortSpec::new("image", DataType::Image)]
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let field = ctx.param_str("field").unwrap_or("image");
        let image = match ctx.inputs.get(field).filter(|v| !v.is_null()) {
            Some(Value::String(image)) => image.clone(),
            Some(other) => {
                return Err(NodeError::InvalidInputType {
                    field: field.to_string(),
                    expected: "base64 string".to_string(),
                    actual: json_kind(other).to_string(),
                })
            }
            None => ctx
                .param_str("image")
                .map(str::to_string)
                .ok_or_else(|| NodeError::MissingInput(field.to_string()))?,
        };

        if image.trim().is_empty() {
            return Err(NodeError::MissingInput(field.to_string()));
        }
        Ok(NodeOutput::new().with_output("image", image))
    }
}

/// Feeds a piece of text into the graph.
pub struct TextInputNode;

#[async_trait]
impl NodeExecutor for TextInputNode {
    fn node_type(&self) -> &str {
        "input.text"
    }

    fn description(&self) -> &str {
        "Text from the run inputs or parameters"
    }

    fn category(&self) -> &str {
        "input"
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::string("field").with_default("text"),
            ParamSpec::string("text").with_default(""),
        ]
    }

    fn output_schema(&self) -> Vec<PortSpec> {
        vec![PortSpec::new("text", DataType::Text)]
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let field = ctx.param_str("field").unwrap_or("text");
        let text = ctx
            .inputs
            .get(field)
            .and_then(Value::as_str)
            .or_else(|| ctx.param_str("text"))
            .unwrap_or_default();
        Ok(NodeOutput::new().with_output("text", text))
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
