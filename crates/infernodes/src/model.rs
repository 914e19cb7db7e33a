//! Nodes that delegate to inference services over HTTP.

use crate::http::{timeout_of, ServiceClient, DEFAULT_TIMEOUT_MS};
use async_trait::async_trait;
use infercore::{
    DataType, NodeContext, NodeError, NodeExecutor, NodeOutput, ParamSpec, PortSpec,
};
use serde_json::{json, Map, Value};

fn service_param(default: &str) -> ParamSpec {
    ParamSpec::string("service")
        .with_default(default)
        .describe("Id of the backend service in the registry")
}

fn timeout_param() -> ParamSpec {
    ParamSpec::integer("timeout_ms", Some(1), None)
        .with_default(DEFAULT_TIMEOUT_MS)
        .describe("Per-call timeout in milliseconds")
}

fn service_id(ctx: &NodeContext) -> Result<String, NodeError> {
    ctx.param_str("service")
        .map(str::to_string)
        .ok_or_else(|| NodeError::Configuration("missing parameter 'service'".to_string()))
}

fn malformed(service: &str, reason: impl Into<String>) -> NodeError {
    NodeError::MalformedResponse {
        service: service.to_string(),
        reason: reason.into(),
    }
}

/// Object detection through a detector service.
pub struct DetectNode {
    client: ServiceClient,
}

impl DetectNode {
    pub fn new() -> Self {
        Self {
            client: ServiceClient::new(),
        }
    }
}

impl Default for DetectNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeExecutor for DetectNode {
    fn node_type(&self) -> &str {
        "model.detect"
    }

    fn description(&self) -> &str {
        "Detect objects in an image"
    }

    fn category(&self) -> &str {
        "model"
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![
            service_param("yolo-detector"),
            ParamSpec::unit("confidence", 0.25).describe("Minimum detection score"),
            ParamSpec::unit("iou", 0.45).describe("IoU threshold for suppression"),
            timeout_param(),
        ]
    }

    fn input_schema(&self) -> Vec<PortSpec> {
        vec![PortSpec::new("image", DataType::Image).required()]
    }

    fn output_schema(&self) -> Vec<PortSpec> {
        vec![
            PortSpec::new("detections", DataType::Detections),
            PortSpec::new("count", DataType::Number),
            PortSpec::new("image", DataType::Image),
        ]
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let service = service_id(&ctx)?;
        let image = ctx.require_input_str("image")?.to_string();
        let body = json!({
            "image": image,
            "confidence": ctx.param_f64("confidence").unwrap_or(0.25),
            "iou": ctx.param_f64("iou").unwrap_or(0.45),
        });

        let mut response = self.client.call(&ctx, &service, &body, timeout_of(&ctx)).await?;
        let detections = match response.remove("detections") {
            Some(Value::Array(items)) => items,
            Some(_) => return Err(malformed(&service, "'detections' is not an array")),
            None => return Err(malformed(&service, "missing 'detections'")),
        };
        ctx.events.info(format!("{} detections", detections.len()));

        let mut output = NodeOutput::new()
            .with_output("count", detections.len())
            .with_output("detections", detections);
        // annotated image from the service, original kept alongside
        if let Some(annotated) = response.remove("image").filter(Value::is_string) {
            output = output
                .with_output("image", annotated)
                .with_output("original_image", image);
        }
        Ok(output)
    }
}

/// Text extraction through an OCR service.
pub struct OcrNode {
    client: ServiceClient,
}

impl OcrNode {
    pub fn new() -> Self {
        Self {
            client: ServiceClient::new(),
        }
    }
}

impl Default for OcrNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeExecutor for OcrNode {
    fn node_type(&self) -> &str {
        "model.ocr"
    }

    fn description(&self) -> &str {
        "Extract text from an image"
    }

    fn category(&self) -> &str {
        "model"
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![
            service_param("ocr"),
            ParamSpec::string("language").with_default("en"),
            ParamSpec::unit("min_confidence", 0.5).describe("Drop lines scored below this"),
            timeout_param(),
        ]
    }

    fn input_schema(&self) -> Vec<PortSpec> {
        vec![PortSpec::new("image", DataType::Image).required()]
    }

    fn output_schema(&self) -> Vec<PortSpec> {
        vec![
            PortSpec::new("text", DataType::Text),
            PortSpec::new("lines", DataType::Json),
        ]
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let service = service_id(&ctx)?;
        let image = ctx.require_input_str("image")?;
        let min_confidence = ctx.param_f64("min_confidence").unwrap_or(0.5);
        let body = json!({
            "image": image,
            "language": ctx.param_str("language").unwrap_or("en"),
        });

        let mut response = self.client.call(&ctx, &service, &body, timeout_of(&ctx)).await?;
        // when the service reports scored lines, the text is rebuilt from
        // the lines that pass the threshold
        let text = match response.remove("lines") {
            Some(Value::Array(lines)) => {
                let total = lines.len();
                let kept: Vec<Value> = lines
                    .into_iter()
                    .filter(|line| {
                        line.get("confidence")
                            .and_then(Value::as_f64)
                            .map_or(true, |c| c >= min_confidence)
                    })
                    .collect();
                if kept.len() < total {
                    ctx.events.warn(format!(
                        "dropped {} of {} lines below confidence {}",
                        total - kept.len(),
                        total,
                        min_confidence
                    ));
                }
                let text = kept
                    .iter()
                    .filter_map(|line| line.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("\n");
                return Ok(NodeOutput::new()
                    .with_output("text", text)
                    .with_output("lines", kept));
            }
            Some(_) => return Err(malformed(&service, "'lines' is not an array")),
            None => match response.remove("text") {
                Some(Value::String(text)) => text,
                Some(_) => return Err(malformed(&service, "'text' is not a string")),
                None => return Err(malformed(&service, "missing 'text'")),
            },
        };

        Ok(NodeOutput::new()
            .with_output("text", text)
            .with_output("lines", Vec::<Value>::new()))
    }
}

/// Prompted image or text understanding through a vision-language service.
pub struct VlmNode {
    client: ServiceClient,
}

impl VlmNode {
    pub fn new() -> Self {
        Self {
            client: ServiceClient::new(),
        }
    }
}

impl Default for VlmNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeExecutor for VlmNode {
    fn node_type(&self) -> &str {
        "model.vlm"
    }

    fn description(&self) -> &str {
        "Ask a vision-language model about an image"
    }

    fn category(&self) -> &str {
        "model"
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![
            service_param("vlm"),
            ParamSpec::string("prompt").with_default("Describe the image."),
            ParamSpec::number("temperature", Some(0.0), Some(2.0)).with_default(0.2),
            ParamSpec::integer("max_tokens", Some(1), Some(8192)).with_default(512),
            timeout_param(),
        ]
    }

    fn input_schema(&self) -> Vec<PortSpec> {
        vec![
            PortSpec::new("image", DataType::Image),
            PortSpec::new("text", DataType::Text),
        ]
    }

    fn output_schema(&self) -> Vec<PortSpec> {
        vec![PortSpec::new("text", DataType::Text)]
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let service = service_id(&ctx)?;
        let mut body = Map::new();
        body.insert(
            "prompt".to_string(),
            json!(ctx.param_str("prompt").unwrap_or("Describe the image.")),
        );
        body.insert("temperature".to_string(), json!(ctx.param_f64("temperature")));
        body.insert("max_tokens".to_string(), json!(ctx.param_u64("max_tokens")));
        // either an image or upstream text gives the model something to read
        for field in ["image", "text"] {
            if let Some(value) = ctx.inputs.get(field).filter(|v| v.is_string()) {
                body.insert(field.to_string(), value.clone());
            }
        }

        let response = self
            .client
            .call(&ctx, &service, &Value::Object(body), timeout_of(&ctx))
            .await?;
        let text = response
            .get("text")
            .or_else(|| response.get("response"))
            .and_then(Value::as_str)
            .ok_or_else(|| malformed(&service, "missing 'text'"))?;

        Ok(NodeOutput::new().with_output("text", text))
    }
}

/// Generic call to any registered service. The request body is the node's
/// accumulated inputs overlaid with its `payload` parameter; the response
/// object becomes the node's output.
pub struct ServiceCallNode {
    client: ServiceClient,
}

impl ServiceCallNode {
    pub fn new() -> Self {
        Self {
            client: ServiceClient::new(),
        }
    }
}

impl Default for ServiceCallNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeExecutor for ServiceCallNode {
    fn node_type(&self) -> &str {
        "service.call"
    }

    fn description(&self) -> &str {
        "Call a registered service with the accumulated data"
    }

    fn category(&self) -> &str {
        "model"
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::string("service").required(),
            ParamSpec::object("payload").with_default(json!({})),
            timeout_param(),
        ]
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let service = service_id(&ctx)?;
        let mut body = ctx.inputs.clone();
        if let Some(Value::Object(payload)) = ctx.param("payload") {
            body.extend(payload.clone());
        }

        let response = self
            .client
            .call(&ctx, &service, &Value::Object(body), timeout_of(&ctx))
            .await?;
        Ok(NodeOutput::from_map(response))
    }
}
