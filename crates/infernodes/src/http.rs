use infercore::{NodeContext, NodeError};
use serde_json::{Map, Value};
use std::time::Duration;

pub(crate) const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// JSON client shared by the nodes that call inference services.
#[derive(Clone, Default)]
pub struct ServiceClient {
    client: reqwest::Client,
}

impl ServiceClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Resolve `service_id` through the context and send `body` to it.
    ///
    /// The backend is bound here, at dispatch time, so a service that went
    /// unhealthy after submission fails this node only.
    pub async fn call(
        &self,
        ctx: &NodeContext,
        service_id: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<Map<String, Value>, NodeError> {
        let service = ctx.services.resolve(service_id)?;
        ctx.events
            .info(format!("{} {} ({})", service.method, service.url, service.id));

        let request = match service.method.to_uppercase().as_str() {
            "POST" => self.client.post(&service.url).json(body),
            "PUT" => self.client.put(&service.url).json(body),
            "GET" => self.client.get(&service.url),
            other => {
                return Err(NodeError::Configuration(format!(
                    "service '{}' declares unsupported method {}",
                    service.id, other
                )))
            }
        };

        let response = request.timeout(timeout).send().await.map_err(|e| {
            if e.is_timeout() {
                NodeError::Timeout {
                    millis: timeout.as_millis() as u64,
                }
            } else {
                NodeError::ServiceUnavailable(format!("{}: {}", service.id, e))
            }
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            if e.is_timeout() {
                NodeError::Timeout {
                    millis: timeout.as_millis() as u64,
                }
            } else {
                NodeError::MalformedResponse {
                    service: service.id.clone(),
                    reason: format!("could not read body: {e}"),
                }
            }
        })?;

        if !status.is_success() {
            tracing::warn!("Service {} answered {}", service.id, status);
            return Err(NodeError::HttpStatus {
                service: service.id,
                status: status.as_u16(),
                body: truncate(&text, 200),
            });
        }

        match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(NodeError::MalformedResponse {
                service: service.id,
                reason: format!("expected a JSON object, got {}", kind_of(&other)),
            }),
            Err(e) => Err(NodeError::MalformedResponse {
                service: service.id,
                reason: format!("invalid JSON: {e}"),
            }),
        }
    }
}

/// Per-call timeout from the node's `timeout_ms` parameter.
pub(crate) fn timeout_of(ctx: &NodeContext) -> Duration {
    Duration::from_millis(ctx.param_u64("timeout_ms").unwrap_or(DEFAULT_TIMEOUT_MS))
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let head: String = text.chars().take(max_chars).collect();
        format!("{head}...")
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
