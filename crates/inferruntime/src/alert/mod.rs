//! Rate-limited, multi-channel failure alerting.

mod channels;
mod limiter;

pub use channels::{AlertChannel, EmailChannel, EmailConfig, WebhookChannel, WebhookConfig};
pub use limiter::RateLimiter;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;

const KEY_MESSAGE_CHARS: usize = 100;

#[derive(Error, Debug, Clone)]
pub enum AlertError {
    #[error("Alert channel misconfigured: {0}")]
    Configuration(String),

    #[error("Delivery via {channel} failed: {reason}")]
    Delivery { channel: String, reason: String },
}

/// Something worth telling an operator about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRequest {
    pub error_type: String,
    pub error_message: String,
    #[serde(default)]
    pub context: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

impl AlertRequest {
    pub fn new(error_type: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            error_message: error_message.into(),
            context: Map::new(),
            trace: None,
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Key used for rate limiting: type plus the head of the message.
    pub fn error_key(&self) -> String {
        let head: String = self.error_message.chars().take(KEY_MESSAGE_CHARS).collect();
        format!("{}:{}", self.error_type, head)
    }
}

/// An alert as handed to channels.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    #[serde(flatten)]
    pub request: AlertRequest,
    pub error_key: String,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    pub fn subject(&self) -> String {
        format!("[inferflow] {}", self.request.error_type)
    }

    pub fn body(&self) -> String {
        let mut body = format!(
            "Time: {}\nType: {}\nMessage: {}\n",
            self.timestamp.to_rfc3339(),
            self.request.error_type,
            self.request.error_message
        );
        if !self.request.context.is_empty() {
            body.push_str("\nContext:\n");
            for (key, value) in &self.request.context {
                body.push_str(&format!("  {key}: {value}\n"));
            }
        }
        if let Some(trace) = &self.request.trace {
            body.push_str("\nTrace:\n");
            body.push_str(trace);
            body.push('\n');
        }
        body
    }
}

/// What happened to one `send_alert` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AlertOutcome {
    /// The key is over its hourly budget.
    Suppressed,
    /// Allowed, but no channel is configured.
    NoChannels,
    Dispatched {
        delivered: Vec<String>,
        failed: Vec<(String, String)>,
    },
}

pub struct AlertDispatcher {
    channels: Vec<Arc<dyn AlertChannel>>,
    limiter: RateLimiter,
}

impl AlertDispatcher {
    pub fn new(max_alerts_per_hour: usize) -> Self {
        Self {
            channels: Vec::new(),
            limiter: RateLimiter::per_hour(max_alerts_per_hour),
        }
    }

    pub fn with_channel(mut self, channel: Arc<dyn AlertChannel>) -> Self {
        self.channels.push(channel);
        self
    }

    pub fn with_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.name().to_string()).collect()
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub async fn send_alert(&self, request: AlertRequest, force: bool) -> AlertOutcome {
        self.send_alert_at(request, force, Utc::now()).await
    }

    /// Rate-limit at `now`, then fan out to every channel. Channel failures
    /// are logged and reported; they never stop other channels.
    pub async fn send_alert_at(
        &self,
        request: AlertRequest,
        force: bool,
        now: DateTime<Utc>,
    ) -> AlertOutcome {
        let error_key = request.error_key();
        if !self.limiter.try_acquire_at(&error_key, now, force) {
            tracing::debug!("Alert suppressed by rate limit: {}", error_key);
            return AlertOutcome::Suppressed;
        }
        if self.channels.is_empty() {
            return AlertOutcome::NoChannels;
        }

        let alert = Alert {
            request,
            error_key,
            timestamp: now,
        };

        let attempts = self.channels.iter().map(|channel| {
            let alert = &alert;
            async move { (channel.name().to_string(), channel.deliver(alert).await) }
        });

        let mut delivered = Vec::new();
        let mut failed = Vec::new();
        for (name, result) in futures::future::join_all(attempts).await {
            match result {
                Ok(()) => delivered.push(name),
                Err(e) => {
                    tracing::warn!("Alert delivery via {} failed: {}", name, e);
                    failed.push((name, e.to_string()));
                }
            }
        }

        tracing::info!(
            "Alert '{}' dispatched ({} delivered, {} failed)",
            alert.error_key,
            delivered.len(),
            failed.len()
        );
        AlertOutcome::Dispatched { delivered, failed }
    }
}
