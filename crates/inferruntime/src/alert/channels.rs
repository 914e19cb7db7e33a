use super::{Alert, AlertError};
use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;

/// A delivery route for alerts.
#[async_trait]
pub trait AlertChannel: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, alert: &Alert) -> Result<(), AlertError>;
}

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
    pub use_tls: bool,
    pub from: String,
    pub to: Vec<String>,
}

/// SMTP delivery through lettre.
pub struct EmailChannel {
    config: EmailConfig,
}

impl EmailChannel {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    fn build_message(&self, alert: &Alert) -> Result<Message, AlertError> {
        let from: Mailbox = self
            .config
            .from
            .parse()
            .map_err(|e| AlertError::Configuration(format!("invalid sender '{}': {e}", self.config.from)))?;

        let mut builder = Message::builder().from(from).subject(alert.subject());
        for address in &self.config.to {
            let to: Mailbox = address
                .parse()
                .map_err(|e| AlertError::Configuration(format!("invalid recipient '{address}': {e}")))?;
            builder = builder.to(to);
        }

        builder
            .body(alert.body())
            .map_err(|e| AlertError::Configuration(format!("could not build message: {e}")))
    }
}

#[async_trait]
impl AlertChannel for EmailChannel {
    fn name(&self) -> &str {
        "email"
    }

    async fn deliver(&self, alert: &Alert) -> Result<(), AlertError> {
        if self.config.to.is_empty() {
            return Err(AlertError::Configuration("no recipients configured".to_string()));
        }
        let message = self.build_message(alert)?;

        let credentials = Credentials::new(self.config.username.clone(), self.config.password.clone());
        let mailer = if self.config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.smtp_host)
                .map_err(|e| AlertError::Delivery {
                    channel: "email".to_string(),
                    reason: e.to_string(),
                })?
                .port(self.config.smtp_port)
                .credentials(credentials)
                .timeout(Some(Duration::from_secs(10)))
                .build()
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&self.config.smtp_host)
                .port(self.config.smtp_port)
                .credentials(credentials)
                .timeout(Some(Duration::from_secs(10)))
                .build()
        };

        mailer.send(message).await.map_err(|e| AlertError::Delivery {
            channel: "email".to_string(),
            reason: e.to_string(),
        })?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub url: String,
    pub timeout: Duration,
}

/// Chat webhook delivery: POSTs `{"text": ..., "alert": {...}}` as JSON.
pub struct WebhookChannel {
    config: WebhookConfig,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(config: WebhookConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl AlertChannel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn deliver(&self, alert: &Alert) -> Result<(), AlertError> {
        let payload = serde_json::json!({
            "text": format!("{}\n\n{}", alert.subject(), alert.body()),
            "alert": alert,
        });

        let response = self
            .client
            .post(&self.config.url)
            .timeout(self.config.timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|e| AlertError::Delivery {
                channel: "webhook".to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(AlertError::Delivery {
                channel: "webhook".to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }
        Ok(())
    }
}
