//! Environment-driven runtime configuration.

use crate::alert::{AlertDispatcher, EmailChannel, EmailConfig, WebhookChannel, WebhookConfig};
use crate::engine::EngineConfig;
use crate::services::RegistryConfig;
use crate::store::ResultStore;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for the runtime
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub bind_address: String,
    pub max_parallel_nodes: usize,
    pub node_timeout_ms: u64,
    pub event_buffer_size: usize,

    pub service_specs_dir: PathBuf,
    pub service_host: String,
    pub discovery_ports: Vec<u16>,
    pub discovery_timeout_ms: u64,
    pub health_check_interval_secs: u64,
    pub health_check_timeout_ms: u64,

    pub results_enabled: bool,
    pub results_dir: PathBuf,
    pub results_retention_days: u32,

    pub alert_max_per_hour: usize,
    pub email: Option<EmailConfig>,
    pub webhook: Option<WebhookConfig>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            max_parallel_nodes: 10,
            node_timeout_ms: 60_000,
            event_buffer_size: 1000,
            service_specs_dir: PathBuf::from("services"),
            service_host: "localhost".to_string(),
            discovery_ports: (8001..=8010).collect(),
            discovery_timeout_ms: 2000,
            health_check_interval_secs: 30,
            health_check_timeout_ms: 3000,
            results_enabled: true,
            results_dir: PathBuf::from("results"),
            results_retention_days: 30,
            alert_max_per_hour: 10,
            email: None,
            webhook: None,
        }
    }
}

impl RuntimeConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from any key lookup. Unset keys keep their
    /// defaults; unparseable values are logged and ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let env = Env(&lookup);

        let email = if env.parse("ALERT_EMAIL_ENABLED").unwrap_or(false) {
            Some(EmailConfig {
                smtp_host: env.var("ALERT_SMTP_HOST").unwrap_or_else(|| "localhost".to_string()),
                smtp_port: env.parse("ALERT_SMTP_PORT").unwrap_or(587),
                username: env.var("ALERT_SMTP_USERNAME").unwrap_or_default(),
                password: env.var("ALERT_SMTP_PASSWORD").unwrap_or_default(),
                use_tls: env.parse("ALERT_SMTP_TLS").unwrap_or(true),
                from: env.var("ALERT_EMAIL_FROM").unwrap_or_else(|| "inferflow@localhost".to_string()),
                to: env.var("ALERT_EMAIL_TO")
                    .map(|raw| split_list(&raw))
                    .unwrap_or_default(),
            })
        } else {
            None
        };

        let webhook = match (
            env.parse("ALERT_WEBHOOK_ENABLED").unwrap_or(false),
            env.var("ALERT_WEBHOOK_URL"),
        ) {
            (true, Some(url)) => Some(WebhookConfig {
                url,
                timeout: Duration::from_secs(10),
            }),
            (true, None) => {
                tracing::warn!("ALERT_WEBHOOK_ENABLED is set but ALERT_WEBHOOK_URL is empty");
                None
            }
            _ => None,
        };

        let discovery_ports = match env.var("DISCOVERY_PORTS") {
            Some(raw) => parse_ports(&raw).unwrap_or_else(|e| {
                tracing::warn!("Ignoring DISCOVERY_PORTS: {}", e);
                defaults.discovery_ports.clone()
            }),
            None => defaults.discovery_ports.clone(),
        };

        Self {
            bind_address: env.var("BIND_ADDRESS").unwrap_or(defaults.bind_address),
            max_parallel_nodes: env.parse("MAX_PARALLEL_NODES").unwrap_or(defaults.max_parallel_nodes),
            node_timeout_ms: env.parse("NODE_TIMEOUT_MS").unwrap_or(defaults.node_timeout_ms),
            event_buffer_size: defaults.event_buffer_size,
            service_specs_dir: env.var("SERVICE_SPECS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.service_specs_dir),
            service_host: env.var("SERVICE_HOST").unwrap_or(defaults.service_host),
            discovery_ports,
            discovery_timeout_ms: env.parse("DISCOVERY_TIMEOUT_MS")
                .unwrap_or(defaults.discovery_timeout_ms),
            health_check_interval_secs: env.parse("HEALTH_CHECK_INTERVAL_SECS")
                .unwrap_or(defaults.health_check_interval_secs),
            health_check_timeout_ms: env.parse("HEALTH_CHECK_TIMEOUT_MS")
                .unwrap_or(defaults.health_check_timeout_ms),
            results_enabled: env.parse("RESULTS_ENABLED").unwrap_or(defaults.results_enabled),
            results_dir: env.var("RESULTS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.results_dir),
            results_retention_days: env.parse("RESULTS_RETENTION_DAYS")
                .unwrap_or(defaults.results_retention_days),
            alert_max_per_hour: env.parse("ALERT_MAX_PER_HOUR").unwrap_or(defaults.alert_max_per_hour),
            email,
            webhook,
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_parallel_nodes: self.max_parallel_nodes.max(1),
            node_timeout: (self.node_timeout_ms > 0)
                .then(|| Duration::from_millis(self.node_timeout_ms)),
        }
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            host: self.service_host.clone(),
            discovery_ports: self.discovery_ports.clone(),
            discovery_timeout: Duration::from_millis(self.discovery_timeout_ms),
            health_timeout: Duration::from_millis(self.health_check_timeout_ms),
            ..RegistryConfig::default()
        }
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs.max(1))
    }

    /// The result store, unless persistence is disabled.
    pub fn result_store(&self) -> Option<ResultStore> {
        self.results_enabled
            .then(|| ResultStore::new(self.results_dir.clone()))
    }

    /// An alert dispatcher wired with every enabled channel.
    pub fn alert_dispatcher(&self) -> AlertDispatcher {
        let mut dispatcher = AlertDispatcher::new(self.alert_max_per_hour);
        if let Some(email) = &self.email {
            dispatcher = dispatcher.with_channel(Arc::new(EmailChannel::new(email.clone())));
        }
        if let Some(webhook) = &self.webhook {
            dispatcher = dispatcher.with_channel(Arc::new(WebhookChannel::new(webhook.clone())));
        }
        dispatcher
    }
}

struct Env<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Env<'_> {
    fn var(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn parse<T: FromStr>(&self, key: &str) -> Option<T> {
        let raw = self.var(key)?;
        match raw.trim().parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid value for {}: {:?}", key, raw);
                None
            }
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse `8001-8010,9000` style port lists.
pub fn parse_ports(raw: &str) -> Result<Vec<u16>, String> {
    let mut ports = Vec::new();
    for part in split_list(raw) {
        match part.split_once('-') {
            Some((start, end)) => {
                let start: u16 = start
                    .trim()
                    .parse()
                    .map_err(|_| format!("invalid port range '{part}'"))?;
                let end: u16 = end
                    .trim()
                    .parse()
                    .map_err(|_| format!("invalid port range '{part}'"))?;
                if start > end {
                    return Err(format!("empty port range '{part}'"));
                }
                ports.extend(start..=end);
            }
            None => ports.push(
                part.parse()
                    .map_err(|_| format!("invalid port '{part}'"))?,
            ),
        }
    }
    if ports.is_empty() {
        return Err("no ports given".to_string());
    }
    ports.sort_unstable();
    ports.dedup();
    Ok(ports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_environment() {
        let config = RuntimeConfig::from_lookup(|_| None);
        assert_eq!(config.bind_address, "0.0.0.0:3000");
        assert_eq!(config.discovery_ports.len(), 10);
        assert!(config.email.is_none());
        assert!(config.webhook.is_none());
        assert!(config.alert_dispatcher().channel_names().is_empty());
    }

    #[test]
    fn test_overrides_and_bad_values() {
        let config = RuntimeConfig::from_lookup(lookup(&[
            ("MAX_PARALLEL_NODES", "4"),
            ("NODE_TIMEOUT_MS", "soon"),
            ("DISCOVERY_PORTS", "9001-9003, 9100"),
            ("RESULTS_ENABLED", "false"),
            ("ALERT_WEBHOOK_ENABLED", "true"),
            ("ALERT_WEBHOOK_URL", "http://chat.local/hook"),
        ]));
        assert_eq!(config.max_parallel_nodes, 4);
        assert_eq!(config.node_timeout_ms, 60_000);
        assert_eq!(config.discovery_ports, vec![9001, 9002, 9003, 9100]);
        assert!(config.result_store().is_none());
        assert_eq!(config.alert_dispatcher().channel_names(), vec!["webhook"]);
    }

    #[test]
    fn test_parse_ports_rejects_garbage() {
        assert!(parse_ports("80-70").is_err());
        assert!(parse_ports("http").is_err());
        assert!(parse_ports(" , ").is_err());
    }
}
