use super::spec::{
    load_spec_dir, ServiceError, ServiceRecord, ServiceSource, ServiceSpec, ServiceStatus,
};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use infercore::{NodeError, ResolvedService, ServiceResolver};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Settings for discovery and health probing.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Host used for discovery probes and for specs that declare none.
    pub host: String,
    pub discovery_ports: Vec<u16>,
    pub discovery_timeout: Duration,
    pub discovery_concurrency: usize,
    pub health_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            discovery_ports: (8001..=8010).collect(),
            discovery_timeout: Duration::from_millis(2000),
            discovery_concurrency: 8,
            health_timeout: Duration::from_millis(3000),
        }
    }
}

/// Result of one discovery sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiscoveryReport {
    pub probed: usize,
    pub discovered: Vec<String>,
}

/// In-memory catalogue of backend services.
///
/// Queries never touch the network. Records are only mutated under a short
/// write lock; probes run without holding it.
pub struct ServiceRegistry {
    records: RwLock<HashMap<String, ServiceRecord>>,
    config: RegistryConfig,
    client: reqwest::Client,
}

impl ServiceRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            config,
            client: reqwest::Client::new(),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Insert or replace a record, returning the previous one.
    pub fn add(&self, record: ServiceRecord) -> Option<ServiceRecord> {
        tracing::info!("Registered service {} at {}", record.id, record.base_url);
        self.records.write().insert(record.id.clone(), record)
    }

    pub fn register_spec(&self, spec: ServiceSpec, source: ServiceSource) -> ServiceRecord {
        let record = ServiceRecord::from_spec(spec, &self.config.host, source);
        self.add(record.clone());
        record
    }

    pub fn remove(&self, id: &str) -> Option<ServiceRecord> {
        let removed = self.records.write().remove(id);
        if removed.is_some() {
            tracing::info!("Deregistered service {}", id);
        }
        removed
    }

    pub fn get(&self, id: &str) -> Option<ServiceRecord> {
        self.records.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// All records, sorted by id.
    pub fn list_all(&self) -> Vec<ServiceRecord> {
        self.list_where(|_| true)
    }

    pub fn list_healthy(&self) -> Vec<ServiceRecord> {
        self.list_where(|r| r.status == ServiceStatus::Healthy)
    }

    pub fn list_by_category(&self, category: &str) -> Vec<ServiceRecord> {
        self.list_where(|r| r.category == category)
    }

    fn list_where(&self, keep: impl Fn(&ServiceRecord) -> bool) -> Vec<ServiceRecord> {
        let mut records: Vec<ServiceRecord> = self
            .records
            .read()
            .values()
            .filter(|r| keep(r))
            .cloned()
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    /// Register every spec file found in `dir`.
    pub fn load_static_specs(&self, dir: &Path) -> Result<usize, ServiceError> {
        let specs = load_spec_dir(dir)?;
        let count = specs.len();
        for spec in specs {
            self.register_spec(spec, ServiceSource::Static);
        }
        tracing::info!("Loaded {} static service specs from {}", count, dir.display());
        Ok(count)
    }

    fn set_status(&self, id: &str, status: ServiceStatus) {
        if let Some(record) = self.records.write().get_mut(id) {
            record.status = status;
            record.last_check = Some(Utc::now());
        }
    }

    async fn probe_health(&self, url: &str) -> ServiceStatus {
        match self
            .client
            .get(url)
            .timeout(self.config.health_timeout)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => ServiceStatus::Healthy,
            Ok(response) => {
                tracing::warn!("Health check {} returned {}", url, response.status());
                ServiceStatus::Unhealthy
            }
            Err(e) => {
                tracing::warn!("Health check {} failed: {}", url, e);
                ServiceStatus::Unhealthy
            }
        }
    }

    /// Probe one service and record the result. `None` if it is not registered.
    pub async fn check_health(&self, id: &str) -> Option<ServiceStatus> {
        let url = self.get(id)?.health_url();
        let status = self.probe_health(&url).await;
        self.set_status(id, status);
        Some(status)
    }

    /// Probe every registered service concurrently.
    pub async fn check_all(&self) -> HashMap<String, ServiceStatus> {
        let targets: Vec<(String, String)> = self
            .records
            .read()
            .values()
            .map(|r| (r.id.clone(), r.health_url()))
            .collect();

        let results: Vec<(String, ServiceStatus)> = stream::iter(targets)
            .map(|(id, url)| async move {
                let status = self.probe_health(&url).await;
                (id, status)
            })
            .buffer_unordered(self.config.discovery_concurrency.max(1))
            .collect()
            .await;

        for (id, status) in &results {
            self.set_status(id, *status);
        }
        tracing::debug!("Health check cycle finished for {} services", results.len());
        results.into_iter().collect()
    }

    async fn probe_info(&self, port: u16) -> Option<ServiceSpec> {
        let url = format!("http://{}:{}/info", self.config.host, port);
        let response = self
            .client
            .get(&url)
            .timeout(self.config.discovery_timeout)
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            tracing::debug!("{} answered {}", url, response.status());
            return None;
        }
        match response.json::<ServiceSpec>().await {
            Ok(spec) => Some(spec),
            Err(e) => {
                tracing::debug!("{} returned unusable info: {}", url, e);
                None
            }
        }
    }

    /// Probe the configured candidate ports and register every responder.
    pub async fn discover(&self) -> DiscoveryReport {
        let ports = self.config.discovery_ports.clone();
        let probed = ports.len();
        tracing::info!("Discovering services on {} candidate ports", probed);

        let found: Vec<(u16, ServiceSpec)> = stream::iter(ports)
            .map(|port| async move { self.probe_info(port).await.map(|spec| (port, spec)) })
            .buffer_unordered(self.config.discovery_concurrency.max(1))
            .filter_map(|found| async move { found })
            .collect()
            .await;

        let mut discovered = Vec::new();
        for (port, mut spec) in found {
            // the port that answered is authoritative
            spec.metadata.port = port;
            spec.server.host = None;
            let record = self.register_spec(spec, ServiceSource::Discovered);
            self.check_health(&record.id).await;
            discovered.push(record.id);
        }
        discovered.sort();

        tracing::info!("Discovery found {} services", discovered.len());
        DiscoveryReport { probed, discovered }
    }

    /// Start the periodic health check loop.
    pub fn spawn_health_monitor(self: &Arc<Self>, interval: Duration) -> HealthMonitor {
        let token = CancellationToken::new();
        let registry = Arc::clone(self);
        let cancel = token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        registry.check_all().await;
                    }
                }
            }
            tracing::info!("Health monitor stopped");
        });

        tracing::info!("Health monitor started (every {:?})", interval);
        HealthMonitor {
            token,
            handle: Some(handle),
        }
    }
}

impl ServiceResolver for ServiceRegistry {
    fn resolve(&self, service_id: &str) -> Result<ResolvedService, NodeError> {
        let record = self.get(service_id).ok_or_else(|| {
            NodeError::ServiceUnavailable(format!("service '{service_id}' is not registered"))
        })?;
        if record.status == ServiceStatus::Unhealthy {
            return Err(NodeError::ServiceUnavailable(format!(
                "service '{service_id}' is unhealthy"
            )));
        }
        Ok(ResolvedService {
            id: record.id.clone(),
            url: record.url(),
            base_url: record.base_url,
            method: record.method,
        })
    }
}

/// Handle to the periodic health check task. Dropping it stops the loop.
pub struct HealthMonitor {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl HealthMonitor {
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the loop and wait for the current cycle to finish.
    pub async fn stop(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
