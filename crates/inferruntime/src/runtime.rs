use crate::alert::AlertDispatcher;
use crate::config::RuntimeConfig;
use crate::engine::{RunReport, WorkflowEngine};
use crate::registry::ExecutorRegistry;
use crate::services::{DiscoveryReport, HealthMonitor, ServiceRegistry};
use crate::store::ResultStore;
use infercore::{EventBus, ExecutionEvent, WorkflowDefinition, WorkflowError};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Main runtime for executing workflows
///
/// Owns the shared service objects and hands them to the engine explicitly.
pub struct FlowRuntime {
    config: RuntimeConfig,
    engine: WorkflowEngine,
    services: Arc<ServiceRegistry>,
    store: Option<Arc<ResultStore>>,
    alerts: Arc<AlertDispatcher>,
    event_bus: Arc<EventBus>,
}

impl FlowRuntime {
    /// Create a runtime over a populated executor registry.
    pub fn new(executors: ExecutorRegistry, config: RuntimeConfig) -> Self {
        let executors = Arc::new(executors);
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        let services = Arc::new(ServiceRegistry::new(config.registry_config()));
        let store = config.result_store().map(Arc::new);
        let alerts = Arc::new(config.alert_dispatcher());

        let mut engine = WorkflowEngine::new(executors)
            .with_config(config.engine_config())
            .with_event_bus(Arc::clone(&event_bus))
            .with_services(services.clone())
            .with_alerts(Arc::clone(&alerts));
        if let Some(store) = &store {
            engine = engine.with_store(Arc::clone(store));
        }

        Self {
            config,
            engine,
            services,
            store,
            alerts,
            event_bus,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn engine(&self) -> &WorkflowEngine {
        &self.engine
    }

    pub fn executors(&self) -> &Arc<ExecutorRegistry> {
        self.engine.executors()
    }

    pub fn services(&self) -> &Arc<ServiceRegistry> {
        &self.services
    }

    pub fn store(&self) -> Option<&Arc<ResultStore>> {
        self.store.as_ref()
    }

    pub fn alerts(&self) -> &Arc<AlertDispatcher> {
        &self.alerts
    }

    /// Load static specs and run one discovery sweep. Missing spec
    /// directories are not fatal.
    pub async fn bootstrap_services(&self) -> DiscoveryReport {
        let dir = &self.config.service_specs_dir;
        if dir.is_dir() {
            if let Err(e) = self.services.load_static_specs(dir) {
                tracing::warn!("Could not load service specs: {}", e);
            }
        } else {
            tracing::info!("No service spec directory at {}", dir.display());
        }
        let report = self.services.discover().await;
        self.services.check_all().await;
        report
    }

    pub fn start_health_monitor(&self) -> HealthMonitor {
        self.services
            .spawn_health_monitor(self.config.health_check_interval())
    }

    pub fn validate(&self, workflow: &WorkflowDefinition) -> Result<(), WorkflowError> {
        self.engine.validate(workflow)
    }

    /// Execute a workflow directly (without registration)
    pub async fn execute(
        &self,
        workflow: &WorkflowDefinition,
        inputs: Map<String, Value>,
    ) -> Result<RunReport, WorkflowError> {
        self.engine.execute(workflow, inputs).await
    }

    pub async fn execute_with_cancellation(
        &self,
        workflow: &WorkflowDefinition,
        inputs: Map<String, Value>,
        cancellation: CancellationToken,
    ) -> Result<RunReport, WorkflowError> {
        self.engine
            .execute_with_cancellation(workflow, inputs, cancellation)
            .await
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    /// Get the event bus for direct access
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }
}
