//! Workflow execution runtime
//!
//! This crate provides the execution engine that runs workflows as DAGs,
//! the executor registry, the backend service registry with discovery and
//! health monitoring, per-run result persistence and failure alerting.

pub mod alert;
mod config;
mod engine;
pub mod graph;
mod registry;
mod runtime;
pub mod services;
pub mod store;

pub use alert::{AlertDispatcher, AlertOutcome, AlertRequest};
pub use config::{parse_ports, RuntimeConfig};
pub use engine::{EngineConfig, NodeStatusEntry, RunReport, WorkflowEngine};
pub use registry::{ExecutorMetadata, ExecutorRegistry};
pub use runtime::FlowRuntime;
pub use services::{ServiceRegistry, ServiceStatus};
pub use store::{CleanupStats, ResultStore, StoreError};
