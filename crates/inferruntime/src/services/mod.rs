//! Backend service catalogue: static specs, discovery and health monitoring.

mod registry;
mod spec;

pub use registry::{DiscoveryReport, HealthMonitor, RegistryConfig, ServiceRegistry};
pub use spec::{
    load_spec_dir, load_spec_file, DisplayMetadata, ServiceError, ServiceParam, ServicePort,
    ServiceRecord, ServiceSource, ServiceSpec, ServiceStatus, SpecMetadata, SpecServer,
};
