use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid service spec {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },
}

/// Static description of one backend, as found in a spec file or returned
/// by a service's info endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceSpec {
    pub metadata: SpecMetadata,
    pub server: SpecServer,
    #[serde(default)]
    pub inputs: Vec<ServicePort>,
    #[serde(default)]
    pub outputs: Vec<ServicePort>,
    #[serde(default)]
    pub parameters: Vec<ServiceParam>,
    #[serde(default)]
    pub display: DisplayMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpecMetadata {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub version: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpecServer {
    pub endpoint: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

fn default_method() -> String {
    "POST".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServicePort {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceParam {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DisplayMetadata {
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub category: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Healthy,
    Unhealthy,
    Unknown,
}

/// How a record entered the registry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ServiceSource {
    Static,
    Discovered,
    Manual,
}

/// A registered backend and its last known health.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceRecord {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub base_url: String,
    pub endpoint: String,
    pub method: String,
    pub port: u16,
    /// Host as declared in the spec, if it declared one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    pub status: ServiceStatus,
    #[serde(default)]
    pub last_check: Option<DateTime<Utc>>,
    #[serde(default)]
    pub input_schema: Vec<ServicePort>,
    #[serde(default)]
    pub output_schema: Vec<ServicePort>,
    #[serde(default)]
    pub parameters: Vec<ServiceParam>,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub color: String,
    pub source: ServiceSource,
}

impl ServiceRecord {
    /// Build a record from a spec. The spec's own host wins over
    /// `default_host`.
    pub fn from_spec(spec: ServiceSpec, default_host: &str, source: ServiceSource) -> Self {
        let host = spec.server.host.clone();
        let base_url = format!(
            "http://{}:{}",
            host.as_deref().unwrap_or(default_host),
            spec.metadata.port
        );
        Self {
            id: spec.metadata.id,
            name: spec.metadata.name,
            version: spec.metadata.version,
            description: spec.metadata.description,
            base_url,
            endpoint: spec.server.endpoint,
            method: spec.server.method,
            port: spec.metadata.port,
            host,
            status: ServiceStatus::Unknown,
            last_check: None,
            input_schema: spec.inputs,
            output_schema: spec.outputs,
            parameters: spec.parameters,
            category: spec.display.category,
            icon: spec.display.icon,
            color: spec.display.color,
            source,
        }
    }

    /// The spec this record was built from.
    pub fn to_spec(&self) -> ServiceSpec {
        ServiceSpec {
            metadata: SpecMetadata {
                id: self.id.clone(),
                name: self.name.clone(),
                version: self.version.clone(),
                port: self.port,
                description: self.description.clone(),
            },
            server: SpecServer {
                endpoint: self.endpoint.clone(),
                method: self.method.clone(),
                host: self.host.clone(),
            },
            inputs: self.input_schema.clone(),
            outputs: self.output_schema.clone(),
            parameters: self.parameters.clone(),
            display: DisplayMetadata {
                icon: self.icon.clone(),
                color: self.color.clone(),
                category: self.category.clone(),
            },
        }
    }

    /// Full URL of the inference endpoint.
    pub fn url(&self) -> String {
        join_url(&self.base_url, &self.endpoint)
    }

    pub fn health_url(&self) -> String {
        join_url(&self.base_url, "/health")
    }
}

pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Parse one spec file; YAML for `.yaml`/`.yml`, JSON otherwise.
pub fn load_spec_file(path: &Path) -> Result<ServiceSpec, ServiceError> {
    let text = std::fs::read_to_string(path).map_err(|source| ServiceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let parse_err = |reason: String| ServiceError::Parse {
        path: path.to_path_buf(),
        reason,
    };
    match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => {
            serde_yaml::from_str(&text).map_err(|e| parse_err(e.to_string()))
        }
        _ => serde_json::from_str(&text).map_err(|e| parse_err(e.to_string())),
    }
}

/// Load every spec file in `dir`, sorted by file name. Unparseable files are
/// logged and skipped.
pub fn load_spec_dir(dir: &Path) -> Result<Vec<ServiceSpec>, ServiceError> {
    let entries = std::fs::read_dir(dir).map_err(|source| ServiceError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("yaml") | Some("yml") | Some("json")
            )
        })
        .collect();
    paths.sort();

    let mut specs = Vec::new();
    for path in paths {
        match load_spec_file(&path) {
            Ok(spec) => specs.push(spec),
            Err(e) => tracing::warn!("Skipping service spec: {}", e),
        }
    }
    Ok(specs)
}
