use infercore::{NodeError, ServiceResolver};
use inferruntime::services::{
    load_spec_file, DisplayMetadata, RegistryConfig, ServicePort, ServiceRecord, ServiceRegistry,
    ServiceSource, ServiceSpec, ServiceStatus, SpecMetadata, SpecServer,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const DETECTOR_YAML: &str = r##"
metadata:
  id: yolo-detector
  name: YOLO Detector
  version: 1.2.0
  port: 8001
  description: Object detection
server:
  endpoint: /detect
  method: POST
inputs:
  - name: image
    type: image
    required: true
outputs:
  - name: detections
    type: detections
parameters:
  - name: confidence
    type: float
    default: 0.25
    min: 0.0
    max: 1.0
    description: Minimum score
display:
  icon: box
  color: "#ff8800"
  category: detection
"##;

fn spec(id: &str, port: u16, category: &str) -> ServiceSpec {
    ServiceSpec {
        metadata: SpecMetadata {
            id: id.to_string(),
            name: format!("{id} service"),
            version: "1.0.0".to_string(),
            port,
            description: None,
        },
        server: SpecServer {
            endpoint: "/infer".to_string(),
            method: "POST".to_string(),
            host: None,
        },
        inputs: vec![ServicePort {
            name: "image".to_string(),
            data_type: "image".to_string(),
            required: true,
            description: String::new(),
        }],
        outputs: Vec::new(),
        parameters: Vec::new(),
        display: DisplayMetadata {
            icon: String::new(),
            color: String::new(),
            category: category.to_string(),
        },
    }
}

fn record(id: &str, category: &str, status: ServiceStatus) -> ServiceRecord {
    let mut record = ServiceRecord::from_spec(spec(id, 9000, category), "localhost", ServiceSource::Manual);
    record.status = status;
    record
}

/// Host and port of a running mock server.
fn host_port(server: &MockServer) -> (String, u16) {
    let address = server.address();
    (address.ip().to_string(), address.port())
}

#[test]
fn test_add_get_remove() {
    let registry = ServiceRegistry::new(RegistryConfig::default());
    let original = record("ocr", "text", ServiceStatus::Unknown);

    assert!(registry.add(original.clone()).is_none());
    assert_eq!(registry.get("ocr"), Some(original.clone()));

    assert_eq!(registry.remove("ocr"), Some(original));
    assert!(registry.get("ocr").is_none());
    assert!(registry.is_empty());
}

#[test]
fn test_queries_filter_exactly() {
    let registry = ServiceRegistry::new(RegistryConfig::default());
    registry.add(record("det-a", "detection", ServiceStatus::Healthy));
    registry.add(record("det-b", "detection", ServiceStatus::Unhealthy));
    registry.add(record("ocr", "text", ServiceStatus::Unknown));

    let healthy: Vec<String> = registry.list_healthy().into_iter().map(|r| r.id).collect();
    assert_eq!(healthy, vec!["det-a"]);

    let detection: Vec<String> = registry
        .list_by_category("detection")
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(detection, vec!["det-a", "det-b"]);

    assert!(registry.list_by_category("Detection").is_empty());
    assert!(registry.list_by_category("audio").is_empty());
    assert_eq!(registry.list_all().len(), 3);
}

#[test]
fn test_resolve_follows_health() {
    let registry = ServiceRegistry::new(RegistryConfig::default());
    registry.add(record("up", "x", ServiceStatus::Healthy));
    registry.add(record("fresh", "x", ServiceStatus::Unknown));
    registry.add(record("down", "x", ServiceStatus::Unhealthy));

    let resolved = registry.resolve("up").unwrap();
    assert_eq!(resolved.url, "http://localhost:9000/infer");
    assert_eq!(resolved.method, "POST");
    assert!(registry.resolve("fresh").is_ok());
    assert!(matches!(
        registry.resolve("down"),
        Err(NodeError::ServiceUnavailable(_))
    ));
    assert!(matches!(
        registry.resolve("missing"),
        Err(NodeError::ServiceUnavailable(_))
    ));
}

#[test]
fn test_static_spec_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("yolo.yaml");
    std::fs::write(&file, DETECTOR_YAML).unwrap();

    let loaded = load_spec_file(&file).unwrap();
    let record = ServiceRecord::from_spec(loaded.clone(), "localhost", ServiceSource::Static);

    assert_eq!(record.base_url, "http://localhost:8001");
    assert_eq!(record.url(), "http://localhost:8001/detect");
    assert_eq!(record.category, "detection");
    assert_eq!(record.parameters[0].default, Some(json!(0.25)));
    assert_eq!(record.to_spec(), loaded);

    let reserialized = serde_yaml::to_string(&record.to_spec()).unwrap();
    let reparsed: ServiceSpec = serde_yaml::from_str(&reserialized).unwrap();
    assert_eq!(reparsed, loaded);
}

#[test]
fn test_load_static_specs_skips_bad_files() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.yaml"), DETECTOR_YAML).unwrap();
    let json_spec = serde_json::to_string(&spec("ocr", 8002, "text")).unwrap();
    std::fs::write(dir.path().join("b.json"), json_spec).unwrap();
    std::fs::write(dir.path().join("c.yml"), "metadata: [not, a, spec]").unwrap();
    std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

    let registry = ServiceRegistry::new(RegistryConfig::default());
    let count = registry.load_static_specs(dir.path()).unwrap();

    assert_eq!(count, 2);
    assert_eq!(registry.get("yolo-detector").unwrap().source, ServiceSource::Static);
    assert_eq!(registry.get("ocr").unwrap().status, ServiceStatus::Unknown);
}

#[test]
fn test_missing_spec_dir_is_an_error() {
    let registry = ServiceRegistry::new(RegistryConfig::default());
    assert!(registry
        .load_static_specs(std::path::Path::new("/nonexistent/specs"))
        .is_err());
}

#[tokio::test]
async fn test_health_check_flips_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let (host, port) = host_port(&server);
    let registry = ServiceRegistry::new(RegistryConfig::default());
    let mut service = spec("det", port, "detection");
    service.server.host = Some(host);
    registry.register_spec(service, ServiceSource::Manual);

    assert_eq!(registry.check_health("det").await, Some(ServiceStatus::Healthy));
    assert!(registry.get("det").unwrap().last_check.is_some());
    assert_eq!(registry.check_health("det").await, Some(ServiceStatus::Unhealthy));
    assert_eq!(registry.get("det").unwrap().status, ServiceStatus::Unhealthy);
    assert_eq!(registry.check_health("absent").await, None);
}

#[tokio::test]
async fn test_unreachable_service_is_unhealthy() {
    let registry = ServiceRegistry::new(RegistryConfig {
        health_timeout: Duration::from_millis(200),
        ..RegistryConfig::default()
    });
    let mut service = spec("gone", 1, "x");
    service.server.host = Some("127.0.0.1".to_string());
    registry.register_spec(service, ServiceSource::Manual);

    let statuses = registry.check_all().await;
    assert_eq!(statuses["gone"], ServiceStatus::Unhealthy);
}

#[tokio::test]
async fn test_discovery_registers_responders() {
    let server = MockServer::start().await;
    let (host, port) = host_port(&server);
    let mut advertised = spec("vlm", 1234, "language");
    advertised.server.host = Some("elsewhere".to_string());

    Mock::given(method("GET"))
        .and(path("/info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&advertised))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let registry = ServiceRegistry::new(RegistryConfig {
        host: host.clone(),
        // port 1 never answers
        discovery_ports: vec![1, port],
        discovery_timeout: Duration::from_millis(500),
        ..RegistryConfig::default()
    });

    let report = registry.discover().await;
    assert_eq!(report.probed, 2);
    assert_eq!(report.discovered, vec!["vlm"]);

    let record = registry.get("vlm").unwrap();
    assert_eq!(record.source, ServiceSource::Discovered);
    assert_eq!(record.port, port);
    assert_eq!(record.base_url, format!("http://{host}:{port}"));
    assert_eq!(record.status, ServiceStatus::Healthy);
}

#[tokio::test]
async fn test_health_monitor_runs_until_stopped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let (host, port) = host_port(&server);
    let registry = Arc::new(ServiceRegistry::new(RegistryConfig::default()));
    let mut service = spec("det", port, "detection");
    service.server.host = Some(host);
    registry.register_spec(service, ServiceSource::Manual);

    let monitor = registry.spawn_health_monitor(Duration::from_millis(20));
    assert!(monitor.is_running());

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(registry.get("det").unwrap().status, ServiceStatus::Healthy);

    monitor.stop().await;
    let checked = registry.get("det").unwrap().last_check;
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(registry.get("det").unwrap().last_check, checked);
}
