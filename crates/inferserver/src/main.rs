use actix_cors::Cors;
use actix_web::{delete, get, post, web, App, HttpResponse, HttpServer, Responder, Result as ActixResult};
use actix_ws::Message;
use infercore::WorkflowDefinition;
use inferruntime::services::{ServiceSource, ServiceSpec};
use inferruntime::{FlowRuntime, RuntimeConfig};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
struct AppState {
    runtime: Arc<FlowRuntime>,
}

/// Request body for workflow execution
#[derive(Debug, Deserialize)]
struct ExecuteRequest {
    workflow: WorkflowDefinition,
    #[serde(default)]
    inputs: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct ValidateRequest {
    workflow: WorkflowDefinition,
}

#[derive(Debug, Serialize)]
struct ValidateResponse {
    valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CleanupRequest {
    days: Option<u32>,
    #[serde(default)]
    dry_run: bool,
}

/// Error response
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: actix_web::http::StatusCode, error: impl ToString) -> HttpResponse {
    HttpResponse::build(status).json(ErrorResponse {
        error: error.to_string(),
    })
}

/// Health check endpoint
#[get("/health")]
async fn health_check(data: web::Data<AppState>) -> impl Responder {
    let services = data.runtime.services();
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "inferflow",
        "node_types": data.runtime.executors().len(),
        "services": services.len(),
        "healthy_services": services.list_healthy().len(),
    }))
}

/// Execute a submitted workflow and return the run report
#[post("/workflow/execute")]
async fn execute_workflow(
    data: web::Data<AppState>,
    req: web::Json<ExecuteRequest>,
) -> ActixResult<impl Responder> {
    let ExecuteRequest { workflow, inputs } = req.into_inner();
    info!("Executing workflow: {} ({})", workflow.name, workflow.id);

    match data.runtime.execute(&workflow, inputs).await {
        Ok(report) => {
            info!(
                "Workflow {} finished {} in {}ms",
                workflow.id,
                report.status.as_str(),
                report.duration_ms
            );
            Ok(HttpResponse::Ok().json(report))
        }
        Err(e) => {
            warn!("Workflow {} rejected: {}", workflow.id, e);
            Ok(error_response(actix_web::http::StatusCode::BAD_REQUEST, e))
        }
    }
}

/// Check a workflow without running it
#[post("/workflow/validate")]
async fn validate_workflow(
    data: web::Data<AppState>,
    req: web::Json<ValidateRequest>,
) -> ActixResult<impl Responder> {
    let response = match data.runtime.validate(&req.workflow) {
        Ok(()) => ValidateResponse {
            valid: true,
            error: None,
        },
        Err(e) => ValidateResponse {
            valid: false,
            error: Some(e.to_string()),
        },
    };
    Ok(HttpResponse::Ok().json(response))
}

/// WebSocket endpoint for real-time events
#[get("/workflow/events")]
async fn websocket_events(
    req: actix_web::HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let (res, mut session, mut msg_stream) = actix_ws::handle(&req, stream)?;

    info!("WebSocket client connected");
    let mut events = data.runtime.subscribe_events();

    actix_web::rt::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Ok(event) => {
                            if let Ok(json) = serde_json::to_string(&event) {
                                if session.text(json).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                            warn!("WebSocket client lagging, dropped {} events", missed);
                        }
                        Err(_) => break,
                    }
                }

                Some(Ok(msg)) = msg_stream.recv() => {
                    match msg {
                        Message::Ping(bytes) => {
                            if session.pong(&bytes).await.is_err() {
                                break;
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }

                else => break,
            }
        }

        info!("WebSocket client disconnected");
        let _ = session.close(None).await;
    });

    Ok(res)
}

/// List available node types
#[get("/nodes")]
async fn list_node_types(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    let registry = data.runtime.executors();
    let nodes: Vec<_> = registry
        .get_all_types()
        .iter()
        .filter_map(|node_type| registry.get_metadata(node_type))
        .collect();
    Ok(HttpResponse::Ok().json(nodes))
}

#[get("/services")]
async fn list_services(data: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(data.runtime.services().list_all())
}

#[get("/services/healthy")]
async fn list_healthy_services(data: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(data.runtime.services().list_healthy())
}

#[get("/services/category/{category}")]
async fn list_services_by_category(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    HttpResponse::Ok().json(data.runtime.services().list_by_category(&path))
}

#[get("/services/{id}")]
async fn get_service(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let id = path.into_inner();
    match data.runtime.services().get(&id) {
        Some(record) => HttpResponse::Ok().json(record),
        None => error_response(
            actix_web::http::StatusCode::NOT_FOUND,
            format!("Service {} not found", id),
        ),
    }
}

/// Register a service by hand and probe it once
#[post("/services")]
async fn register_service(
    data: web::Data<AppState>,
    spec: web::Json<ServiceSpec>,
) -> impl Responder {
    let services = data.runtime.services();
    let record = services.register_spec(spec.into_inner(), ServiceSource::Manual);
    info!("Registered service {} at {}", record.id, record.url());
    services.check_health(&record.id).await;
    let record = services.get(&record.id).unwrap_or(record);
    HttpResponse::Created().json(record)
}

#[delete("/services/{id}")]
async fn remove_service(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let id = path.into_inner();
    match data.runtime.services().remove(&id) {
        Some(record) => HttpResponse::Ok().json(record),
        None => error_response(
            actix_web::http::StatusCode::NOT_FOUND,
            format!("Service {} not found", id),
        ),
    }
}

#[post("/services/discover")]
async fn discover_services(data: web::Data<AppState>) -> impl Responder {
    let report = data.runtime.services().discover().await;
    HttpResponse::Ok().json(report)
}

#[post("/services/health-check")]
async fn check_services(data: web::Data<AppState>) -> impl Responder {
    let statuses = data.runtime.services().check_all().await;
    HttpResponse::Ok().json(statuses)
}

/// Sweep stored results older than the retention window
#[post("/results/cleanup")]
async fn cleanup_results(
    data: web::Data<AppState>,
    req: web::Json<CleanupRequest>,
) -> ActixResult<impl Responder> {
    let Some(store) = data.runtime.store().cloned() else {
        return Ok(error_response(
            actix_web::http::StatusCode::CONFLICT,
            "result persistence is disabled",
        ));
    };
    let days = req.days.unwrap_or(data.runtime.config().results_retention_days);
    let dry_run = req.dry_run;

    let outcome = web::block(move || store.cleanup_old_results(days, dry_run)).await?;
    match outcome {
        Ok(stats) => {
            info!(
                "Result cleanup (dry_run={}): {} runs, {} bytes",
                stats.dry_run, stats.runs, stats.bytes
            );
            Ok(HttpResponse::Ok().json(stats))
        }
        Err(e) => {
            error!("Result cleanup failed: {}", e);
            Ok(error_response(
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                e,
            ))
        }
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting InferFlow server");

    let config = RuntimeConfig::from_env();
    let bind_address = config.bind_address.clone();
    let runtime = Arc::new(FlowRuntime::new(infernodes::standard_registry(), config));
    info!(
        "Runtime initialized with {} node types",
        runtime.executors().len()
    );

    let report = runtime.bootstrap_services().await;
    info!(
        "Service registry ready: {} services ({} discovered on {} ports)",
        runtime.services().len(),
        report.discovered.len(),
        report.probed
    );
    let monitor = runtime.start_health_monitor();

    let app_state = web::Data::new(AppState {
        runtime: Arc::clone(&runtime),
    });

    info!("Server starting on http://{}", bind_address);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            .app_data(web::JsonConfig::default().limit(64 * 1024 * 1024))
            .wrap(cors)
            .wrap(actix_web::middleware::Logger::default())
            .service(health_check)
            .service(execute_workflow)
            .service(validate_workflow)
            .service(websocket_events)
            .service(list_node_types)
            .service(list_services)
            .service(list_healthy_services)
            .service(list_services_by_category)
            .service(get_service)
            .service(register_service)
            .service(remove_service)
            .service(discover_services)
            .service(check_services)
            .service(cleanup_results)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    monitor.stop().await;
    info!("Server stopped");
    Ok(())
}
