// crates/infercli/src/main.rs

use anyhow::{bail, Context, Result};
use base64::Engine as _;
use clap::{Parser, Subcommand};
use infercore::{ExecutionEvent, NodeEvent, NodeSpec, RunStatus, WorkflowDefinition};
use inferruntime::{FlowRuntime, RuntimeConfig};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "infer")]
#[command(about = "InferFlow pipeline CLI", long_about = None)]
struct Cli {
    /// Show debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow file
    Run {
        /// Path to workflow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Input data as JSON object
        #[arg(short, long)]
        input: Option<String>,

        /// Image file, passed base64-encoded as the `image` input
        #[arg(long)]
        image: Option<PathBuf>,

        /// Print the full run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate a workflow file
    Validate {
        /// Path to workflow JSON file
        file: PathBuf,
    },

    /// List available node types
    Nodes,

    /// Load static service specs, discover, health-check and list services
    Services {
        /// Only list healthy services
        #[arg(long)]
        healthy: bool,
    },

    /// Probe the discovery ports for inference services
    Discover,

    /// Remove stored results older than the retention window
    Cleanup {
        /// Retention in days (defaults to RESULTS_RETENTION_DAYS)
        #[arg(short, long)]
        days: Option<u32>,

        /// Report what would be removed without deleting
        #[arg(long)]
        dry_run: bool,
    },

    /// Create an example inspection workflow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Commands::Run {
            file,
            input,
            image,
            json,
        } => run_workflow(&file, input, image, json).await,
        Commands::Validate { file } => validate_workflow(&file),
        Commands::Nodes => {
            list_nodes();
            Ok(())
        }
        Commands::Services { healthy } => list_services(healthy).await,
        Commands::Discover => discover().await,
        Commands::Cleanup { days, dry_run } => cleanup(days, dry_run),
        Commands::Init { output } => create_example_workflow(&output),
    }
}

fn runtime() -> FlowRuntime {
    FlowRuntime::new(infernodes::standard_registry(), RuntimeConfig::from_env())
}

fn load_workflow(file: &Path) -> Result<WorkflowDefinition> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("reading workflow {}", file.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing workflow {}", file.display()))
}

fn parse_inputs(input: Option<String>, image: Option<PathBuf>) -> Result<Map<String, Value>> {
    let mut inputs = match input {
        Some(text) => match serde_json::from_str::<Value>(&text)? {
            Value::Object(map) => map,
            _ => bail!("Input must be a JSON object"),
        },
        None => Map::new(),
    };
    if let Some(path) = image {
        let bytes =
            std::fs::read(&path).with_context(|| format!("reading image {}", path.display()))?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        inputs.insert("image".to_string(), Value::String(encoded));
    }
    Ok(inputs)
}

async fn run_workflow(
    file: &Path,
    input: Option<String>,
    image: Option<PathBuf>,
    as_json: bool,
) -> Result<()> {
    let workflow = load_workflow(file)?;
    let inputs = parse_inputs(input, image)?;

    println!("Workflow: {} ({} nodes, {} edges)", workflow.name, workflow.nodes.len(), workflow.edges.len());

    let runtime = runtime();
    runtime.bootstrap_services().await;

    let mut events = runtime.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ExecutionEvent::WorkflowStarted { execution_id, .. } => {
                    println!("Run {} started", execution_id);
                }
                ExecutionEvent::NodeStarted {
                    node_id, node_type, ..
                } => {
                    println!("  > {} ({})", node_id, node_type);
                }
                ExecutionEvent::NodeCompleted {
                    node_id,
                    duration_ms,
                    ..
                } => {
                    println!("  ok {} in {}ms", node_id, duration_ms);
                }
                ExecutionEvent::NodeFailed { node_id, error, .. } => {
                    println!("  FAILED {}: {}", node_id, error);
                }
                ExecutionEvent::NodeSkipped {
                    node_id, reason, ..
                } => {
                    println!("  skipped {} ({:?})", node_id, reason);
                }
                ExecutionEvent::NodeEvent { node_id, event, .. } => match event {
                    NodeEvent::Info { message } => println!("     [{}] {}", node_id, message),
                    NodeEvent::Warning { message } => {
                        println!("     [{}] warning: {}", node_id, message)
                    }
                    NodeEvent::Progress { percent, message } => {
                        println!(
                            "     [{}] {:.0}% {}",
                            node_id,
                            percent,
                            message.unwrap_or_default()
                        )
                    }
                },
                ExecutionEvent::WorkflowCompleted {
                    status,
                    duration_ms,
                    ..
                } => {
                    println!("Run {} after {}ms", status.as_str(), duration_ms);
                }
            }
        }
    });

    let report = runtime.execute(&workflow, inputs).await?;

    // let the listener drain before printing the summary
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    event_task.abort();

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!();
        println!("Run ID: {}", report.run_id);
        println!("Status: {}", report.status.as_str());
        for entry in &report.node_statuses {
            match &entry.error {
                Some(error) => println!("  {:<24} {} ({})", entry.node_id, entry.status, error),
                None => println!("  {:<24} {}", entry.node_id, entry.status),
            }
        }
        if let Some(dir) = &report.result_dir {
            println!("Results: {}", dir.display());
        }
        if !report.outputs.is_empty() {
            println!("Outputs:");
            println!("{}", serde_json::to_string_pretty(&report.outputs)?);
        }
    }

    match report.status {
        RunStatus::Completed | RunStatus::Partial => Ok(()),
        status => bail!("workflow run {}", status.as_str()),
    }
}

fn validate_workflow(file: &Path) -> Result<()> {
    let workflow = load_workflow(file)?;
    runtime().validate(&workflow)?;

    println!("Workflow is valid:");
    println!("   Name: {}", workflow.name);
    println!("   Nodes: {}", workflow.nodes.len());
    println!("   Edges: {}", workflow.edges.len());
    Ok(())
}

fn list_nodes() {
    let registry = infernodes::standard_registry();
    println!("Available node types:");
    for node_type in registry.get_all_types() {
        if let Some(metadata) = registry.get_metadata(&node_type) {
            println!("  {} [{}]", node_type, metadata.category);
            println!("    {}", metadata.description);
            for param in &metadata.parameters {
                let default = param
                    .default
                    .as_ref()
                    .map(|d| format!(" = {d}"))
                    .unwrap_or_default();
                let required = if param.required { " (required)" } else { "" };
                println!("      - {}{}{}", param.name, default, required);
            }
        }
    }
}

async fn list_services(healthy_only: bool) -> Result<()> {
    let runtime = runtime();
    runtime.bootstrap_services().await;

    let services = if healthy_only {
        runtime.services().list_healthy()
    } else {
        runtime.services().list_all()
    };
    if services.is_empty() {
        println!("No services registered");
        return Ok(());
    }
    for service in services {
        println!(
            "  {:<20} {:<10} {:<9} {} {}",
            service.id,
            service.category,
            format!("{:?}", service.status).to_lowercase(),
            service.method,
            service.url()
        );
    }
    Ok(())
}

async fn discover() -> Result<()> {
    let runtime = runtime();
    let report = runtime.services().discover().await;
    println!(
        "Probed {} ports on {}, discovered {} services",
        report.probed,
        runtime.config().service_host,
        report.discovered.len()
    );
    for id in &report.discovered {
        println!("  {}", id);
    }
    Ok(())
}

fn cleanup(days: Option<u32>, dry_run: bool) -> Result<()> {
    let config = RuntimeConfig::from_env();
    let days = days.unwrap_or(config.results_retention_days);
    let Some(store) = config.result_store() else {
        bail!("result persistence is disabled (RESULTS_ENABLED=false)");
    };

    let stats = store.cleanup_old_results(days, dry_run)?;
    let verb = if dry_run { "Would remove" } else { "Removed" };
    println!(
        "{} {} runs ({} files, {} bytes) dated before {}",
        verb, stats.runs, stats.files, stats.bytes, stats.cutoff_date
    );
    for date in &stats.dates {
        println!("  {}", date);
    }
    Ok(())
}

fn create_example_workflow(output: &Path) -> Result<()> {
    let mut workflow = WorkflowDefinition::new("Defect inspection");
    workflow.description =
        Some("Detects defects and asks a vision model to describe them".to_string());

    workflow.add_node(NodeSpec::new("frame", "input.image").with_label("Frame"));
    workflow.add_node(
        NodeSpec::new("detect", "model.detect")
            .with_label("Detect")
            .with_param("confidence", 0.4),
    );
    workflow.add_node(
        NodeSpec::new("gate", "control.if")
            .with_label("Any detections?")
            .with_param("condition", json!({"field": "count", "operator": ">", "value": 0})),
    );
    workflow.add_node(
        NodeSpec::new("describe", "model.vlm")
            .with_label("Describe")
            .with_param("prompt", "Describe the defects visible in this image."),
    );
    workflow.add_node(
        NodeSpec::new("clean", "input.text")
            .with_label("Clean")
            .with_param("text", "no defects found"),
    );
    workflow.connect("frame", "detect");
    workflow.connect("detect", "gate");
    workflow.connect_branch("gate", "true", "describe");
    workflow.connect_branch("gate", "false", "clean");

    std::fs::write(output, serde_json::to_string_pretty(&workflow)?)?;

    println!("Created example workflow: {}", output.display());
    println!();
    println!("Run it with:");
    println!("  infer run --file {} --image part.png", output.display());
    Ok(())
}
