use crate::alert::{AlertDispatcher, AlertRequest};
use crate::graph::{self, ExecutionPlan};
use crate::registry::ExecutorRegistry;
use crate::store::{NodeSummary, ResultStore, RunHandle, RunMetadata};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use infercore::{
    run_node, EventBus, ExecutionEvent, ExecutionId, NodeContext, NodeError, NodeId, NodeKind,
    NodeResult, NodeSpec, NodeStatus, RunStatus, ServiceResolver, SkipReason, SubflowResult,
    SubflowRunner, UpstreamOutput, WorkflowDefinition, WorkflowError,
};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;

/// Engine-wide limits; per-workflow settings may tighten them.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_parallel_nodes: usize,
    pub node_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallel_nodes: 10,
            node_timeout: Some(Duration::from_secs(60)),
        }
    }
}

/// Per-node line of a run report.
#[derive(Debug, Clone, Serialize)]
pub struct NodeStatusEntry {
    pub node_id: NodeId,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<SkipReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of a workflow run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: ExecutionId,
    pub workflow_id: String,
    pub workflow_name: String,
    pub status: RunStatus,
    /// One entry per node, in definition order.
    pub node_statuses: Vec<NodeStatusEntry>,
    /// Envelopes in completion order.
    pub results: Vec<NodeResult>,
    /// Combined data of the completed output nodes.
    pub outputs: Map<String, Value>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_dir: Option<PathBuf>,
}

impl RunReport {
    pub fn status_of(&self, node_id: &str) -> Option<&str> {
        self.node_statuses
            .iter()
            .find(|e| e.node_id == node_id)
            .map(|e| e.status.as_str())
    }

    pub fn result_of(&self, node_id: &str) -> Option<&NodeResult> {
        self.results.iter().find(|r| r.node_id == node_id)
    }
}

/// Mutable bookkeeping for one graph execution.
struct RunState {
    statuses: HashMap<NodeId, NodeStatus>,
    results: HashMap<NodeId, NodeResult>,
    /// Completed node data.
    outputs: HashMap<NodeId, Map<String, Value>>,
    /// Branch chosen by each completed branch node.
    branches: HashMap<NodeId, String>,
    completion_order: Vec<NodeId>,
    cancelled: bool,
}

impl RunState {
    fn new(plan: &ExecutionPlan) -> Self {
        Self {
            statuses: plan
                .order
                .iter()
                .map(|id| (id.clone(), NodeStatus::Pending))
                .collect(),
            results: HashMap::new(),
            outputs: HashMap::new(),
            branches: HashMap::new(),
            completion_order: Vec::new(),
            cancelled: false,
        }
    }

    fn status(&self, node_id: &str) -> NodeStatus {
        self.statuses
            .get(node_id)
            .copied()
            .unwrap_or(NodeStatus::Pending)
    }
}

enum EdgeState {
    Pending,
    Satisfied,
    Inactive,
    Broken,
}

/// Abort handles of the node tasks a graph run has in flight. Dropping it
/// aborts whatever is still running, so a dropped run leaves no tasks behind.
#[derive(Default)]
struct TaskAborts(HashMap<NodeId, AbortHandle>);

impl TaskAborts {
    fn insert(&mut self, node_id: NodeId, handle: AbortHandle) {
        self.0.insert(node_id, handle);
    }

    fn remove(&mut self, node_id: &str) {
        self.0.remove(node_id);
    }

    fn abort_all(&mut self) {
        for (_, handle) in self.0.drain() {
            handle.abort();
        }
    }
}

impl Drop for TaskAborts {
    fn drop(&mut self) {
        self.abort_all();
    }
}

enum Join {
    Wait,
    Run,
    Skip(SkipReason),
}

/// Persistence and alerting for a top-level run.
struct RunRecorder {
    run_id: ExecutionId,
    workflow_id: String,
    workflow_name: String,
    store: Option<(Arc<ResultStore>, RunHandle)>,
    alerts: Option<Arc<AlertDispatcher>>,
    seq: usize,
    pending_alerts: Vec<JoinHandle<()>>,
}

impl RunRecorder {
    async fn record(&mut self, spec: &NodeSpec, result: &NodeResult) {
        self.seq += 1;
        if let Some((store, run)) = &self.store {
            if let Err(e) = store.save_node_result(run, self.seq, result).await {
                tracing::warn!("Could not persist result of node {}: {}", spec.id, e);
            }
        }

        if result.success {
            return;
        }
        if let Some(alerts) = &self.alerts {
            let request = AlertRequest::new(
                "node_execution_failed",
                result.error.clone().unwrap_or_default(),
            )
            .with_context("workflow_id", self.workflow_id.clone())
            .with_context("workflow_name", self.workflow_name.clone())
            .with_context("run_id", self.run_id.to_string())
            .with_context("node_id", spec.id.clone())
            .with_context("node_type", spec.node_type.clone());

            let alerts = Arc::clone(alerts);
            self.pending_alerts.push(tokio::spawn(async move {
                alerts.send_alert(request, false).await;
            }));
        }
    }
}

/// Executes workflows as DAGs with parallel execution
#[derive(Clone)]
pub struct WorkflowEngine {
    executors: Arc<ExecutorRegistry>,
    services: Option<Arc<dyn ServiceResolver>>,
    store: Option<Arc<ResultStore>>,
    alerts: Option<Arc<AlertDispatcher>>,
    event_bus: Arc<EventBus>,
    config: EngineConfig,
}

impl WorkflowEngine {
    pub fn new(executors: Arc<ExecutorRegistry>) -> Self {
        Self {
            executors,
            services: None,
            store: None,
            alerts: None,
            event_bus: Arc::new(EventBus::default()),
            config: EngineConfig::default(),
        }
    }

    pub fn with_services(mut self, services: Arc<dyn ServiceResolver>) -> Self {
        self.services = Some(services);
        self
    }

    pub fn with_store(mut self, store: Arc<ResultStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_alerts(mut self, alerts: Arc<AlertDispatcher>) -> Self {
        self.alerts = Some(alerts);
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = event_bus;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn executors(&self) -> &Arc<ExecutorRegistry> {
        &self.executors
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Check a workflow without running it.
    pub fn validate(&self, workflow: &WorkflowDefinition) -> Result<(), WorkflowError> {
        graph::plan(workflow, &self.executors).map(|_| ())
    }

    /// Execute a workflow and return its report. Only structural problems
    /// are errors; node failures are reported per node.
    pub async fn execute(
        &self,
        workflow: &WorkflowDefinition,
        inputs: Map<String, Value>,
    ) -> Result<RunReport, WorkflowError> {
        self.execute_with_cancellation(workflow, inputs, CancellationToken::new())
            .await
    }

    pub async fn execute_with_cancellation(
        &self,
        workflow: &WorkflowDefinition,
        inputs: Map<String, Value>,
        cancellation: CancellationToken,
    ) -> Result<RunReport, WorkflowError> {
        let plan = graph::plan(workflow, &self.executors)?;

        let run_id = ExecutionId::new_v4();
        let started_at = Utc::now();
        let start_time = Instant::now();

        self.event_bus.emit(ExecutionEvent::WorkflowStarted {
            execution_id: run_id,
            workflow_id: workflow.id.clone(),
            workflow_name: workflow.name.clone(),
            timestamp: started_at,
        });
        tracing::info!(
            "Starting workflow {} ({}) run {}",
            workflow.name,
            workflow.id,
            run_id
        );

        let store = match &self.store {
            Some(store) => match store.begin_run(&workflow.name, started_at).await {
                Ok(handle) => Some((Arc::clone(store), handle)),
                Err(e) => {
                    tracing::warn!("Result persistence disabled for run {}: {}", run_id, e);
                    None
                }
            },
            None => None,
        };
        let mut recorder = RunRecorder {
            run_id,
            workflow_id: workflow.id.clone(),
            workflow_name: workflow.name.clone(),
            store,
            alerts: self.alerts.clone(),
            seq: 0,
            pending_alerts: Vec::new(),
        };

        let state = self
            .run_graph(run_id, workflow, &plan, inputs, &cancellation, Some(&mut recorder))
            .await;

        let status = run_status(&plan, &state);
        let duration_ms = start_time.elapsed().as_millis() as u64;

        for handle in recorder.pending_alerts.drain(..) {
            let _ = handle.await;
        }

        let result_dir = match &recorder.store {
            Some((store, run)) => {
                let metadata = RunMetadata {
                    run_id,
                    workflow_id: workflow.id.clone(),
                    workflow_name: workflow.name.clone(),
                    started_at,
                    finished_at: Utc::now(),
                    duration_ms,
                    status,
                    nodes: workflow
                        .nodes
                        .iter()
                        .map(|node| NodeSummary {
                            node_id: node.id.clone(),
                            node_type: node.node_type.clone(),
                            label: node.label.clone(),
                            status: state.status(&node.id).as_str().to_string(),
                            execution_time_ms: state
                                .results
                                .get(&node.id)
                                .map(|r| r.execution_time_ms),
                        })
                        .collect(),
                };
                if let Err(e) = store.finish_run(run, &metadata).await {
                    tracing::warn!("Could not write metadata for run {}: {}", run_id, e);
                }
                Some(run.dir.clone())
            }
            None => None,
        };

        self.event_bus.emit(ExecutionEvent::WorkflowCompleted {
            execution_id: run_id,
            status,
            duration_ms,
            timestamp: Utc::now(),
        });
        tracing::info!(
            "Workflow {} run {} finished {} in {}ms",
            workflow.name,
            run_id,
            status.as_str(),
            duration_ms
        );

        Ok(build_report(
            run_id, workflow, &plan, state, status, started_at, duration_ms, result_dir,
        ))
    }

    /// Drive a planned graph to completion, cancellation, or exhaustion.
    async fn run_graph(
        &self,
        execution_id: ExecutionId,
        workflow: &WorkflowDefinition,
        plan: &ExecutionPlan,
        inputs: Map<String, Value>,
        cancellation: &CancellationToken,
        mut recorder: Option<&mut RunRecorder>,
    ) -> RunState {
        let specs: HashMap<&str, &NodeSpec> =
            workflow.nodes.iter().map(|n| (n.id.as_str(), n)).collect();
        let max_parallel = workflow
            .settings
            .max_parallel_nodes
            .min(self.config.max_parallel_nodes)
            .max(1);
        let timeout = workflow
            .settings
            .node_timeout_ms
            .map(Duration::from_millis)
            .or(self.config.node_timeout);

        let mut state = RunState::new(plan);
        let mut ready: VecDeque<NodeId> = VecDeque::new();
        let mut running = FuturesUnordered::new();
        let mut aborts = TaskAborts::default();

        loop {
            // Resolve every pending node whose incoming edges are settled.
            // Topological order lets skips cascade in a single pass.
            for node_id in &plan.order {
                if state.status(node_id) != NodeStatus::Pending {
                    continue;
                }
                match self.join(workflow, plan, &state, node_id) {
                    Join::Wait => {}
                    Join::Run => {
                        state.statuses.insert(node_id.clone(), NodeStatus::Ready);
                        ready.push_back(node_id.clone());
                    }
                    Join::Skip(reason) => {
                        self.skip(execution_id, &mut state, node_id, reason);
                    }
                }
            }

            // Spawn tasks for ready nodes up to parallel limit
            while running.len() < max_parallel {
                let Some(node_id) = ready.pop_front() else {
                    break;
                };
                let spec = specs[node_id.as_str()];
                let Some(executor) = plan.executor(&node_id).cloned() else {
                    continue;
                };

                let ctx = self.build_context(
                    execution_id,
                    workflow,
                    plan,
                    &state,
                    spec,
                    &inputs,
                    cancellation.child_token(),
                );

                self.event_bus.emit(ExecutionEvent::NodeStarted {
                    execution_id,
                    node_id: node_id.clone(),
                    node_type: spec.node_type.clone(),
                    timestamp: Utc::now(),
                });
                tracing::debug!("Dispatching node {} ({})", node_id, spec.node_type);
                state.statuses.insert(node_id.clone(), NodeStatus::Running);

                let handle = tokio::spawn(async move {
                    run_node(executor.as_ref(), ctx, timeout).await
                });
                aborts.insert(node_id.clone(), handle.abort_handle());
                let node_type = spec.node_type.clone();
                running.push(async move { (node_id, node_type, handle.await) });
            }

            // If nothing is running and nothing is ready, we're done
            if running.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                _ = cancellation.cancelled() => {
                    tracing::warn!("Run {} cancelled", execution_id);
                    aborts.abort_all();
                    state.cancelled = true;
                    let unfinished: Vec<NodeId> = plan
                        .order
                        .iter()
                        .filter(|id| !state.status(id).is_terminal())
                        .cloned()
                        .collect();
                    for node_id in unfinished {
                        self.skip(execution_id, &mut state, &node_id, SkipReason::Cancelled);
                    }
                    break;
                }
                Some((node_id, node_type, joined)) = running.next() => {
                    aborts.remove(&node_id);
                    let result = joined.unwrap_or_else(|e| {
                        NodeResult::from_outcome(
                            node_id.clone(),
                            node_type,
                            Err(NodeError::ExecutionFailed(format!("node task failed: {e}"))),
                            0,
                            Utc::now(),
                        )
                    });
                    let result = check_branch(plan, result);
                    self.complete(execution_id, &mut state, result.clone());

                    if let Some(recorder) = recorder.as_deref_mut() {
                        recorder.record(specs[node_id.as_str()], &result).await;
                    }
                }
            }
        }

        state
    }

    fn complete(&self, execution_id: ExecutionId, state: &mut RunState, result: NodeResult) {
        let node_id = result.node_id.clone();
        if result.success {
            tracing::info!("Node {} completed in {}ms", node_id, result.execution_time_ms);
            self.event_bus.emit(ExecutionEvent::NodeCompleted {
                execution_id,
                node_id: node_id.clone(),
                duration_ms: result.execution_time_ms,
                timestamp: Utc::now(),
            });
            if let Some(branch) = result.data.get("branch").and_then(Value::as_str) {
                state.branches.insert(node_id.clone(), branch.to_string());
            }
            state.outputs.insert(node_id.clone(), result.data.clone());
            state.completion_order.push(node_id.clone());
            state.statuses.insert(node_id.clone(), NodeStatus::Completed);
        } else {
            let error = result.error.clone().unwrap_or_default();
            tracing::error!("Node {} failed: {}", node_id, error);
            self.event_bus.emit(ExecutionEvent::NodeFailed {
                execution_id,
                node_id: node_id.clone(),
                error,
                timestamp: Utc::now(),
            });
            state.statuses.insert(node_id.clone(), NodeStatus::Failed);
        }
        state.results.insert(node_id, result);
    }

    fn skip(
        &self,
        execution_id: ExecutionId,
        state: &mut RunState,
        node_id: &str,
        reason: SkipReason,
    ) {
        tracing::debug!("Skipping node {} ({:?})", node_id, reason);
        state
            .statuses
            .insert(node_id.to_string(), NodeStatus::Skipped(reason));
        self.event_bus.emit(ExecutionEvent::NodeSkipped {
            execution_id,
            node_id: node_id.to_string(),
            reason,
            timestamp: Utc::now(),
        });
    }

    fn edge_state(
        &self,
        workflow: &WorkflowDefinition,
        plan: &ExecutionPlan,
        state: &RunState,
        edge_index: usize,
    ) -> EdgeState {
        let edge = &workflow.edges[edge_index];
        match state.status(&edge.source) {
            NodeStatus::Completed => {
                let inactive = plan.kind(&edge.source) == NodeKind::Branch
                    && edge.source_handle.as_deref().is_some_and(|handle| {
                        state.branches.get(&edge.source).map(String::as_str) != Some(handle)
                    });
                if inactive {
                    EdgeState::Inactive
                } else {
                    EdgeState::Satisfied
                }
            }
            NodeStatus::Skipped(SkipReason::InactiveBranch) => EdgeState::Inactive,
            NodeStatus::Failed | NodeStatus::Skipped(_) => EdgeState::Broken,
            NodeStatus::Pending | NodeStatus::Ready | NodeStatus::Running => EdgeState::Pending,
        }
    }

    /// Join rule: tasks need every incoming edge settled, none broken, and
    /// must sit on the chosen side of every decided branch above them;
    /// merges run with whatever branches completed.
    fn join(
        &self,
        workflow: &WorkflowDefinition,
        plan: &ExecutionPlan,
        state: &RunState,
        node_id: &str,
    ) -> Join {
        let Some(incoming) = plan.incoming.get(node_id) else {
            return Join::Run;
        };

        let (mut satisfied, mut broken, mut inactive) = (0, 0, 0);
        for &edge in incoming {
            match self.edge_state(workflow, plan, state, edge) {
                EdgeState::Pending => return Join::Wait,
                EdgeState::Satisfied => satisfied += 1,
                EdgeState::Broken => broken += 1,
                EdgeState::Inactive => inactive += 1,
            }
        }

        let merge = plan.kind(node_id) == NodeKind::Merge;
        match (merge, satisfied, broken) {
            (true, s, _) if s > 0 => Join::Run,
            (false, s, 0) if s > 0 => {
                if inactive > 0 && self.off_chosen_branch(plan, state, node_id) {
                    Join::Skip(SkipReason::InactiveBranch)
                } else {
                    Join::Run
                }
            }
            (_, _, b) if b > 0 => Join::Skip(SkipReason::UpstreamFailed),
            _ => Join::Skip(SkipReason::InactiveBranch),
        }
    }

    /// True when some decided branch node above `node_id` reaches it only
    /// through the handle it did not choose.
    fn off_chosen_branch(&self, plan: &ExecutionPlan, state: &RunState, node_id: &str) -> bool {
        let Some(ancestors) = plan.ancestors.get(node_id) else {
            return false;
        };
        ancestors.iter().any(|branch| {
            state.branches.get(branch).is_some_and(|chosen| {
                plan.reachable_from_branch(branch, node_id)
                    && !plan.reachable_from_handle(branch, chosen, node_id)
            })
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn build_context(
        &self,
        execution_id: ExecutionId,
        workflow: &WorkflowDefinition,
        plan: &ExecutionPlan,
        state: &RunState,
        spec: &NodeSpec,
        initial_inputs: &Map<String, Value>,
        cancellation: CancellationToken,
    ) -> NodeContext {
        let empty = HashSet::new();
        let ancestors = plan.ancestors.get(&spec.id).unwrap_or(&empty);

        let mut inputs = initial_inputs.clone();
        for done in &state.completion_order {
            if ancestors.contains(done) {
                if let Some(data) = state.outputs.get(done) {
                    inputs.extend(data.clone());
                }
            }
        }

        let direct: HashSet<&str> = plan
            .incoming
            .get(&spec.id)
            .map(|edges| {
                edges
                    .iter()
                    .filter(|&&i| {
                        matches!(self.edge_state(workflow, plan, state, i), EdgeState::Satisfied)
                    })
                    .map(|&i| workflow.edges[i].source.as_str())
                    .collect()
            })
            .unwrap_or_default();
        let upstream = state
            .completion_order
            .iter()
            .filter(|id| direct.contains(id.as_str()))
            .filter_map(|id| {
                state.outputs.get(id).map(|data| UpstreamOutput {
                    node_id: id.clone(),
                    data: data.clone(),
                })
            })
            .collect();

        let subflows = Arc::new(EngineSubflows {
            engine: self.clone(),
            execution_id,
        });

        let mut ctx = NodeContext::new(spec.id.clone(), spec.node_type.clone())
            .with_parameters(spec.parameters.clone())
            .with_inputs(inputs)
            .with_subflows(subflows);
        if let Some(services) = &self.services {
            ctx = ctx.with_services(Arc::clone(services));
        }
        ctx.label = spec.label.clone();
        ctx.upstream = upstream;
        ctx.events = self.event_bus.create_emitter(execution_id, spec.id.clone());
        ctx.cancellation = cancellation;
        ctx
    }
}

/// A completed branch node must name a declared branch.
fn check_branch(plan: &ExecutionPlan, result: NodeResult) -> NodeResult {
    if !result.success || plan.kind(&result.node_id) != NodeKind::Branch {
        return result;
    }
    match result.data.get("branch").and_then(Value::as_str) {
        Some(graph::BRANCH_TRUE) | Some(graph::BRANCH_FALSE) => result,
        _ => NodeResult::from_outcome(
            result.node_id,
            result.node_type,
            Err(NodeError::ExecutionFailed(
                "branch node did not select a branch".to_string(),
            )),
            result.execution_time_ms,
            result.timestamp,
        ),
    }
}

/// Summarize a finished graph.
fn run_status(plan: &ExecutionPlan, state: &RunState) -> RunStatus {
    if state.cancelled {
        return RunStatus::Cancelled;
    }
    let any_failed = state
        .statuses
        .values()
        .any(|s| *s == NodeStatus::Failed);
    if !any_failed {
        return RunStatus::Completed;
    }

    let relevant: Vec<NodeStatus> = plan
        .outputs
        .iter()
        .map(|id| state.status(id))
        .filter(|s| *s != NodeStatus::Skipped(SkipReason::InactiveBranch))
        .collect();
    let output_lost = |s: &NodeStatus| {
        matches!(
            s,
            NodeStatus::Failed | NodeStatus::Skipped(SkipReason::UpstreamFailed)
        )
    };

    let all_lost = if relevant.is_empty() {
        !state.statuses.values().any(|s| *s == NodeStatus::Completed)
    } else {
        relevant.iter().all(output_lost)
    };
    if all_lost {
        RunStatus::Failed
    } else {
        RunStatus::Partial
    }
}

/// Data of the completed output nodes, merged in plan order.
fn collect_outputs(plan: &ExecutionPlan, state: &RunState) -> Map<String, Value> {
    let mut outputs = Map::new();
    for id in &plan.outputs {
        if let Some(data) = state.outputs.get(id) {
            outputs.extend(data.clone());
        }
    }
    outputs
}

#[allow(clippy::too_many_arguments)]
fn build_report(
    run_id: ExecutionId,
    workflow: &WorkflowDefinition,
    plan: &ExecutionPlan,
    mut state: RunState,
    status: RunStatus,
    started_at: DateTime<Utc>,
    duration_ms: u64,
    result_dir: Option<PathBuf>,
) -> RunReport {
    let outputs = collect_outputs(plan, &state);
    let node_statuses = workflow
        .nodes
        .iter()
        .map(|node| {
            let status = state.status(&node.id);
            NodeStatusEntry {
                node_id: node.id.clone(),
                status: status.as_str().to_string(),
                reason: match status {
                    NodeStatus::Skipped(reason) => Some(reason),
                    _ => None,
                },
                error: state.results.get(&node.id).and_then(|r| r.error.clone()),
            }
        })
        .collect();

    let mut results = Vec::new();
    let mut finished: Vec<&NodeId> = state.completion_order.iter().collect();
    // failed nodes are not in completion_order; append them after
    let failed: Vec<NodeId> = workflow
        .nodes
        .iter()
        .filter(|n| state.status(&n.id) == NodeStatus::Failed)
        .map(|n| n.id.clone())
        .collect();
    finished.extend(failed.iter());
    for id in finished {
        if let Some(result) = state.results.remove(id) {
            results.push(result);
        }
    }

    RunReport {
        run_id,
        workflow_id: workflow.id.clone(),
        workflow_name: workflow.name.clone(),
        status,
        node_statuses,
        results,
        outputs,
        started_at,
        duration_ms,
        result_dir,
    }
}

/// Runs loop bodies through the engine that owns the loop node.
struct EngineSubflows {
    engine: WorkflowEngine,
    execution_id: ExecutionId,
}

#[async_trait]
impl SubflowRunner for EngineSubflows {
    async fn run_subflow(
        &self,
        workflow: WorkflowDefinition,
        inputs: Map<String, Value>,
        cancellation: CancellationToken,
    ) -> Result<SubflowResult, NodeError> {
        let plan = graph::plan(&workflow, &self.engine.executors)
            .map_err(|e| NodeError::Configuration(format!("invalid nested workflow: {e}")))?;

        let state = self
            .engine
            .run_graph(self.execution_id, &workflow, &plan, inputs, &cancellation, None)
            .await;
        let status = run_status(&plan, &state);
        let outputs = collect_outputs(&plan, &state);

        let mut results = state.results;
        let node_results = plan
            .order
            .iter()
            .filter_map(|id| results.remove(id))
            .collect();

        Ok(SubflowResult {
            status,
            outputs,
            node_results,
        })
    }
}
