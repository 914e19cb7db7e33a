use async_trait::async_trait;
use infercore::schema::validate_params;
use infercore::{
    Condition, NodeContext, NodeError, NodeExecutor, NodeKind, NodeOutput, ParamSpec, RunStatus,
    WorkflowDefinition,
};
use serde_json::{json, Map, Value};

/// Runs a nested `{nodes, edges}` body up to `max_iterations` times.
///
/// The body is re-instantiated as a fresh sub-workflow every iteration and
/// receives the loop state: the loop's inputs overlaid with the outputs of
/// every previous iteration. `break_condition` is checked against that state
/// before each iteration, so an immediately-true condition runs the body zero
/// times.
pub struct LoopNode;

#[async_trait]
impl NodeExecutor for LoopNode {
    fn node_type(&self) -> &str {
        "control.loop"
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Loop
    }

    fn description(&self) -> &str {
        "Repeat a nested sub-workflow"
    }

    fn category(&self) -> &str {
        "control"
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::object("body")
                .required()
                .describe("Nested workflow {nodes, edges}"),
            ParamSpec::integer("max_iterations", Some(0), None).with_default(1),
            ParamSpec::object("break_condition"),
        ]
    }

    fn validate_parameters(&self, params: &Map<String, Value>) -> Result<(), String> {
        validate_params(&self.parameters(), params)?;
        if let Some(body) = params.get("body") {
            WorkflowDefinition::from_body("loop", body)
                .map_err(|e| format!("parameter 'body' is invalid: {e}"))?;
        }
        match params.get("break_condition") {
            Some(condition) if !condition.is_null() => Condition::from_value(condition)
                .map(|_| ())
                .map_err(|e| format!("parameter 'break_condition' is invalid: {e}")),
            _ => Ok(()),
        }
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let parent = if ctx.label.is_empty() {
            ctx.node_id.as_str()
        } else {
            ctx.label.as_str()
        };
        let body = WorkflowDefinition::from_body(parent, ctx.require_param("body")?)
            .map_err(NodeError::Validation)?;
        let max_iterations = ctx.param_u64("max_iterations").unwrap_or(1);
        let break_condition = ctx
            .param("break_condition")
            .map(Condition::from_value)
            .transpose()
            .map_err(NodeError::Validation)?;

        let mut state = ctx.inputs.clone();
        let mut last_outputs = Map::new();
        let mut iterations = Vec::new();

        for iteration in 0..max_iterations {
            if break_condition.as_ref().is_some_and(|c| c.evaluate(&state)) {
                ctx.events
                    .info(format!("break condition met before iteration {iteration}"));
                break;
            }
            if ctx.cancellation.is_cancelled() {
                return Err(NodeError::Cancelled);
            }

            let result = ctx
                .subflows
                .run_subflow(body.clone(), state.clone(), ctx.cancellation.child_token())
                .await?;
            let results = serde_json::to_value(&result.node_results)
                .map_err(|e| NodeError::ExecutionFailed(e.to_string()))?;
            iterations.push(json!({
                "iteration": iteration,
                "status": result.status,
                "results": results,
            }));

            if result.status != RunStatus::Completed {
                let failed: Vec<&str> = result
                    .node_results
                    .iter()
                    .filter(|r| !r.success)
                    .map(|r| r.node_id.as_str())
                    .collect();
                return Err(NodeError::ExecutionFailed(format!(
                    "iteration {iteration} ended {}: failed nodes [{}]",
                    result.status.as_str(),
                    failed.join(", ")
                )));
            }

            ctx.events.progress(
                (iteration + 1) as f64 / max_iterations as f64 * 100.0,
                Some(format!("iteration {iteration} completed")),
            );
            state.extend(result.outputs.clone());
            last_outputs = result.outputs;
        }

        Ok(NodeOutput::from_map(last_outputs)
            .with_output("iteration_count", iterations.len())
            .with_output("iterations", iterations))
    }
}
