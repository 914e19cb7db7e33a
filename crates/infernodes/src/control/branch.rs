use async_trait::async_trait;
use infercore::schema::validate_params;
use infercore::{
    Condition, NodeContext, NodeError, NodeExecutor, NodeKind, NodeOutput, ParamSpec,
};
use serde_json::Value;

/// Evaluates a condition against the accumulated data and selects the
/// `true` or `false` outgoing branch.
pub struct IfNode;

#[async_trait]
impl NodeExecutor for IfNode {
    fn node_type(&self) -> &str {
        "control.if"
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Branch
    }

    fn description(&self) -> &str {
        "Route execution down the true or false branch"
    }

    fn category(&self) -> &str {
        "control"
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::object("condition")
            .required()
            .describe("{field, operator, value}; field is a dotted path")]
    }

    fn validate_parameters(&self, params: &serde_json::Map<String, Value>) -> Result<(), String> {
        validate_params(&self.parameters(), params)?;
        match params.get("condition") {
            Some(condition) => Condition::from_value(condition)
                .map(|_| ())
                .map_err(|e| format!("parameter 'condition' is invalid: {e}")),
            None => Ok(()),
        }
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let condition = Condition::from_value(ctx.require_param("condition")?)
            .map_err(NodeError::Validation)?;
        let result = condition.evaluate(&ctx.inputs);
        let branch = if result { "true" } else { "false" };
        ctx.events.info(format!(
            "{} {:?} {} -> {}",
            condition.field, condition.operator, condition.value, branch
        ));

        Ok(NodeOutput::new()
            .with_output("condition_result", result)
            .with_output("branch", branch))
    }
}
