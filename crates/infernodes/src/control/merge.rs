use async_trait::async_trait;
use infercore::{NodeContext, NodeError, NodeExecutor, NodeKind, NodeOutput, ParamSpec};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// How a merge node combines the outputs of its completed branches.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Union of keys. A key produced with different values by several
    /// branches becomes a map keyed by source node id.
    #[default]
    KeepAll,
    /// Output of the branch that completed first.
    KeepFirst,
    /// Deep merge in completion order; the last writer wins.
    Combine,
}

impl MergeStrategy {
    pub const NAMES: [&'static str; 3] = ["keep_all", "keep_first", "combine"];

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "keep_all" => Some(Self::KeepAll),
            "keep_first" => Some(Self::KeepFirst),
            "combine" => Some(Self::Combine),
            _ => None,
        }
    }

    /// Combine `(source, data)` pairs given in completion order.
    pub fn apply<'a>(
        self,
        branches: impl IntoIterator<Item = (&'a str, &'a Map<String, Value>)>,
    ) -> Map<String, Value> {
        match self {
            Self::KeepFirst => branches
                .into_iter()
                .next()
                .map(|(_, data)| data.clone())
                .unwrap_or_default(),
            Self::Combine => {
                let mut merged = Map::new();
                for (_, data) in branches {
                    deep_merge(&mut merged, data);
                }
                merged
            }
            Self::KeepAll => keep_all(branches),
        }
    }
}

fn keep_all<'a>(
    branches: impl IntoIterator<Item = (&'a str, &'a Map<String, Value>)>,
) -> Map<String, Value> {
    let mut by_key: Vec<(String, Vec<(&str, &Value)>)> = Vec::new();
    for (source, data) in branches {
        for (key, value) in data {
            match by_key.iter_mut().find(|(k, _)| k == key) {
                Some((_, values)) => values.push((source, value)),
                None => by_key.push((key.clone(), vec![(source, value)])),
            }
        }
    }

    let mut merged = Map::new();
    for (key, values) in by_key {
        let first = values[0].1;
        if values.iter().all(|(_, v)| *v == first) {
            merged.insert(key, first.clone());
        } else {
            let per_source: Map<String, Value> = values
                .into_iter()
                .map(|(source, value)| (source.to_string(), value.clone()))
                .collect();
            merged.insert(key, Value::Object(per_source));
        }
    }
    merged
}

fn deep_merge(target: &mut Map<String, Value>, source: &Map<String, Value>) {
    for (key, value) in source {
        match (target.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                deep_merge(existing, incoming);
            }
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Joins branches. Runs once every incoming branch is terminal, with the
/// outputs of those that completed.
pub struct MergeNode;

#[async_trait]
impl NodeExecutor for MergeNode {
    fn node_type(&self) -> &str {
        "control.merge"
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Merge
    }

    fn description(&self) -> &str {
        "Combine the outputs of several branches"
    }

    fn category(&self) -> &str {
        "control"
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::choice("merge_strategy", &MergeStrategy::NAMES).with_default("keep_all")]
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let name = ctx.param_str("merge_strategy").unwrap_or("keep_all");
        let strategy = MergeStrategy::parse(name).ok_or_else(|| {
            NodeError::Validation(format!("unknown merge_strategy '{name}'"))
        })?;

        let merged = strategy.apply(
            ctx.upstream
                .iter()
                .map(|branch| (branch.node_id.as_str(), &branch.data)),
        );
        ctx.events.info(format!(
            "merged {} branches with {:?}",
            ctx.upstream.len(),
            strategy
        ));
        Ok(NodeOutput::from_map(merged))
    }
}
