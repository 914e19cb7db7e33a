use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Comparison operator of a [`Condition`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Operator {
    #[serde(rename = "==", alias = "eq")]
    Eq,
    #[serde(rename = "!=", alias = "ne")]
    Ne,
    #[serde(rename = ">", alias = "gt")]
    Gt,
    #[serde(rename = ">=", alias = "gte")]
    Gte,
    #[serde(rename = "<", alias = "lt")]
    Lt,
    #[serde(rename = "<=", alias = "lte")]
    Lte,
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = "not_contains")]
    NotContains,
    #[serde(rename = "exists")]
    Exists,
    #[serde(rename = "not_exists")]
    NotExists,
}

/// Structured predicate `field <operator> value` used by `if` and loop
/// break conditions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Condition {
    pub field: String,
    pub operator: Operator,
    #[serde(default)]
    pub value: Value,
}

impl Condition {
    pub fn new(field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    /// Parse a condition from a node parameter.
    pub fn from_value(value: &Value) -> Result<Self, String> {
        serde_json::from_value(value.clone()).map_err(|e| format!("invalid condition: {e}"))
    }

    /// Evaluate against accumulated data. A missing field only satisfies
    /// `not_exists` and `!=`.
    pub fn evaluate(&self, data: &Map<String, Value>) -> bool {
        let actual = lookup(data, &self.field);
        match self.operator {
            Operator::Exists => actual.is_some_and(|v| !v.is_null()),
            Operator::NotExists => actual.map_or(true, Value::is_null),
            Operator::Eq => actual.is_some_and(|v| values_equal(v, &self.value)),
            Operator::Ne => !actual.is_some_and(|v| values_equal(v, &self.value)),
            Operator::Gt => compare(actual, &self.value) == Some(Ordering::Greater),
            Operator::Gte => matches!(
                compare(actual, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Operator::Lt => compare(actual, &self.value) == Some(Ordering::Less),
            Operator::Lte => matches!(
                compare(actual, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Operator::Contains => actual.is_some_and(|v| contains(v, &self.value)),
            Operator::NotContains => !actual.is_some_and(|v| contains(v, &self.value)),
        }
    }
}

/// Resolve a dotted path (`detections.0.label`) inside a data map.
pub fn lookup<'a>(data: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = data.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare(actual: Option<&Value>, expected: &Value) -> Option<Ordering> {
    let actual = actual?;
    if let (Some(x), Some(y)) = (actual.as_f64(), expected.as_f64()) {
        return x.partial_cmp(&y);
    }
    // arrays compare by length so `detections > 0` reads naturally
    if let (Value::Array(items), Some(y)) = (actual, expected.as_f64()) {
        return (items.len() as f64).partial_cmp(&y);
    }
    match (actual.as_str(), expected.as_str()) {
        (Some(x), Some(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::String(s) => needle.as_str().is_some_and(|n| s.contains(n)),
        Value::Array(items) => items.iter().any(|item| values_equal(item, needle)),
        Value::Object(map) => needle.as_str().is_some_and(|k| map.contains_key(k)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn numeric_comparisons() {
        let d = data(json!({"count": 5}));
        assert!(Condition::new("count", Operator::Gt, 0).evaluate(&d));
        assert!(!Condition::new("count", Operator::Lt, 5).evaluate(&d));
        assert!(Condition::new("count", Operator::Lte, 5).evaluate(&d));
        assert!(Condition::new("count", Operator::Eq, 5.0).evaluate(&d));
    }

    #[test]
    fn operator_aliases_parse() {
        let c = Condition::from_value(&json!({"field": "x", "operator": "gte", "value": 1})).unwrap();
        assert_eq!(c.operator, Operator::Gte);
        assert!(Condition::from_value(&json!({"field": "x", "operator": "~="})).is_err());
    }

    #[test]
    fn nested_paths_and_missing_fields() {
        let d = data(json!({"result": {"labels": ["bolt", "nut"]}}));
        assert!(Condition::new("result.labels", Operator::Contains, "nut").evaluate(&d));
        assert!(Condition::new("result.labels.0", Operator::Eq, "bolt").evaluate(&d));
        assert!(Condition::new("missing", Operator::NotExists, Value::Null).evaluate(&d));
        assert!(!Condition::new("missing", Operator::Gt, 0).evaluate(&d));
    }
}
