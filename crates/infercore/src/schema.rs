//! Parameter and port declarations shared by every executor.
//!
//! Executors describe their parameters with [`ParamSpec`] so that the default
//! `validate_parameters` implementation can check ranges and choices, and so
//! that defaults can be filled in before `execute` runs. Ports ([`PortSpec`])
//! feed the graph-level type check performed at submission time.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Declared type of a node parameter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParamKind {
    Number {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
    },
    Integer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<i64>,
    },
    String {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        choices: Option<Vec<String>>,
    },
    Bool,
    Object,
    Array,
}

/// A declared node parameter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    #[serde(flatten)]
    pub kind: ParamKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: String,
}

impl ParamSpec {
    fn new(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            default: None,
            required: false,
            description: String::new(),
        }
    }

    /// A number constrained to `[0, 1]` (confidence, IoU, thresholds).
    pub fn unit(name: impl Into<String>, default: f64) -> Self {
        Self::new(
            name,
            ParamKind::Number {
                min: Some(0.0),
                max: Some(1.0),
            },
        )
        .with_default(default)
    }

    pub fn number(name: impl Into<String>, min: Option<f64>, max: Option<f64>) -> Self {
        Self::new(name, ParamKind::Number { min, max })
    }

    pub fn integer(name: impl Into<String>, min: Option<i64>, max: Option<i64>) -> Self {
        Self::new(name, ParamKind::Integer { min, max })
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::String { choices: None })
    }

    pub fn choice(name: impl Into<String>, choices: &[&str]) -> Self {
        Self::new(
            name,
            ParamKind::String {
                choices: Some(choices.iter().map(|c| c.to_string()).collect()),
            },
        )
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::Bool)
    }

    pub fn object(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::Object)
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Check a single supplied value against this declaration.
    pub fn check(&self, value: &Value) -> Result<(), String> {
        let name = &self.name;
        match &self.kind {
            ParamKind::Number { min, max } => {
                let n = value
                    .as_f64()
                    .ok_or_else(|| format!("parameter '{name}' must be a number"))?;
                check_range(name, n, *min, *max)
            }
            ParamKind::Integer { min, max } => {
                let n = value
                    .as_i64()
                    .ok_or_else(|| format!("parameter '{name}' must be an integer"))?;
                check_range(name, n as f64, min.map(|m| m as f64), max.map(|m| m as f64))
            }
            ParamKind::String { choices } => {
                let s = value
                    .as_str()
                    .ok_or_else(|| format!("parameter '{name}' must be a string"))?;
                match choices {
                    Some(allowed) if !allowed.iter().any(|c| c == s) => Err(format!(
                        "parameter '{name}' must be one of [{}], got '{s}'",
                        allowed.join(", ")
                    )),
                    _ => Ok(()),
                }
            }
            ParamKind::Bool if !value.is_boolean() => {
                Err(format!("parameter '{name}' must be a boolean"))
            }
            ParamKind::Object if !value.is_object() => {
                Err(format!("parameter '{name}' must be an object"))
            }
            ParamKind::Array if !value.is_array() => {
                Err(format!("parameter '{name}' must be an array"))
            }
            _ => Ok(()),
        }
    }
}

fn check_range(name: &str, n: f64, min: Option<f64>, max: Option<f64>) -> Result<(), String> {
    let below = min.is_some_and(|m| n < m);
    let above = max.is_some_and(|m| n > m);
    if below || above {
        let lo = min.map(|m| m.to_string()).unwrap_or_else(|| "-inf".into());
        let hi = max.map(|m| m.to_string()).unwrap_or_else(|| "inf".into());
        return Err(format!(
            "parameter '{name}' must be within [{lo}, {hi}], got {n}"
        ));
    }
    Ok(())
}

/// Validate a parameter map against declarations.
///
/// Missing parameters are fine when they carry a default or are optional;
/// only `required` parameters without a default must be present. `null`
/// values are treated as absent. Undeclared keys pass through untouched.
pub fn validate_params(specs: &[ParamSpec], params: &Map<String, Value>) -> Result<(), String> {
    for spec in specs {
        match params.get(&spec.name) {
            Some(Value::Null) | None => {
                if spec.required && spec.default.is_none() {
                    return Err(format!("missing required parameter '{}'", spec.name));
                }
            }
            Some(value) => spec.check(value)?,
        }
    }
    Ok(())
}

/// Fill declared defaults into a copy of `params`.
pub fn resolve_params(specs: &[ParamSpec], params: &Map<String, Value>) -> Map<String, Value> {
    let mut resolved = params.clone();
    for spec in specs {
        let absent = matches!(resolved.get(&spec.name), None | Some(Value::Null));
        if absent {
            if let Some(default) = &spec.default {
                resolved.insert(spec.name.clone(), default.clone());
            }
        }
    }
    resolved
}

/// Data carried on an input or output port.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Image,
    Detections,
    Text,
    Number,
    Bool,
    Json,
    Any,
}

impl DataType {
    pub fn compatible_with(self, other: DataType) -> bool {
        match (self, other) {
            (DataType::Any, _) | (_, DataType::Any) => true,
            (DataType::Detections, DataType::Json) | (DataType::Json, DataType::Detections) => true,
            (a, b) => a == b,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortSpec {
    pub name: String,
    pub data_type: DataType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: String,
}

impl PortSpec {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            required: false,
            description: String::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// True when at least one output of the source can feed at least one input of
/// the target. Nodes that declare no ports on the relevant side accept anything.
pub fn ports_compatible(outputs: &[PortSpec], inputs: &[PortSpec]) -> bool {
    if outputs.is_empty() || inputs.is_empty() {
        return true;
    }
    outputs.iter().any(|out| {
        inputs
            .iter()
            .any(|input| out.data_type.compatible_with(input.data_type))
    })
}
