//! Parameter contracts for exposed tools
//!
//! A [`ParamContract`] is the validated form of a provider's JSON-Schema-like
//! parameter schema. The upstream transport validates caller arguments against it
//! before forwarding an invocation, and renders it back to JSON Schema when listing
//! tools.

use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

/// A parameter contract node with an optional documentation string
#[derive(Debug, Clone, PartialEq)]
pub struct ParamContract {
    pub kind: ContractKind,
    pub description: Option<String>,
}

/// Shape constraint of a contract node
#[derive(Debug, Clone, PartialEq)]
pub enum ContractKind {
    /// A string, optionally restricted to a closed set of literals
    String { choices: Option<Vec<String>> },
    Number,
    Boolean,
    /// Homogeneous sequence
    Array(Box<ParamContract>),
    /// Structural object. Unlisted keys are rejected only when `deny_unknown` is set.
    Object {
        fields: BTreeMap<String, Field>,
        deny_unknown: bool,
    },
    /// Open key-value object
    Map,
    /// Unconstrained
    Any,
}

/// A named property of an object contract
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub contract: ParamContract,
    pub optional: bool,
}

/// Why a value does not satisfy a contract
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid argument at '{path}': {reason}")]
pub struct ContractViolation {
    pub path: String,
    pub reason: String,
}

impl ParamContract {
    fn of(kind: ContractKind) -> Self {
        Self {
            kind,
            description: None,
        }
    }

    pub fn any() -> Self {
        Self::of(ContractKind::Any)
    }

    pub fn string() -> Self {
        Self::of(ContractKind::String { choices: None })
    }

    pub fn choice(choices: Vec<String>) -> Self {
        Self::of(ContractKind::String {
            choices: Some(choices),
        })
    }

    pub fn number() -> Self {
        Self::of(ContractKind::Number)
    }

    pub fn boolean() -> Self {
        Self::of(ContractKind::Boolean)
    }

    pub fn array(items: ParamContract) -> Self {
        Self::of(ContractKind::Array(Box::new(items)))
    }

    pub fn object(fields: BTreeMap<String, Field>, deny_unknown: bool) -> Self {
        Self::of(ContractKind::Object {
            fields,
            deny_unknown,
        })
    }

    pub fn map() -> Self {
        Self::of(ContractKind::Map)
    }

    /// Attach a documentation string
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Look up a field of an object contract
    pub fn field(&self, name: &str) -> Option<&Field> {
        match &self.kind {
            ContractKind::Object { fields, .. } => fields.get(name),
            _ => None,
        }
    }

    /// Validate a value against this contract
    pub fn validate(&self, value: &Value) -> Result<(), ContractViolation> {
        self.validate_at("$", value)
    }

    fn validate_at(&self, path: &str, value: &Value) -> Result<(), ContractViolation> {
        let violation = |reason: String| ContractViolation {
            path: path.to_string(),
            reason,
        };

        match &self.kind {
            ContractKind::Any => Ok(()),
            ContractKind::String { choices } => {
                let text = value
                    .as_str()
                    .ok_or_else(|| violation(format!("expected string, got {}", type_name(value))))?;
                match choices {
                    Some(choices) if !choices.iter().any(|c| c == text) => Err(violation(format!(
                        "expected one of [{}], got '{}'",
                        choices.join(", "),
                        text
                    ))),
                    _ => Ok(()),
                }
            }
            ContractKind::Number if value.is_number() => Ok(()),
            ContractKind::Number => Err(violation(format!("expected number, got {}", type_name(value)))),
            ContractKind::Boolean if value.is_boolean() => Ok(()),
            ContractKind::Boolean => Err(violation(format!("expected boolean, got {}", type_name(value)))),
            ContractKind::Array(items) => {
                let elements = value
                    .as_array()
                    .ok_or_else(|| violation(format!("expected array, got {}", type_name(value))))?;
                for (index, element) in elements.iter().enumerate() {
                    items.validate_at(&format!("{}[{}]", path, index), element)?;
                }
                Ok(())
            }
            ContractKind::Map if value.is_object() => Ok(()),
            ContractKind::Map => Err(violation(format!("expected object, got {}", type_name(value)))),
            ContractKind::Object {
                fields,
                deny_unknown,
            } => {
                let object = value
                    .as_object()
                    .ok_or_else(|| violation(format!("expected object, got {}", type_name(value))))?;

                for (name, field) in fields {
                    let child_path = format!("{}.{}", path, name);
                    match object.get(name) {
                        Some(child) => field.contract.validate_at(&child_path, child)?,
                        None if field.optional => {}
                        None => {
                            return Err(ContractViolation {
                                path: child_path,
                                reason: "required property is missing".to_string(),
                            })
                        }
                    }
                }

                if *deny_unknown {
                    if let Some(extra) = object.keys().find(|key| !fields.contains_key(*key)) {
                        return Err(ContractViolation {
                            path: format!("{}.{}", path, extra),
                            reason: "unexpected property".to_string(),
                        });
                    }
                }
                Ok(())
            }
        }
    }

    /// Render the contract as a JSON Schema document
    pub fn to_json_schema(&self) -> Value {
        let mut schema = match &self.kind {
            ContractKind::Any => Map::new(),
            ContractKind::String { choices } => {
                let mut schema = Map::new();
                schema.insert("type".into(), json!("string"));
                if let Some(choices) = choices {
                    schema.insert("enum".into(), json!(choices));
                }
                schema
            }
            ContractKind::Number => typed("number"),
            ContractKind::Boolean => typed("boolean"),
            ContractKind::Array(items) => {
                let mut schema = typed("array");
                schema.insert("items".into(), items.to_json_schema());
                schema
            }
            ContractKind::Map => {
                let mut schema = typed("object");
                schema.insert("additionalProperties".into(), json!({}));
                schema
            }
            ContractKind::Object {
                fields,
                deny_unknown,
            } => {
                let mut schema = typed("object");
                let properties: Map<String, Value> = fields
                    .iter()
                    .map(|(name, field)| (name.clone(), field.contract.to_json_schema()))
                    .collect();
                let required: Vec<&String> = fields
                    .iter()
                    .filter(|(_, field)| !field.optional)
                    .map(|(name, _)| name)
                    .collect();
                schema.insert("properties".into(), Value::Object(properties));
                if !required.is_empty() {
                    schema.insert("required".into(), json!(required));
                }
                if *deny_unknown {
                    schema.insert("additionalProperties".into(), json!(false));
                }
                schema
            }
        };

        if let Some(description) = &self.description {
            schema.insert("description".into(), json!(description));
        }
        Value::Object(schema)
    }
}

fn typed(name: &str) -> Map<String, Value> {
    let mut schema = Map::new();
    schema.insert("type".into(), json!(name));
    schema
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
