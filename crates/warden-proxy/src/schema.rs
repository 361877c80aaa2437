//! Conversion of provider parameter schemas into parameter contracts
//!
//! Provider schemas are JSON-Schema-like documents of varying quality. They are
//! first read into a [`SchemaNode`] tree (every input maps to some node, unknown or
//! malformed parts become [`SchemaNode::Unknown`]) and the tree is then folded into
//! a [`ParamContract`]. Neither step can fail.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;
use warden_foundation::{Field, ParamContract};

/// A parameter schema node, reduced to the shapes the gateway understands
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaNode {
    String {
        choices: Option<Vec<String>>,
        description: Option<String>,
    },
    Number {
        description: Option<String>,
    },
    Boolean {
        description: Option<String>,
    },
    Array {
        items: Box<SchemaNode>,
        description: Option<String>,
    },
    Object {
        /// `None` when the schema declares no `properties`
        properties: Option<BTreeMap<String, SchemaNode>>,
        required: Vec<String>,
        forbid_additional: bool,
        description: Option<String>,
    },
    /// Missing, unknown, or malformed type
    Unknown {
        description: Option<String>,
    },
}

impl SchemaNode {
    /// Read a schema document. Total: anything unrecognized becomes `Unknown`.
    pub fn parse(schema: &Value) -> Self {
        let Some(object) = schema.as_object() else {
            return Self::Unknown { description: None };
        };
        let description = object
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string);

        match object.get("type").and_then(Value::as_str) {
            Some("string") => Self::String {
                choices: string_choices(object),
                description,
            },
            Some("number") | Some("integer") => Self::Number { description },
            Some("boolean") => Self::Boolean { description },
            Some("array") => Self::Array {
                items: Box::new(
                    object
                        .get("items")
                        .map(Self::parse)
                        .unwrap_or(Self::Unknown { description: None }),
                ),
                description,
            },
            Some("object") => Self::Object {
                properties: object.get("properties").and_then(Value::as_object).map(|props| {
                    props
                        .iter()
                        .map(|(name, child)| (name.clone(), Self::parse(child)))
                        .collect()
                }),
                required: object
                    .get("required")
                    .and_then(Value::as_array)
                    .map(|names| {
                        names
                            .iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default(),
                forbid_additional: object.get("additionalProperties") == Some(&Value::Bool(false)),
                description,
            },
            other => {
                if let Some(kind) = other {
                    debug!(schema_type = %kind, "Unsupported schema type, using an unconstrained contract");
                }
                Self::Unknown { description }
            }
        }
    }

    fn description(&self) -> Option<&String> {
        match self {
            Self::String { description, .. }
            | Self::Number { description }
            | Self::Boolean { description }
            | Self::Array { description, .. }
            | Self::Object { description, .. }
            | Self::Unknown { description } => description.as_ref(),
        }
    }

    /// Fold the tree into a parameter contract
    pub fn to_contract(&self) -> ParamContract {
        let contract = match self {
            Self::String { choices, .. } => match choices {
                Some(choices) => ParamContract::choice(choices.clone()),
                None => ParamContract::string(),
            },
            Self::Number { .. } => ParamContract::number(),
            Self::Boolean { .. } => ParamContract::boolean(),
            Self::Array { items, .. } => ParamContract::array(items.to_contract()),
            Self::Object {
                properties: Some(properties),
                required,
                forbid_additional,
                ..
            } => {
                let fields = properties
                    .iter()
                    .map(|(name, node)| {
                        let field = Field {
                            contract: node.to_contract(),
                            optional: !required.contains(name),
                        };
                        (name.clone(), field)
                    })
                    .collect();
                ParamContract::object(fields, *forbid_additional)
            }
            Self::Object {
                properties: None,
                forbid_additional: true,
                ..
            } => ParamContract::object(BTreeMap::new(), true),
            Self::Object {
                properties: None, ..
            } => ParamContract::map(),
            Self::Unknown { .. } => ParamContract::any(),
        };

        match self.description() {
            Some(description) => contract.with_description(description.clone()),
            None => contract,
        }
    }
}

/// String enumerations; non-string members are ignored
fn string_choices(object: &Map<String, Value>) -> Option<Vec<String>> {
    let values = object.get("enum")?.as_array()?;
    let choices: Vec<String> = values
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect();
    (!choices.is_empty()).then_some(choices)
}

/// Convert a provider's parameter schema into a contract
pub fn adapt_schema(schema: &Value) -> ParamContract {
    SchemaNode::parse(schema).to_contract()
}
