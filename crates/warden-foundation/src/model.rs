//! Tool model shared by the engine and the upstream transport

use crate::contract::ParamContract;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Separator between provider id and tool name in a composite tool name
pub const COMPOSITE_SEPARATOR: &str = "__";

/// A tool as reported by a provider's catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Value,
}

/// Where an exposed tool is routed at invocation time
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ToolBinding {
    pub provider_id: String,
    pub tool_name: String,
}

impl ToolBinding {
    pub fn new(provider_id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            tool_name: tool_name.into(),
        }
    }

    pub fn composite_name(&self) -> String {
        composite_name(&self.provider_id, &self.tool_name)
    }
}

/// Build the externally visible name of a provider's tool.
///
/// Injective as long as provider ids never contain [`COMPOSITE_SEPARATOR`]
/// (see [`is_valid_provider_id`]): the first separator always ends the provider id.
pub fn composite_name(provider_id: &str, tool_name: &str) -> String {
    format!("{}{}{}", provider_id, COMPOSITE_SEPARATOR, tool_name)
}

/// Provider ids must be non-empty and free of the composite separator
pub fn is_valid_provider_id(provider_id: &str) -> bool {
    !provider_id.is_empty() && !provider_id.contains(COMPOSITE_SEPARATOR)
}

/// A tool as seen by the upstream caller
#[derive(Debug, Clone, PartialEq)]
pub struct ExposedTool {
    pub name: String,
    pub description: String,
    pub contract: ParamContract,
    pub binding: ToolBinding,
}

impl ExposedTool {
    /// JSON Schema advertised for the tool's arguments. MCP requires an object
    /// schema at the root, so non-object contracts advertise a bare object.
    pub fn input_schema(&self) -> Value {
        let schema = self.contract.to_json_schema();
        if schema.get("type").and_then(Value::as_str) == Some("object") {
            schema
        } else {
            serde_json::json!({"type": "object"})
        }
    }
}
