//! JSON-RPC 2.0 wire types
//!
//! Used on both sides of the gateway: towards downstream providers (requests with
//! numeric ids we allocate) and towards the upstream caller (requests whose ids are
//! whatever the caller chose, so ids are kept as raw [`Value`]s).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC protocol version tag carried by every message
pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol revision announced during the handshake
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// Method names used by the gateway
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "notifications/initialized";
    pub const PING: &str = "ping";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
    pub const TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";
}

/// Standard JSON-RPC error codes
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
}

/// JSON-RPC request or notification (a notification has no id)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Build a request carrying a numeric id
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(Value::from(id)),
            method: method.into(),
            params: Some(params),
        }
    }

    /// Build a notification (no response expected)
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: method.into(),
            params,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// JSON-RPC error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    #[serde(default)]
    pub code: i64,
    #[serde(default = "default_error_message")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

fn default_error_message() -> String {
    "Unknown error".to_string()
}

impl JsonRpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

/// JSON-RPC response carrying either a result or an error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// A decoded message, classified by shape
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingMessage {
    /// Has a `method` field (request when it also has an id, notification otherwise)
    Request(JsonRpcRequest),
    /// Has a `result` or `error` field
    Response(JsonRpcResponse),
}

impl IncomingMessage {
    /// Classify a parsed JSON document. Returns `None` for documents that are
    /// neither a request nor a response.
    pub fn classify(value: Value) -> Option<Self> {
        let object = value.as_object()?;
        if object.contains_key("method") {
            serde_json::from_value(value).ok().map(Self::Request)
        } else if object.contains_key("result") || object.contains_key("error") {
            serde_json::from_value(value).ok().map(Self::Response)
        } else {
            None
        }
    }
}
