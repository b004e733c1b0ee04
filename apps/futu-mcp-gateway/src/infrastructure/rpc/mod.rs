//! JSON-RPC 2.0 Envelopes
//!
//! Request, response and notification shapes shared by the MCP stdio
//! transport and the WebSocket push feed.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version tag.
pub const JSONRPC_VERSION: &str = "2.0";

/// Standard and gateway error codes.
pub mod codes {
    /// Body is not valid JSON.
    pub const PARSE_ERROR: i64 = -32700;
    /// Message is not a valid request.
    pub const INVALID_REQUEST: i64 = -32600;
    /// Method does not exist.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Parameters are invalid.
    pub const INVALID_PARAMS: i64 = -32602;
    /// Gateway-defined failure; the push feed uses it for every error.
    pub const SERVER_ERROR: i64 = -32000;
}

/// Inbound request or notification. Every field is optional so malformed
/// messages can still be answered.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RpcRequest {
    /// Request id; absent for notifications.
    #[serde(default)]
    pub id: Option<Value>,
    /// Method name.
    #[serde(default)]
    pub method: Option<String>,
    /// Parameters.
    #[serde(default)]
    pub params: Option<Value>,
}

impl RpcRequest {
    /// Parameters, or `null` when absent.
    #[must_use]
    pub fn params_or_null(&self) -> Value {
        self.params.clone().unwrap_or(Value::Null)
    }
}

/// Error object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RpcError {
    /// Error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Extra detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Error without detail.
    #[must_use]
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Attach detail.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Outbound response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RpcResponse {
    jsonrpc: &'static str,
    /// Echoed request id; `null` when the request had none.
    pub id: Value,
    /// Result on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    /// Successful response.
    #[must_use]
    pub const fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Error response.
    #[must_use]
    pub const fn failure(id: Value, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Serialize to a JSON value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Outbound notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RpcNotification {
    jsonrpc: &'static str,
    /// Notification name.
    pub method: &'static str,
    /// Payload.
    pub params: Value,
}

impl RpcNotification {
    /// Build a notification.
    #[must_use]
    pub const fn new(method: &'static str, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method,
            params,
        }
    }
}
