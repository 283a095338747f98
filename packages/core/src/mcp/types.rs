//! MCP JSON-RPC 2.0 Types
//!
//! Request, notification, response and error shapes for the stdio protocol.

use crate::transport::TransportError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

// Standard JSON-RPC 2.0 error codes
pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

// Server-defined codes (-32000 to -32099)
pub const TRANSPORT_ERROR: i32 = -32000;
pub const NOT_CONNECTED: i32 = -32001;
pub const TIMEOUT_ERROR: i32 = -32002;

fn deserialize_jsonrpc_version<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let version = String::deserialize(deserializer)?;
    if version != "2.0" {
        return Err(serde::de::Error::custom(format!(
            "Unsupported jsonrpc version: {}",
            version
        )));
    }
    Ok(version)
}

/// JSON-RPC request id; clients use numbers or strings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(u64),
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::String(s) => f.write_str(s),
        }
    }
}

impl From<u64> for RequestId {
    fn from(id: u64) -> Self {
        RequestId::Number(id)
    }
}

/// JSON-RPC request expecting a response
#[derive(Debug, Clone, Deserialize)]
pub struct MCPRequest {
    #[serde(deserialize_with = "deserialize_jsonrpc_version")]
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// JSON-RPC notification (no id, never answered)
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MCPNotification {
    #[serde(deserialize_with = "deserialize_jsonrpc_version")]
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// JSON-RPC response
///
/// `id` is `null` only when the request could not be parsed far enough to
/// read one.
#[derive(Debug, Clone, Serialize)]
pub struct MCPResponse {
    pub jsonrpc: String,
    pub id: Option<RequestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<MCPError>,
}

impl MCPResponse {
    pub fn success(id: impl Into<RequestId>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(id.into()),
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<RequestId>, error: MCPError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// JSON-RPC error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MCPError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl MCPError {
    pub fn new(code: i32, message: String) -> Self {
        Self {
            code,
            message,
            data: None,
        }
    }

    pub fn parse_error(message: String) -> Self {
        Self::new(PARSE_ERROR, message)
    }

    pub fn invalid_request(message: String) -> Self {
        Self::new(INVALID_REQUEST, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("Method not found: {}", method))
    }

    pub fn invalid_params(message: String) -> Self {
        Self::new(INVALID_PARAMS, message)
    }

    pub fn internal_error(message: String) -> Self {
        Self::new(INTERNAL_ERROR, message)
    }
}

impl From<TransportError> for MCPError {
    fn from(error: TransportError) -> Self {
        let code = match &error {
            TransportError::NotConnected
            | TransportError::ConnectTimeout { .. }
            | TransportError::ChannelRequired { .. } => NOT_CONNECTED,
            TransportError::Timeout { .. } | TransportError::Stale { .. } => TIMEOUT_ERROR,
            _ => TRANSPORT_ERROR,
        };
        Self::new(code, error.to_string())
    }
}

impl fmt::Display for MCPError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code: {})", self.message, self.code)
    }
}

// Include tests
#[cfg(test)]
#[path = "types_test.rs"]
mod types_test;
