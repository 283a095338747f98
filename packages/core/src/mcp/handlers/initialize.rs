//! MCP handshake
//!
//! Negotiates the protocol version and tells the agent how to reach the
//! plugin: join a channel first, then address nodes by id.

use crate::mcp::types::MCPError;
use serde_json::{json, Value};

/// Supported MCP protocol versions, newest first
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26", "2024-11-05"];

/// Name reported in `serverInfo`
pub const SERVER_NAME: &str = "designbridge-mcp";

/// Answer `initialize`
///
/// Echoes the client's protocol version when supported; tool schemas are
/// served separately through `tools/list`.
///
/// # Errors
///
/// Returns error if:
/// - protocolVersion is missing or not a string
/// - Client requests unsupported protocol version
pub fn handle_initialize(params: Value) -> Result<Value, MCPError> {
    let client_version = params["protocolVersion"]
        .as_str()
        .ok_or_else(|| MCPError::invalid_params("Missing protocolVersion parameter".to_string()))?;

    if !SUPPORTED_PROTOCOL_VERSIONS.contains(&client_version) {
        return Err(MCPError::invalid_request(format!(
            "Unsupported protocol version: {}. Server supports: {:?}",
            client_version, SUPPORTED_PROTOCOL_VERSIONS
        )));
    }

    Ok(json!({
        "protocolVersion": client_version,
        "serverInfo": {
            "name": SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION")
        },
        "capabilities": {
            "tools": {
                "listChanged": false
            }
        },
        "instructions": {
            "channel": "Call join_channel with the channel name shown in the design plugin before any other tool. The channel is forgotten whenever the connection drops; join again if a tool reports that a channel is required.",
            "node_ids": "Node ids look like \"12:34\". Tools accept either the plain string or an object carrying it, e.g. {\"id\": \"12:34\"}.",
            "colors": "Colours are given as {r, g, b, a} with channels between 0 and 1. Node info replies report colours as hex strings."
        }
    }))
}

#[cfg(test)]
#[path = "initialize_test.rs"]
mod initialize_test;
