//! Model Context Protocol (MCP) Integration
//!
//! stdio-based JSON-RPC 2.0 server exposing the design commands as MCP
//! tools.
//!
//! # Architecture
//!
//! - **stdio transport**: one JSON-RPC message per line on stdin/stdout
//! - **Tools only**: every tool maps onto a `DesignCommands` method
//! - **Tool errors as content**: plugin failures come back with `isError: true`
//!
//! # Usage
//!
//! Agents call tools through `tools/call`:
//!
//! ```json
//! {
//!   "jsonrpc": "2.0",
//!   "id": 1,
//!   "method": "tools/call",
//!   "params": {
//!     "name": "get_node_info",
//!     "arguments": { "nodeId": "12:34" }
//!   }
//! }
//! ```

pub mod handlers;
pub mod server;
pub mod types;

pub use server::{run_mcp_server, serve};
pub use types::{MCPError, MCPNotification, MCPRequest, MCPResponse, RequestId};
