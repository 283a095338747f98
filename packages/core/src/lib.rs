//! DesignBridge Core
//!
//! Bridges AI agents to a design tool plugin. The plugin is reachable only
//! through a WebSocket channel relay, so every command is a message on a
//! shared socket whose reply has to be found again among everything else the
//! relay broadcasts.
//!
//! # Architecture
//!
//! - **Correlated request channel**: one socket per process, many in-flight
//!   commands, replies matched through an ordered cascade of matchers
//! - **Progressive timeouts**: slow plugin operations get extra windows
//!   instead of failing at the first deadline
//! - **Stateless facade**: typed methods per plugin command over a
//!   `CommandSender` seam
//! - **MCP stdio server**: exposes the facade as tools
//!
//! # Modules
//!
//! - [`transport`] - WebSocket connection, pending table, reply matching
//! - [`commands`] - typed design commands and reply filtering
//! - [`mcp`] - MCP stdio server for AI agent integration
//! - [`config`] - bridge and transport configuration

pub mod commands;
pub mod config;
pub mod mcp;
pub mod transport;

// Re-export commonly used types
pub use commands::{CommandSender, DesignCommands};
pub use config::{BridgeConfig, TransportConfig};
pub use transport::{ConnectionState, Transport, TransportError};
