//! MCP Request Handlers
//!
//! Handler modules for the MCP methods the server answers.

pub mod initialize;
pub mod tools;
