//! Command Facade
//!
//! One typed async method per design plugin operation, layered over the
//! correlated request channel.
//!
//! # Modules
//!
//! - [`facade`] - `DesignCommands`, the per-operation methods
//! - [`params`] - typed arguments and node id coercion
//! - [`node_filter`] - trimming of document node replies
//!
//! The facade is stateless. It reaches the plugin through [`CommandSender`],
//! implemented by [`Transport`]; tests substitute a scripted sender.

pub mod facade;
pub mod node_filter;
pub mod params;

pub use facade::{DesignCommands, LONG_RUNNING_TIMEOUT};
pub use node_filter::{filter_node, rgba_to_hex};
pub use params::{coerce_node_id, NodeId};

use crate::transport::{Result, Transport};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// Anything that can deliver a command to the plugin and await its reply
#[async_trait]
pub trait CommandSender: Send + Sync {
    /// Send `command` and wait for the correlated result
    async fn send_command(
        &self,
        command: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value>;

    /// Join the named channel
    async fn join_channel(&self, channel: &str) -> Result<()>;
}

#[async_trait]
impl CommandSender for Transport {
    async fn send_command(
        &self,
        command: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        self.send(command, params, timeout).await
    }

    async fn join_channel(&self, channel: &str) -> Result<()> {
        Transport::join_channel(self, channel).await
    }
}
