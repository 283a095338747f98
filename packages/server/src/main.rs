//! DesignBridge MCP Server
//!
//! Standalone MCP (Model Context Protocol) stdio server that lets AI agents
//! drive the design tool plugin.
//!
//! Architecture:
//!   AI Agent → stdio (JSON-RPC) → designbridge-mcp → WebSocket → channel relay → design plugin
//!
//! stdout carries the protocol, so all logging goes to stderr.
//!
//! # Usage
//!
//! ```bash
//! # Start the channel relay, open the plugin, then:
//! DESIGNBRIDGE_CHANNEL=abc123 cargo run --bin designbridge-mcp
//! ```
//!
//! # Configuration
//!
//! - `DESIGNBRIDGE_WS_HOST` (default `localhost`)
//! - `DESIGNBRIDGE_WS_PORT` (default `3055`)
//! - `DESIGNBRIDGE_CHANNEL` - joined at start-up when set
//! - `DESIGNBRIDGE_REQUEST_TIMEOUT_MS` (default `30000`)
//! - `RUST_LOG` overrides the log filter

use designbridge_core::commands::DesignCommands;
use designbridge_core::config::BridgeConfig;
use designbridge_core::mcp::run_mcp_server;
use designbridge_core::transport::Transport;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("designbridge_mcp=info,designbridge_core=info")
            }),
        )
        .init();

    info!("🚀 DesignBridge MCP server");

    let config = BridgeConfig::from_env().map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;
    info!("📡 Relay: ws://{}:{}", config.host, config.port);

    let transport = Transport::new(config.transport.clone());

    // A failed first attempt is not fatal: the saved parameters let the
    // first command connect lazily once the relay is up.
    match transport
        .connect(&config.host, config.port, config.transport.base_backoff)
        .await
    {
        Ok(()) => {
            if let Some(channel) = config.channel.as_deref() {
                if let Err(e) = transport.join_channel(channel).await {
                    warn!("❌ Failed to join channel {}: {}", channel, e);
                }
            }
        }
        Err(e) => warn!("❌ Relay not reachable yet: {}", e),
    }

    let commands = Arc::new(DesignCommands::new(transport.clone()));
    let result = run_mcp_server(commands).await;

    transport.close().await;
    result
}
