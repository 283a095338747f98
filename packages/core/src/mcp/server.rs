//! MCP stdio Server
//!
//! Async Tokio task that handles JSON-RPC 2.0 requests over stdin/stdout.
//! Requests are handled concurrently so one slow plugin command does not
//! hold up the rest; responses are written as they complete.

use crate::commands::{CommandSender, DesignCommands};
use crate::mcp::handlers::{initialize, tools};
use crate::mcp::types::{MCPError, MCPNotification, MCPRequest, MCPResponse, RequestId};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

/// Run the MCP stdio server
///
/// Reads JSON-RPC requests from stdin, processes them via handlers,
/// and writes responses to stdout. Runs until EOF on stdin and every
/// in-flight request has been answered.
#[instrument(skip(commands))]
pub async fn run_mcp_server<S>(commands: Arc<DesignCommands<S>>) -> anyhow::Result<()>
where
    S: CommandSender + 'static,
{
    serve(commands, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Serve MCP over any line-oriented byte stream pair
pub async fn serve<S, R, W>(
    commands: Arc<DesignCommands<S>>,
    input: R,
    output: W,
) -> anyhow::Result<()>
where
    S: CommandSender + 'static,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    info!("🔌 MCP stdio server started");

    let (responses, mut outbox) = mpsc::unbounded_channel::<MCPResponse>();

    let read_loop = async move {
        let mut lines = BufReader::new(input).lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            debug!("📥 MCP message: {}", line);

            let request = match parse_message(&line) {
                Inbound::Request(request) => request,
                Inbound::Notification(notification) => {
                    debug!("🔔 MCP notification '{}'", notification.method);
                    continue;
                }
                Inbound::Invalid(response) => {
                    let _ = responses.send(response);
                    continue;
                }
                Inbound::Ignored => continue,
            };

            let commands = Arc::clone(&commands);
            let responses = responses.clone();
            tokio::spawn(async move {
                let response = handle_request(&commands, request).await;
                // The writer only stops on an output error
                let _ = responses.send(response);
            });
        }

        info!("🔌 MCP stdio server stopped (stdin closed)");
        Ok::<_, anyhow::Error>(())
    };

    let write_loop = async move {
        let mut writer = BufWriter::new(output);
        while let Some(response) = outbox.recv().await {
            write_response(&mut writer, &response).await?;
        }
        Ok::<_, anyhow::Error>(())
    };

    tokio::try_join!(read_loop, write_loop)?;
    Ok(())
}

enum Inbound {
    Request(MCPRequest),
    Notification(MCPNotification),
    Invalid(MCPResponse),
    Ignored,
}

fn parse_message(line: &str) -> Inbound {
    let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => {
            warn!("❌ Failed to parse JSON-RPC message: {}", e);
            return Inbound::Invalid(MCPResponse::error(
                None,
                MCPError::parse_error(format!("Invalid JSON: {}", e)),
            ));
        }
    };

    if value.get("id").is_none() {
        return match serde_json::from_value::<MCPNotification>(value) {
            Ok(notification) => Inbound::Notification(notification),
            Err(e) => {
                // Nothing to answer without an id
                warn!("❌ Dropping malformed notification: {}", e);
                Inbound::Ignored
            }
        };
    }

    let id = serde_json::from_value::<RequestId>(value["id"].clone()).ok();
    match serde_json::from_value::<MCPRequest>(value) {
        Ok(request) => Inbound::Request(request),
        Err(e) => {
            warn!("❌ Invalid JSON-RPC request: {}", e);
            Inbound::Invalid(MCPResponse::error(
                id,
                MCPError::invalid_request(format!("Invalid request: {}", e)),
            ))
        }
    }
}

/// Handle a JSON-RPC request and return a response
#[instrument(skip(commands, request), fields(method = %request.method, id = %request.id))]
async fn handle_request<S: CommandSender>(
    commands: &DesignCommands<S>,
    request: MCPRequest,
) -> MCPResponse {
    let result = match request.method.as_str() {
        "initialize" => initialize::handle_initialize(request.params),
        "ping" => Ok(json!({})),
        "tools/list" => tools::handle_tools_list(request.params),
        "tools/call" => tools::handle_tools_call(commands, request.params).await,
        _ => {
            warn!("⚠️  Unknown MCP method: {}", request.method);
            Err(MCPError::method_not_found(&request.method))
        }
    };

    match result {
        Ok(result) => {
            debug!("✅ MCP request {} succeeded", request.id);
            MCPResponse::success(request.id, result)
        }
        Err(error) => {
            error!(
                "❌ MCP request {} failed: {} (code: {})",
                request.id, error.message, error.code
            );
            MCPResponse::error(Some(request.id), error)
        }
    }
}

/// Write one JSON-RPC response line
async fn write_response<W: AsyncWrite + Unpin>(
    writer: &mut BufWriter<W>,
    response: &MCPResponse,
) -> anyhow::Result<()> {
    let json = serde_json::to_string(response)?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
#[path = "server_test.rs"]
mod server_test;
