//! Line-delimited JSON-RPC server exposing the mail, calendar and task tools.
//!
//! One request per line in, one response per line out. Tool calls are
//! forwarded to the session thread; everything else is answered inline.

mod tools;
mod types;
mod worker;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

pub use tools::{find as find_tool, Tool, TOOLS};
pub use types::*;
pub use worker::{SessionHandle, SessionThread, SESSION_THREAD_NAME};

pub const PROTOCOL_VERSION: &str = "2024-11-05";
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

pub struct McpServer {
    session: Option<SessionHandle>,
    call_timeout: Duration,
}

impl McpServer {
    /// A server dispatching tool calls to `session`. Without a session every
    /// tool call fails with "Session not initialized".
    pub fn new(session: Option<SessionHandle>) -> Self {
        Self {
            session,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Answer one raw input line. `None` means nothing is written back:
    /// the line was blank or carried a notification.
    pub async fn handle_line(&self, line: &str) -> Option<String> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(error = %e, "Unparseable request line");
                return Some(encode(&Response::failure(None, RpcError::parse_error())));
            }
        };
        let id = value.get("id").cloned().filter(|id| !id.is_null());
        let request: Request = match serde_json::from_value(value) {
            Ok(request) => request,
            Err(e) => {
                return Some(encode(&Response::failure(
                    id,
                    RpcError::invalid_request(format!("Invalid request: {}", e)),
                )));
            }
        };

        self.handle_request(request).await.map(|response| encode(&response))
    }

    pub async fn handle_request(&self, request: Request) -> Option<Response> {
        if let Some(version) = request.jsonrpc.as_deref().filter(|v| *v != "2.0") {
            return Some(Response::failure(
                request.id,
                RpcError::invalid_request(format!("Unsupported jsonrpc version '{}'", version)),
            ));
        }

        let notification = request.id.is_none() && request.method.starts_with("notifications/");
        tracing::debug!(method = %request.method, "Handling request");
        let result = self.dispatch(&request.method, request.params).await;
        if notification {
            return None;
        }
        Some(match result {
            Ok(value) => Response::success(request.id, value),
            Err(error) => Response::failure(request.id, error),
        })
    }

    async fn dispatch(&self, method: &str, params: Option<Value>) -> Result<Value, RpcError> {
        match method {
            "initialize" => Ok(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": {
                    "name": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION"),
                },
            })),
            "ping" => Ok(json!({})),
            "list-methods" | "tools/list" => Ok(json!({
                "tools": TOOLS.iter().map(Tool::descriptor).collect::<Vec<_>>(),
            })),
            "call" | "tools/call" => self.call_tool(params).await,
            m if m.starts_with("notifications/") => Ok(Value::Null),
            other => Err(RpcError::method_not_found(format!(
                "Method not found: {}",
                other
            ))),
        }
    }

    async fn call_tool(&self, params: Option<Value>) -> Result<Value, RpcError> {
        let params: CallToolParams = serde_json::from_value(params.unwrap_or(Value::Null))
            .map_err(|e| RpcError::invalid_params(format!("Invalid call params: {}", e)))?;
        let tool = tools::find(&params.name)
            .ok_or_else(|| RpcError::method_not_found(format!("Unknown tool: {}", params.name)))?;
        let session = self.session.as_ref().ok_or_else(RpcError::not_initialized)?;

        tracing::info!(tool = tool.name, "Calling tool");
        let arguments = params.arguments;
        let result = session
            .run(self.call_timeout, move |bridge| tool.call(bridge, arguments))
            .await;
        if let Err(e) = &result {
            tracing::debug!(tool = tool.name, code = e.code, error = %e.message, "Tool call failed");
        }
        result
    }

    /// Serve requests from `reader` until it reaches end of input.
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            if let Some(response) = self.handle_line(&line).await {
                write_line(&mut writer, &response).await?;
            }
        }
        Ok(())
    }
}

fn encode(response: &Response) -> String {
    serde_json::to_string(response).unwrap_or_else(|e| {
        json!({
            "jsonrpc": "2.0",
            "error": { "code": INTERNAL_ERROR, "message": format!("Failed to encode response: {}", e) },
        })
        .to_string()
    })
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

/// Lines of stdin, read on a plain thread so that a pending read never
/// holds up runtime shutdown.
fn stdin_lines() -> mpsc::Receiver<std::io::Result<String>> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Serve on stdin/stdout until end of input or Ctrl-C.
pub async fn run_stdio_server(server: Arc<McpServer>) -> anyhow::Result<()> {
    tracing::info!("Serving JSON-RPC on stdio");
    let mut lines = stdin_lines();
    let mut stdout = tokio::io::stdout();
    loop {
        tokio::select! {
            line = lines.recv() => {
                let Some(line) = line else { break };
                let line = line.context("Failed to read from stdin")?;
                if let Some(response) = server.handle_line(&line).await {
                    write_line(&mut stdout, &response)
                        .await
                        .context("Failed to write to stdout")?;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, shutting down");
                break;
            }
        }
    }
    Ok(())
}

/// Accept connections on `bind`, one line-delimited session per connection,
/// until Ctrl-C.
pub async fn run_tcp_server(server: Arc<McpServer>, bind: &str) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    tracing::info!(addr = %listener.local_addr()?, "Serving JSON-RPC over TCP");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted.context("Failed to accept connection")?;
                tracing::debug!(%peer, "Client connected");
                let server = server.clone();
                tokio::spawn(async move {
                    let (reader, writer) = stream.into_split();
                    if let Err(e) = server.serve(BufReader::new(reader), writer).await {
                        tracing::warn!(%peer, error = %e, "Connection closed with error");
                    }
                    tracing::debug!(%peer, "Client disconnected");
                });
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, shutting down");
                break;
            }
        }
    }
    Ok(())
}
