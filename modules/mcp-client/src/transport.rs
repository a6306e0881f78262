//! Stdio JSON-RPC transport to a spawned MCP server process.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{McpError, Result};
use crate::manifest::ServerSpec;
use crate::types::ToolInfo;

const PROTOCOL_VERSION: &str = "2024-11-05";

/// Longest single backoff sleep between transport retries.
const MAX_BACKOFF_SECS: u64 = 30;

/// Grace period for a server process to exit after kill.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// The seam every external tool is reached through. Implemented by
/// `StdioTransport` in production and by scripted backends in tests.
#[async_trait]
pub trait ToolBackend: Send + Sync {
    /// Invoke a named tool once. `McpError::Transport` means the connection
    /// or process was lost; `McpError::Tool` is a structured server failure.
    async fn invoke(&self, tool_name: &str, params: Value) -> Result<Value>;

    /// List the tools the server advertises.
    async fn list_tools(&self) -> Result<Vec<ToolInfo>>;

    /// Release transport resources. Idempotent.
    async fn close(&self) -> Result<()>;

    /// Invoke with exponential backoff on transport failures only.
    /// Tool errors surface immediately.
    async fn invoke_with_retry(
        &self,
        tool_name: &str,
        params: Value,
        retry_count: u32,
    ) -> Result<Value> {
        let mut last_err = None;
        for attempt in 0..=retry_count {
            match self.invoke(tool_name, params.clone()).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < retry_count => {
                    let wait = 2u64.pow(attempt).min(MAX_BACKOFF_SECS);
                    warn!(
                        tool = tool_name,
                        attempt = attempt + 1,
                        wait_secs = wait,
                        "Transport failure, retrying"
                    );
                    tokio::time::sleep(Duration::from_secs(wait)).await;
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_err.unwrap_or_else(|| McpError::Transport("retries exhausted".into())))
    }
}

// ---------------------------------------------------------------------------
// StdioTransport
// ---------------------------------------------------------------------------

struct Connection {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    next_id: u64,
}

/// One MCP server reached over newline-delimited JSON-RPC on stdio.
/// The connection is created lazily on first use and request/response pairs
/// serialize under an internal lock, so the transport is safe to share.
pub struct StdioTransport {
    server_name: String,
    spec: ServerSpec,
    conn: Mutex<Option<Connection>>,
}

impl StdioTransport {
    pub fn new(server_name: impl Into<String>, spec: ServerSpec) -> Self {
        Self {
            server_name: server_name.into(),
            spec,
            conn: Mutex::new(None),
        }
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    async fn spawn(&self) -> Result<Connection> {
        let mut command = Command::new(&self.spec.command);
        command
            .args(&self.spec.args)
            .envs(&self.spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            McpError::Transport(format!(
                "failed to spawn '{}' for server '{}': {e}",
                self.spec.command, self.server_name
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Transport("server stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Transport("server stdout unavailable".into()))?;

        let mut conn = Connection {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            next_id: 1,
        };

        // MCP handshake: initialize request, then the initialized notification.
        let init = request_frame(
            conn.next_id,
            "initialize",
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": { "name": "dbsunset", "version": env!("CARGO_PKG_VERSION") },
            }),
        );
        conn.next_id += 1;
        write_frame(&mut conn.stdin, &init).await?;
        let init_response = read_frame(&mut conn.stdout).await?;
        if init_response.get("error").is_some() {
            return Err(McpError::Transport(format!(
                "initialize rejected by '{}': {}",
                self.server_name, init_response["error"]
            )));
        }
        write_frame(
            &mut conn.stdin,
            &json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }),
        )
        .await?;

        info!(server = %self.server_name, command = %self.spec.command, "MCP server started");
        Ok(conn)
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let mut guard = self.conn.lock().await;
        if guard.is_none() {
            *guard = Some(self.spawn().await?);
        }
        let conn = guard.as_mut().expect("connection just established");

        let id = conn.next_id;
        conn.next_id += 1;

        let frame = request_frame(id, method, params);
        debug!(server = %self.server_name, method, id, "MCP request");

        let outcome = async {
            write_frame(&mut conn.stdin, &frame).await?;
            read_frame(&mut conn.stdout).await
        }
        .await;

        match outcome {
            Ok(response) => Ok(response),
            Err(err) => {
                // A broken pipe means the process is gone; drop the
                // connection so the next call respawns.
                *guard = None;
                Err(err)
            }
        }
    }
}

#[async_trait]
impl ToolBackend for StdioTransport {
    async fn invoke(&self, tool_name: &str, params: Value) -> Result<Value> {
        let response = self
            .request("tools/call", json!({ "name": tool_name, "arguments": params }))
            .await?;

        if let Some(error) = response.get("error") {
            return Err(McpError::Tool(format!(
                "{tool_name}: {}",
                error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown server error")
            )));
        }

        let result = response
            .get("result")
            .cloned()
            .ok_or_else(|| McpError::Transport("response missing result".into()))?;

        if result
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            return Err(McpError::Tool(format!(
                "{tool_name}: {}",
                first_text_block(&result).unwrap_or_else(|| "tool reported failure".into())
            )));
        }

        // Tool results arrive as content blocks; the servers we drive return
        // a single JSON text block.
        match first_text_block(&result) {
            Some(text) => match serde_json::from_str::<Value>(&text) {
                Ok(value) => Ok(value),
                Err(_) => Ok(Value::String(text)),
            },
            None => Ok(result),
        }
    }

    async fn list_tools(&self) -> Result<Vec<ToolInfo>> {
        let response = self.request("tools/list", json!({})).await?;
        let tools = response
            .get("result")
            .and_then(|r| r.get("tools"))
            .cloned()
            .unwrap_or_else(|| json!([]));
        Ok(serde_json::from_value(tools)?)
    }

    async fn close(&self) -> Result<()> {
        let mut guard = self.conn.lock().await;
        let Some(mut conn) = guard.take() else {
            return Ok(());
        };

        let _ = conn.child.start_kill();
        match tokio::time::timeout(SHUTDOWN_GRACE, conn.child.wait()).await {
            Ok(Ok(status)) => {
                info!(server = %self.server_name, %status, "MCP server closed");
            }
            Ok(Err(e)) => warn!(server = %self.server_name, error = %e, "Error closing MCP server"),
            Err(_) => warn!(server = %self.server_name, "MCP server did not exit within grace period"),
        }
        Ok(())
    }
}

fn request_frame(id: u64, method: &str, params: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params })
}

async fn write_frame(stdin: &mut ChildStdin, frame: &Value) -> Result<()> {
    let mut line = serde_json::to_string(frame)?;
    line.push('\n');
    stdin.write_all(line.as_bytes()).await?;
    stdin.flush().await?;
    Ok(())
}

async fn read_frame(stdout: &mut BufReader<ChildStdout>) -> Result<Value> {
    let mut line = String::new();
    loop {
        line.clear();
        let read = stdout.read_line(&mut line).await?;
        if read == 0 {
            return Err(McpError::Transport("server closed its stdout".into()));
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let frame: Value = serde_json::from_str(trimmed)
            .map_err(|e| McpError::Transport(format!("malformed frame: {e}")))?;
        // Skip server-initiated notifications; we only pair responses.
        if frame.get("id").is_some() {
            return Ok(frame);
        }
    }
}

fn first_text_block(result: &Value) -> Option<String> {
    result
        .get("content")?
        .as_array()?
        .iter()
        .find_map(|block| {
            (block.get("type")?.as_str()? == "text")
                .then(|| block.get("text")?.as_str().map(str::to_string))
                .flatten()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Backend that fails with a transport error a fixed number of times.
    struct FlakyBackend {
        failures: AtomicU32,
        tool_error: bool,
    }

    #[async_trait]
    impl ToolBackend for FlakyBackend {
        async fn invoke(&self, _tool: &str, _params: Value) -> Result<Value> {
            if self.failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n > 0).then(|| n - 1)
            })
            .is_ok()
            {
                if self.tool_error {
                    return Err(McpError::Tool("structured failure".into()));
                }
                return Err(McpError::Transport("pipe closed".into()));
            }
            Ok(json!({ "ok": true }))
        }

        async fn list_tools(&self) -> Result<Vec<ToolInfo>> {
            Ok(Vec::new())
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retry_recovers_from_transport_failures() {
        let backend = FlakyBackend {
            failures: AtomicU32::new(2),
            tool_error: false,
        };
        let value = backend
            .invoke_with_retry("pack_remote_repository", json!({}), 3)
            .await
            .unwrap();
        assert_eq!(value["ok"], true);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_gives_up_after_budget() {
        let backend = FlakyBackend {
            failures: AtomicU32::new(10),
            tool_error: false,
        };
        let err = backend
            .invoke_with_retry("pack_remote_repository", json!({}), 2)
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Transport(_)));
    }

    #[tokio::test]
    async fn tool_errors_are_not_retried() {
        let backend = FlakyBackend {
            failures: AtomicU32::new(5),
            tool_error: true,
        };
        let err = backend
            .invoke_with_retry("create_pull_request", json!({}), 5)
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Tool(_)));
        // Only one attempt was consumed.
        assert_eq!(backend.failures.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn first_text_block_extracts_json_payloads() {
        let result = json!({
            "content": [
                { "type": "image", "data": "..." },
                { "type": "text", "text": "{\"output_id\":\"abc\"}" }
            ]
        });
        assert_eq!(
            first_text_block(&result).unwrap(),
            "{\"output_id\":\"abc\"}"
        );
    }
}
