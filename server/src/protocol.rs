//! JSON-RPC 2.0 protocol engine over line-delimited STDIO.
//!
//! One reader task owns stdin; every request is dispatched as its own task
//! so a slow tool never blocks the next read. Responses funnel through a
//! single channel-backed writer that owns stdout, so frames can never
//! interleave. Responses are emitted in completion order — JSON-RPC ids
//! carry the correlation.
//!
//! Logs go to stderr only; a stray byte on stdout would corrupt the
//! protocol.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::context::ServerContext;
use crate::error::AppError;
use crate::tools::ToolResult;

pub(crate) const SUPPORTED_VERSIONS: &[&str] = &["2025-06-18", "2024-11-05"];
pub(crate) const LATEST_VERSION: &str = "2025-06-18";

/// Echo the client's protocol version when supported, else offer ours.
pub(crate) fn negotiate_version(client_version: &str) -> &'static str {
    SUPPORTED_VERSIONS
        .iter()
        .find(|&&v| v == client_version)
        .copied()
        .unwrap_or(LATEST_VERSION)
}

// ---------------------------------------------------------------------------
// Response builders
// ---------------------------------------------------------------------------

fn error_response(id: Value, code: i64, message: &str, data_code: Option<&str>) -> Value {
    let mut error = json!({ "code": code, "message": message });
    if let Some(stable) = data_code {
        error["data"] = json!({ "code": stable });
    }
    json!({ "jsonrpc": "2.0", "id": id, "error": error })
}

/// Translate a [`ToolResult`] into the wire response. Success wraps the
/// serialized data payload in the MCP `content` array; failure becomes a
/// JSON-RPC error carrying the stable code under `data.code`.
fn tool_call_response(id: Value, result: ToolResult) -> Value {
    match (result.success, result.data, result.error) {
        (true, Some(data), _) => {
            let text = serde_json::to_string(&data).unwrap_or_else(|_| "{}".to_string());
            json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": { "content": [{ "type": "text", "text": text }] }
            })
        }
        (_, _, Some(error)) => error_response(
            id,
            error.code.jsonrpc_code(),
            &error.message,
            Some(error.code.as_str()),
        ),
        _ => error_response(id, -32603, "tool produced no result", Some("INTERNAL_ERROR")),
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Process one decoded JSON-RPC message. Returns `None` for notifications.
pub async fn dispatch_request(ctx: &Arc<ServerContext>, msg: &Value) -> Option<Value> {
    let id = msg.get("id").cloned();

    let valid_envelope = msg.is_object()
        && msg.get("jsonrpc").and_then(|v| v.as_str()) == Some("2.0")
        && msg.get("method").map(|m| m.is_string()).unwrap_or(false);
    if !valid_envelope {
        return Some(error_response(
            id.unwrap_or(Value::Null),
            -32600,
            "invalid request",
            None,
        ));
    }

    let method = msg["method"].as_str().unwrap_or_default();

    // Notifications are accepted but never answered.
    let Some(id) = id else {
        tracing::debug!(method, "notification accepted");
        return None;
    };

    match method {
        "initialize" => {
            let client_version =
                msg["params"]["protocolVersion"].as_str().unwrap_or_default();
            ctx.initialized.store(true, Ordering::Release);
            Some(json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "protocolVersion": negotiate_version(client_version),
                    "capabilities": {
                        "tools": { "listChanged": false }
                    },
                    "serverInfo": {
                        "name": "mydocs-mcp",
                        "version": env!("CARGO_PKG_VERSION")
                    },
                    "instructions": "Local document search. Use indexDocument to add files, \
                                     searchDocuments for ranked keyword search, getDocument \
                                     to read an indexed document."
                }
            }))
        }
        "tools/list" => Some(json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": { "tools": ctx.tools.list() }
        })),
        "tools/call" => {
            if !ctx.initialized.load(Ordering::Acquire) {
                tracing::warn!("tools/call before initialize");
            }
            let Some(name) = msg["params"]["name"].as_str() else {
                return Some(error_response(
                    id,
                    -32602,
                    "params.name is required",
                    Some("INVALID_PARAMS"),
                ));
            };
            let arguments = msg["params"].get("arguments").cloned().unwrap_or(json!({}));
            let result = ctx.tools.invoke(name, arguments).await;
            Some(tool_call_response(id, result))
        }
        "ping" => Some(json!({ "jsonrpc": "2.0", "id": id, "result": {} })),
        _ => Some(error_response(id, -32601, &format!("method '{method}' not found"), None)),
    }
}

// ---------------------------------------------------------------------------
// STDIO loop
// ---------------------------------------------------------------------------

async fn writer_loop(mut rx: mpsc::Receiver<String>) -> Result<(), AppError> {
    let mut stdout = tokio::io::stdout();
    while let Some(frame) = rx.recv().await {
        stdout
            .write_all(frame.as_bytes())
            .await
            .map_err(|e| AppError::Transport(format!("stdout write failed: {e}")))?;
        stdout
            .write_all(b"\n")
            .await
            .map_err(|e| AppError::Transport(format!("stdout write failed: {e}")))?;
        stdout
            .flush()
            .await
            .map_err(|e| AppError::Transport(format!("stdout flush failed: {e}")))?;
    }
    Ok(())
}

async fn terminate_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(_) => {
                    let _ = ctrl_c.await;
                    return;
                }
            };
        tokio::select! {
            _ = ctrl_c => tracing::info!("received SIGINT"),
            _ = sigterm.recv() => tracing::info!("received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        tracing::info!("received Ctrl+C");
    }
}

/// Run the protocol loop until stdin EOF or a terminate signal, then drain
/// in-flight requests within the shutdown deadline, stop the watcher, and
/// close the store. Stdout I/O failure aborts with a transport error.
pub async fn run_stdio(ctx: Arc<ServerContext>) -> Result<(), AppError> {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    let (out_tx, out_rx) = mpsc::channel::<String>(64);
    let mut writer = tokio::spawn(writer_loop(out_rx));
    let mut inflight: JoinSet<()> = JoinSet::new();

    if let Ok(stats) = ctx.store.stats().await {
        tracing::info!(
            documents = stats.documents,
            tokens = stats.distinct_tokens,
            "store opened"
        );
    }
    tracing::info!(
        tools = ctx.tools.list().as_array().map(|t| t.len()).unwrap_or(0),
        root = %ctx.config.document_root.display(),
        "MCP server ready on stdio"
    );

    let shutdown = terminate_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut writer => {
                inflight.abort_all();
                ctx.shutdown().await;
                return Err(match result {
                    Ok(Err(e)) => e,
                    Ok(Ok(())) => AppError::Transport("stdout closed unexpectedly".into()),
                    Err(e) => AppError::Transport(format!("writer task failed: {e}")),
                });
            }
            _ = &mut shutdown => {
                break;
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        handle_frame(&ctx, &out_tx, &mut inflight, line);
                    }
                    Ok(None) => {
                        tracing::info!("stdin closed, shutting down");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "stdin read failed, shutting down");
                        break;
                    }
                }
            }
        }
    }

    // Drain in-flight requests within the shutdown deadline.
    let deadline = Duration::from_secs(ctx.config.shutdown_deadline_seconds);
    let drained = tokio::time::timeout(deadline, async {
        while inflight.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        tracing::warn!("shutdown deadline exceeded, aborting in-flight requests");
        inflight.abort_all();
    }

    let _ = tokio::time::timeout(deadline, ctx.shutdown()).await;

    drop(out_tx);
    match writer.await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e),
        Err(e) => Err(AppError::Transport(format!("writer task failed: {e}"))),
    }
}

/// Decode one frame and dispatch it as an independent task.
fn handle_frame(
    ctx: &Arc<ServerContext>,
    out_tx: &mpsc::Sender<String>,
    inflight: &mut JoinSet<()>,
    line: String,
) {
    let msg: Value = match serde_json::from_str(&line) {
        Ok(msg) => msg,
        Err(_) => {
            let response = error_response(Value::Null, -32700, "parse error", None);
            let out_tx = out_tx.clone();
            inflight.spawn(async move {
                let _ = out_tx.send(response.to_string()).await;
            });
            return;
        }
    };

    let ctx = Arc::clone(ctx);
    let out_tx = out_tx.clone();
    inflight.spawn(async move {
        if let Some(response) = dispatch_request(&ctx, &msg).await {
            let _ = out_tx.send(response.to_string()).await;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_negotiation_echoes_supported() {
        assert_eq!(negotiate_version("2024-11-05"), "2024-11-05");
        assert_eq!(negotiate_version("1999-01-01"), LATEST_VERSION);
        assert_eq!(negotiate_version(""), LATEST_VERSION);
    }

    #[test]
    fn error_response_carries_stable_code() {
        let resp = error_response(json!(7), -32001, "missing", Some("FILE_NOT_FOUND"));
        assert_eq!(resp["id"], 7);
        assert_eq!(resp["error"]["code"], -32001);
        assert_eq!(resp["error"]["data"]["code"], "FILE_NOT_FOUND");
        assert!(resp["error"]["message"].is_string());
    }
}
