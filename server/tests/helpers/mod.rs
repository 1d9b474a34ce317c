//! Test harness for protocol and tool integration tests.
//!
//! Builds a `ServerContext` over a temp document root and database, then
//! dispatches JSON-RPC values through `dispatch_request()` directly — no
//! subprocess, no real stdio.

use std::path::PathBuf;
use std::sync::Arc;

use mydocs_mcp::config::ServerConfig;
use mydocs_mcp::context::ServerContext;
use mydocs_mcp::protocol::dispatch_request;
use serde_json::{json, Value};
use tempfile::TempDir;

pub struct TestHarness {
    pub ctx: Arc<ServerContext>,
    pub root: PathBuf,
    _temp_dir: TempDir,
}

impl TestHarness {
    /// Harness with the watcher disabled, no query cache, and fast timeouts.
    pub fn new() -> Self {
        Self::new_with(|_| {})
    }

    pub fn new_with(tweak: impl FnOnce(&mut ServerConfig)) -> Self {
        let temp_dir = TempDir::new().expect("create temp dir");
        let root = temp_dir.path().canonicalize().expect("canonicalize temp dir");

        let mut config = ServerConfig {
            document_root: root.clone(),
            database_path: root.join("mydocs.db"),
            watch_enabled: false,
            query_cache_ttl_seconds: 0,
            watch_debounce_ms: 20,
            watch_batch_ms: 30,
            tool_timeout_seconds: 5,
            shutdown_deadline_seconds: 2,
            ..ServerConfig::default()
        };
        tweak(&mut config);

        let ctx = ServerContext::build(config).expect("build server context");
        TestHarness { ctx, root, _temp_dir: temp_dir }
    }

    /// Write a document under the root, creating parent directories.
    pub fn write_doc(&self, name: &str, content: &str) -> PathBuf {
        let path = self.root.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent dirs");
        }
        std::fs::write(&path, content).expect("write document");
        path
    }

    pub async fn dispatch(&self, msg: Value) -> Option<Value> {
        dispatch_request(&self.ctx, &msg).await
    }

    /// Send an initialize request and return the response.
    pub async fn initialize(&self) -> Value {
        let msg = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": "2025-06-18",
                "capabilities": {},
                "clientInfo": { "name": "test", "version": "0.0.0" }
            }
        });
        self.dispatch(msg).await.expect("initialize response")
    }

    /// Call a tool and return the raw JSON-RPC response.
    pub async fn call_tool(&self, tool: &str, args: Value) -> Value {
        let msg = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "tools/call",
            "params": { "name": tool, "arguments": args }
        });
        self.dispatch(msg).await.expect("tools/call response")
    }

    /// Call a tool expecting success; returns the decoded data payload from
    /// the MCP content envelope.
    pub async fn call_tool_ok(&self, tool: &str, args: Value) -> Value {
        let resp = self.call_tool(tool, args).await;
        assert!(
            resp.get("error").is_none(),
            "expected success from {tool}, got error: {resp}"
        );
        let text = resp["result"]["content"][0]["text"]
            .as_str()
            .unwrap_or_else(|| panic!("missing content text in {resp}"));
        serde_json::from_str(text).expect("content text is JSON")
    }

    /// Call a tool expecting failure; returns (numeric code, stable code).
    pub async fn call_tool_err(&self, tool: &str, args: Value) -> (i64, String) {
        let resp = self.call_tool(tool, args).await;
        let error = resp
            .get("error")
            .unwrap_or_else(|| panic!("expected error from {tool}, got: {resp}"));
        let numeric = error["code"].as_i64().expect("numeric error code");
        let stable = error["data"]["code"].as_str().unwrap_or_default().to_string();
        (numeric, stable)
    }
}
