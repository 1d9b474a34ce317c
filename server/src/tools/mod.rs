//! Tool registry: descriptors, argument validation, dispatch, telemetry.
//!
//! A tool is a descriptor value — name, description, input schema, handler
//! closure — held in registration order. The registry owns everything that
//! is common to all tools: schema validation with defaults, the
//! per-invocation deadline, duration capture, and the guarantee that no
//! handler failure (error or panic) escapes unwrapped.

mod get_document;
mod index_document;
mod schema;
mod search_documents;

pub use get_document::get_document_descriptor;
pub use index_document::{index_file, index_document_descriptor, IndexOutcome};
pub use search_documents::search_documents_descriptor;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde_json::Value;
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::error::{AppError, ErrorCode, ToolError};

/// Boxed async tool handler. Handlers capture their dependencies (store,
/// parsers, config) at registration time.
pub type ToolHandler = Box<
    dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send>>
        + Send
        + Sync,
>;

pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
    pub handler: ToolHandler,
}

/// Outcome of one invocation, before protocol translation.
#[derive(Debug)]
pub struct ToolResult {
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<ToolError>,
    pub duration_ms: u64,
}

impl ToolResult {
    fn ok(data: Value, duration: Duration) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            duration_ms: duration.as_millis() as u64,
        }
    }

    fn err(error: ToolError, duration: Duration) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
            duration_ms: duration.as_millis() as u64,
        }
    }
}

#[derive(Default)]
struct ToolTelemetry {
    invocations: AtomicU64,
    errors: AtomicU64,
    total_duration_ms: AtomicU64,
}

struct RegisteredTool {
    descriptor: ToolDescriptor,
    telemetry: ToolTelemetry,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    timeout: Duration,
}

impl ToolRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self { tools: Vec::new(), timeout }
    }

    /// Register a tool. Duplicate names are a startup error.
    pub fn register(&mut self, descriptor: ToolDescriptor) -> Result<(), AppError> {
        if self.tools.iter().any(|t| t.descriptor.name == descriptor.name) {
            return Err(AppError::Registry(format!(
                "tool '{}' is already registered",
                descriptor.name
            )));
        }
        self.tools.push(RegisteredTool { descriptor, telemetry: ToolTelemetry::default() });
        Ok(())
    }

    /// The exact payload for MCP `tools/list`.
    pub fn list(&self) -> Value {
        let tools: Vec<Value> = self
            .tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.descriptor.name,
                    "description": t.descriptor.description,
                    "inputSchema": t.descriptor.input_schema,
                })
            })
            .collect();
        Value::Array(tools)
    }

    /// Validate arguments, run the handler under the deadline, and capture
    /// the wall-clock duration. Never panics, never throws.
    pub async fn invoke(&self, name: &str, arguments: Value) -> ToolResult {
        let start = Instant::now();
        let Some(tool) = self.tools.iter().find(|t| t.descriptor.name == name) else {
            return ToolResult::err(
                ToolError::new(ErrorCode::ToolNotFound, format!("unknown tool '{name}'")),
                start.elapsed(),
            );
        };

        let invocation_id = Uuid::new_v4();
        let validated =
            match schema::validate(&tool.descriptor.input_schema, &arguments, true) {
                Ok(v) => v,
                Err(e) => return self.finish(tool, invocation_id, Err(e), start),
            };

        // Spawn so a panicking handler is contained as a join error instead
        // of unwinding through the dispatch loop.
        let handle = tokio::spawn((tool.descriptor.handler)(validated));
        let outcome = match tokio::time::timeout(self.timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => {
                Err(ToolError::internal(format!("handler aborted: {join_err}")))
            }
            // The in-flight handler is left to complete (no torn store
            // transactions); its result is discarded.
            Err(_) => Err(ToolError::new(
                ErrorCode::ToolTimeout,
                format!("tool '{name}' exceeded {}s deadline", self.timeout.as_secs()),
            )),
        };

        self.finish(tool, invocation_id, outcome, start)
    }

    fn finish(
        &self,
        tool: &RegisteredTool,
        invocation_id: Uuid,
        outcome: Result<Value, ToolError>,
        start: Instant,
    ) -> ToolResult {
        let duration = start.elapsed();
        let telemetry = &tool.telemetry;
        telemetry.invocations.fetch_add(1, Ordering::Relaxed);
        telemetry.total_duration_ms.fetch_add(duration.as_millis() as u64, Ordering::Relaxed);

        match outcome {
            Ok(data) => {
                tracing::debug!(
                    tool = tool.descriptor.name,
                    invocation = %invocation_id,
                    duration_ms = duration.as_millis() as u64,
                    "tool invocation completed"
                );
                ToolResult::ok(data, duration)
            }
            Err(error) => {
                telemetry.errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    tool = tool.descriptor.name,
                    invocation = %invocation_id,
                    code = error.code.as_str(),
                    duration_ms = duration.as_millis() as u64,
                    "tool invocation failed: {}",
                    error.message
                );
                ToolResult::err(error, duration)
            }
        }
    }

    /// (invocations, errors, total_duration_ms) for one tool.
    pub fn telemetry(&self, name: &str) -> Option<(u64, u64, u64)> {
        self.tools.iter().find(|t| t.descriptor.name == name).map(|t| {
            (
                t.telemetry.invocations.load(Ordering::Relaxed),
                t.telemetry.errors.load(Ordering::Relaxed),
                t.telemetry.total_duration_ms.load(Ordering::Relaxed),
            )
        })
    }
}

// ---------------------------------------------------------------------------
// Shared path resolution
// ---------------------------------------------------------------------------

/// Resolve a `file_path` argument: relative paths are joined onto the
/// configured document root; the canonical form is preferred when the file
/// exists so watcher- and client-triggered indexes agree on keys.
pub(crate) fn resolve_document_path(config: &ServerConfig, raw: &str) -> PathBuf {
    let candidate = if Path::new(raw).is_absolute() {
        PathBuf::from(raw)
    } else {
        config.document_root.join(raw)
    };
    candidate.canonicalize().unwrap_or(candidate)
}
