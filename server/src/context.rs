//! Server context: dependency-injected wiring of every component.
//!
//! Built once at startup and passed explicitly — no module-level mutable
//! state. The dependency graph is a strict DAG: the store knows nothing
//! above it, parsers feed tools, tools are shared by the registry and the
//! watcher, and the protocol engine sits on top.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ServerConfig;
use crate::error::AppError;
use crate::parser::ParserRegistry;
use crate::store::DocumentStore;
use crate::tools::{
    get_document_descriptor, index_document_descriptor, search_documents_descriptor,
    ToolRegistry,
};
use crate::watcher::DocumentWatcher;

pub struct ServerContext {
    pub config: Arc<ServerConfig>,
    pub store: Arc<DocumentStore>,
    pub parsers: Arc<ParserRegistry>,
    pub tools: ToolRegistry,
    pub watcher: Option<DocumentWatcher>,
    /// Set by `initialize`; `tools/call` before it is permitted but warned.
    pub initialized: AtomicBool,
}

impl ServerContext {
    /// Open the store, register the built-in parsers and tools, and start
    /// the watcher when enabled. Must run inside a tokio runtime.
    pub fn build(config: ServerConfig) -> Result<Arc<Self>, AppError> {
        let config = Arc::new(config);
        let store = Arc::new(DocumentStore::open(
            &config.database_path,
            Duration::from_secs(config.query_cache_ttl_seconds),
        )?);
        let parsers = Arc::new(ParserRegistry::with_defaults());

        let mut tools = ToolRegistry::new(Duration::from_secs(config.tool_timeout_seconds));
        tools.register(index_document_descriptor(
            Arc::clone(&store),
            Arc::clone(&parsers),
            Arc::clone(&config),
        ))?;
        tools.register(search_documents_descriptor(Arc::clone(&store), Arc::clone(&config)))?;
        tools.register(get_document_descriptor(Arc::clone(&store), Arc::clone(&config)))?;

        let watcher = if config.watch_enabled {
            Some(DocumentWatcher::start(
                Arc::clone(&store),
                Arc::clone(&parsers),
                Arc::clone(&config),
                true,
            )?)
        } else {
            None
        };

        Ok(Arc::new(Self {
            config,
            store,
            parsers,
            tools,
            watcher,
            initialized: AtomicBool::new(false),
        }))
    }

    /// Stop the watcher and flush the store. Called once on shutdown.
    pub async fn shutdown(&self) {
        if let Some(watcher) = &self.watcher {
            watcher.stop().await;
        }
        self.store.close().await;
    }
}
