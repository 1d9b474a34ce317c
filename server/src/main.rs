//! mydocs-mcp binary — thin CLI shell over the [`mydocs_mcp`] library crate.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use mydocs_mcp::config::ServerConfig;
use mydocs_mcp::context::ServerContext;
use mydocs_mcp::protocol::run_stdio;

/// Local, privacy-first document indexing and search — MCP server over stdio.
#[derive(Parser)]
#[command(name = "mydocs-mcp", version, about, long_about = None)]
struct Cli {
    /// Configuration file (TOML); defaults to ./mydocs.toml when present
    #[arg(long)]
    config: Option<PathBuf>,

    /// Document root override (base for relative paths and the watcher)
    #[arg(long)]
    root: Option<PathBuf>,

    /// Database file override
    #[arg(long)]
    database: Option<PathBuf>,

    /// Disable the filesystem watcher
    #[arg(long)]
    no_watch: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Resolve config before logging so log_level can come from the file.
    let config_path = cli.config.clone().or_else(|| {
        let default = PathBuf::from("mydocs.toml");
        default.exists().then_some(default)
    });
    let mut config = match ServerConfig::load(config_path.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            // Logging is not up yet; stderr directly.
            eprintln!("mydocs-mcp: {e}");
            std::process::exit(1);
        }
    };

    if let Some(root) = cli.root {
        config.document_root = match root.canonicalize() {
            Ok(r) => r,
            Err(e) => {
                eprintln!("mydocs-mcp: --root {}: {e}", root.display());
                std::process::exit(1);
            }
        };
    }
    if let Some(database) = cli.database {
        config.database_path = database;
    }
    if cli.no_watch {
        config.watch_enabled = false;
    }

    // Structured logging to stderr only; stdout belongs to the protocol.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(
                format!("mydocs_mcp={}", config.log_level.as_filter())
                    .parse()
                    .expect("static directive"),
            ),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    info!(
        root = %config.document_root.display(),
        database = %config.database_path.display(),
        watch = config.watch_enabled,
        "starting mydocs-mcp"
    );

    let ctx = match ServerContext::build(config) {
        Ok(ctx) => ctx,
        Err(e) => {
            error!("initialization failed: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = run_stdio(Arc::clone(&ctx)).await {
        error!("fatal: {e}");
        std::process::exit(1);
    }
}
