//! code-runner daemon
//!
//! MCP server that builds and runs submitted source code under a deadline.
//! Configuration comes from `--config <file>` or the `CODE_RUNNER_CONFIG`
//! env var.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use code_runner::{config::Config, engine::Engine, mcp, workspace};

#[derive(Parser, Debug)]
#[command(name = "code-runner")]
#[command(about = "MCP server that builds and runs untrusted code under a deadline")]
struct Args {
    /// Run in stdio mode (for MCP clients)
    #[arg(long)]
    stdio: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Path to a JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging (stderr so stdout is free for MCP protocol)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;
    let registry = config.registry();

    info!(
        languages = ?registry.languages(),
        timeout_secs = config.execution.timeout_seconds,
        workspace_root = %config.execution.workspace_root.display(),
        "Loaded configuration"
    );

    // Leftovers from a previous run that died mid-request
    let removed = workspace::sweep_stale(
        &config.execution.workspace_root,
        config.execution.stale_after(),
    );
    if removed > 0 {
        info!(removed, "Removed stale workspaces");
    }

    let engine = Engine::new(Arc::new(registry), &config.execution);

    if args.stdio {
        mcp::serve_stdio(engine).await?;
    } else {
        anyhow::bail!("Only --stdio mode is currently supported");
    }

    Ok(())
}
