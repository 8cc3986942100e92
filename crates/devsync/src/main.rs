//! devsync - command-line client for cloud development workspaces
//!
//! Main entry point for the devsync CLI.

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

use commands::{config, watch, workspaces};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// devsync - keep track of cloud development workspaces
#[derive(Parser)]
#[command(name = "devsync")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Context from the client config to use
    #[arg(long, global = true, env = "DEVSYNC_CONTEXT")]
    pub context: Option<String>,

    /// Backend API URL, overriding the context's server
    #[arg(long, global = true, env = "DEVSYNC_SERVER")]
    pub server: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List workspaces across namespaces
    List(workspaces::ListArgs),

    /// Show one workspace
    Get(workspaces::WorkspaceRef),

    /// Create a workspace from a devfile
    Create(workspaces::CreateArgs),

    /// Delete a workspace
    Delete(workspaces::WorkspaceRef),

    /// Start a workspace
    Start(workspaces::WorkspaceRef),

    /// Stop a workspace
    Stop(workspaces::WorkspaceRef),

    /// Stream workspace changes until interrupted
    Watch(watch::WatchArgs),

    /// Client configuration management
    Config(config::ConfigArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Console (human-readable, stderr) + rotating JSON file
    let filter = if cli.verbose {
        "devsync=debug,devsync_client=debug,devsync_config=debug,info"
    } else {
        "devsync=info,devsync_client=info,warn"
    };

    let log_dir = devsync_config::log_dir().unwrap_or_else(|| std::path::PathBuf::from("logs"));
    let file_appender = tracing_appender::rolling::daily(&log_dir, "devsync.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(tracing_subscriber::EnvFilter::new(
                    "devsync=trace,devsync_client=trace,devsync_config=trace,info",
                )),
        )
        .init();

    let ctx = commands::Context {
        context: cli.context,
        server: cli.server,
        json_output: cli.json,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::List(args) => workspaces::list(args, &ctx).await,
        Commands::Get(args) => workspaces::get(args, &ctx).await,
        Commands::Create(args) => workspaces::create(args, &ctx).await,
        Commands::Delete(args) => workspaces::delete(args, &ctx).await,
        Commands::Start(args) => workspaces::set_started(args, true, &ctx).await,
        Commands::Stop(args) => workspaces::set_started(args, false, &ctx).await,
        Commands::Watch(args) => watch::run(args, &ctx).await,
        Commands::Config(args) => config::run(args, &ctx).await,
    }
}
