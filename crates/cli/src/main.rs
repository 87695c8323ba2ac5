//! TaskForge CLI — the main entry point.
//!
//! Commands:
//! - `serve`     — Start the HTTP session surface
//! - `run`       — Execute a single goal and print the result
//! - `tools`     — Discover and list available tools
//! - `providers` — Show completion-provider availability

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use taskforge_config::AppConfig;

mod commands;

#[derive(Parser)]
#[command(
    name = "taskforge",
    about = "TaskForge — a task-execution agent over MCP tools",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the config file (default: ~/.taskforge/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP session surface
    Serve {
        /// Override the configured port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Execute a single goal and print the result
    Run {
        /// The natural-language goal
        goal: String,

        /// Completion provider to use (gemini, openai, anthropic)
        #[arg(short = 'P', long)]
        provider: Option<String>,
    },

    /// Discover and list available tools
    Tools,

    /// Show completion-provider availability
    Providers,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let mut config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { port } => {
            if let Some(port) = port {
                config.surface.port = port;
            }
            commands::serve::run(config).await
        }
        Commands::Run { goal, provider } => commands::run::run(config, goal, provider).await,
        Commands::Tools => commands::tools::run(config).await,
        Commands::Providers => commands::providers::run(config).await,
    }
}
