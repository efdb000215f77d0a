//! stagecraft - staged deployment and upgrade orchestrator CLI.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod commands;

/// stagecraft - deterministic staged deployment orchestrator
#[derive(Parser, Debug)]
#[command(name = "stagecraft")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the orchestrator configuration file
    #[arg(short, long, default_value = "stagecraft.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run deployment stages
    Deploy(commands::deploy::DeployArgs),

    /// Upgrade a proxy's implementation
    Upgrade(commands::upgrade::UpgradeArgs),

    /// Show the latest deployment record and current pipeline position
    Status {
        /// Also probe component connectivity and write access
        #[arg(long)]
        check: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone()));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let mut config = stagecraft_core::OrchestratorConfig::from_file(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    config.apply_env();

    match cli.command {
        Commands::Deploy(args) => commands::deploy::run(&config, &args),
        Commands::Upgrade(args) => commands::upgrade::run(&config, &args),
        Commands::Status { check } => commands::status::run(&config, check),
    }
}
