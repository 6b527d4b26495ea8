//! Pump.fun Radar - real-time detection and scoring of new pump.fun tokens
//!
//! Watches the chain through three redundant event sources, merges
//! market data from external providers and ranks every fresh token.
//! Detection only: nothing here signs or sends transactions.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;

// Use the library crate
use pumpfun_radar::cli::commands;
use pumpfun_radar::config::Config;

/// Pump.fun Radar - new token detection pipeline
#[derive(Parser)]
#[command(name = "radar")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "RADAR_JSON_LOGS")]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the detection pipeline until Ctrl+C
    Start {
        /// Stop after this many seconds
        #[arg(long)]
        duration_secs: Option<u64>,
    },

    /// Show current configuration (secrets masked)
    Config,

    /// Probe every RPC endpoint and market-data provider once
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("pumpfun_radar=info"));
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .init();
    }

    // Load configuration
    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    // Execute command
    let result = match cli.command {
        Commands::Start { duration_secs } => commands::start(&config, duration_secs).await,
        Commands::Config => commands::show_config(&config),
        Commands::Check => commands::check(&config).await,
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
