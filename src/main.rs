//! Exit Guard - emergency exit execution for Solana token positions
//!
//! # WARNING
//! - Delivery is best-effort: confirmation is raced against the market and
//!   on-chain inclusion is never guaranteed.
//! - A broadcast transaction cannot be retracted. Duplicate submissions are
//!   safe only because the network deduplicates by signature.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;

use exitguard::cli::commands;
use exitguard::config::Config;

/// Exit Guard - emergency exit execution pipeline
#[derive(Parser)]
#[command(name = "exitguard")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the execution pipeline
    Start {
        /// Run without broadcasting anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Check endpoint health
    Health,

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("exitguard=info".parse().unwrap()),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Execute command
    let result = match cli.command {
        Commands::Start { dry_run } => commands::start(&config, dry_run).await,
        Commands::Health => commands::health(&config).await,
        Commands::Config => commands::show_config(&config),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
