//! # rps-match
//!
//! CLI tool for exercising the rps-match sync engine.
//!
//! ## Commands
//!
//! - `demo`: Play a scripted create/move/rematch session against a mock
//!   authority and print everything the session does
//! - `replay`: Feed a JSON-lines script of pulls, pushes, ticks and actions
//!   to an engine and print the resulting actions
//! - `config`: Print the effective configuration
//!
//! ## Example
//!
//! ```bash
//! # Watch a full match and rematch
//! rps-match demo
//!
//! # Replay a captured session
//! rps-match replay session.jsonl
//!
//! # Show the configuration in use
//! rps-match --config ./rps.toml config
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod config;

use commands::{demo, replay, show_config};
use config::Config;

/// CLI tool for exercising the rps-match sync engine.
#[derive(Parser, Debug)]
#[command(name = "rps-match")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (default: platform config dir, then built-in defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Play a scripted session against a mock authority
    Demo {
        /// Starting coin balance
        #[arg(long, default_value = "100")]
        coins: u64,

        /// Stake for the demo match
        #[arg(long, default_value = "10")]
        stake: u64,
    },

    /// Replay a JSON-lines script through the engine
    Replay {
        /// Script file, one step per line
        file: PathBuf,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Demo { coins, stake } => {
            demo::run(&config, coins, stake).await?;
        }
        Commands::Replay { file } => {
            replay::run_file(&file, &config)?;
        }
        Commands::Config => {
            show_config::run(&config)?;
        }
    }

    Ok(())
}

/// Install the log subscriber. Logs go to stderr so command output stays
/// machine-readable.
fn init_logging(default_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
