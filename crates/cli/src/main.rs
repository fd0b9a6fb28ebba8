//! Capture Coordinator CLI
//!
//! A command-line tool for checking capture configurations against device
//! capabilities, previewing thermal mitigation plans, and inspecting a
//! running coordinator.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{configuration, status, thermal};
use coordinator_lib::thermal::ThermalState;
use std::path::PathBuf;

/// Capture Coordinator CLI
#[derive(Parser)]
#[command(name = "capctl")]
#[command(author, version, about = "CLI for the Capture Coordinator", long_about = None)]
pub struct Cli {
    /// Coordinator API URL (can also be set via CAPCTL_API_URL env var)
    #[arg(long, env = "CAPCTL_API_URL")]
    pub api_url: Option<String>,

    /// Device capabilities file (JSON) for offline commands
    #[arg(long, env = "CAPCTL_CAPABILITIES")]
    pub capabilities: Option<PathBuf>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check a configuration file against the device capabilities
    Validate {
        /// Capture configuration file (JSON)
        file: PathBuf,
    },

    /// Print the closest supported configuration
    Fallback {
        /// Capture configuration file (JSON)
        file: PathBuf,
    },

    /// Estimate the resources each stream needs
    Estimate {
        /// Capture configuration file (JSON)
        file: PathBuf,
    },

    /// Show the mitigation plan for a thermal state (nominal, fair, serious, critical)
    Plan {
        #[arg(value_parser = parse_state)]
        state: ThermalState,
    },

    /// Push a thermal state into a running coordinator
    Signal {
        #[arg(value_parser = parse_state)]
        state: ThermalState,
    },

    /// Show the status of a running coordinator
    Status,
}

fn parse_state(s: &str) -> Result<ThermalState, String> {
    s.parse()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = config::Config::load()?;

    let capabilities_path = cli.capabilities.clone().or(settings.capabilities.clone());
    let api_url = settings.api_url(cli.api_url.as_deref());

    match cli.command {
        Commands::Validate { file } => {
            let caps = config::load_capabilities(capabilities_path.as_deref())?;
            configuration::validate_configuration(&file, &caps, cli.format)?;
        }
        Commands::Fallback { file } => {
            let caps = config::load_capabilities(capabilities_path.as_deref())?;
            configuration::show_fallback(&file, &caps, cli.format)?;
        }
        Commands::Estimate { file } => {
            configuration::show_estimate(&file, cli.format)?;
        }
        Commands::Plan { state } => {
            thermal::show_plan(state, cli.format)?;
        }
        Commands::Signal { state } => {
            let client = client::ApiClient::new(&api_url)?;
            thermal::signal(&client, state, cli.format).await?;
        }
        Commands::Status => {
            let client = client::ApiClient::new(&api_url)?;
            status::show_status(&client, cli.format).await?;
        }
    }

    Ok(())
}
