//! # megalos
//!
//! Deploys network emulation labs onto a Kubernetes cluster. Each lab gets
//! its own namespace; machines become Deployments and links become Multus
//! network attachments.
//!
//! ## Usage
//! ```bash
//! megalos deploy lab.yaml
//! megalos info 5d41402abc4b2a76
//! megalos undeploy 5d41402abc4b2a76
//! megalos --dry-run deploy lab.yaml
//! ```

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use megalos_common::LogFormat;

mod backend;
mod cli;
mod commands;
mod config;
mod topology;

use cli::Args;
use config::{Config, DEFAULT_CONFIG_PATH};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments
    let args = Args::parse();

    // Initialize logging
    let format: LogFormat = args.log_format.parse()?;
    megalos_common::init_logging_with_format(&args.log_level, format)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting megalos");

    // Load configuration
    let config = match &args.config {
        Some(config_path) => {
            // Explicit config file provided
            match Config::load(config_path) {
                Ok(cfg) => {
                    info!(config_path = %config_path, "Configuration loaded");
                    cfg.with_cli_overrides(&args)
                }
                Err(e) => {
                    error!(error = %e, path = %config_path, "Failed to load configuration");
                    return Err(e);
                }
            }
        }
        None => {
            // Try default location, fall back to CLI-only config
            match Config::load(DEFAULT_CONFIG_PATH) {
                Ok(cfg) => {
                    info!(config_path = %DEFAULT_CONFIG_PATH, "Configuration loaded from default location");
                    cfg.with_cli_overrides(&args)
                }
                Err(_) => {
                    info!("No config file found, using CLI arguments and defaults");
                    Config::default_with_cli(&args)
                }
            }
        }
    };

    info!(
        backend = ?config.backend,
        platform = %config.orchestrator.platform_name,
        "Megalos configured"
    );

    let manager = backend::connect(&config).await?;
    match commands::run(&manager, args.command).await {
        Ok(true) => Ok(ExitCode::SUCCESS),
        Ok(false) => {
            error!("Some machines or resources failed, see the report above");
            Ok(ExitCode::FAILURE)
        }
        Err(e) => {
            error!(error = %e, "Command failed");
            Err(e)
        }
    }
}
