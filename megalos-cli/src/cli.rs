//! Command-line argument parsing.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::BackendKind;

/// Megalos - deploy network emulation labs on Kubernetes
#[derive(Parser, Debug)]
#[command(name = "megalos")]
#[command(about = "Megalos - deploy network emulation labs on Kubernetes")]
#[command(version)]
pub struct Args {
    /// Path to configuration file (optional, defaults used if not found)
    #[arg(short, long, global = true, env = "MEGALOS_CONFIG")]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, default_value = "info")]
    pub log_level: String,

    /// Log output format (pretty, json)
    #[arg(long, global = true, default_value = "pretty")]
    pub log_format: String,

    /// Cluster backend (mock, print, rest)
    #[arg(long, global = true, value_enum)]
    pub backend: Option<BackendKind>,

    /// Kubernetes API server URL
    #[arg(long, global = true, env = "MEGALOS_API_SERVER")]
    pub api_server: Option<String>,

    /// Print the resources that would be created instead of creating them
    #[arg(long, global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Deploy a lab described by a topology file
    Deploy {
        /// Topology file (YAML)
        topology: PathBuf,
    },

    /// Tear down a deployed lab
    Undeploy {
        /// Hash of the lab
        lab_hash: String,

        /// Only undeploy these machines
        #[arg(short, long = "machine")]
        machines: Vec<String>,
    },

    /// Remove every lab deployed by the platform
    Wipe {
        /// Include labs of all users
        #[arg(long)]
        all: bool,
    },

    /// Show the machines of a deployed lab
    Info {
        /// Hash of the lab
        lab_hash: String,
    },

    /// Show manager and API server versions
    Version,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_undeploy_with_machines() {
        let args = Args::parse_from([
            "megalos", "undeploy", "abc", "--machine", "r1", "-m", "r2", "--dry-run",
        ]);
        assert!(args.dry_run);
        match args.command {
            Command::Undeploy { lab_hash, machines } => {
                assert_eq!(lab_hash, "abc");
                assert_eq!(machines, vec!["r1", "r2"]);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_backend_flag() {
        let args = Args::parse_from(["megalos", "--backend", "mock", "wipe"]);
        assert_eq!(args.backend, Some(BackendKind::Mock));
        assert!(matches!(args.command, Command::Wipe { all: false }));
    }
}
