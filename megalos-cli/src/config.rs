//! Configuration management for the megalos CLI.

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use megalos_orchestrator::OrchestratorConfig;

use crate::cli::Args;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/megalos/megalos.yaml";

/// Token mounted into pods running under a service account.
const SERVICE_ACCOUNT_TOKEN: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Cluster backend
    pub backend: BackendKind,
    /// API server connection (rest backend only)
    pub api_server: ApiServerConfig,
    /// Translation and orchestration settings
    pub orchestrator: OrchestratorConfig,
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(anyhow::anyhow!("Config file not found: {}", path.display()));
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| "Failed to parse config file")?;

        Ok(config)
    }

    /// Defaults with CLI overrides applied, for when no file is present.
    pub fn default_with_cli(args: &Args) -> Self {
        Self::default().with_cli_overrides(args)
    }

    /// Apply CLI argument overrides to the configuration.
    pub fn with_cli_overrides(mut self, args: &Args) -> Self {
        if let Some(backend) = args.backend {
            self.backend = backend;
        }

        if let Some(ref url) = args.api_server {
            self.api_server.url = url.clone();
        }

        if args.dry_run {
            self.backend = BackendKind::Print;
        }

        self
    }
}

/// Cluster backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-memory backend for testing/development
    Mock,
    /// Print resources instead of creating them
    Print,
    /// Kubernetes API server
    #[default]
    Rest,
}

/// Kubernetes API server connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiServerConfig {
    /// API server base URL
    pub url: String,
    /// Bearer token
    pub token: Option<String>,
    /// File to read the bearer token from
    pub token_path: Option<PathBuf>,
    /// Skip TLS certificate verification
    pub insecure_skip_tls_verify: bool,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            url: "https://kubernetes.default.svc".to_string(),
            token: None,
            token_path: None,
            insecure_skip_tls_verify: false,
        }
    }
}

impl ApiServerConfig {
    /// The bearer token: inline, then `token_path`, then the service
    /// account token if running in a pod.
    pub fn resolve_token(&self) -> Result<Option<String>> {
        if let Some(token) = &self.token {
            return Ok(Some(token.trim().to_string()));
        }

        let path = match &self.token_path {
            Some(path) => path.clone(),
            None => {
                let path = PathBuf::from(SERVICE_ACCOUNT_TOKEN);
                if !path.exists() {
                    return Ok(None);
                }
                path
            }
        };

        let token = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read token file: {}", path.display()))?;
        Ok(Some(token.trim().to_string()))
    }
}
