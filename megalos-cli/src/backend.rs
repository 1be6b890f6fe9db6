//! Backend selection and manager setup.

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

use megalos_orchestrator::{ClusterApi, LabManager, MockBackend, PrintBackend};

use crate::config::{BackendKind, Config};

/// Build the lab manager for the configured backend.
pub async fn connect(config: &Config) -> Result<LabManager> {
    let api: Arc<dyn ClusterApi> = match config.backend {
        BackendKind::Mock => {
            info!("Using mock cluster backend");
            Arc::new(MockBackend::new())
        }
        BackendKind::Print => {
            info!("Using print backend, nothing will be created");
            Arc::new(PrintBackend::new())
        }
        BackendKind::Rest => {
            #[cfg(feature = "rest")]
            {
                use megalos_orchestrator::{RestBackend, RestConfig};
                use std::time::Duration;

                let api_server = &config.api_server;
                let mut rest = RestConfig::new(api_server.url.clone());
                if let Some(token) = api_server.resolve_token()? {
                    rest = rest.with_token(token);
                }
                rest.insecure_skip_tls_verify = api_server.insecure_skip_tls_verify;
                rest.request_timeout = Duration::from_secs(config.orchestrator.api_timeout_secs);

                info!(url = %api_server.url, "Connecting to Kubernetes API server");
                Arc::new(RestBackend::new(rest)?)
            }
            #[cfg(not(feature = "rest"))]
            {
                warn!("API server backend requested but not compiled in, falling back to print");
                Arc::new(PrintBackend::new())
            }
        }
    };

    // Check backend health
    match api.health_check().await {
        Ok(true) => {
            if let Ok(caps) = api.capabilities().await {
                info!(
                    name = %caps.name,
                    machine_selection = caps.supports_machine_selection,
                    max_object_bytes = caps.max_object_bytes,
                    "Backend capabilities"
                );
            }
        }
        Ok(false) => warn!("Backend reports it is not ready"),
        Err(e) => warn!(error = %e, "Backend health check failed"),
    }

    Ok(LabManager::new(api, config.orchestrator.clone()))
}
