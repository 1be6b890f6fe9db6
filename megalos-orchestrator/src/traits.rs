//! Core backend abstraction trait.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{MegalosError, Result};
use crate::resources::*;

/// Capabilities supported by a cluster backend.
#[derive(Debug, Clone)]
pub struct BackendCapabilities {
    /// Name of the backend (e.g., "kubernetes", "mock")
    pub name: String,
    /// Can tear down a subset of a lab's machines
    pub supports_machine_selection: bool,
    /// Can scope a wipe to the resources of a single user
    pub supports_user_scoped_wipe: bool,
    /// Largest object the backend stores, in bytes
    pub max_object_bytes: usize,
}

/// Cluster API abstraction.
///
/// The orchestrator only depends on these create/delete/list verbs. Every
/// implementation must map conflicts to `MegalosError::AlreadyExists` and
/// missing objects to `MegalosError::NotFound` so the idempotent paths work
/// regardless of the transport.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    // =========================================================================
    // Capabilities & Health
    // =========================================================================

    /// Get backend capabilities.
    async fn capabilities(&self) -> Result<BackendCapabilities>;

    /// Check if the backend is reachable.
    async fn health_check(&self) -> Result<bool>;

    /// Version string reported by the API server.
    async fn server_version(&self) -> Result<String>;

    // =========================================================================
    // Namespaces
    // =========================================================================

    async fn create_namespace(&self, namespace: &Namespace) -> Result<()>;

    /// Delete a namespace and, transitively, everything inside it.
    async fn delete_namespace(&self, name: &str) -> Result<()>;

    /// List namespaces whose labels match the `key=value,...` selector.
    async fn list_namespaces(&self, label_selector: &str) -> Result<Vec<Namespace>>;

    // =========================================================================
    // ConfigMaps
    // =========================================================================

    async fn create_config_map(&self, namespace: &str, config_map: &ConfigMap) -> Result<()>;

    /// Overwrite an existing ConfigMap.
    async fn replace_config_map(&self, namespace: &str, config_map: &ConfigMap) -> Result<()>;

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<()>;

    // =========================================================================
    // Network attachments
    // =========================================================================

    async fn create_network_attachment(
        &self,
        namespace: &str,
        attachment: &NetworkAttachmentDefinition,
    ) -> Result<()>;

    async fn delete_network_attachment(&self, namespace: &str, name: &str) -> Result<()>;

    async fn list_network_attachments(
        &self,
        namespace: &str,
    ) -> Result<Vec<NetworkAttachmentDefinition>>;

    // =========================================================================
    // Workloads
    // =========================================================================

    async fn create_deployment(&self, namespace: &str, deployment: &Deployment) -> Result<()>;

    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<()>;

    async fn list_deployments(&self, namespace: &str, label_selector: &str)
        -> Result<Vec<Deployment>>;

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>>;
}

/// Run one backend call, failing with `MegalosError::Timeout` if it does not
/// finish within `limit`.
pub async fn with_timeout<T, F>(operation: &str, limit: Duration, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(MegalosError::Timeout {
            operation: operation.to_string(),
            secs: limit.as_secs(),
        }),
    }
}
