//! Namespace lifecycle: one isolation boundary per lab.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument};

use crate::error::Result;
use crate::naming::namespace_for;
use crate::resources::{selector_string, Namespace, ObjectMeta};
use crate::traits::{with_timeout, ClusterApi};
use crate::types::{Lab, OrchestratorConfig};

/// The namespace a lab's resources live in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceHandle {
    pub name: String,
    /// `false` when the namespace was already present
    pub created: bool,
}

/// Creates and removes lab namespaces.
pub struct NamespaceManager {
    api: Arc<dyn ClusterApi>,
    config: Arc<OrchestratorConfig>,
    timeout: Duration,
}

impl NamespaceManager {
    pub fn new(api: Arc<dyn ClusterApi>, config: Arc<OrchestratorConfig>) -> Self {
        let timeout = Duration::from_secs(config.api_timeout_secs);
        Self { api, config, timeout }
    }

    /// Ensure the lab's namespace exists. An existing namespace is success.
    #[instrument(skip(self, lab), fields(lab_hash = %lab.hash))]
    pub async fn ensure(&self, lab: &Lab) -> Result<NamespaceHandle> {
        let name = namespace_for(&lab.hash)?;
        let namespace = Namespace::new(
            ObjectMeta::new(name.clone()).with_labels(&self.config.platform_labels()),
        );

        match with_timeout("create namespace", self.timeout, self.api.create_namespace(&namespace)).await {
            Ok(()) => {
                info!(namespace = %name, "Namespace created");
                Ok(NamespaceHandle { name, created: true })
            }
            Err(e) if e.is_already_exists() => {
                debug!(namespace = %name, "Namespace already present");
                Ok(NamespaceHandle { name, created: false })
            }
            Err(e) => Err(e),
        }
    }

    /// Delete a lab's namespace and everything scoped inside it.
    ///
    /// Returns `false` if there was nothing to delete.
    #[instrument(skip(self))]
    pub async fn delete(&self, lab_hash: &str) -> Result<bool> {
        let name = namespace_for(lab_hash)?;
        self.delete_by_name(&name).await
    }

    pub(crate) async fn delete_by_name(&self, name: &str) -> Result<bool> {
        match with_timeout("delete namespace", self.timeout, self.api.delete_namespace(name)).await {
            Ok(()) => {
                info!(namespace = %name, "Namespace deleted");
                Ok(true)
            }
            Err(e) if e.is_not_found() => {
                debug!(namespace = %name, "Namespace already absent");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Names of every namespace owned by the platform.
    pub async fn list_platform_namespaces(&self) -> Result<Vec<String>> {
        let selector = selector_string(&self.config.platform_labels());
        let namespaces = with_timeout(
            "list namespaces",
            self.timeout,
            self.api.list_namespaces(&selector),
        )
        .await?;
        Ok(namespaces.into_iter().map(|ns| ns.metadata.name).collect())
    }
}
