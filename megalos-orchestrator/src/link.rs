//! Link translation: lab links to Multus NetworkAttachmentDefinitions.
//!
//! Each link becomes one attachment in the lab namespace. Pods reference
//! attachments as `<namespace>/<attachment>` in their networks annotation, so
//! identically named links in two labs never collide.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use crate::error::{MegalosError, Result};
use crate::naming::{namespace_for, to_resource_name};
use crate::resources::{NetworkAttachmentDefinition, ObjectMeta};
use crate::traits::{with_timeout, ClusterApi};
use crate::types::{Lab, OrchestratorConfig, ResourceKind, ResourceOutcome, ResourceReport};

/// CNI plugin type consuming the attachments.
pub const CNI_PLUGIN: &str = "megalos";

/// Largest valid VXLAN network identifier.
const MAX_VNI: u32 = (1 << 24) - 1;

/// Lab link name → namespace-qualified attachment reference.
pub type LinkMap = BTreeMap<String, String>;

/// `<namespace>/<attachment>` reference used in pod annotations.
pub fn qualified_name(namespace: &str, attachment: &str) -> String {
    format!("{}/{}", namespace, attachment)
}

/// Deterministic VXLAN id for a link, in `1..=MAX_VNI`.
pub fn vxlan_id(namespace: &str, link: &str) -> u32 {
    let digest = Sha256::digest(format!("{}/{}", namespace, link).as_bytes());
    let raw = u32::from_be_bytes([0, digest[0], digest[1], digest[2]]);
    raw % MAX_VNI + 1
}

/// Build the attachment resource for one link.
pub fn build_attachment(
    namespace: &str,
    link: &str,
    config: &OrchestratorConfig,
) -> Result<NetworkAttachmentDefinition> {
    let name = to_resource_name(link)?;
    let cni_config = serde_json::json!({
        "cniVersion": "0.3.0",
        "name": name,
        "type": CNI_PLUGIN,
        "suffix": namespace.chars().take(6).collect::<String>(),
        "vlanId": vxlan_id(namespace, link),
    });

    let metadata = ObjectMeta::new(name)
        .with_namespace(namespace)
        .with_labels(&config.platform_labels())
        .with_annotation("megalos/link", link);
    Ok(NetworkAttachmentDefinition::new(metadata, cni_config.to_string()))
}

/// Creates and removes a lab's link attachments.
pub struct LinkTranslator {
    api: Arc<dyn ClusterApi>,
    config: Arc<OrchestratorConfig>,
    timeout: Duration,
}

impl LinkTranslator {
    pub fn new(api: Arc<dyn ClusterApi>, config: Arc<OrchestratorConfig>) -> Self {
        let timeout = Duration::from_secs(config.api_timeout_secs);
        Self { api, config, timeout }
    }

    /// Compute the link map without touching the backend.
    pub fn resolve(&self, lab: &Lab, namespace: &str) -> Result<LinkMap> {
        let mut map = LinkMap::new();
        let mut owners: BTreeMap<String, String> = BTreeMap::new();

        for link in lab.referenced_links() {
            let attachment = to_resource_name(&link)?;
            if let Some(other) = owners.insert(attachment.clone(), link.clone()) {
                return Err(MegalosError::InvalidName(format!(
                    "links '{}' and '{}' both map to attachment '{}'",
                    other, link, attachment
                )));
            }
            map.insert(link, qualified_name(namespace, &attachment));
        }
        Ok(map)
    }

    /// Create one attachment per link referenced in the lab.
    ///
    /// Attachments that already exist are kept as they are.
    #[instrument(skip(self, lab), fields(lab_hash = %lab.hash, namespace = %namespace))]
    pub async fn deploy_links(&self, lab: &Lab, namespace: &str) -> Result<LinkMap> {
        let map = self.resolve(lab, namespace)?;

        for link in map.keys() {
            let attachment = build_attachment(namespace, link, &self.config)?;
            let name = attachment.metadata.name.clone();

            match with_timeout(
                "create network attachment",
                self.timeout,
                self.api.create_network_attachment(namespace, &attachment),
            )
            .await
            {
                Ok(()) => debug!(link = %link, attachment = %name, "Link deployed"),
                Err(e) if e.is_already_exists() => {
                    debug!(link = %link, attachment = %name, "Link already present")
                }
                Err(e) => return Err(e),
            }
        }

        info!(count = map.len(), "Links ready");
        Ok(map)
    }

    /// Delete every attachment in the lab's namespace.
    #[instrument(skip(self))]
    pub async fn undeploy(&self, lab_hash: &str) -> Result<Vec<ResourceReport>> {
        let namespace = namespace_for(lab_hash)?;
        let attachments = match with_timeout(
            "list network attachments",
            self.timeout,
            self.api.list_network_attachments(&namespace),
        )
        .await
        {
            Ok(list) => list,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut reports = Vec::with_capacity(attachments.len());
        for attachment in attachments {
            let name = attachment.metadata.name;
            let outcome = match with_timeout(
                "delete network attachment",
                self.timeout,
                self.api.delete_network_attachment(&namespace, &name),
            )
            .await
            {
                Ok(()) => ResourceOutcome::Deleted,
                Err(e) if e.is_not_found() => ResourceOutcome::AlreadyAbsent,
                Err(e) => {
                    warn!(attachment = %name, error = %e, "Failed to delete link");
                    ResourceOutcome::Failed(e.to_string())
                }
            };
            reports.push(ResourceReport {
                kind: ResourceKind::NetworkAttachment,
                name,
                outcome,
            });
        }
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockBackend;
    use crate::resources::Namespace;

    async fn setup() -> (Arc<MockBackend>, LinkTranslator) {
        let backend = Arc::new(MockBackend::new());
        backend
            .create_namespace(&Namespace::new(ObjectMeta::new("lab1")))
            .await
            .unwrap();
        let translator = LinkTranslator::new(backend.clone(), Arc::new(OrchestratorConfig::default()));
        (backend, translator)
    }

    fn two_machine_lab() -> Lab {
        let mut lab = Lab::new("lab1", "/tmp/lab");
        lab.connect("pc1", "A");
        lab.connect("pc2", "A");
        lab.connect("pc2", "B");
        lab
    }

    #[tokio::test]
    async fn test_deploy_links_creates_one_attachment_per_link() {
        let (backend, translator) = setup().await;
        let map = translator.deploy_links(&two_machine_lab(), "lab1").await.unwrap();

        assert_eq!(map.len(), 2);
        assert_eq!(map["A"], "lab1/a");
        assert_eq!(map["B"], "lab1/b");
        assert_eq!(backend.attachment_count(), 2);
    }

    #[tokio::test]
    async fn test_deploy_links_is_idempotent() {
        let (backend, translator) = setup().await;
        let lab = two_machine_lab();

        translator.deploy_links(&lab, "lab1").await.unwrap();
        translator.deploy_links(&lab, "lab1").await.unwrap();
        assert_eq!(backend.attachment_count(), 2);
    }

    #[tokio::test]
    async fn test_undeploy_removes_attachments() {
        let (backend, translator) = setup().await;
        translator.deploy_links(&two_machine_lab(), "lab1").await.unwrap();

        let reports = translator.undeploy("LAB1").await.unwrap();
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.outcome == ResourceOutcome::Deleted));
        assert_eq!(backend.attachment_count(), 0);
    }

    #[test]
    fn test_colliding_link_names_are_rejected() {
        let backend = Arc::new(MockBackend::new());
        let translator = LinkTranslator::new(backend, Arc::new(OrchestratorConfig::default()));
        let mut lab = Lab::new("lab1", "/tmp/lab");
        lab.connect("pc1", "net_a");
        lab.connect("pc2", "net.a");

        assert!(matches!(
            translator.resolve(&lab, "lab1"),
            Err(MegalosError::InvalidName(_))
        ));
    }

    #[test]
    fn test_attachment_config() {
        let nad = build_attachment("lab1", "A", &OrchestratorConfig::default()).unwrap();
        let config: serde_json::Value = serde_json::from_str(&nad.spec.config).unwrap();

        assert_eq!(config["type"], CNI_PLUGIN);
        assert_eq!(config["name"], "a");
        assert_eq!(config["vlanId"], vxlan_id("lab1", "A"));
    }

    #[test]
    fn test_vxlan_id_range_and_stability() {
        let id = vxlan_id("lab1", "A");
        assert!(id >= 1 && id <= MAX_VNI);
        assert_eq!(id, vxlan_id("lab1", "A"));
        assert_ne!(vxlan_id("lab1", "A"), vxlan_id("lab2", "A"));
    }
}
