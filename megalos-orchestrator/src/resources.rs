//! Kubernetes resource types emitted by the translators.
//!
//! Only the fields Megalos reads or writes are modeled. Everything serializes
//! in the API server's camelCase wire format.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Annotation read by Multus to attach extra interfaces to a pod.
pub const NETWORKS_ANNOTATION: &str = "k8s.v1.cni.cncf.io/networks";

/// Node label used for the optional placement constraint.
pub const HOSTNAME_LABEL: &str = "kubernetes.io/hostname";

// =============================================================================
// METADATA
// =============================================================================

/// Standard object metadata.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Resource name
    #[serde(default)]
    pub name: String,
    /// Owning namespace (unset for cluster-scoped objects)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Annotations
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Grace period applied when the object is deleted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_grace_period_seconds: Option<i64>,
}

impl ObjectMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_labels(mut self, labels: &BTreeMap<String, String>) -> Self {
        self.labels
            .extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Delete immediately instead of waiting for the default grace period.
    pub fn with_zero_grace_period(mut self) -> Self {
        self.deletion_grace_period_seconds = Some(0);
        self
    }
}

/// Envelope returned by list endpoints.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResourceList<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}

// =============================================================================
// NAMESPACE
// =============================================================================

/// Kubernetes Namespace.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Namespace {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    pub metadata: ObjectMeta,
}

impl Namespace {
    pub fn new(metadata: ObjectMeta) -> Self {
        Self {
            api_version: "v1".to_string(),
            kind: "Namespace".to_string(),
            metadata,
        }
    }
}

// =============================================================================
// CONFIGMAP
// =============================================================================

/// Kubernetes ConfigMap.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMap {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    pub metadata: ObjectMeta,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
}

impl ConfigMap {
    pub fn new(metadata: ObjectMeta) -> Self {
        Self {
            api_version: "v1".to_string(),
            kind: "ConfigMap".to_string(),
            metadata,
            data: BTreeMap::new(),
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Total size of the stored values in bytes.
    pub fn payload_len(&self) -> usize {
        self.data.iter().map(|(k, v)| k.len() + v.len()).sum()
    }
}

// =============================================================================
// NETWORK ATTACHMENT
// =============================================================================

/// Multus NetworkAttachmentDefinition (`k8s.cni.cncf.io/v1`).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkAttachmentDefinition {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: NetworkAttachmentSpec,
}

impl NetworkAttachmentDefinition {
    pub fn new(metadata: ObjectMeta, config: String) -> Self {
        Self {
            api_version: "k8s.cni.cncf.io/v1".to_string(),
            kind: "NetworkAttachmentDefinition".to_string(),
            metadata,
            spec: NetworkAttachmentSpec { config },
        }
    }
}

/// Attachment spec: the CNI configuration as a JSON string.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct NetworkAttachmentSpec {
    pub config: String,
}

// =============================================================================
// DEPLOYMENT
// =============================================================================

/// Kubernetes Deployment.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: DeploymentSpec,
    /// Populated by the server, never sent on create
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<DeploymentStatus>,
}

impl Deployment {
    pub fn new(metadata: ObjectMeta, spec: DeploymentSpec) -> Self {
        Self {
            api_version: "apps/v1".to_string(),
            kind: "Deployment".to_string(),
            metadata,
            spec,
            status: None,
        }
    }
}

/// Deployment spec.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSpec {
    pub replicas: u32,
    pub selector: LabelSelector,
    pub template: PodTemplateSpec,
}

/// Deployment status as reported by the server.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStatus {
    #[serde(default)]
    pub replicas: Option<u32>,
    #[serde(default)]
    pub ready_replicas: Option<u32>,
}

/// Label selector.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
}

/// Pod template.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PodTemplateSpec {
    pub metadata: ObjectMeta,
    pub spec: PodSpec,
}

// =============================================================================
// POD
// =============================================================================

/// Kubernetes Pod, as returned by list calls.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Pod {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<PodSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PodStatus>,
}

/// Pod status.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PodStatus {
    #[serde(default)]
    pub phase: Option<String>,
}

/// Pod spec.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    #[serde(default)]
    pub containers: Vec<Container>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_config: Option<PodDnsConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
    /// Node the pod was scheduled on (server-populated)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
}

/// Custom pod DNS configuration.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PodDnsConfig {
    #[serde(default)]
    pub nameservers: Vec<String>,
}

/// Container spec.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub name: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdin: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifecycle: Option<Lifecycle>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<ContainerPort>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_context: Option<SecurityContext>,
}

/// Container lifecycle hooks.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Lifecycle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_start: Option<LifecycleHandler>,
}

/// A lifecycle hook handler.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LifecycleHandler {
    pub exec: ExecAction,
}

/// Exec action.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ExecAction {
    pub command: Vec<String>,
}

/// Container port.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPort {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub container_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

/// Resource requirements.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ResourceRequirements {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, String>,
}

/// Container security context.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SecurityContext {
    #[serde(default)]
    pub privileged: bool,
}

/// Volume mount.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    pub name: String,
    pub mount_path: String,
}

/// Pod volume.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map: Option<ConfigMapVolumeSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_path: Option<HostPathVolumeSource>,
}

/// ConfigMap volume source.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ConfigMapVolumeSource {
    pub name: String,
}

/// Host path volume source.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct HostPathVolumeSource {
    pub path: String,
}

/// `key=value,key=value` form used in label selector queries.
pub fn selector_string(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// `true` when every selector label is present with the same value.
pub fn labels_match(labels: &BTreeMap<String, String>, selector: &BTreeMap<String, String>) -> bool {
    selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deployment_serializes_camel_case() {
        let mut labels = BTreeMap::new();
        labels.insert("app".to_string(), "kathara".to_string());

        let deployment = Deployment::new(
            ObjectMeta::new("r1").with_labels(&labels),
            DeploymentSpec {
                replicas: 1,
                selector: LabelSelector { match_labels: labels.clone() },
                template: PodTemplateSpec {
                    metadata: ObjectMeta::new("r1-pod").with_zero_grace_period(),
                    spec: PodSpec {
                        dns_policy: Some("None".to_string()),
                        ..Default::default()
                    },
                },
            },
        );

        let json = serde_json::to_value(&deployment).unwrap();
        assert_eq!(json["apiVersion"], "apps/v1");
        assert_eq!(json["spec"]["selector"]["matchLabels"]["app"], "kathara");
        assert_eq!(json["spec"]["template"]["metadata"]["deletionGracePeriodSeconds"], 0);
        assert_eq!(json["spec"]["template"]["spec"]["dnsPolicy"], "None");
        assert!(json.get("status").is_none());
    }

    #[test]
    fn test_pod_list_deserializes_partial_objects() {
        let body = r#"{"items":[{"metadata":{"name":"r1-abc","labels":{"machine":"kathara-r1"}},
            "spec":{"nodeName":"worker-1","containers":[]},"status":{"phase":"Running"}}]}"#;
        let list: ResourceList<Pod> = serde_json::from_str(body).unwrap();

        assert_eq!(list.items.len(), 1);
        let pod = &list.items[0];
        assert_eq!(pod.spec.as_ref().unwrap().node_name.as_deref(), Some("worker-1"));
        assert_eq!(pod.status.as_ref().unwrap().phase.as_deref(), Some("Running"));
    }

    #[test]
    fn test_selector_helpers() {
        let mut labels = BTreeMap::new();
        labels.insert("app".to_string(), "kathara".to_string());
        labels.insert("machine".to_string(), "kathara-pc1".to_string());

        assert_eq!(selector_string(&labels), "app=kathara,machine=kathara-pc1");

        let mut selector = BTreeMap::new();
        selector.insert("app".to_string(), "kathara".to_string());
        assert!(labels_match(&labels, &selector));

        selector.insert("machine".to_string(), "kathara-pc2".to_string());
        assert!(!labels_match(&labels, &selector));
    }
}
