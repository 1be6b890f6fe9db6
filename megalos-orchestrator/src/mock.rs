//! Mock cluster backend for testing and development.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;
use tracing::{debug, info, instrument};

use crate::error::{MegalosError, Result};
use crate::resources::*;
use crate::traits::{BackendCapabilities, ClusterApi};

/// One recorded API call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiCall {
    pub verb: &'static str,
    pub kind: &'static str,
    pub namespace: Option<String>,
    pub name: String,
}

/// Mock cluster backend.
///
/// Keeps every object in memory and journals each mutating call so tests can
/// assert on ordering. Namespace deletion cascades like the real API server.
pub struct MockBackend {
    state: RwLock<MockState>,
    max_object_bytes: usize,
    machine_selection: bool,
}

#[derive(Default)]
struct MockState {
    namespaces: BTreeMap<String, Namespace>,
    config_maps: HashMap<(String, String), ConfigMap>,
    attachments: BTreeMap<(String, String), NetworkAttachmentDefinition>,
    deployments: BTreeMap<(String, String), Deployment>,
    journal: Vec<ApiCall>,
    failing_deployments: HashSet<String>,
    stalled_deployments: HashSet<String>,
    unavailable: bool,
}

impl MockBackend {
    /// Create a new mock backend.
    pub fn new() -> Self {
        info!("Creating mock cluster backend");
        Self {
            state: RwLock::new(MockState::default()),
            max_object_bytes: 1024 * 1024,
            machine_selection: false,
        }
    }

    /// Override the advertised object size ceiling.
    pub fn with_max_object_bytes(mut self, limit: usize) -> Self {
        self.max_object_bytes = limit;
        self
    }

    /// Advertise support for undeploying a subset of machines.
    pub fn with_machine_selection(mut self) -> Self {
        self.machine_selection = true;
        self
    }

    /// Drop every failure injected with [`fail_deployment`](Self::fail_deployment)
    /// or [`stall_deployment`](Self::stall_deployment).
    pub fn clear_failures(&self) {
        if let Ok(mut state) = self.state.write() {
            state.failing_deployments.clear();
            state.stalled_deployments.clear();
        }
    }

    /// Make `create_deployment` never answer for the given deployment name.
    pub fn stall_deployment(&self, name: &str) {
        if let Ok(mut state) = self.state.write() {
            state.stalled_deployments.insert(name.to_string());
        }
    }

    /// Make `create_deployment` fail for the given deployment name.
    pub fn fail_deployment(&self, name: &str) {
        if let Ok(mut state) = self.state.write() {
            state.failing_deployments.insert(name.to_string());
        }
    }

    /// Simulate a lost API server: every call fails with `BackendUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut state) = self.state.write() {
            state.unavailable = unavailable;
        }
    }

    /// Mutating calls received so far, in order.
    pub fn journal(&self) -> Vec<ApiCall> {
        self.state.read().map(|s| s.journal.clone()).unwrap_or_default()
    }

    pub fn namespace_exists(&self, name: &str) -> bool {
        self.state
            .read()
            .map(|s| s.namespaces.contains_key(name))
            .unwrap_or(false)
    }

    pub fn config_map(&self, namespace: &str, name: &str) -> Option<ConfigMap> {
        self.state
            .read()
            .ok()?
            .config_maps
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn deployment(&self, namespace: &str, name: &str) -> Option<Deployment> {
        self.state
            .read()
            .ok()?
            .deployments
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn deployment_count(&self) -> usize {
        self.state.read().map(|s| s.deployments.len()).unwrap_or(0)
    }

    pub fn attachment_count(&self) -> usize {
        self.state.read().map(|s| s.attachments.len()).unwrap_or(0)
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, MockState>> {
        let state = self
            .state
            .write()
            .map_err(|_| MegalosError::Internal("Lock poisoned".to_string()))?;
        if state.unavailable {
            return Err(MegalosError::BackendUnavailable(
                "mock API server is down".to_string(),
            ));
        }
        Ok(state)
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, MockState>> {
        let state = self
            .state
            .read()
            .map_err(|_| MegalosError::Internal("Lock poisoned".to_string()))?;
        if state.unavailable {
            return Err(MegalosError::BackendUnavailable(
                "mock API server is down".to_string(),
            ));
        }
        Ok(state)
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockState {
    fn record(&mut self, verb: &'static str, kind: &'static str, namespace: Option<&str>, name: &str) {
        self.journal.push(ApiCall {
            verb,
            kind,
            namespace: namespace.map(str::to_string),
            name: name.to_string(),
        });
    }

    fn require_namespace(&self, namespace: &str) -> Result<()> {
        if self.namespaces.contains_key(namespace) {
            Ok(())
        } else {
            Err(MegalosError::NotFound(format!("namespace {}", namespace)))
        }
    }
}

fn key(namespace: &str, name: &str) -> (String, String) {
    (namespace.to_string(), name.to_string())
}

fn parse_selector(selector: &str) -> BTreeMap<String, String> {
    selector
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

#[async_trait]
impl ClusterApi for MockBackend {
    async fn capabilities(&self) -> Result<BackendCapabilities> {
        Ok(BackendCapabilities {
            name: "mock".to_string(),
            supports_machine_selection: self.machine_selection,
            supports_user_scoped_wipe: false,
            max_object_bytes: self.max_object_bytes,
        })
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.read().is_ok())
    }

    async fn server_version(&self) -> Result<String> {
        let _state = self.read()?;
        Ok("mock-v1.0.0".to_string())
    }

    #[instrument(skip(self, namespace), fields(name = %namespace.metadata.name))]
    async fn create_namespace(&self, namespace: &Namespace) -> Result<()> {
        let mut state = self.write()?;
        let name = namespace.metadata.name.clone();
        state.record("create", "Namespace", None, &name);

        if state.namespaces.contains_key(&name) {
            return Err(MegalosError::AlreadyExists(format!("namespace {}", name)));
        }
        state.namespaces.insert(name, namespace.clone());
        debug!("Mock namespace created");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_namespace(&self, name: &str) -> Result<()> {
        let mut state = self.write()?;
        state.record("delete", "Namespace", None, name);

        if state.namespaces.remove(name).is_none() {
            return Err(MegalosError::NotFound(format!("namespace {}", name)));
        }
        state.config_maps.retain(|(ns, _), _| ns != name);
        state.attachments.retain(|(ns, _), _| ns != name);
        state.deployments.retain(|(ns, _), _| ns != name);
        debug!("Mock namespace deleted with its contents");
        Ok(())
    }

    async fn list_namespaces(&self, label_selector: &str) -> Result<Vec<Namespace>> {
        let state = self.read()?;
        let selector = parse_selector(label_selector);
        Ok(state
            .namespaces
            .values()
            .filter(|ns| labels_match(&ns.metadata.labels, &selector))
            .cloned()
            .collect())
    }

    async fn create_config_map(&self, namespace: &str, config_map: &ConfigMap) -> Result<()> {
        let mut state = self.write()?;
        let name = config_map.metadata.name.clone();
        state.record("create", "ConfigMap", Some(namespace), &name);
        state.require_namespace(namespace)?;

        if config_map.payload_len() > self.max_object_bytes {
            return Err(MegalosError::PayloadTooLarge {
                size: config_map.payload_len(),
                limit: self.max_object_bytes,
            });
        }
        let k = key(namespace, &name);
        if state.config_maps.contains_key(&k) {
            return Err(MegalosError::AlreadyExists(format!("configmap {}", name)));
        }
        state.config_maps.insert(k, config_map.clone());
        Ok(())
    }

    async fn replace_config_map(&self, namespace: &str, config_map: &ConfigMap) -> Result<()> {
        let mut state = self.write()?;
        let name = config_map.metadata.name.clone();
        state.record("replace", "ConfigMap", Some(namespace), &name);

        let k = key(namespace, &name);
        if !state.config_maps.contains_key(&k) {
            return Err(MegalosError::NotFound(format!("configmap {}", name)));
        }
        state.config_maps.insert(k, config_map.clone());
        Ok(())
    }

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.write()?;
        state.record("delete", "ConfigMap", Some(namespace), name);
        state
            .config_maps
            .remove(&key(namespace, name))
            .map(|_| ())
            .ok_or_else(|| MegalosError::NotFound(format!("configmap {}", name)))
    }

    async fn create_network_attachment(
        &self,
        namespace: &str,
        attachment: &NetworkAttachmentDefinition,
    ) -> Result<()> {
        let mut state = self.write()?;
        let name = attachment.metadata.name.clone();
        state.record("create", "NetworkAttachmentDefinition", Some(namespace), &name);
        state.require_namespace(namespace)?;

        let k = key(namespace, &name);
        if state.attachments.contains_key(&k) {
            return Err(MegalosError::AlreadyExists(format!("network attachment {}", name)));
        }
        state.attachments.insert(k, attachment.clone());
        Ok(())
    }

    async fn delete_network_attachment(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.write()?;
        state.record("delete", "NetworkAttachmentDefinition", Some(namespace), name);
        state
            .attachments
            .remove(&key(namespace, name))
            .map(|_| ())
            .ok_or_else(|| MegalosError::NotFound(format!("network attachment {}", name)))
    }

    async fn list_network_attachments(
        &self,
        namespace: &str,
    ) -> Result<Vec<NetworkAttachmentDefinition>> {
        let state = self.read()?;
        Ok(state
            .attachments
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, a)| a.clone())
            .collect())
    }

    #[instrument(skip(self, deployment), fields(name = %deployment.metadata.name))]
    async fn create_deployment(&self, namespace: &str, deployment: &Deployment) -> Result<()> {
        let name = deployment.metadata.name.clone();
        let stalled = self.read()?.stalled_deployments.contains(&name);
        if stalled {
            debug!(deployment = %name, "Mock deployment stalled");
            std::future::pending::<()>().await;
        }

        let mut state = self.write()?;
        state.record("create", "Deployment", Some(namespace), &name);
        state.require_namespace(namespace)?;

        if state.failing_deployments.contains(&name) {
            return Err(MegalosError::BackendUnavailable(format!(
                "injected failure for deployment {}",
                name
            )));
        }
        let k = key(namespace, &name);
        if state.deployments.contains_key(&k) {
            return Err(MegalosError::AlreadyExists(format!("deployment {}", name)));
        }

        let mut stored = deployment.clone();
        stored.status = Some(DeploymentStatus {
            replicas: Some(deployment.spec.replicas),
            ready_replicas: Some(deployment.spec.replicas),
        });
        state.deployments.insert(k, stored);
        debug!("Mock deployment created");
        Ok(())
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.write()?;
        state.record("delete", "Deployment", Some(namespace), name);
        state
            .deployments
            .remove(&key(namespace, name))
            .map(|_| ())
            .ok_or_else(|| MegalosError::NotFound(format!("deployment {}", name)))
    }

    async fn list_deployments(&self, namespace: &str, label_selector: &str) -> Result<Vec<Deployment>> {
        let state = self.read()?;
        let selector = parse_selector(label_selector);
        Ok(state
            .deployments
            .iter()
            .filter(|((ns, _), d)| ns == namespace && labels_match(&d.metadata.labels, &selector))
            .map(|(_, d)| d.clone())
            .collect())
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>> {
        let state = self.read()?;
        let selector = parse_selector(label_selector);

        // One running pod per replica, named like the ReplicaSet would.
        let mut pods = Vec::new();
        for ((ns, name), deployment) in &state.deployments {
            let template = &deployment.spec.template;
            if ns != namespace || !labels_match(&template.metadata.labels, &selector) {
                continue;
            }
            for replica in 0..deployment.spec.replicas {
                pods.push(Pod {
                    metadata: ObjectMeta::new(format!("{}-{}", name, replica))
                        .with_namespace(ns.clone())
                        .with_labels(&template.metadata.labels),
                    spec: Some(PodSpec {
                        node_name: Some("mock-node".to_string()),
                        ..Default::default()
                    }),
                    status: Some(PodStatus {
                        phase: Some("Running".to_string()),
                    }),
                });
            }
        }
        Ok(pods)
    }
}
