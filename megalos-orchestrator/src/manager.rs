//! Lifecycle orchestration of whole labs.
//!
//! ## Deploy order
//!
//! ```text
//! namespace ──► lab files ──► links ══► machines (bounded, parallel)
//!   (Namespaced)            (LinksReady)  (MachinesSubmitting ─► Deployed)
//! ```
//!
//! Everything left of `══►` is a prerequisite: a failure there aborts the
//! deploy. Machine submissions are independent and each one is reported.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tracing::{debug, info, instrument, warn};

use crate::error::{MegalosError, Result};
use crate::link::{LinkMap, LinkTranslator};
use crate::machine::MachineTranslator;
use crate::namespace::NamespaceManager;
use crate::naming::{lab_files_name, namespace_for, to_resource_name};
use crate::packager::{self, FilesystemPackager};
use crate::resources::selector_string;
use crate::traits::{with_timeout, BackendCapabilities, ClusterApi};
use crate::types::*;

/// Short name of this manager.
pub const MANAGER_NAME: &str = "kubernetes";
/// Display name of this manager.
pub const FORMATTED_MANAGER_NAME: &str = "Kubernetes (Megalos)";

/// Deploys, inspects and tears down labs on a cluster backend.
pub struct LabManager {
    api: Arc<dyn ClusterApi>,
    config: Arc<OrchestratorConfig>,
    timeout: Duration,
    namespaces: NamespaceManager,
    packager: FilesystemPackager,
    links: LinkTranslator,
    machines: MachineTranslator,
}

impl LabManager {
    /// Create a manager; every component shares the one backend handle.
    pub fn new(api: Arc<dyn ClusterApi>, config: OrchestratorConfig) -> Self {
        let config = Arc::new(config);
        let timeout = Duration::from_secs(config.api_timeout_secs);
        info!(
            platform = %config.platform_name,
            parallel = config.max_parallel_submissions,
            timeout_secs = config.api_timeout_secs,
            "Creating lab manager"
        );

        Self {
            namespaces: NamespaceManager::new(api.clone(), config.clone()),
            packager: FilesystemPackager::new(api.clone(), timeout, config.max_blob_bytes),
            links: LinkTranslator::new(api.clone(), config.clone()),
            machines: MachineTranslator::new(config.clone()),
            api,
            config,
            timeout,
        }
    }

    pub fn manager_name(&self) -> &'static str {
        MANAGER_NAME
    }

    pub fn formatted_manager_name(&self) -> &'static str {
        FORMATTED_MANAGER_NAME
    }

    pub async fn capabilities(&self) -> Result<BackendCapabilities> {
        with_timeout("capabilities", self.timeout, self.api.capabilities()).await
    }

    /// Version reported by the cluster's API server.
    pub async fn release_version(&self) -> Result<String> {
        with_timeout("server version", self.timeout, self.api.server_version()).await
    }

    /// Deploy a lab.
    ///
    /// Returns `Err` only when a prerequisite (namespace, lab files, links)
    /// fails. Machine failures are reported per machine in the returned
    /// report, in lab order. Deploying an already deployed lab is a no-op
    /// that reports every machine as already present.
    #[instrument(skip(self, lab), fields(lab_hash = %lab.hash, machines = lab.machines.len()))]
    pub async fn deploy(&self, lab: &Lab) -> Result<DeployReport> {
        let started_at = Utc::now();
        let mut lab = lab.clone();
        lab.normalize_hash();
        check_unique_machine_names(&lab)?;

        let namespace = self.namespaces.ensure(&lab).await?.name;
        let mut state = LabState::Namespaced;
        debug!(?state, namespace = %namespace, "Lab namespaced");

        let root = lab.path.clone();
        let archive = tokio::task::spawn_blocking(move || packager::package(&root))
            .await
            .map_err(|e| MegalosError::Internal(format!("packaging task failed: {}", e)))??;
        self.packager.publish(&namespace, &archive).await?;

        let links = self.links.deploy_links(&lab, &namespace).await?;
        state = LabState::LinksReady;
        debug!(?state, links = links.len(), "Lab links ready");

        state = LabState::MachinesSubmitting;
        let parallel = self.config.max_parallel_submissions.max(1);
        let mut outcomes: Vec<(usize, MachineReport)> = stream::iter(lab.machines.iter().enumerate())
            .map(|(index, machine)| {
                let lab = &lab;
                let namespace = namespace.as_str();
                let links = &links;
                async move {
                    let outcome = self.submit_machine(machine, lab, namespace, links).await;
                    let report = MachineReport {
                        machine: machine.name.clone(),
                        outcome,
                    };
                    (index, report)
                }
            })
            .buffer_unordered(parallel)
            .collect()
            .await;
        outcomes.sort_by_key(|(index, _)| *index);

        let machines: Vec<MachineReport> = outcomes.into_iter().map(|(_, report)| report).collect();
        let failed = machines.iter().filter(|m| !m.outcome.is_success()).count();
        if failed == 0 {
            state = LabState::Deployed;
        }

        info!(
            namespace = %namespace,
            machines = machines.len(),
            failed,
            ?state,
            "Lab deploy finished"
        );

        Ok(DeployReport {
            lab_hash: lab.hash,
            namespace,
            state,
            started_at,
            finished_at: Utc::now(),
            machines,
        })
    }

    async fn submit_machine(
        &self,
        machine: &Machine,
        lab: &Lab,
        namespace: &str,
        links: &LinkMap,
    ) -> MachineOutcome {
        let workload = match self.machines.translate(machine, lab, namespace, links) {
            Ok(workload) => workload,
            Err(e) => {
                warn!(machine = %machine.name, error = %e, "Machine translation failed");
                return MachineOutcome::Failed(e.to_string());
            }
        };
        let deployment = workload.to_deployment();

        match with_timeout(
            "create deployment",
            self.timeout,
            self.api.create_deployment(namespace, &deployment),
        )
        .await
        {
            Ok(()) => {
                info!(machine = %machine.name, image = %workload.image, "Machine deployed");
                MachineOutcome::Created
            }
            Err(e) if e.is_already_exists() => {
                debug!(machine = %machine.name, "Machine already present");
                MachineOutcome::AlreadyPresent
            }
            Err(e) => {
                warn!(machine = %machine.name, error = %e, "Machine submission failed");
                MachineOutcome::Failed(e.to_string())
            }
        }
    }

    /// Running labs cannot be changed in place.
    pub async fn update_lab(&self, lab: &Lab) -> Result<()> {
        debug!(lab_hash = %lab.hash, "Update requested");
        Err(MegalosError::NotSupported(
            "Unable to update a running lab".to_string(),
        ))
    }

    /// Tear down a lab.
    ///
    /// A non-empty `selection` restricts teardown to those machines, which
    /// is only accepted when the backend supports it; nothing is deleted
    /// otherwise. Each resource is attempted regardless of earlier failures.
    #[instrument(skip(self))]
    pub async fn undeploy(&self, lab_hash: &str, selection: &[String]) -> Result<UndeployReport> {
        let namespace = namespace_for(lab_hash)?;

        if !selection.is_empty() {
            let caps = self.capabilities().await?;
            if !caps.supports_machine_selection {
                return Err(MegalosError::NotSupported(format!(
                    "the {} backend can only undeploy whole labs",
                    caps.name
                )));
            }
            let names = selection
                .iter()
                .map(|name| to_resource_name(name))
                .collect::<Result<HashSet<_>>>()?;
            let mut report = UndeployReport::default();
            self.delete_deployments(&namespace, Some(&names), &mut report).await?;
            // The rest of the lab stays up.
            report.state = LabState::Deployed;
            info!(namespace = %namespace, removed = report.resources.len(), "Machines undeployed");
            return Ok(report);
        }

        let mut report = UndeployReport::default();
        self.delete_deployments(&namespace, None, &mut report).await?;
        report.resources.extend(self.links.undeploy(lab_hash).await?);

        if self.config.delete_namespace_on_undeploy {
            let outcome = self.delete_namespace_outcome(&namespace).await;
            report.push(ResourceKind::Namespace, namespace.clone(), outcome);
        } else {
            let name = lab_files_name(&namespace);
            let outcome = delete_outcome(
                with_timeout(
                    "delete configmap",
                    self.timeout,
                    self.api.delete_config_map(&namespace, &name),
                )
                .await,
            );
            report.push(ResourceKind::ConfigMap, name, outcome);
        }
        report.finish();

        info!(
            namespace = %namespace,
            resources = report.resources.len(),
            failed = report.failures().count(),
            state = ?report.state,
            "Lab undeployed"
        );
        Ok(report)
    }

    async fn delete_deployments(
        &self,
        namespace: &str,
        only: Option<&HashSet<String>>,
        report: &mut UndeployReport,
    ) -> Result<()> {
        let selector = selector_string(&self.config.platform_labels());
        let deployments = match with_timeout(
            "list deployments",
            self.timeout,
            self.api.list_deployments(namespace, &selector),
        )
        .await
        {
            Ok(list) => list,
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => return Err(e),
        };

        for deployment in deployments {
            let name = deployment.metadata.name;
            if only.is_some_and(|names| !names.contains(&name)) {
                continue;
            }
            let outcome = delete_outcome(
                with_timeout(
                    "delete deployment",
                    self.timeout,
                    self.api.delete_deployment(namespace, &name),
                )
                .await,
            );
            if let ResourceOutcome::Failed(reason) = &outcome {
                warn!(deployment = %name, reason = %reason, "Failed to delete machine");
            }
            report.push(ResourceKind::Deployment, name, outcome);
        }
        Ok(())
    }

    async fn delete_namespace_outcome(&self, namespace: &str) -> ResourceOutcome {
        match self.namespaces.delete_by_name(namespace).await {
            Ok(true) => ResourceOutcome::Deleted,
            Ok(false) => ResourceOutcome::AlreadyAbsent,
            Err(e) => {
                warn!(namespace = %namespace, error = %e, "Failed to delete namespace");
                ResourceOutcome::Failed(e.to_string())
            }
        }
    }

    /// Remove every lab owned by the platform.
    ///
    /// Namespace deletion cascades to everything inside. `all_users` asks
    /// for labs of other users too, which needs a backend that can tell
    /// users apart.
    #[instrument(skip(self))]
    pub async fn wipe(&self, all_users: bool) -> Result<UndeployReport> {
        if all_users {
            let caps = self.capabilities().await?;
            if !caps.supports_user_scoped_wipe {
                return Err(MegalosError::NotSupported(format!(
                    "the {} backend has no notion of users, cannot wipe all users",
                    caps.name
                )));
            }
        }

        let namespaces = self.namespaces.list_platform_namespaces().await?;
        let mut report = UndeployReport::default();
        for namespace in namespaces {
            let outcome = self.delete_namespace_outcome(&namespace).await;
            report.push(ResourceKind::Namespace, namespace, outcome);
        }
        report.finish();

        info!(namespaces = report.resources.len(), "Wipe finished");
        Ok(report)
    }

    /// Runtime status of every machine of a lab, sorted by name.
    #[instrument(skip(self))]
    pub async fn get_lab_info(&self, lab_hash: &str) -> Result<Vec<MachineInfo>> {
        let namespace = namespace_for(lab_hash)?;
        let selector = selector_string(&self.config.platform_labels());

        let deployments = with_timeout(
            "list deployments",
            self.timeout,
            self.api.list_deployments(&namespace, &selector),
        )
        .await?;
        let pods = with_timeout(
            "list pods",
            self.timeout,
            self.api.list_pods(&namespace, &selector),
        )
        .await?;

        let mut pods_by_machine: BTreeMap<String, Vec<PodInfo>> = BTreeMap::new();
        for pod in pods {
            let Some(machine) = pod.metadata.labels.get("machine").cloned() else {
                continue;
            };
            pods_by_machine.entry(machine).or_default().push(PodInfo {
                name: pod.metadata.name,
                node: pod.spec.and_then(|spec| spec.node_name),
                phase: pod.status.and_then(|status| status.phase),
            });
        }

        let mut infos: Vec<MachineInfo> = deployments
            .into_iter()
            .map(|deployment| {
                let pods = deployment
                    .metadata
                    .labels
                    .get("machine")
                    .and_then(|label| pods_by_machine.remove(label))
                    .unwrap_or_default();
                let status = deployment.status.unwrap_or_default();
                MachineInfo {
                    name: deployment.metadata.name,
                    replicas: status.replicas.unwrap_or(deployment.spec.replicas),
                    ready_replicas: status.ready_replicas.unwrap_or(0),
                    pods,
                }
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
    }
}

fn delete_outcome(result: Result<()>) -> ResourceOutcome {
    match result {
        Ok(()) => ResourceOutcome::Deleted,
        Err(e) if e.is_not_found() => ResourceOutcome::AlreadyAbsent,
        Err(e) => ResourceOutcome::Failed(e.to_string()),
    }
}

/// Two machines whose names sanitize to the same resource name would share
/// one Deployment.
fn check_unique_machine_names(lab: &Lab) -> Result<()> {
    let mut seen = BTreeSet::new();
    for machine in &lab.machines {
        // Unsanitizable names fail later, per machine.
        let Ok(name) = to_resource_name(&machine.name) else {
            continue;
        };
        if !seen.insert(name.clone()) {
            return Err(MegalosError::InvalidName(format!(
                "machine '{}' collides with another machine on resource name '{}'",
                machine.name, name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockBackend;
    use std::fs;

    fn lab_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("pc1.startup"), "ip link set eth0 up\n").unwrap();
        dir
    }

    fn lab(dir: &tempfile::TempDir) -> Lab {
        let mut lab = Lab::new("C0FFEE", dir.path());
        lab.connect("pc1", "A");
        lab.connect("pc2", "A");
        lab
    }

    fn manager(backend: Arc<MockBackend>) -> LabManager {
        LabManager::new(backend, OrchestratorConfig::default())
    }

    #[tokio::test]
    async fn test_deploy_reports_every_machine() {
        let dir = lab_dir();
        let backend = Arc::new(MockBackend::new());
        let report = manager(backend.clone()).deploy(&lab(&dir)).await.unwrap();

        assert_eq!(report.lab_hash, "c0ffee");
        assert_eq!(report.namespace, "c0ffee");
        assert_eq!(report.state, LabState::Deployed);
        assert!(report.is_success());
        assert_eq!(backend.deployment_count(), 2);
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_siblings() {
        let dir = lab_dir();
        let backend = Arc::new(MockBackend::new());
        backend.fail_deployment("pc1");

        let report = manager(backend.clone()).deploy(&lab(&dir)).await.unwrap();
        assert_eq!(report.state, LabState::MachinesSubmitting);
        assert!(matches!(report.machines[0].outcome, MachineOutcome::Failed(_)));
        assert_eq!(report.machines[1].outcome, MachineOutcome::Created);
        assert_eq!(backend.deployment_count(), 1);
    }

    #[tokio::test]
    async fn test_stalled_machine_times_out_alone() {
        let dir = lab_dir();
        let backend = Arc::new(MockBackend::new());
        backend.stall_deployment("pc1");
        let config = OrchestratorConfig {
            api_timeout_secs: 1,
            ..Default::default()
        };

        let report = LabManager::new(backend.clone(), config)
            .deploy(&lab(&dir))
            .await
            .unwrap();
        assert_eq!(report.state, LabState::MachinesSubmitting);
        match &report.machines[0].outcome {
            MachineOutcome::Failed(reason) => assert!(reason.contains("create deployment")),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(report.machines[1].outcome, MachineOutcome::Created);
        assert!(backend.deployment("c0ffee", "pc2").is_some());
    }

    #[tokio::test]
    async fn test_prerequisite_failure_aborts() {
        let dir = lab_dir();
        let backend = Arc::new(MockBackend::new());
        backend.set_unavailable(true);

        let err = manager(backend).deploy(&lab(&dir)).await.unwrap_err();
        assert!(matches!(err, MegalosError::BackendUnavailable(_)));
    }

    #[tokio::test]
    async fn test_colliding_machine_names_are_rejected() {
        let dir = lab_dir();
        let mut lab = lab(&dir);
        lab.connect("PC1", "A");

        let backend = Arc::new(MockBackend::new());
        let err = manager(backend.clone()).deploy(&lab).await.unwrap_err();
        assert!(matches!(err, MegalosError::InvalidName(_)));
        assert!(backend.journal().is_empty());
    }

    #[tokio::test]
    async fn test_undeploy_keeps_namespace_when_configured() {
        let dir = lab_dir();
        let backend = Arc::new(MockBackend::new());
        let config = OrchestratorConfig {
            delete_namespace_on_undeploy: false,
            ..Default::default()
        };
        let manager = LabManager::new(backend.clone(), config);
        manager.deploy(&lab(&dir)).await.unwrap();

        let report = manager.undeploy("c0ffee", &[]).await.unwrap();
        assert!(report.is_success());
        assert_eq!(report.state, LabState::Undeployed);
        assert!(backend.namespace_exists("c0ffee"));
        assert!(backend.config_map("c0ffee", "c0ffee-lab-files").is_none());
        assert_eq!(backend.deployment_count(), 0);
        assert_eq!(backend.attachment_count(), 0);
    }

    #[tokio::test]
    async fn test_selected_undeploy_on_capable_backend() {
        let dir = lab_dir();
        let backend = Arc::new(MockBackend::new().with_machine_selection());
        let manager = manager(backend.clone());
        manager.deploy(&lab(&dir)).await.unwrap();

        let report = manager.undeploy("c0ffee", &["pc2".to_string()]).await.unwrap();
        assert_eq!(report.resources.len(), 1);
        assert_eq!(report.resources[0].name, "pc2");
        assert_eq!(report.state, LabState::Deployed);
        assert!(backend.deployment("c0ffee", "pc1").is_some());
        assert!(backend.deployment("c0ffee", "pc2").is_none());
        assert_eq!(backend.attachment_count(), 1);
    }

    #[tokio::test]
    async fn test_update_is_not_supported() {
        let dir = lab_dir();
        let manager = manager(Arc::new(MockBackend::new()));
        assert!(matches!(
            manager.update_lab(&lab(&dir)).await,
            Err(MegalosError::NotSupported(_))
        ));
    }

    #[tokio::test]
    async fn test_lab_info() {
        let dir = lab_dir();
        let backend = Arc::new(MockBackend::new());
        let manager = manager(backend);
        let mut lab = lab(&dir);
        lab.add_option("pc2", "replicas", "2");
        manager.deploy(&lab).await.unwrap();

        let info = manager.get_lab_info("C0FFEE").await.unwrap();
        assert_eq!(info.len(), 2);
        assert_eq!(info[0].name, "pc1");
        assert_eq!(info[0].pods.len(), 1);
        assert_eq!(info[1].replicas, 2);
        assert_eq!(info[1].ready_replicas, 2);
        assert_eq!(info[1].pods.len(), 2);
        assert_eq!(info[1].pods[0].node.as_deref(), Some("mock-node"));
    }

    #[tokio::test]
    async fn test_names_and_version() {
        let manager = manager(Arc::new(MockBackend::new()));
        assert_eq!(manager.manager_name(), "kubernetes");
        assert_eq!(manager.formatted_manager_name(), "Kubernetes (Megalos)");
        assert_eq!(manager.release_version().await.unwrap(), "mock-v1.0.0");
    }
}
