//! Lab topology model, orchestrator configuration and operation reports.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;

// =============================================================================
// LAB TOPOLOGY
// =============================================================================

/// A complete virtual network topology deployed as one unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lab {
    /// Content-derived identifier; lowercased before use as a namespace
    pub hash: String,
    /// Root directory holding `<machine>/` overlays and `<machine>.startup` scripts
    pub path: PathBuf,
    /// Machines in declaration order
    pub machines: Vec<Machine>,
    /// Links by name
    pub links: BTreeMap<String, Link>,
}

impl Lab {
    /// Create an empty lab with an explicit hash.
    pub fn new(hash: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            hash: hash.into(),
            path: path.into(),
            machines: Vec::new(),
            links: BTreeMap::new(),
        }
    }

    /// Create an empty lab whose hash is derived from its root path.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let canonical = path.canonicalize()?;
        let digest = Sha256::digest(canonical.to_string_lossy().as_bytes());
        let hash = hex::encode(digest)[..32].to_string();
        Ok(Self::new(hash, canonical))
    }

    /// Lowercase the hash in place, as the namespace alphabet requires.
    pub fn normalize_hash(&mut self) {
        self.hash = self.hash.to_lowercase();
    }

    /// Get a machine, creating it at the end of the list if absent.
    pub fn machine_mut(&mut self, name: &str) -> &mut Machine {
        let idx = match self.machines.iter().position(|m| m.name == name) {
            Some(idx) => idx,
            None => {
                self.machines.push(Machine::new(name));
                self.machines.len() - 1
            }
        };
        &mut self.machines[idx]
    }

    pub fn machine(&self, name: &str) -> Option<&Machine> {
        self.machines.iter().find(|m| m.name == name)
    }

    /// Append an interface on `machine` attached to `link`, registering both.
    pub fn connect(&mut self, machine: &str, link: &str) {
        self.links
            .entry(link.to_string())
            .or_insert_with(|| Link::new(link));
        self.machine_mut(machine).interfaces.push(link.to_string());
    }

    /// Record an option for `machine`, keeping declaration order.
    pub fn add_option(&mut self, machine: &str, key: impl Into<String>, value: impl Into<String>) {
        self.machine_mut(machine).options.push(MachineOption::new(key, value));
    }

    /// Every link name referenced by a machine interface or an `eth` option.
    ///
    /// `eth` options whose index does not parse are ignored by the machine
    /// translator, so their link is not referenced either.
    pub fn referenced_links(&self) -> BTreeSet<String> {
        let mut names: BTreeSet<String> = self.links.keys().cloned().collect();
        for machine in &self.machines {
            names.extend(machine.interfaces.iter().cloned());
            names.extend(
                machine
                    .options
                    .iter()
                    .filter(|o| o.key == "eth")
                    .filter_map(|o| o.value.split_once(':'))
                    .filter(|(index, _)| index.trim().parse::<usize>().is_ok())
                    .map(|(_, link)| link.trim().to_string()),
            );
        }
        names
    }
}

/// One emulated network node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Machine {
    /// Name, unique within the lab
    pub name: String,
    /// Link names; the index is the interface position (eth0, eth1, ...)
    #[serde(default)]
    pub interfaces: Vec<String>,
    /// Options in the order they were declared
    #[serde(default)]
    pub options: Vec<MachineOption>,
}

impl Machine {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            interfaces: Vec::new(),
            options: Vec::new(),
        }
    }
}

/// A single `key=value` machine option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineOption {
    pub key: String,
    pub value: String,
}

impl MachineOption {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A virtual collision domain shared by machine interfaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub name: String,
}

impl Link {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Tunables for translation and orchestration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Value of the `app` label and prefix of the `machine` label
    pub platform_name: String,
    /// Registry/organization prefix prepended to every image
    pub image_prefix: String,
    /// Image used when no image option is given
    pub default_image: String,
    /// Tag appended to images that carry none
    pub image_tag: String,
    /// Largest lab archive (base64 text) accepted in one ConfigMap
    pub max_blob_bytes: usize,
    /// Timeout applied to each backend call
    pub api_timeout_secs: u64,
    /// Machines submitted concurrently
    pub max_parallel_submissions: usize,
    /// Run machine containers privileged
    pub privileged: bool,
    /// Remove the namespace after undeploying a lab
    pub delete_namespace_on_undeploy: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            platform_name: "kathara".to_string(),
            image_prefix: "kathara/".to_string(),
            default_image: "quagga".to_string(),
            image_tag: "latest".to_string(),
            max_blob_bytes: 1024 * 1024,
            api_timeout_secs: 30,
            max_parallel_submissions: 4,
            privileged: true,
            delete_namespace_on_undeploy: true,
        }
    }
}

impl OrchestratorConfig {
    /// Labels carried by every platform resource.
    pub fn platform_labels(&self) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert("app".to_string(), self.platform_name.clone());
        labels
    }

    /// Full label set identifying one machine's workload.
    pub fn machine_labels(&self, machine_name: &str) -> BTreeMap<String, String> {
        let mut labels = self.platform_labels();
        labels.insert(
            "machine".to_string(),
            format!("{}-{}", self.platform_name, machine_name),
        );
        labels
    }
}

// =============================================================================
// LIFECYCLE STATE & REPORTS
// =============================================================================

/// Deployment progress of a lab.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LabState {
    #[default]
    Undeployed,
    Namespaced,
    LinksReady,
    MachinesSubmitting,
    Deployed,
    /// Teardown started but some resources could not be removed
    Undeploying,
}

/// Result of submitting one machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum MachineOutcome {
    Created,
    /// A workload with the same identity was already present
    AlreadyPresent,
    Failed(String),
}

impl MachineOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed(_))
    }
}

/// Per-machine entry of a deploy report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineReport {
    pub machine: String,
    pub outcome: MachineOutcome,
}

/// Summary of a deploy call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployReport {
    pub lab_hash: String,
    pub namespace: String,
    pub state: LabState,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// One entry per machine, in lab order
    pub machines: Vec<MachineReport>,
}

impl DeployReport {
    pub fn failures(&self) -> impl Iterator<Item = &MachineReport> {
        self.machines.iter().filter(|m| !m.outcome.is_success())
    }

    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }
}

/// Kinds of resources removed on teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Deployment,
    NetworkAttachment,
    ConfigMap,
    Namespace,
}

/// Result of deleting one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ResourceOutcome {
    Deleted,
    AlreadyAbsent,
    Failed(String),
}

/// Per-resource entry of a teardown report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceReport {
    pub kind: ResourceKind,
    pub name: String,
    pub outcome: ResourceOutcome,
}

/// Summary of an undeploy or wipe call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UndeployReport {
    /// State the lab is left in
    pub state: LabState,
    pub resources: Vec<ResourceReport>,
}

impl UndeployReport {
    /// Settle `state` from the collected outcomes.
    pub fn finish(&mut self) {
        self.state = if self.is_success() {
            LabState::Undeployed
        } else {
            LabState::Undeploying
        };
    }

    pub fn push(&mut self, kind: ResourceKind, name: impl Into<String>, outcome: ResourceOutcome) {
        self.resources.push(ResourceReport {
            kind,
            name: name.into(),
            outcome,
        });
    }

    pub fn failures(&self) -> impl Iterator<Item = &ResourceReport> {
        self.resources
            .iter()
            .filter(|r| matches!(r.outcome, ResourceOutcome::Failed(_)))
    }

    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }
}

/// Runtime view of one deployed machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineInfo {
    pub name: String,
    pub replicas: u32,
    pub ready_replicas: u32,
    pub pods: Vec<PodInfo>,
}

/// Runtime view of one machine pod.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodInfo {
    pub name: String,
    pub node: Option<String>,
    pub phase: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_registers_links_in_order() {
        let mut lab = Lab::new("ABC", "/tmp/lab");
        lab.connect("r1", "A");
        lab.connect("r1", "B");
        lab.connect("r2", "A");

        assert_eq!(lab.machines.len(), 2);
        assert_eq!(lab.machine("r1").unwrap().interfaces, vec!["A", "B"]);
        assert_eq!(lab.links.len(), 2);
    }

    #[test]
    fn test_referenced_links_include_eth_options() {
        let mut lab = Lab::new("abc", "/tmp/lab");
        lab.connect("r1", "A");
        lab.add_option("r1", "eth", "0:Z");

        let links = lab.referenced_links();
        assert!(links.contains("A"));
        assert!(links.contains("Z"));
    }

    #[test]
    fn test_referenced_links_skip_unparsable_eth_index() {
        let mut lab = Lab::new("abc", "/tmp/lab");
        lab.connect("r1", "A");
        lab.add_option("r1", "eth", "x:Z");
        lab.add_option("r1", "eth", " 2 :Y");

        let links = lab.referenced_links();
        assert!(!links.contains("Z"));
        assert!(links.contains("Y"));
    }

    #[test]
    fn test_undeploy_report_state() {
        let mut report = UndeployReport::default();
        assert_eq!(report.state, LabState::Undeployed);

        report.push(ResourceKind::Deployment, "r1", ResourceOutcome::Deleted);
        report.finish();
        assert_eq!(report.state, LabState::Undeployed);

        report.push(
            ResourceKind::Namespace,
            "abc",
            ResourceOutcome::Failed("forbidden".to_string()),
        );
        report.finish();
        assert_eq!(report.state, LabState::Undeploying);
    }

    #[test]
    fn test_from_path_hash_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let a = Lab::from_path(dir.path()).unwrap();
        let b = Lab::from_path(dir.path()).unwrap();
        assert_eq!(a.hash, b.hash);
        assert_eq!(a.hash.len(), 32);
    }

    #[test]
    fn test_normalize_hash() {
        let mut lab = Lab::new("AbCd", "/tmp/lab");
        lab.normalize_hash();
        assert_eq!(lab.hash, "abcd");
    }

    #[test]
    fn test_machine_labels() {
        let config = OrchestratorConfig::default();
        let labels = config.machine_labels("pc1");
        assert_eq!(labels.get("app").unwrap(), "kathara");
        assert_eq!(labels.get("machine").unwrap(), "kathara-pc1");
    }
}
