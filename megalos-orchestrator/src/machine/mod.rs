//! Machine translation: one lab machine to one Deployment.
//!
//! ## Pipeline
//!
//! ```text
//! Machine ──► MachineSettings::replay ──► WorkloadSpec ──► Deployment
//!   options     (image, limits, eth,        (bootstrap      (wire format,
//!   interfaces   port, replicas, exec)       fragments)      submitted)
//! ```
//!
//! The pod gets two volumes: the lab-files ConfigMap (`hostlab`) and the
//! host's `/home` (`hosthome`). Extra interfaces are requested from Multus
//! through the networks annotation, in interface order.

pub mod bootstrap;
pub mod options;

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, instrument};

pub use bootstrap::{BootstrapScript, BootstrapStep};
pub use options::MachineSettings;

use crate::error::{MegalosError, Result};
use crate::link::LinkMap;
use crate::naming::{is_valid_resource_name, lab_files_name, to_resource_name, MAX_NAME_LEN};
use crate::resources::*;
use crate::types::{Lab, Machine, OrchestratorConfig};

/// Port the management service listens on inside every machine image.
pub const CONTAINER_PORT: u16 = 3000;

/// Host directory exposed to machines.
pub const HOSTHOME_PATH: &str = "/home";
/// Mount point of [`HOSTHOME_PATH`] inside the container.
pub const HOSTHOME_MOUNT: &str = "/hosthome";

/// Backend-neutral description of one machine's workload.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadSpec {
    /// Machine name as written in the lab
    pub machine: String,
    /// Resource name of the Deployment
    pub name: String,
    pub namespace: String,
    pub image: String,
    /// Qualified attachment references; index = interface number
    pub interfaces: Vec<String>,
    pub volume_mounts: Vec<VolumeMount>,
    pub volumes: Vec<Volume>,
    pub privileged: bool,
    pub port: Option<u16>,
    pub memory: Option<String>,
    pub bootstrap: BootstrapScript,
    pub replicas: u32,
    /// Applied to the Deployment and its pods, and used as the pod selector
    pub labels: BTreeMap<String, String>,
    pub node_selector: Option<String>,
    /// Container name
    pub container_name: String,
}

impl WorkloadSpec {
    /// Serialize into the Deployment submitted to the API server.
    pub fn to_deployment(&self) -> Deployment {
        let ports = self
            .port
            .map(|host_port| ContainerPort {
                name: Some(self.container_name.clone()),
                container_port: CONTAINER_PORT,
                host_port: Some(host_port),
                protocol: Some("TCP".to_string()),
            })
            .into_iter()
            .collect();

        let resources = self.memory.as_ref().map(|memory| {
            let mut limits = BTreeMap::new();
            limits.insert("memory".to_string(), memory.clone());
            ResourceRequirements { limits }
        });

        let container = Container {
            name: self.container_name.clone(),
            image: self.image.clone(),
            image_pull_policy: Some("IfNotPresent".to_string()),
            stdin: Some(true),
            lifecycle: Some(Lifecycle {
                post_start: Some(LifecycleHandler {
                    exec: ExecAction {
                        command: self.bootstrap.command(),
                    },
                }),
            }),
            ports,
            resources,
            volume_mounts: self.volume_mounts.clone(),
            security_context: Some(SecurityContext {
                privileged: self.privileged,
            }),
        };

        let mut node_selector = BTreeMap::new();
        if let Some(node) = &self.node_selector {
            node_selector.insert(HOSTNAME_LABEL.to_string(), node.clone());
        }

        let pod_spec = PodSpec {
            containers: vec![container],
            // Keep cluster DNS out of the emulated network.
            dns_policy: Some("None".to_string()),
            dns_config: Some(PodDnsConfig {
                nameservers: vec!["127.0.0.1".to_string()],
            }),
            volumes: self.volumes.clone(),
            node_selector,
            node_name: None,
        };

        let pod_metadata = ObjectMeta::new(format!("{}-pod", self.name))
            .with_labels(&self.labels)
            .with_annotation(NETWORKS_ANNOTATION, self.interfaces.join(", "))
            .with_zero_grace_period();

        let spec = DeploymentSpec {
            replicas: self.replicas,
            selector: LabelSelector {
                match_labels: self.labels.clone(),
            },
            template: PodTemplateSpec {
                metadata: pod_metadata,
                spec: pod_spec,
            },
        };

        let metadata = ObjectMeta::new(self.name.clone())
            .with_namespace(self.namespace.clone())
            .with_labels(&self.labels);
        Deployment::new(metadata, spec)
    }
}

/// Builds workload specs for machines.
pub struct MachineTranslator {
    config: Arc<OrchestratorConfig>,
}

impl MachineTranslator {
    pub fn new(config: Arc<OrchestratorConfig>) -> Self {
        Self { config }
    }

    /// Translate one machine of `lab` into its workload spec.
    #[instrument(skip(self, machine, lab, links), fields(machine = %machine.name, lab_hash = %lab.hash))]
    pub fn translate(
        &self,
        machine: &Machine,
        lab: &Lab,
        namespace: &str,
        links: &LinkMap,
    ) -> Result<WorkloadSpec> {
        validate_machine_name(&machine.name)?;
        let name = to_resource_name(&machine.name)?;
        let labels = self.config.machine_labels(&name);
        validate_labels(&labels)?;
        let settings = MachineSettings::replay(machine, links, &self.config)?;

        let volume_mounts = vec![
            VolumeMount {
                name: "hostlab".to_string(),
                mount_path: bootstrap::HOSTLAB_MOUNT.to_string(),
            },
            VolumeMount {
                name: "hosthome".to_string(),
                mount_path: HOSTHOME_MOUNT.to_string(),
            },
        ];
        let volumes = vec![
            Volume {
                name: "hostlab".to_string(),
                config_map: Some(ConfigMapVolumeSource {
                    name: lab_files_name(namespace),
                }),
                host_path: None,
            },
            Volume {
                name: "hosthome".to_string(),
                config_map: None,
                host_path: Some(HostPathVolumeSource {
                    path: HOSTHOME_PATH.to_string(),
                }),
            },
        ];

        debug!(
            image = %settings.image,
            interfaces = settings.interfaces.len(),
            replicas = settings.replicas,
            "Machine translated"
        );

        Ok(WorkloadSpec {
            machine: machine.name.clone(),
            labels,
            name,
            namespace: namespace.to_string(),
            image: settings.image,
            interfaces: settings.interfaces,
            volume_mounts,
            volumes,
            privileged: self.config.privileged,
            port: settings.port,
            memory: settings.memory,
            bootstrap: BootstrapScript::for_machine(&machine.name, &settings.exec_commands),
            replicas: settings.replicas,
            node_selector: settings.node_selector,
            container_name: self.config.platform_name.clone(),
        })
    }
}

/// Machine names are spliced into the bootstrap script unquoted, so only
/// filename-safe characters are accepted.
fn validate_machine_name(name: &str) -> Result<()> {
    let safe = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if safe {
        Ok(())
    } else {
        Err(MegalosError::InvalidName(format!(
            "machine name '{}' may only contain letters, digits, '-', '_' and '.'",
            name
        )))
    }
}

/// Label values share the resource name grammar, including its length cap.
fn validate_labels(labels: &BTreeMap<String, String>) -> Result<()> {
    match labels.iter().find(|(_, value)| !is_valid_resource_name(value)) {
        None => Ok(()),
        Some((key, value)) => Err(MegalosError::InvalidName(format!(
            "label {}={} is not a valid label value (at most {} lowercase alphanumerics or '-')",
            key, value, MAX_NAME_LEN
        ))),
    }
}
