//! Subcommand execution and report output.

use anyhow::{Context, Result};
use tracing::info;

use megalos_orchestrator::{
    DeployReport, LabManager, MachineInfo, MachineOutcome, ResourceOutcome, UndeployReport,
};

use crate::cli::Command;
use crate::topology;

/// Run one subcommand. Returns `false` if any machine or resource failed.
pub async fn run(manager: &LabManager, command: Command) -> Result<bool> {
    match command {
        Command::Deploy { topology: path } => {
            let lab = topology::load(&path)?;
            info!(
                lab_hash = %lab.hash,
                machines = lab.machines.len(),
                links = lab.links.len(),
                "Topology loaded"
            );
            let report = manager.deploy(&lab).await.context("Deploy failed")?;
            print!("{}", render_deploy(&report));
            Ok(report.is_success())
        }
        Command::Undeploy { lab_hash, machines } => {
            let report = manager
                .undeploy(&lab_hash, &machines)
                .await
                .context("Undeploy failed")?;
            print!("{}", render_teardown(&report));
            Ok(report.is_success())
        }
        Command::Wipe { all } => {
            let report = manager.wipe(all).await.context("Wipe failed")?;
            print!("{}", render_teardown(&report));
            Ok(report.is_success())
        }
        Command::Info { lab_hash } => {
            let machines = manager.get_lab_info(&lab_hash).await.context("Info failed")?;
            print!("{}", render_info(&machines));
            Ok(true)
        }
        Command::Version => {
            let server = manager
                .release_version()
                .await
                .context("Failed to query the API server version")?;
            println!("megalos {}", env!("CARGO_PKG_VERSION"));
            println!("manager: {}", manager.formatted_manager_name());
            println!("server: {}", server);
            Ok(true)
        }
    }
}

fn render_deploy(report: &DeployReport) -> String {
    let mut out = format!(
        "Lab {} -> namespace {} ({:?})\n",
        report.lab_hash, report.namespace, report.state
    );
    for machine in &report.machines {
        let status = match &machine.outcome {
            MachineOutcome::Created => "created".to_string(),
            MachineOutcome::AlreadyPresent => "already present".to_string(),
            MachineOutcome::Failed(reason) => format!("FAILED: {}", reason),
        };
        out.push_str(&format!("  {:<20} {}\n", machine.machine, status));
    }
    let elapsed = report.finished_at - report.started_at;
    out.push_str(&format!(
        "{} machines, {} failed, {} ms\n",
        report.machines.len(),
        report.failures().count(),
        elapsed.num_milliseconds()
    ));
    out
}

fn render_teardown(report: &UndeployReport) -> String {
    if report.resources.is_empty() {
        return "Nothing to remove\n".to_string();
    }
    let mut out = String::new();
    for resource in &report.resources {
        let status = match &resource.outcome {
            ResourceOutcome::Deleted => "deleted".to_string(),
            ResourceOutcome::AlreadyAbsent => "already absent".to_string(),
            ResourceOutcome::Failed(reason) => format!("FAILED: {}", reason),
        };
        out.push_str(&format!(
            "  {:<18} {:<20} {}\n",
            format!("{:?}", resource.kind),
            resource.name,
            status
        ));
    }
    out.push_str(&format!("Lab state: {:?}\n", report.state));
    out
}

fn render_info(machines: &[MachineInfo]) -> String {
    if machines.is_empty() {
        return "No machines found\n".to_string();
    }
    let mut out = String::new();
    for machine in machines {
        out.push_str(&format!(
            "{} ({}/{} ready)\n",
            machine.name, machine.ready_replicas, machine.replicas
        ));
        for pod in &machine.pods {
            out.push_str(&format!(
                "  {:<32} {:<12} {}\n",
                pod.name,
                pod.phase.as_deref().unwrap_or("Unknown"),
                pod.node.as_deref().unwrap_or("-")
            ));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use megalos_orchestrator::{MockBackend, OrchestratorConfig};
    use std::sync::Arc;

    fn manager() -> LabManager {
        LabManager::new(Arc::new(MockBackend::new()), OrchestratorConfig::default())
    }

    fn write_topology(dir: &tempfile::TempDir) -> std::path::PathBuf {
        std::fs::create_dir(dir.path().join("lab")).unwrap();
        let file = dir.path().join("lab.yaml");
        std::fs::write(
            &file,
            "path: lab\nhash: feed\nmachines:\n  r1:\n    interfaces: [A]\n  r2:\n    interfaces: [A]\n",
        )
        .unwrap();
        file
    }

    #[tokio::test]
    async fn test_deploy_info_undeploy() {
        let dir = tempfile::tempdir().unwrap();
        let topology = write_topology(&dir);
        let manager = manager();

        assert!(run(&manager, Command::Deploy { topology }).await.unwrap());
        let info = manager.get_lab_info("feed").await.unwrap();
        assert_eq!(info.len(), 2);
        assert!(render_info(&info).contains("r1 (1/1 ready)"));

        assert!(run(
            &manager,
            Command::Undeploy {
                lab_hash: "feed".to_string(),
                machines: Vec::new(),
            }
        )
        .await
        .unwrap());
        assert!(manager.get_lab_info("feed").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_requests_are_errors() {
        let manager = manager();
        assert!(run(&manager, Command::Wipe { all: true }).await.is_err());
        assert!(run(
            &manager,
            Command::Undeploy {
                lab_hash: "feed".to_string(),
                machines: vec!["r1".to_string()],
            }
        )
        .await
        .is_err());
    }

    #[test]
    fn test_empty_teardown_report() {
        assert_eq!(render_teardown(&UndeployReport::default()), "Nothing to remove\n");
    }
}
