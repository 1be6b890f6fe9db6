//! # Megalos Orchestrator
//!
//! Deploys network emulation labs onto a Kubernetes cluster.
//!
//! A lab (machines, links, per-machine options and a directory of
//! configuration files) is translated into one namespace, one ConfigMap
//! carrying the lab files, one Multus network attachment per link and one
//! Deployment per machine.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                 LabManager                  │
//! │   (deploy, undeploy, wipe, get_lab_info)    │
//! └──┬──────────┬────────────┬─────────────┬────┘
//!    ▼          ▼            ▼             ▼
//! Namespace  Filesystem    Link         Machine
//! Manager    Packager      Translator   Translator
//!    └──────────┴─────┬──────┴─────────────┘
//!                     ▼
//!           ┌───────────────────┐
//!           │ ClusterApi trait  │
//!           └─────────┬─────────┘
//!       ┌─────────────┼──────────────┐
//!       ▼             ▼              ▼
//!  MockBackend   PrintBackend   RestBackend
//!  (in memory)   (dry run)      (API server)
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use megalos_orchestrator::{Lab, LabManager, MockBackend, OrchestratorConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let manager = LabManager::new(Arc::new(MockBackend::new()), OrchestratorConfig::default());
//!
//!     let mut lab = Lab::from_path("/home/user/labs/bgp").unwrap();
//!     lab.connect("r1", "A");
//!     lab.connect("r2", "A");
//!     lab.add_option("r1", "image", "frr");
//!
//!     let report = manager.deploy(&lab).await.unwrap();
//!     assert!(report.is_success());
//! }
//! ```

pub mod error;
pub mod link;
pub mod machine;
pub mod manager;
pub mod mock;
pub mod namespace;
pub mod naming;
pub mod packager;
pub mod print;
pub mod resources;
#[cfg(feature = "rest")]
pub mod rest;
pub mod traits;
pub mod types;

pub use error::{MegalosError, Result};
pub use link::{LinkMap, LinkTranslator};
pub use machine::{BootstrapScript, BootstrapStep, MachineSettings, MachineTranslator, WorkloadSpec};
pub use manager::LabManager;
pub use mock::MockBackend;
pub use namespace::{NamespaceHandle, NamespaceManager};
pub use packager::FilesystemPackager;
pub use print::PrintBackend;
#[cfg(feature = "rest")]
pub use rest::{RestBackend, RestConfig};
pub use traits::{BackendCapabilities, ClusterApi};
pub use types::*;
