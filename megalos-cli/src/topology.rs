//! Lab topology files.
//!
//! ```yaml
//! path: ./bgp-lab          # lab root, relative to this file
//! hash: 5d41402abc4b2a76   # optional, derived from the root path if absent
//! machines:
//!   r1:
//!     interfaces: [A, B]
//!     options:
//!       - [image, frr]
//!       - [port, 8080]
//!   r2:
//!     interfaces: [A]
//! ```
//!
//! Machines keep the order they are written in.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_yaml::{Mapping, Value};

use megalos_orchestrator::Lab;

#[derive(Debug, Deserialize)]
struct TopologyFile {
    path: PathBuf,
    #[serde(default)]
    hash: Option<String>,
    #[serde(default)]
    machines: Mapping,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MachineEntry {
    interfaces: Vec<String>,
    options: Vec<(String, Value)>,
}

/// Load the topology file at `path`.
pub fn load(path: &Path) -> Result<Lab> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read topology file: {}", path.display()))?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    parse(&content, base)
}

/// Parse a topology document; a relative lab root is resolved against `base`.
pub fn parse(content: &str, base: &Path) -> Result<Lab> {
    let file: TopologyFile =
        serde_yaml::from_str(content).context("Failed to parse topology file")?;

    let root = if file.path.is_absolute() {
        file.path
    } else {
        base.join(file.path)
    };

    let mut lab = match file.hash {
        Some(hash) => Lab::new(hash, root),
        None => Lab::from_path(&root)
            .with_context(|| format!("Failed to resolve lab root: {}", root.display()))?,
    };

    for (name, entry) in file.machines {
        let Some(name) = name.as_str().map(str::to_string) else {
            bail!("Machine names must be strings, got {:?}", name);
        };
        let entry: MachineEntry = if entry.is_null() {
            MachineEntry::default()
        } else {
            serde_yaml::from_value(entry)
                .with_context(|| format!("Invalid definition for machine '{}'", name))?
        };

        // Register machines without interfaces too.
        lab.machine_mut(&name);
        for link in &entry.interfaces {
            lab.connect(&name, link);
        }
        for (key, value) in entry.options {
            let value = scalar_to_string(&value)
                .with_context(|| format!("Option '{}' of machine '{}'", key, name))?;
            lab.add_option(&name, key, value);
        }
    }

    Ok(lab)
}

fn scalar_to_string(value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => bail!("option values must be scalars, got {:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOPOLOGY: &str = r#"
path: lab
hash: ABC123
machines:
  r2:
    interfaces: [A, B]
    options:
      - [image, frr]
      - [port, 8080]
      - [exec, "echo hi"]
  r1:
    interfaces: [A]
  pc:
"#;

    #[test]
    fn test_parse_keeps_machine_order() {
        let lab = parse(TOPOLOGY, Path::new("/labs")).unwrap();

        assert_eq!(lab.hash, "ABC123");
        assert_eq!(lab.path, PathBuf::from("/labs/lab"));
        let names: Vec<&str> = lab.machines.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["r2", "r1", "pc"]);
        assert_eq!(lab.links.len(), 2);

        let r2 = lab.machine("r2").unwrap();
        assert_eq!(r2.interfaces, vec!["A", "B"]);
        assert_eq!(r2.options[1].key, "port");
        assert_eq!(r2.options[1].value, "8080");
        assert!(lab.machine("pc").unwrap().interfaces.is_empty());
    }

    #[test]
    fn test_hash_is_derived_from_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("lab")).unwrap();
        let file = dir.path().join("lab.yaml");
        std::fs::write(&file, "path: lab\nmachines:\n  r1:\n    interfaces: [A]\n").unwrap();

        let lab = load(&file).unwrap();
        assert_eq!(lab.hash.len(), 32);
        assert_eq!(lab.machines.len(), 1);
    }

    #[test]
    fn test_non_scalar_option_is_rejected() {
        let doc = "path: /lab\nhash: x\nmachines:\n  r1:\n    options:\n      - [image, [a, b]]\n";
        assert!(parse(doc, Path::new("/")).is_err());
    }
}
