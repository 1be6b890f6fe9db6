//! Machine option replay.
//!
//! Options are applied strictly left to right onto a settings object: scalar
//! options are last-write-wins, `eth` inserts an interface at a position and
//! `exec` appends a command. Malformed numeric values are dropped, never
//! reported as errors.

use tracing::{debug, warn};

use crate::error::{MegalosError, Result};
use crate::link::LinkMap;
use crate::types::{Machine, OrchestratorConfig};

/// Structured result of replaying a machine's options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineSettings {
    /// Full image reference, tag included
    pub image: String,
    /// Hard memory ceiling (e.g. `512M`)
    pub memory: Option<String>,
    /// Host port mapped to the container's management port
    pub port: Option<u16>,
    pub replicas: u32,
    /// Hostname the pod must be scheduled on
    pub node_selector: Option<String>,
    /// Qualified attachment references; index = interface number
    pub interfaces: Vec<String>,
    /// Extra commands, unescaped, in declaration order
    pub exec_commands: Vec<String>,
}

impl MachineSettings {
    /// Replay `machine.options` over the defaults from `config`.
    pub fn replay(machine: &Machine, links: &LinkMap, config: &OrchestratorConfig) -> Result<Self> {
        let interfaces = machine
            .interfaces
            .iter()
            .map(|link| {
                links.get(link).cloned().ok_or_else(|| {
                    MegalosError::InvalidConfig(format!(
                        "machine '{}' references unknown link '{}'",
                        machine.name, link
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut settings = Self {
            image: image_reference(config, &config.default_image),
            memory: None,
            port: None,
            replicas: 1,
            node_selector: None,
            interfaces,
            exec_commands: Vec::new(),
        };

        for option in &machine.options {
            let value = option.value.as_str();
            match option.key.as_str() {
                "mem" | "M" => settings.memory = Some(value.trim().to_uppercase()),
                "image" | "i" | "model-fs" | "m" | "f" | "filesystem" => {
                    settings.image = image_reference(config, value.trim());
                }
                "eth" => settings.insert_interface(&machine.name, value, links),
                "bridged" => {
                    warn!(machine = %machine.name, "Option 'bridged' is not supported on Kubernetes, ignoring");
                }
                "e" | "exec" => settings.exec_commands.push(value.trim().to_string()),
                "port" => match value.trim().parse::<u16>() {
                    Ok(port) => settings.port = Some(port),
                    Err(_) => debug!(machine = %machine.name, value, "Ignoring invalid port"),
                },
                "replicas" => match value.trim().parse::<u32>() {
                    Ok(replicas) => settings.replicas = replicas,
                    Err(_) => debug!(machine = %machine.name, value, "Ignoring invalid replica count"),
                },
                "node" | "node_selector" => {
                    let node = value.trim();
                    if !node.is_empty() {
                        settings.node_selector = Some(node.to_string());
                    }
                }
                other => debug!(machine = %machine.name, option = other, "Ignoring unknown option"),
            }
        }

        Ok(settings)
    }

    /// Apply an `eth=<index>:<link>` option.
    ///
    /// The interface is inserted, shifting later ones; an index past the end
    /// lands at the end so the list never has gaps.
    fn insert_interface(&mut self, machine: &str, value: &str, links: &LinkMap) {
        let Some((index, link)) = value.split_once(':') else {
            debug!(machine, value, "Ignoring malformed eth option");
            return;
        };
        let Ok(index) = index.trim().parse::<usize>() else {
            debug!(machine, value, "Ignoring eth option with invalid index");
            return;
        };
        let Some(attachment) = links.get(link.trim()) else {
            warn!(machine, link = link.trim(), "Ignoring eth option for unknown link");
            return;
        };

        let index = index.min(self.interfaces.len());
        self.interfaces.insert(index, attachment.clone());
    }
}

/// `<prefix><image>:<tag>`; the tag is only added when `image` has none.
pub fn image_reference(config: &OrchestratorConfig, image: &str) -> String {
    let last_segment = image.rsplit('/').next().unwrap_or(image);
    if last_segment.contains(':') || last_segment.contains('@') {
        format!("{}{}", config.image_prefix, image)
    } else {
        format!("{}{}:{}", config.image_prefix, image, config.image_tag)
    }
}

/// Escape backslashes and both quote characters of an extra command.
pub fn shell_escape(command: &str) -> String {
    command
        .trim()
        .replace('\\', r"\\")
        .replace('"', r#"\""#)
        .replace('\'', r"\'")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MachineOption;

    fn links() -> LinkMap {
        let mut map = LinkMap::new();
        for name in ["A", "B", "C", "Z"] {
            map.insert(name.to_string(), format!("lab1/{}", name.to_lowercase()));
        }
        map
    }

    fn machine(options: &[(&str, &str)]) -> Machine {
        let mut m = Machine::new("r1");
        m.interfaces = vec!["A".to_string(), "B".to_string(), "C".to_string()];
        m.options = options
            .iter()
            .map(|(k, v)| MachineOption::new(*k, *v))
            .collect();
        m
    }

    fn replay(options: &[(&str, &str)]) -> MachineSettings {
        MachineSettings::replay(&machine(options), &links(), &OrchestratorConfig::default()).unwrap()
    }

    #[test]
    fn test_defaults() {
        let s = replay(&[]);
        assert_eq!(s.image, "kathara/quagga:latest");
        assert_eq!(s.replicas, 1);
        assert_eq!(s.memory, None);
        assert_eq!(s.port, None);
        assert_eq!(s.node_selector, None);
        assert_eq!(s.interfaces, vec!["lab1/a", "lab1/b", "lab1/c"]);
    }

    #[test]
    fn test_eth_inserts_and_preserves_order() {
        let s = replay(&[("eth", "1:Z")]);
        assert_eq!(s.interfaces, vec!["lab1/a", "lab1/z", "lab1/b", "lab1/c"]);
    }

    #[test]
    fn test_eth_past_the_end_appends() {
        let s = replay(&[("eth", "9:Z")]);
        assert_eq!(s.interfaces.len(), 4);
        assert_eq!(s.interfaces[3], "lab1/z");
    }

    #[test]
    fn test_eth_malformed_is_ignored() {
        let s = replay(&[("eth", "x:Z"), ("eth", "Z"), ("eth", "0:unknown")]);
        assert_eq!(s.interfaces, vec!["lab1/a", "lab1/b", "lab1/c"]);
    }

    #[test]
    fn test_last_image_wins() {
        let s = replay(&[("image", "frr"), ("i", "bind"), ("m", "sdn:v2")]);
        assert_eq!(s.image, "kathara/sdn:v2");
    }

    #[test]
    fn test_memory_is_uppercased() {
        let s = replay(&[("mem", "512m")]);
        assert_eq!(s.memory.as_deref(), Some("512M"));
    }

    #[test]
    fn test_invalid_numbers_are_ignored() {
        let s = replay(&[("port", "abc"), ("replicas", "-2")]);
        assert_eq!(s.port, None);
        assert_eq!(s.replicas, 1);

        let s = replay(&[("port", "8080"), ("replicas", "3")]);
        assert_eq!(s.port, Some(8080));
        assert_eq!(s.replicas, 3);
    }

    #[test]
    fn test_exec_and_node_selector() {
        let s = replay(&[("exec", " echo one "), ("e", "echo two"), ("node", "worker-2"), ("bridged", "true")]);
        assert_eq!(s.exec_commands, vec!["echo one", "echo two"]);
        assert_eq!(s.node_selector.as_deref(), Some("worker-2"));
    }

    #[test]
    fn test_unknown_interface_link_is_an_error() {
        let mut m = machine(&[]);
        m.interfaces.push("nope".to_string());
        let result = MachineSettings::replay(&m, &links(), &OrchestratorConfig::default());
        assert!(matches!(result, Err(MegalosError::InvalidConfig(_))));
    }

    #[test]
    fn test_shell_escape() {
        assert_eq!(shell_escape(r#"echo "a\b""#), r#"echo \"a\\b\""#);
        assert_eq!(shell_escape("echo 'x'"), r"echo \'x\'");
    }

    #[test]
    fn test_image_reference_keeps_existing_tag() {
        let config = OrchestratorConfig::default();
        assert_eq!(image_reference(&config, "frr"), "kathara/frr:latest");
        assert_eq!(image_reference(&config, "frr:8.4"), "kathara/frr:8.4");
        assert_eq!(image_reference(&config, "registry:5000/frr"), "kathara/registry:5000/frr:latest");
    }
}
