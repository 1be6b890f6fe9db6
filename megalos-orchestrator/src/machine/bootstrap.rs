//! postStart bootstrap script.
//!
//! The script runs once the container has its volumes and interfaces. It
//! unpacks the lab archive, overlays the machine's directory onto `/`, runs
//! the machine's `.startup` file and any extra `exec` commands. Each step is
//! one fragment; conditional steps are guarded by their own `if` so a missing
//! overlay or startup file does not stop the steps after it.

use crate::machine::options::shell_escape;

/// Mount point of the lab-files ConfigMap.
pub const HOSTLAB_MOUNT: &str = "/tmp/kathara";
/// Directory the lab archive is extracted to.
pub const HOSTLAB_DIR: &str = "/hostlab";
/// Staging directory for the machine overlay.
pub const MACHINE_DATA_DIR: &str = "/machine_data";
/// Marker preventing a second run of the hook.
pub const SENTINEL_FILE: &str = "/tmp/post_start";
/// Output of the machine's startup script.
pub const STARTUP_OUTPUT: &str = "/tmp/startup_out";

/// One fragment of the bootstrap script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapStep {
    /// Exit if the hook already ran, otherwise leave the marker.
    Guard,
    /// Drop DNS server configuration shipped by the image.
    ClearDnsConfig,
    /// Decode and extract the lab archive into [`HOSTLAB_DIR`].
    ExtractLabFiles,
    /// Copy `<lab>/<machine>/` over the container root.
    ApplyOverlay { machine: String },
    /// Replace the live resolver configuration in place.
    PatchResolvConf,
    /// Directories routing and web images expect to be writable.
    FixPermissions,
    /// Run `<lab>/<machine>.startup` with output sent to a file.
    RunStartupScript { machine: String },
    /// Extra command from an `exec` option, escaped on render.
    Exec(String),
    /// Remove the overlay staging directory.
    RemoveOverlay,
}

impl BootstrapStep {
    /// Shell text of this fragment.
    pub fn render(&self) -> String {
        match self {
            Self::Guard => format!(
                "if [ -f \"{s}\" ]; then exit; else touch {s}; fi",
                s = SENTINEL_FILE
            ),
            Self::ClearDnsConfig => "rm -Rf /etc/bind/*".to_string(),
            Self::ExtractLabFiles => format!(
                "mkdir -p {dir}; base64 -d {mount}/hostlab.b64 > /hostlab.tar.gz; \
                 tar xzf /hostlab.tar.gz -C {dir}; rm -f /hostlab.tar.gz",
                dir = HOSTLAB_DIR,
                mount = HOSTLAB_MOUNT
            ),
            Self::ApplyOverlay { machine } => format!(
                "if [ -d \"{lab}/{m}\" ]; then mkdir -p {data}; cp -rp {lab}/{m}/* {data}; \
                 chmod -R 777 {data}/*; cp -rfp {data}/* /; fi",
                lab = HOSTLAB_DIR,
                m = machine,
                data = MACHINE_DATA_DIR
            ),
            // `cat >` keeps the inode the runtime bind-mounted.
            Self::PatchResolvConf => format!(
                "if [ -f \"{data}/etc/resolv.conf\" ]; then cat {data}/etc/resolv.conf > /etc/resolv.conf; \
                 else echo \"\" > /etc/resolv.conf; fi",
                data = MACHINE_DATA_DIR
            ),
            Self::FixPermissions => "mkdir -p /var/log/zebra; chmod -R 777 /var/log/quagga; \
                                     chmod -R 777 /var/log/zebra; chmod -R 777 /var/www/*"
                .to_string(),
            Self::RunStartupScript { machine } => format!(
                "if [ -f \"{lab}/{m}.startup\" ]; then cp {lab}/{m}.startup /; chmod u+x /{m}.startup; \
                 /{m}.startup &> {out}; rm /{m}.startup; fi",
                lab = HOSTLAB_DIR,
                m = machine,
                out = STARTUP_OUTPUT
            ),
            Self::Exec(command) => shell_escape(command),
            Self::RemoveOverlay => format!("rm -Rf {}", MACHINE_DATA_DIR),
        }
    }
}

/// Ordered bootstrap fragments for one machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapScript {
    steps: Vec<BootstrapStep>,
}

impl BootstrapScript {
    /// The standard sequence for `machine`, with `exec_commands` run after
    /// the startup script and before cleanup.
    pub fn for_machine(machine: &str, exec_commands: &[String]) -> Self {
        let mut steps = vec![
            BootstrapStep::Guard,
            BootstrapStep::ClearDnsConfig,
            BootstrapStep::ExtractLabFiles,
            BootstrapStep::ApplyOverlay { machine: machine.to_string() },
            BootstrapStep::PatchResolvConf,
            BootstrapStep::FixPermissions,
            BootstrapStep::RunStartupScript { machine: machine.to_string() },
        ];
        steps.extend(exec_commands.iter().cloned().map(BootstrapStep::Exec));
        steps.push(BootstrapStep::RemoveOverlay);
        Self { steps }
    }

    pub fn steps(&self) -> &[BootstrapStep] {
        &self.steps
    }

    /// Single shell line with every fragment joined by `; `.
    pub fn render(&self) -> String {
        self.steps
            .iter()
            .map(BootstrapStep::render)
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Exec command for the postStart hook.
    pub fn command(&self) -> Vec<String> {
        vec!["/bin/bash".to_string(), "-c".to_string(), self.render()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn test_step_order() {
        let script = BootstrapScript::for_machine("r1", &["echo hi".to_string()]);
        let steps = script.steps();

        assert_eq!(steps.first(), Some(&BootstrapStep::Guard));
        assert_eq!(steps.last(), Some(&BootstrapStep::RemoveOverlay));
        let startup = steps
            .iter()
            .position(|s| matches!(s, BootstrapStep::RunStartupScript { .. }))
            .unwrap();
        let exec = steps
            .iter()
            .position(|s| matches!(s, BootstrapStep::Exec(_)))
            .unwrap();
        assert!(startup < exec);
    }

    #[test]
    fn test_guard_fragment() {
        assert_eq!(
            BootstrapStep::Guard.render(),
            "if [ -f \"/tmp/post_start\" ]; then exit; else touch /tmp/post_start; fi"
        );
    }

    #[test]
    fn test_conditional_steps_are_guarded() {
        let overlay = BootstrapStep::ApplyOverlay { machine: "r1".to_string() }.render();
        assert!(overlay.starts_with("if [ -d \"/hostlab/r1\" ]"));
        assert!(overlay.ends_with("fi"));

        let startup = BootstrapStep::RunStartupScript { machine: "r1".to_string() }.render();
        assert!(startup.starts_with("if [ -f \"/hostlab/r1.startup\" ]"));
        assert!(startup.contains("/r1.startup &> /tmp/startup_out"));
        assert!(startup.ends_with("fi"));
    }

    #[test]
    fn test_resolv_conf_is_patched_in_place() {
        let patch = BootstrapStep::PatchResolvConf.render();
        assert!(patch.contains("cat /machine_data/etc/resolv.conf > /etc/resolv.conf"));
        assert!(patch.contains("echo \"\" > /etc/resolv.conf"));
    }

    #[test]
    fn test_exec_is_escaped_in_render() {
        let script = BootstrapScript::for_machine("r1", &[r#"echo "a\b""#.to_string()]);
        assert!(script.render().contains(r#"echo \"a\\b\"; rm -Rf /machine_data"#));
    }

    #[test]
    fn test_command_wraps_bash() {
        let command = BootstrapScript::for_machine("r1", &[]).command();
        assert_eq!(command[0], "/bin/bash");
        assert_eq!(command[1], "-c");
        assert!(command[2].contains("; "));
    }

    #[test]
    fn test_escaped_exec_does_not_end_the_shell_early() {
        if !std::path::Path::new("/bin/bash").exists() {
            return;
        }
        let fragment = BootstrapStep::Exec(r#"echo "q\x""#.to_string()).render();
        let output = Command::new("/bin/bash")
            .arg("-c")
            .arg(format!("{}; echo done", fragment))
            .output()
            .unwrap();

        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(output.status.success());
        assert!(stdout.contains("done"));
    }
}
