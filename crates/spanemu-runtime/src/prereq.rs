use std::fmt;
use std::process::Command;

/// A missing prerequisite with actionable install instructions.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: &'static str,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

fn command_succeeds(program: &str, args: &[&str]) -> bool {
    Command::new(program)
        .args(args)
        .output()
        .is_ok_and(|o| o.status.success())
}

/// Check that a container CLI is installed and its engine answers.
/// Returns a list of missing items. Empty list means all prerequisites are met.
pub fn check_docker_prereqs() -> Vec<MissingPrereq> {
    let mut missing = Vec::new();

    let cli = ["docker", "podman"]
        .into_iter()
        .find(|c| command_succeeds(c, &["--version"]));

    match cli {
        None => missing.push(MissingPrereq {
            name: "container CLI",
            purpose: "starting the emulator container",
            install_hint: "install Docker Engine or Podman",
        }),
        Some(cli) => {
            if !command_succeeds(cli, &["info"]) {
                missing.push(MissingPrereq {
                    name: "container engine",
                    purpose: "running containers",
                    install_hint: "start the Docker daemon, or: systemctl --user start podman.socket",
                });
            }
        }
    }

    missing
}

/// Format a list of missing prerequisites into a user-friendly error message.
pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\nspanemu requires a container engine to start the Cloud Spanner emulator.");
    msg
}
