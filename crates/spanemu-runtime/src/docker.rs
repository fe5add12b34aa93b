use crate::backend::{ContainerRuntime, ContainerStatus, RunningContainer};
use crate::sink::LogSink;
use crate::RuntimeError;
use serde::Deserialize;
use spanemu_config::ContainerRequest;
use std::collections::BTreeMap;
use std::process::{Command, Output};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Environment variable selecting the container CLI (`docker` or `podman`).
pub const RUNTIME_ENV_VAR: &str = "SPANEMU_CONTAINER_RUNTIME";

const PUBLISH_HOST: &str = "127.0.0.1";
const READINESS_POLL: Duration = Duration::from_millis(250);

/// Drives the `docker` (or a compatible `podman`) command-line client.
pub struct DockerRuntime {
    program: String,
}

impl Default for DockerRuntime {
    fn default() -> Self {
        Self {
            program: find_runtime().unwrap_or_else(|| "docker".to_owned()),
        }
    }
}

impl DockerRuntime {
    /// Uses the first of `docker`, `podman` that answers `--version`.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Honours `SPANEMU_CONTAINER_RUNTIME`, falling back to [`DockerRuntime::new`].
    pub fn from_env() -> Self {
        match std::env::var(RUNTIME_ENV_VAR) {
            Ok(program) if !program.trim().is_empty() => Self::with_program(program.trim()),
            _ => Self::new(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn run(&self, args: &[String]) -> Result<Output, RuntimeError> {
        debug!("{} {}", self.program, args.join(" "));
        Command::new(&self.program).args(args).output().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RuntimeError::BackendUnavailable(self.program.clone())
            } else {
                RuntimeError::Io(e)
            }
        })
    }

    fn run_checked(&self, args: &[String]) -> Result<String, RuntimeError> {
        let output = self.run(args)?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(RuntimeError::ExecFailed(format!(
                "{} {} failed: {}",
                self.program,
                args.first().map_or("", String::as_str),
                stderr.trim()
            )))
        }
    }

    /// Pulls the image when it is not present locally, forwarding progress to `sink`.
    fn ensure_image(&self, image: &str, sink: &dyn LogSink) -> Result<(), RuntimeError> {
        let present = self
            .run(&args(["image", "inspect", image]))?
            .status
            .success();
        if present {
            return Ok(());
        }
        info!("pulling emulator image {image}");
        let output = self.run(&args(["pull", image]))?;
        forward(&output.stdout, sink);
        forward(&output.stderr, sink);
        if !output.status.success() {
            return Err(RuntimeError::StartFailed(format!(
                "pull of {image} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    fn inspect_state(&self, id: &str) -> Result<Option<ContainerState>, RuntimeError> {
        let output = self.run(&args(["inspect", "--format", "{{json .State}}", id]))?;
        if !output.status.success() {
            if is_missing_container(&String::from_utf8_lossy(&output.stderr)) {
                return Ok(None);
            }
            return Err(RuntimeError::ExecFailed(format!(
                "{} inspect failed: {}",
                self.program,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        let state: ContainerState = serde_json::from_slice(&output.stdout).map_err(|e| {
            RuntimeError::ExecFailed(format!("failed to parse {} inspect output: {e}", self.program))
        })?;
        Ok(Some(state))
    }

    fn wait_ready(
        &self,
        id: &str,
        request: &ContainerRequest,
        sink: &dyn LogSink,
    ) -> Result<(), RuntimeError> {
        let deadline = Instant::now() + request.startup_timeout;
        let mut cursor = LogCursor::default();
        loop {
            let output = self.run(&args(["logs", id]))?;
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            if cursor.advance(&stdout, &stderr, &request.ready_log_line, sink) {
                return Ok(());
            }

            match self.inspect_state(id)? {
                Some(state) if state.running => {}
                Some(state) => {
                    return Err(RuntimeError::StartFailed(format!(
                        "container {id} exited with code {} before becoming ready",
                        state.exit_code
                    )));
                }
                None => return Err(RuntimeError::NotFound(id.to_owned())),
            }

            if Instant::now() >= deadline {
                return Err(RuntimeError::ReadinessTimeout {
                    id: id.to_owned(),
                    timeout: request.startup_timeout,
                });
            }
            std::thread::sleep(READINESS_POLL);
        }
    }

    fn published_ports(
        &self,
        id: &str,
        request: &ContainerRequest,
    ) -> Result<BTreeMap<u16, u16>, RuntimeError> {
        let mut ports = BTreeMap::new();
        for port in &request.exposed_ports {
            let out = self.run_checked(&args(["port", id, &format!("{port}/tcp")]))?;
            let host_port = parse_port_output(&out).ok_or_else(|| {
                RuntimeError::StartFailed(format!("no host port published for {port}/tcp: {out}"))
            })?;
            ports.insert(*port, host_port);
        }
        Ok(ports)
    }

    fn remove(&self, id: &str) -> Result<(), RuntimeError> {
        let output = self.run(&args(["rm", "--force", "--volumes", id]))?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_missing_container(&stderr) {
            return Err(RuntimeError::NotFound(id.to_owned()));
        }
        Err(RuntimeError::ExecFailed(format!(
            "{} rm failed: {}",
            self.program,
            stderr.trim()
        )))
    }
}

impl ContainerRuntime for DockerRuntime {
    fn name(&self) -> &str {
        &self.program
    }

    fn available(&self) -> bool {
        Command::new(&self.program)
            .arg("--version")
            .output()
            .is_ok_and(|o| o.status.success())
    }

    fn start(
        &self,
        request: &ContainerRequest,
        sink: &dyn LogSink,
    ) -> Result<RunningContainer, RuntimeError> {
        self.ensure_image(&request.image, sink)?;

        let id = self
            .run_checked(&run_args(request))
            .map_err(|e| RuntimeError::StartFailed(e.to_string()))?;
        if id.is_empty() {
            return Err(RuntimeError::StartFailed(format!(
                "{} run printed no container id",
                self.program
            )));
        }
        info!("started emulator container {} from {}", short_id(&id), request.image);

        let ready = self
            .wait_ready(&id, request, sink)
            .and_then(|()| self.published_ports(&id, request));
        match ready {
            Ok(ports) => {
                debug!("container {} ports: {ports:?}", short_id(&id));
                Ok(RunningContainer {
                    id,
                    host: PUBLISH_HOST.to_owned(),
                    ports,
                })
            }
            Err(e) => {
                if let Err(rm_err) = self.remove(&id) {
                    warn!("failed to remove container {} after start failure: {rm_err}", short_id(&id));
                }
                Err(e)
            }
        }
    }

    fn terminate(&self, id: &str) -> Result<(), RuntimeError> {
        self.remove(id)?;
        info!("terminated emulator container {}", short_id(id));
        Ok(())
    }

    fn status(&self, id: &str) -> Result<ContainerStatus, RuntimeError> {
        let running = self.inspect_state(id)?.is_some_and(|s| s.running);
        Ok(ContainerStatus {
            id: id.to_owned(),
            running,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerState {
    running: bool,
    #[serde(default)]
    exit_code: i64,
}

fn find_runtime() -> Option<String> {
    for candidate in &["docker", "podman"] {
        if let Ok(output) = Command::new(candidate).arg("--version").output() {
            if output.status.success() {
                return Some((*candidate).to_string());
            }
        }
    }
    None
}

fn args<const N: usize>(a: [&str; N]) -> Vec<String> {
    a.iter().map(|s| (*s).to_owned()).collect()
}

fn forward(bytes: &[u8], sink: &dyn LogSink) {
    for line in String::from_utf8_lossy(bytes).lines() {
        sink.line(line);
    }
}

fn short_id(id: &str) -> &str {
    &id[..12.min(id.len())]
}

/// Arguments for `run`, publishing every exposed port on a random
/// loopback host port.
fn run_args(request: &ContainerRequest) -> Vec<String> {
    let mut a = args(["run", "--detach"]);
    if let Some(name) = &request.name {
        a.push("--name".to_owned());
        a.push(name.clone());
    }
    for (k, v) in &request.labels {
        a.push("--label".to_owned());
        a.push(format!("{k}={v}"));
    }
    for (k, v) in &request.env {
        a.push("--env".to_owned());
        a.push(format!("{k}={v}"));
    }
    for port in &request.exposed_ports {
        a.push("--publish".to_owned());
        a.push(format!("{PUBLISH_HOST}::{port}"));
    }
    a.push(request.image.clone());
    a.extend(request.command.iter().cloned());
    a
}

/// Host port from `port` output such as `127.0.0.1:32768` or `[::]:32768`.
fn parse_port_output(out: &str) -> Option<u16> {
    out.lines()
        .filter_map(|line| line.trim().rsplit_once(':'))
        .find_map(|(_, port)| port.parse().ok())
}

fn is_missing_container(stderr: &str) -> bool {
    let msg = stderr.to_lowercase();
    msg.contains("no such container") || msg.contains("no such object") || msg.contains("not found")
}

/// Lines of each log stream already handed to the sink. `logs` replays
/// both streams from the start on every poll, so each one is tracked on
/// its own.
#[derive(Debug, Default)]
struct LogCursor {
    stdout: usize,
    stderr: usize,
}

impl LogCursor {
    /// Forward unseen lines to `sink`; true once either stream holds `ready_line`.
    fn advance(
        &mut self,
        stdout: &str,
        stderr: &str,
        ready_line: &str,
        sink: &dyn LogSink,
    ) -> bool {
        let out_ready = forward_stream(stdout, &mut self.stdout, ready_line, sink);
        let err_ready = forward_stream(stderr, &mut self.stderr, ready_line, sink);
        out_ready || err_ready
    }
}

fn forward_stream(text: &str, seen: &mut usize, ready_line: &str, sink: &dyn LogSink) -> bool {
    let mut ready = false;
    let mut count = 0;
    for (i, line) in text.lines().enumerate() {
        if i >= *seen {
            sink.line(line);
        }
        ready |= line.contains(ready_line);
        count = i + 1;
    }
    *seen = (*seen).max(count);
    ready
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;

    #[test]
    fn run_args_publish_exposed_ports_on_loopback() {
        let mut req = ContainerRequest::for_image("emu:1");
        req.name = Some("emu-test".to_owned());
        req.env.insert("TZ".to_owned(), "UTC".to_owned());
        let a = run_args(&req);
        assert_eq!(&a[..2], &["run", "--detach"]);
        assert!(a.windows(2).any(|w| w[0] == "--name" && w[1] == "emu-test"));
        assert!(a.windows(2).any(|w| w[0] == "--env" && w[1] == "TZ=UTC"));
        assert!(a.windows(2).any(|w| w[0] == "--publish" && w[1] == "127.0.0.1::9010"));
        assert!(a.windows(2).any(|w| w[0] == "--publish" && w[1] == "127.0.0.1::9020"));
        assert!(a
            .windows(2)
            .any(|w| w[0] == "--label" && w[1] == "dev.spanemu.managed=true"));
    }

    #[test]
    fn run_args_end_with_image_then_command() {
        let mut req = ContainerRequest::for_image("emu:1");
        req.command.push("--enable_fault_injection".to_owned());
        let a = run_args(&req);
        let image_pos = a.iter().position(|s| s == "emu:1").unwrap();
        assert_eq!(&a[image_pos + 1..], req.command.as_slice());
    }

    #[test]
    fn log_streams_are_forwarded_once_each() {
        let sink = MemorySink::new();
        let mut cursor = LogCursor::default();
        assert!(!cursor.advance("o1\n", "e1\n", "ready", &sink));
        assert!(!cursor.advance("o1\no2\n", "e1\n", "ready", &sink));
        assert!(cursor.advance("o1\no2\n", "e1\nready\n", "ready", &sink));
        assert_eq!(sink.lines(), vec!["o1", "e1", "o2", "ready"]);
    }

    #[test]
    fn port_output_parsing() {
        assert_eq!(parse_port_output("127.0.0.1:32768\n"), Some(32768));
        assert_eq!(parse_port_output("[::]:49153"), Some(49153));
        assert_eq!(
            parse_port_output("0.0.0.0:40001\n[::]:40001\n"),
            Some(40001)
        );
        assert_eq!(parse_port_output(""), None);
        assert_eq!(parse_port_output("garbage"), None);
    }

    #[test]
    fn missing_container_detection() {
        assert!(is_missing_container(
            "Error response from daemon: No such container: abc"
        ));
        assert!(is_missing_container("Error: no such object: abc"));
        assert!(!is_missing_container("permission denied"));
    }

    #[test]
    fn state_json_parsing() {
        let state: ContainerState =
            serde_json::from_str(r#"{"Status":"exited","Running":false,"ExitCode":3}"#).unwrap();
        assert!(!state.running);
        assert_eq!(state.exit_code, 3);
    }

    #[test]
    fn missing_program_is_unavailable() {
        let rt = DockerRuntime::with_program("spanemu-no-such-container-cli");
        assert!(!rt.available());
        assert!(matches!(
            rt.status("abc"),
            Err(RuntimeError::BackendUnavailable(_))
        ));
    }

    #[test]
    fn short_id_truncates() {
        assert_eq!(short_id("0123456789abcdef"), "0123456789ab");
        assert_eq!(short_id("abc"), "abc");
    }
}
