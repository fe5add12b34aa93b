//! Container runtime backends for the spanemu emulator provisioner.
//!
//! This crate implements the container layer: the pluggable `ContainerRuntime`
//! trait with a Docker/Podman CLI backend and an in-memory mock backend, the
//! `LogSink` capability receiving provisioning output, and prerequisite
//! checking for the container engine.

pub mod backend;
pub mod docker;
pub mod mock;
pub mod prereq;
pub mod sink;

pub use backend::{select_runtime, ContainerRuntime, ContainerStatus, RunningContainer};
pub use docker::{DockerRuntime, RUNTIME_ENV_VAR};
pub use mock::MockRuntime;
pub use prereq::{check_docker_prereqs, format_missing, MissingPrereq};
pub use sink::{LogSink, MemorySink, NoopSink, TracingSink};

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("container runtime '{0}' is not available on this system")]
    BackendUnavailable(String),
    #[error("failed to start emulator container: {0}")]
    StartFailed(String),
    #[error("container {id} did not report readiness within {timeout:?}")]
    ReadinessTimeout { id: String, timeout: Duration },
    #[error("container not found: {0}")]
    NotFound(String),
    #[error("runtime execution failed: {0}")]
    ExecFailed(String),
}
