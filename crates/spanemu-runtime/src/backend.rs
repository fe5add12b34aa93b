use crate::sink::LogSink;
use crate::RuntimeError;
use serde::{Deserialize, Serialize};
use spanemu_config::ContainerRequest;
use std::collections::BTreeMap;

/// A started container that has reported readiness.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunningContainer {
    pub id: String,
    /// Host address the published ports are bound to.
    pub host: String,
    /// Container port -> published host port.
    pub ports: BTreeMap<u16, u16>,
}

impl RunningContainer {
    pub fn host_port(&self, container_port: u16) -> Option<u16> {
        self.ports.get(&container_port).copied()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerStatus {
    pub id: String,
    pub running: bool,
}

pub trait ContainerRuntime: Send + Sync {
    fn name(&self) -> &str;

    fn available(&self) -> bool;

    /// Start a container for `request` and block until its readiness log
    /// line appears or the request's startup timeout elapses. Output
    /// produced while starting goes to `sink`. A container that fails to
    /// become ready is removed before the error is returned.
    fn start(
        &self,
        request: &ContainerRequest,
        sink: &dyn LogSink,
    ) -> Result<RunningContainer, RuntimeError>;

    fn terminate(&self, id: &str) -> Result<(), RuntimeError>;

    fn status(&self, id: &str) -> Result<ContainerStatus, RuntimeError>;
}

pub fn select_runtime(name: &str) -> Result<Box<dyn ContainerRuntime>, RuntimeError> {
    match name {
        "docker" | "podman" => Ok(Box::new(crate::docker::DockerRuntime::with_program(name))),
        "mock" => Ok(Box::new(crate::mock::MockRuntime::new())),
        other => Err(RuntimeError::BackendUnavailable(other.to_owned())),
    }
}
