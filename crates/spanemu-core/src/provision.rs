//! Starting the emulator container.

use crate::teardown::Teardown;
use crate::CoreError;
use spanemu_client::Endpoint;
use spanemu_config::container::{GRPC_PORT, REST_PORT};
use spanemu_config::{EmulatorConfig, ProjectId};
use spanemu_runtime::{ContainerRuntime, LogSink, RunningContainer};
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// A running emulator container.
#[derive(Clone)]
pub struct Emulator {
    container_id: String,
    endpoint: Endpoint,
    project_id: ProjectId,
    image: String,
    runtime: Arc<dyn ContainerRuntime>,
}

impl Emulator {
    fn from_container(
        container: &RunningContainer,
        config: &EmulatorConfig,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Result<Self, CoreError> {
        let port = |p| container.host_port(p).ok_or(CoreError::MissingPort(p));
        Ok(Self {
            container_id: container.id.clone(),
            endpoint: Endpoint::new(&container.host, port(GRPC_PORT)?, port(REST_PORT)?),
            project_id: config.ids().project_id.clone(),
            image: config.image().to_owned(),
            runtime,
        })
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    /// `host:port` of the gRPC listener, the value for `SPANNER_EMULATOR_HOST`.
    pub fn grpc_address(&self) -> String {
        self.endpoint.grpc_address()
    }

    /// Base URL of the REST gateway.
    pub fn rest_url(&self) -> String {
        self.endpoint.rest_url()
    }

    /// Whether the container is still running, as reported by its runtime.
    pub fn is_running(&self) -> Result<bool, CoreError> {
        Ok(self.runtime.status(&self.container_id)?.running)
    }
}

impl fmt::Debug for Emulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emulator")
            .field("container_id", &self.container_id)
            .field("endpoint", &self.endpoint)
            .field("project_id", &self.project_id)
            .field("image", &self.image)
            .field("runtime", &self.runtime.name())
            .finish()
    }
}

/// Start the emulator container described by `config`.
///
/// On failure nothing is left to release. On success the returned teardown
/// terminates the container.
pub fn provision(
    runtime: &Arc<dyn ContainerRuntime>,
    sink: &dyn LogSink,
    config: &EmulatorConfig,
) -> Result<(Emulator, Teardown), CoreError> {
    let request = config.container_request();
    info!(
        "starting emulator {} with {}",
        request.image,
        runtime.name()
    );
    let container = runtime.start(&request, sink)?;

    let mut teardown = Teardown::new();
    {
        let runtime = Arc::clone(runtime);
        let id = container.id.clone();
        teardown.push_fallible(format!("terminate container {id}"), move || {
            info!("terminating emulator container {id}");
            runtime.terminate(&id)
        });
    }

    let emulator = Emulator::from_container(&container, config, Arc::clone(runtime))?;
    info!(
        "emulator {} ready at {}",
        emulator.container_id,
        emulator.endpoint.grpc_address()
    );
    Ok((emulator, teardown))
}

#[cfg(test)]
mod tests {
    use super::*;
    use spanemu_config::options::{with_container_customizer, with_fault_injection};
    use spanemu_config::{resolve, ContainerRequest, Defaults};
    use spanemu_runtime::{MemorySink, MockRuntime, NoopSink};

    fn config(options: &[spanemu_config::EmuOption]) -> EmulatorConfig {
        resolve(&Defaults::builtin(), options).unwrap()
    }

    #[test]
    fn provision_maps_ports_and_terminates() {
        let mock = Arc::new(MockRuntime::new());
        let runtime: Arc<dyn ContainerRuntime> = mock.clone();
        let (emulator, teardown) = provision(&runtime, &NoopSink, &config(&[])).unwrap();

        assert_eq!(emulator.endpoint().host, "127.0.0.1");
        assert_ne!(emulator.endpoint().grpc_port, emulator.endpoint().rest_port);
        assert_eq!(emulator.project_id(), "emulator-project");
        assert!(emulator.is_running().unwrap());

        teardown.run();
        assert_eq!(mock.running_count(), 0);
        assert_eq!(mock.terminated(), vec![emulator.container_id().to_owned()]);
        assert!(!emulator.is_running().unwrap());
    }

    #[test]
    fn start_failure_leaves_nothing() {
        let mock = Arc::new(MockRuntime::new());
        mock.fail_next_start("no image");
        let runtime: Arc<dyn ContainerRuntime> = mock.clone();
        let err = provision(&runtime, &NoopSink, &config(&[])).unwrap_err();
        assert!(matches!(err, CoreError::Runtime(_)));
        assert_eq!(mock.running_count(), 0);
    }

    #[test]
    fn missing_port_terminates_container() {
        let mock = Arc::new(MockRuntime::new());
        let runtime: Arc<dyn ContainerRuntime> = mock.clone();
        let cfg = config(&[with_container_customizer(|r: &mut ContainerRequest| {
            r.exposed_ports.retain(|p| *p != REST_PORT);
        })]);
        let err = provision(&runtime, &NoopSink, &cfg).unwrap_err();
        assert!(matches!(err, CoreError::MissingPort(REST_PORT)));
        assert_eq!(mock.running_count(), 0);
    }

    #[test]
    fn request_carries_fault_injection_and_sink_sees_output() {
        let mock = Arc::new(MockRuntime::new());
        let runtime: Arc<dyn ContainerRuntime> = mock.clone();
        let sink = MemorySink::new();
        let (_emulator, teardown) =
            provision(&runtime, &sink, &config(&[with_fault_injection()])).unwrap();
        assert!(mock.requests()[0].fault_injection_enabled());
        assert!(!sink.lines().is_empty());
        teardown.run();
    }

    #[test]
    fn terminate_failure_is_swallowed() {
        let mock = Arc::new(MockRuntime::new());
        mock.fail_terminate(true);
        let runtime: Arc<dyn ContainerRuntime> = mock.clone();
        let (_emulator, teardown) = provision(&runtime, &NoopSink, &config(&[])).unwrap();
        teardown.run();
        assert_eq!(mock.terminated().len(), 1);
    }
}
