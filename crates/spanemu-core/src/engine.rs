use crate::bootstrap::bootstrap;
use crate::clients::{assemble, Clients};
use crate::provision::{provision, Emulator};
use crate::teardown::Teardown;
use crate::CoreError;
use spanemu_client::{Connector, HttpConnector};
use spanemu_config::{resolve, Defaults, EmuOption};
use spanemu_runtime::{ContainerRuntime, DockerRuntime, LogSink, NoopSink};
use std::sync::Arc;
use tracing::{debug, info};

/// Provisions emulators and the clients bound to them.
///
/// The engine holds the container runtime, the client connector, the sink
/// receiving container output, and the defaults used for fields no option
/// sets. It keeps no per-emulator state: every call returns a `Teardown`
/// that owns what the call acquired.
pub struct Engine {
    runtime: Arc<dyn ContainerRuntime>,
    connector: Arc<dyn Connector>,
    log_sink: Arc<dyn LogSink>,
    defaults: Defaults,
}

impl Engine {
    /// Engine with built-in defaults and a silent log sink.
    pub fn new(runtime: Arc<dyn ContainerRuntime>, connector: Arc<dyn Connector>) -> Self {
        Self {
            runtime,
            connector,
            log_sink: Arc::new(NoopSink),
            defaults: Defaults::builtin(),
        }
    }

    /// Docker (or Podman, per `SPANEMU_CONTAINER_RUNTIME`) with the REST
    /// connector and defaults read from the environment.
    pub fn docker() -> Self {
        Self::new(Arc::new(DockerRuntime::from_env()), Arc::new(HttpConnector))
            .with_defaults(Defaults::from_env())
    }

    #[must_use]
    pub fn with_log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.log_sink = sink;
        self
    }

    #[must_use]
    pub fn with_defaults(mut self, defaults: Defaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    pub fn defaults(&self) -> &Defaults {
        &self.defaults
    }

    /// Start an emulator and bootstrap it as the options ask.
    ///
    /// If bootstrap fails the container is terminated before the error is
    /// returned. The teardown terminates the container.
    pub fn new_emulator(&self, options: &[EmuOption]) -> Result<(Emulator, Teardown), CoreError> {
        let config = resolve(&self.defaults, options)?;
        let (emulator, teardown) = provision(&self.runtime, self.log_sink.as_ref(), &config)?;
        bootstrap(self.connector.as_ref(), &emulator, &config)?;
        info!("emulator {} bootstrapped", emulator.container_id());
        Ok((emulator, teardown))
    }

    /// Start and bootstrap an emulator, then open clients for it.
    ///
    /// The teardown closes the clients (data, database admin, instance
    /// admin) and then terminates the container.
    pub fn new_emulator_with_clients(
        &self,
        options: &[EmuOption],
    ) -> Result<(Emulator, Clients, Teardown), CoreError> {
        let config = resolve(&self.defaults, options)?;
        let (emulator, mut teardown) =
            provision(&self.runtime, self.log_sink.as_ref(), &config)?;
        bootstrap(self.connector.as_ref(), &emulator, &config)?;
        let (clients, client_teardown) = assemble(self.connector.as_ref(), &emulator, &config)?;
        teardown.absorb(client_teardown);
        info!(
            "emulator {} ready with clients for {}",
            emulator.container_id(),
            clients.database_path()
        );
        Ok((emulator, clients, teardown))
    }

    /// Bootstrap an already running emulator and open clients for it. The
    /// emulator's project id is the default project.
    ///
    /// The teardown closes the clients only; the emulator keeps running.
    pub fn new_clients(
        &self,
        emulator: &Emulator,
        options: &[EmuOption],
    ) -> Result<(Clients, Teardown), CoreError> {
        let defaults = self.defaults.clone().with_project_id(emulator.project_id());
        let config = resolve(&defaults, options)?;
        debug!(
            "bootstrapping {} on running emulator {}",
            config.database_path(),
            emulator.container_id()
        );
        bootstrap(self.connector.as_ref(), emulator, &config)?;
        assemble(self.connector.as_ref(), emulator, &config)
    }
}

/// [`Engine::new_emulator`] on [`Engine::docker`].
pub fn new_emulator(options: &[EmuOption]) -> Result<(Emulator, Teardown), CoreError> {
    Engine::docker().new_emulator(options)
}

/// [`Engine::new_emulator_with_clients`] on [`Engine::docker`].
pub fn new_emulator_with_clients(
    options: &[EmuOption],
) -> Result<(Emulator, Clients, Teardown), CoreError> {
    Engine::docker().new_emulator_with_clients(options)
}

/// [`Engine::new_clients`] on [`Engine::docker`].
pub fn new_clients(
    emulator: &Emulator,
    options: &[EmuOption],
) -> Result<(Clients, Teardown), CoreError> {
    Engine::docker().new_clients(emulator, options)
}
