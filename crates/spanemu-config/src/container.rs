//! Declarative description of the emulator container to start.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// gRPC port exposed by the emulator image.
pub const GRPC_PORT: u16 = 9010;
/// REST gateway port exposed by the emulator image.
pub const REST_PORT: u16 = 9020;
/// Log line printed by the emulator once it accepts connections.
pub const READY_LOG_LINE: &str = "Cloud Spanner emulator running";
/// Command-line flag enabling the emulator's random transaction aborts.
pub const FAULT_INJECTION_FLAG: &str = "--enable_fault_injection";

const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(60);

/// Everything a container runtime needs to start the emulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRequest {
    pub image: String,
    /// Full command line; the emulator's gateway by default.
    pub command: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    /// Container ports to publish on the host.
    pub exposed_ports: Vec<u16>,
    /// Container name; the runtime picks one when unset.
    pub name: Option<String>,
    pub ready_log_line: String,
    pub startup_timeout: Duration,
}

impl ContainerRequest {
    pub fn for_image(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            command: vec![
                "./gateway_main".to_owned(),
                "--hostname".to_owned(),
                "0.0.0.0".to_owned(),
            ],
            env: BTreeMap::new(),
            labels: BTreeMap::from([("dev.spanemu.managed".to_owned(), "true".to_owned())]),
            exposed_ports: vec![GRPC_PORT, REST_PORT],
            name: None,
            ready_log_line: READY_LOG_LINE.to_owned(),
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
        }
    }

    pub fn fault_injection_enabled(&self) -> bool {
        self.command.iter().any(|arg| arg == FAULT_INJECTION_FLAG)
    }
}

/// Caller hook that adjusts the container request before start.
#[derive(Clone)]
pub struct ContainerCustomizer(Arc<dyn Fn(&mut ContainerRequest) + Send + Sync>);

impl ContainerCustomizer {
    pub fn new(f: impl Fn(&mut ContainerRequest) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn apply(&self, request: &mut ContainerRequest) {
        (self.0)(request);
    }
}

impl fmt::Debug for ContainerCustomizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ContainerCustomizer(..)")
    }
}
