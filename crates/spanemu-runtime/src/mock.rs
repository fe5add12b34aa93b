use crate::backend::{ContainerRuntime, ContainerStatus, RunningContainer};
use crate::sink::LogSink;
use crate::RuntimeError;
use spanemu_config::ContainerRequest;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

const FIRST_HOST_PORT: u16 = 30000;

/// In-memory runtime: containers are bookkeeping entries with fake ports.
pub struct MockRuntime {
    state: Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
    next_id: u32,
    next_port: u16,
    running: HashMap<String, ContainerRequest>,
    requests: Vec<ContainerRequest>,
    terminated: Vec<String>,
    fail_next_start: Option<String>,
    fail_terminate: bool,
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self {
            state: Mutex::new(MockState {
                next_port: FIRST_HOST_PORT,
                ..MockState::default()
            }),
        }
    }
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MockState>, RuntimeError> {
        self.state
            .lock()
            .map_err(|e| RuntimeError::ExecFailed(format!("mutex poisoned: {e}")))
    }

    /// The next `start` fails with `message`.
    pub fn fail_next_start(&self, message: impl Into<String>) {
        if let Ok(mut s) = self.lock() {
            s.fail_next_start = Some(message.into());
        }
    }

    /// Every `terminate` removes the container but still reports an error.
    pub fn fail_terminate(&self, fail: bool) {
        if let Ok(mut s) = self.lock() {
            s.fail_terminate = fail;
        }
    }

    /// Every request passed to `start`, including failed ones.
    pub fn requests(&self) -> Vec<ContainerRequest> {
        self.lock().map(|s| s.requests.clone()).unwrap_or_default()
    }

    pub fn running_count(&self) -> usize {
        self.lock().map(|s| s.running.len()).unwrap_or_default()
    }

    /// Ids of terminated containers, in termination order.
    pub fn terminated(&self) -> Vec<String> {
        self.lock().map(|s| s.terminated.clone()).unwrap_or_default()
    }
}

impl ContainerRuntime for MockRuntime {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn available(&self) -> bool {
        true
    }

    fn start(
        &self,
        request: &ContainerRequest,
        sink: &dyn LogSink,
    ) -> Result<RunningContainer, RuntimeError> {
        let mut state = self.lock()?;
        state.requests.push(request.clone());
        if let Some(message) = state.fail_next_start.take() {
            return Err(RuntimeError::StartFailed(message));
        }

        state.next_id += 1;
        let id = format!("mock-{:04}", state.next_id);
        let mut ports = BTreeMap::new();
        for port in &request.exposed_ports {
            ports.insert(*port, state.next_port);
            state.next_port = state.next_port.wrapping_add(1);
        }
        state.running.insert(id.clone(), request.clone());

        sink.line(&format!("mock: starting {} as {id}", request.image));
        sink.line(&request.ready_log_line);

        Ok(RunningContainer {
            id,
            host: "127.0.0.1".to_owned(),
            ports,
        })
    }

    fn terminate(&self, id: &str) -> Result<(), RuntimeError> {
        let mut state = self.lock()?;
        if state.running.remove(id).is_none() {
            return Err(RuntimeError::NotFound(id.to_owned()));
        }
        state.terminated.push(id.to_owned());
        if state.fail_terminate {
            return Err(RuntimeError::ExecFailed(format!(
                "mock: injected terminate failure for {id}"
            )));
        }
        Ok(())
    }

    fn status(&self, id: &str) -> Result<ContainerStatus, RuntimeError> {
        let state = self.lock()?;
        Ok(ContainerStatus {
            id: id.to_owned(),
            running: state.running.contains_key(id),
        })
    }
}
