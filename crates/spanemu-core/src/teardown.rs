//! Ordered release of acquired resources.

use spanemu_client::Close;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

type Step = Box<dyn FnOnce() + Send>;

/// Labelled release actions, run last-in first-out.
///
/// Push a step right after acquiring the resource it releases. `run`
/// executes every step exactly once, newest first; dropping an unrun
/// teardown does the same, so an early `?` return releases exactly what was
/// acquired up to that point. Release errors are logged, never returned.
#[must_use = "dropping a Teardown releases its resources immediately"]
#[derive(Default)]
pub struct Teardown {
    steps: Vec<(String, Step)>,
}

impl Teardown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, label: impl Into<String>, step: impl FnOnce() + Send + 'static) {
        self.steps.push((label.into(), Box::new(step)));
    }

    /// Push a step whose error is logged with `warn!` and otherwise ignored.
    pub fn push_fallible<E, F>(&mut self, label: impl Into<String>, step: F)
    where
        E: fmt::Display,
        F: FnOnce() -> Result<(), E> + Send + 'static,
    {
        let label = label.into();
        let context = label.clone();
        self.push(label, move || {
            if let Err(e) = step() {
                warn!("teardown: {context} failed: {e}");
            }
        });
    }

    /// Push a step closing `client`.
    pub fn push_close<C>(&mut self, label: &str, client: &Arc<C>)
    where
        C: Close + ?Sized + 'static,
    {
        let client = Arc::clone(client);
        self.push_fallible(format!("close {label} client"), move || client.close());
    }

    /// Take over the steps of a teardown built after this one. They run
    /// before any step already held here.
    pub fn absorb(&mut self, mut later: Teardown) {
        self.steps.append(&mut later.steps);
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Labels in execution order.
    pub fn labels(&self) -> Vec<&str> {
        self.steps.iter().rev().map(|(l, _)| l.as_str()).collect()
    }

    pub fn run(mut self) {
        self.release();
    }

    fn release(&mut self) {
        while let Some((label, step)) = self.steps.pop() {
            debug!("teardown: {label}");
            step();
        }
    }
}

impl Drop for Teardown {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Teardown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Teardown")
            .field("steps", &self.labels())
            .finish()
    }
}
