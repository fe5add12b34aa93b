//! Bounded session pool. Callers block while every session is in use and
//! the pool is at its maximum size.

use crate::ClientError;
use spanemu_config::SessionPoolConfig;
use std::sync::{Condvar, Mutex, MutexGuard};

pub struct SessionPool<S> {
    config: SessionPoolConfig,
    state: Mutex<PoolState<S>>,
    released: Condvar,
}

struct PoolState<S> {
    idle: Vec<S>,
    /// Sessions that exist, idle or checked out, plus those being created.
    total: u32,
    closed: bool,
}

impl<S> SessionPool<S> {
    /// Create the pool and eagerly open `min_opened` sessions with `create`.
    /// If a create fails, the sessions opened so far are handed to `discard`
    /// before the error is returned.
    pub fn open(
        config: SessionPoolConfig,
        mut create: impl FnMut() -> Result<S, ClientError>,
        mut discard: impl FnMut(S),
    ) -> Result<Self, ClientError> {
        let mut idle = Vec::with_capacity(config.min_opened as usize);
        for _ in 0..config.min_opened {
            match create() {
                Ok(session) => idle.push(session),
                Err(e) => {
                    idle.into_iter().for_each(&mut discard);
                    return Err(e);
                }
            }
        }
        Ok(Self {
            config,
            state: Mutex::new(PoolState {
                total: idle.len() as u32,
                idle,
                closed: false,
            }),
            released: Condvar::new(),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, PoolState<S>>, ClientError> {
        self.state
            .lock()
            .map_err(|e| ClientError::Internal(format!("session pool mutex poisoned: {e}")))
    }

    /// Take an idle session, create one if below `max_opened`, or wait for
    /// a release.
    pub fn acquire(
        &self,
        create: impl FnOnce() -> Result<S, ClientError>,
    ) -> Result<S, ClientError> {
        let mut state = self.lock()?;
        loop {
            if state.closed {
                return Err(ClientError::Closed);
            }
            if let Some(session) = state.idle.pop() {
                return Ok(session);
            }
            if state.total < self.config.max_opened {
                state.total += 1;
                drop(state);
                return match create() {
                    Ok(session) => Ok(session),
                    Err(e) => {
                        let mut state = self.lock()?;
                        state.total -= 1;
                        self.released.notify_one();
                        Err(e)
                    }
                };
            }
            state = self
                .released
                .wait(state)
                .map_err(|e| ClientError::Internal(format!("session pool mutex poisoned: {e}")))?;
        }
    }

    /// Return a session. After [`SessionPool::drain`] the session is handed
    /// back so the caller can delete it.
    pub fn release(&self, session: S) -> Option<S> {
        let Ok(mut state) = self.lock() else {
            return Some(session);
        };
        if state.closed {
            state.total = state.total.saturating_sub(1);
            return Some(session);
        }
        state.idle.push(session);
        self.released.notify_one();
        None
    }

    /// Close the pool and take every idle session. Waiting callers fail
    /// with [`ClientError::Closed`].
    pub fn drain(&self) -> Result<Vec<S>, ClientError> {
        let mut state = self.lock()?;
        state.closed = true;
        let idle = std::mem::take(&mut state.idle);
        state.total -= idle.len() as u32;
        self.released.notify_all();
        Ok(idle)
    }

    pub fn config(&self) -> SessionPoolConfig {
        self.config
    }

    /// Sessions currently existing, idle or checked out.
    pub fn size(&self) -> u32 {
        self.lock().map(|s| s.total).unwrap_or_default()
    }
}
