//! Bounded pool of pre-warmed sandboxes.
//!
//! The pool is the only shared mutable state on the hot path. Its critical
//! sections hold a plain mutex over the idle/issued collections and nothing
//! else: no lock is held across sandbox or network I/O. Health checks,
//! restarts, and creation all happen outside the lock against a reserved
//! slot.

use crate::error::SandboxError;
use crate::runtime::{RunEnv, SandboxRuntime};
use crate::sandbox::{Sandbox, SandboxFactory};
use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

struct PoolState {
    idle: Vec<Arc<dyn Sandbox>>,
    issued: HashMap<String, Arc<dyn Sandbox>>,
    creating: usize,
}

impl PoolState {
    fn live(&self) -> usize {
        self.idle.len() + self.issued.len() + self.creating
    }
}

/// Bounded pool handing out [`SandboxRuntime`]s.
///
/// `acquire` prefers an idle sandbox (re-checking health and restarting a
/// stopped one), creates a new sandbox while under the size bound, and
/// fails with [`SandboxError::PoolExhausted`] otherwise. Each acquisition
/// builds a fresh runtime with the caller's per-run environment, so a
/// reused sandbox never leaks the previous run's database URL into the new
/// kernel.
pub struct SandboxPool {
    factory: Arc<dyn SandboxFactory>,
    size: usize,
    state: Arc<Mutex<PoolState>>,
}

impl SandboxPool {
    /// Create a pool over the given factory with the given size bound.
    pub fn new(factory: Arc<dyn SandboxFactory>, size: usize) -> Self {
        Self {
            factory,
            size,
            state: Arc::new(Mutex::new(PoolState {
                idle: Vec::new(),
                issued: HashMap::new(),
                creating: 0,
            })),
        }
    }

    /// The configured size bound.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of idle sandboxes right now.
    pub fn idle_count(&self) -> usize {
        self.state.lock().unwrap().idle.len()
    }

    /// Acquire a runtime, reinitializing the sandbox with this run's
    /// environment.
    pub async fn acquire(&self, env: RunEnv) -> Result<PooledRuntime, SandboxError> {
        let reused = {
            let mut state = self.state.lock().unwrap();
            match state.idle.pop() {
                Some(sandbox) => Some(sandbox),
                None => {
                    if state.live() >= self.size {
                        return Err(SandboxError::PoolExhausted { size: self.size });
                    }
                    state.creating += 1;
                    None
                }
            }
        };

        let sandbox = match reused {
            Some(sandbox) => {
                // Idle sandboxes may have died since release; verify and
                // restart outside the lock.
                match sandbox.is_running().await {
                    Ok(true) => sandbox,
                    Ok(false) => {
                        tracing::warn!(sandbox = %sandbox.id(), "idle sandbox not running, restarting");
                        sandbox.restart().await?;
                        sandbox
                    }
                    Err(e) => return Err(e),
                }
            }
            None => {
                let created = self.factory.create().await;
                self.state.lock().unwrap().creating -= 1;
                created?
            }
        };

        tracing::debug!(sandbox = %sandbox.id(), "sandbox acquired");
        self.state
            .lock()
            .unwrap()
            .issued
            .insert(sandbox.id().to_string(), Arc::clone(&sandbox));

        Ok(PooledRuntime {
            runtime: Some(SandboxRuntime::new(sandbox, env)),
            state: Arc::clone(&self.state),
        })
    }

    /// Release a runtime back to the pool.
    ///
    /// Verifies the runtime was issued by this pool, resets it (killing the
    /// kernel and clearing session state), and returns its sandbox to the
    /// idle set. A sandbox whose reset fails is removed rather than reused.
    pub async fn release(&self, mut guard: PooledRuntime) -> Result<(), SandboxError> {
        // Verify issuance before disarming the guard: on mismatch the guard
        // drops intact and its sandbox goes back to the pool that issued it.
        {
            let id = guard
                .runtime
                .as_ref()
                .map(|r| r.sandbox_id().to_string())
                .ok_or_else(|| SandboxError::NotIssued("runtime already released".into()))?;
            if !self.state.lock().unwrap().issued.contains_key(&id) {
                return Err(SandboxError::NotIssued(id));
            }
        }

        let mut runtime = guard.runtime.take().expect("checked above");
        let reset_result = runtime.reset().await;
        let sandbox = runtime.into_sandbox();
        let id = sandbox.id().to_string();

        match reset_result {
            Ok(()) => {
                let mut state = self.state.lock().unwrap();
                state.issued.remove(&id);
                state.idle.push(sandbox);
                tracing::debug!(sandbox = %id, "sandbox released");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(sandbox = %id, error = %e, "reset failed, removing sandbox");
                self.state.lock().unwrap().issued.remove(&id);
                let _ = sandbox.remove().await;
                Err(e)
            }
        }
    }

    /// Destroy an issued runtime whose sandbox must not be reused
    /// (lost kernels, violated invariants).
    pub async fn discard(&self, mut guard: PooledRuntime) {
        if let Some(runtime) = guard.runtime.take() {
            let sandbox = runtime.into_sandbox();
            let id = sandbox.id().to_string();
            self.state.lock().unwrap().issued.remove(&id);
            if let Err(e) = sandbox.remove().await {
                tracing::warn!(sandbox = %id, error = %e, "failed to remove discarded sandbox");
            } else {
                tracing::info!(sandbox = %id, "sandbox discarded");
            }
        }
    }

    /// Stop and remove every sandbox, idle or issued.
    pub async fn cleanup(&self) {
        let all: Vec<Arc<dyn Sandbox>> = {
            let mut state = self.state.lock().unwrap();
            let mut all: Vec<Arc<dyn Sandbox>> = state.idle.drain(..).collect();
            all.extend(state.issued.drain().map(|(_, s)| s));
            all
        };
        for sandbox in all {
            if let Err(e) = sandbox.remove().await {
                tracing::warn!(sandbox = %sandbox.id(), error = %e, "failed to remove sandbox");
            }
        }
        tracing::info!("sandbox pool cleaned up");
    }

    /// Scoped acquisition: run `f` with a runtime and release on every exit
    /// path, including failure of `f` itself.
    pub async fn with_runtime<T, E, F>(&self, env: RunEnv, f: F) -> Result<T, E>
    where
        E: From<SandboxError>,
        F: for<'a> FnOnce(&'a mut SandboxRuntime) -> BoxFuture<'a, Result<T, E>>,
    {
        let mut guard = self.acquire(env).await.map_err(E::from)?;
        let result = f(guard.runtime_mut()).await;
        if let Err(e) = self.release(guard).await {
            tracing::warn!(error = %e, "release after scoped use failed");
        }
        result
    }
}

/// An issued runtime.
///
/// Dropping the guard (cancellation, panic unwind) returns the sandbox to
/// the idle set without the async reset; the next acquisition kills any
/// stale kernel before starting its own, so nothing leaks. Going through
/// [`SandboxPool::release`] is still preferred; it resets eagerly.
pub struct PooledRuntime {
    runtime: Option<SandboxRuntime>,
    state: Arc<Mutex<PoolState>>,
}

impl std::fmt::Debug for PooledRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledRuntime").finish_non_exhaustive()
    }
}

impl PooledRuntime {
    /// Mutable access to the underlying runtime.
    pub fn runtime_mut(&mut self) -> &mut SandboxRuntime {
        self.runtime.as_mut().expect("runtime taken")
    }

    /// Shared access to the underlying runtime.
    pub fn runtime(&self) -> &SandboxRuntime {
        self.runtime.as_ref().expect("runtime taken")
    }
}

impl Drop for PooledRuntime {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            let sandbox = runtime.into_sandbox();
            let mut state = self.state.lock().unwrap();
            state.issued.remove(sandbox.id());
            state.idle.push(sandbox);
        }
    }
}
