//! The Sandbox protocol — operation-defined isolation.

use crate::error::SandboxError;
use async_trait::async_trait;
use std::sync::Arc;

/// One isolated OS-level environment hosting at most one kernel process.
///
/// The trait is operation-defined: it names what the session layer needs
/// (move files in and out, run and stop background processes, check and
/// restore health), never how the backend provides it. [`crate::docker`]
/// implements it against the Docker Engine API; the test double in
/// `test_utils` implements it over an in-memory filesystem.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Stable identifier for this sandbox (used as the pool issue key).
    fn id(&self) -> &str;

    /// Whether the sandbox is currently running.
    async fn is_running(&self) -> Result<bool, SandboxError>;

    /// Restart a stopped sandbox in place.
    async fn restart(&self) -> Result<(), SandboxError>;

    /// Write a file inside the sandbox, replacing any existing content.
    async fn write_file(&self, path: &str, contents: &str) -> Result<(), SandboxError>;

    /// Read a file from inside the sandbox. Absence is `Ok(None)`, not an error.
    async fn read_file(&self, path: &str) -> Result<Option<String>, SandboxError>;

    /// Remove a file inside the sandbox. No-op if it does not exist.
    async fn remove_file(&self, path: &str) -> Result<(), SandboxError>;

    /// Start a detached background process inside the sandbox.
    async fn spawn(&self, command: &str) -> Result<(), SandboxError>;

    /// Terminate background processes whose command line matches `pattern`.
    /// No-op if nothing matches.
    async fn terminate(&self, pattern: &str) -> Result<(), SandboxError>;

    /// Stop and remove the sandbox entirely.
    async fn remove(&self) -> Result<(), SandboxError>;
}

/// Creates sandboxes on demand for the pool.
#[async_trait]
pub trait SandboxFactory: Send + Sync {
    /// Provision one new sandbox, started and ready for use.
    async fn create(&self) -> Result<Arc<dyn Sandbox>, SandboxError>;
}

/// Declarative description of the sandboxes a factory produces.
#[derive(Debug, Clone)]
pub struct SandboxSpec {
    /// Image to run.
    pub image: String,
    /// Memory cap in bytes.
    pub memory_bytes: i64,
    /// CPU quota in microseconds per scheduling period (100_000 = 1 CPU).
    pub cpu_quota: i64,
    /// Network mode, when the default bridge is not wanted.
    pub network_mode: Option<String>,
    /// Host directory mounted read-only at `/data` for local database files.
    pub data_dir: Option<String>,
    /// `KEY=VALUE` environment entries for the sandbox process tree.
    pub env: Vec<String>,
}

impl Default for SandboxSpec {
    fn default() -> Self {
        Self {
            image: "cataloger-agent:latest".into(),
            memory_bytes: 1 << 30,
            cpu_quota: 100_000,
            network_mode: None,
            data_dir: None,
            env: Vec::new(),
        }
    }
}
