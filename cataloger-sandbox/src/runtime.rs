//! Stateful code-execution sessions over a [`Sandbox`].
//!
//! A [`SandboxRuntime`] hosts one persistent Python kernel inside its
//! sandbox. The kernel keeps a single globals dictionary alive across
//! submissions, so variables, imports, and function definitions persist
//! between `execute` calls, which is the property the agent loop depends on.
//!
//! Supervisor and kernel communicate over two files inside the sandbox
//! filesystem: the supervisor writes a code file, the kernel polls for it,
//! executes it under the persistent globals with stdout/stderr redirected
//! into a buffer, and writes the buffer followed by a session-unique
//! end-of-output marker (plus an `ERROR` sentinel line when the code
//! raised). The marker is the commit: the supervisor polls until it
//! appears, so partial writes are never observed.

use crate::error::SandboxError;
use crate::sandbox::Sandbox;
use std::sync::Arc;
use std::time::Duration;

/// Where the supervisor drops code for the kernel.
const CODE_INPUT_PATH: &str = "/tmp/code_input.py";

/// Where the kernel writes captured output.
const CODE_OUTPUT_PATH: &str = "/tmp/code_output.txt";

/// The kernel bootstrap script.
const KERNEL_PATH: &str = "/tmp/kernel.py";

/// Kernel stdout/stderr (diagnostics only; payload goes through the channel).
const KERNEL_LOG_PATH: &str = "/tmp/kernel.log";

/// Command-line pattern used to terminate the kernel process.
const KERNEL_PATTERN: &str = "python3 -u /tmp/kernel.py";

/// Sentinel line the kernel appends after the marker when execution raised.
const ERROR_SENTINEL: &str = "ERROR";

/// Poll granularity for the file channel, both sides.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Grace period after spawning the kernel before the first submission.
const STARTUP_GRACE: Duration = Duration::from_millis(500);

/// Default per-call execution deadline.
pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-run environment exposed to the kernel process.
///
/// Reinitialized on every pool acquisition: successive runs on the same
/// sandbox must see the new database URL and never the previous one.
#[derive(Debug, Clone, Default)]
pub struct RunEnv {
    /// Read-only database connection string for this run.
    pub db_connection_string: Option<String>,
    /// Object-store access key id.
    pub store_access_key_id: String,
    /// Object-store secret access key.
    pub store_secret_access_key: String,
    /// Object-store region.
    pub store_region: String,
    /// Object-store bucket.
    pub store_bucket: String,
    /// Object-store endpoint override (local-compatible back-ends).
    pub store_endpoint: Option<String>,
}

/// A persistent kernel session on one sandbox.
///
/// Code and output histories are kept one-to-one (the sole source of truth
/// for the replay script); the session id makes the end-of-output marker
/// unique per kernel generation.
pub struct SandboxRuntime {
    sandbox: Arc<dyn Sandbox>,
    env: RunEnv,
    session_id: String,
    output_marker: String,
    kernel_started: bool,
    code_history: Vec<String>,
    output_history: Vec<String>,
}

impl SandboxRuntime {
    /// Create a session on the given sandbox. The kernel starts lazily on
    /// the first `execute`.
    pub fn new(sandbox: Arc<dyn Sandbox>, env: RunEnv) -> Self {
        let session_id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        let output_marker = format!("__KERNEL_OUTPUT_END_{session_id}__");
        Self {
            sandbox,
            env,
            session_id,
            output_marker,
            kernel_started: false,
            code_history: Vec::new(),
            output_history: Vec::new(),
        }
    }

    /// The unique id of this session.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The id of the backing sandbox.
    pub fn sandbox_id(&self) -> &str {
        self.sandbox.id()
    }

    /// Give up the session and recover the backing sandbox handle.
    pub fn into_sandbox(self) -> Arc<dyn Sandbox> {
        self.sandbox
    }

    /// Execute code in the persistent kernel with the default deadline.
    ///
    /// Returns the combined stdout/stderr output. State persists across
    /// calls: variables, imports, and functions defined earlier remain
    /// visible.
    pub async fn execute(&mut self, code: &str) -> Result<String, SandboxError> {
        self.execute_timed(code, DEFAULT_EXEC_TIMEOUT).await
    }

    /// Execute code with an explicit deadline.
    ///
    /// # Errors
    ///
    /// - [`SandboxError::Timeout`] when no committed output appears in time.
    /// - [`SandboxError::Execution`] when the kernel raised; the payload is
    ///   the captured output including the traceback.
    /// - [`SandboxError::SandboxLost`] when the sandbox is no longer
    ///   running; fatal to this runtime.
    pub async fn execute_timed(
        &mut self,
        code: &str,
        timeout: Duration,
    ) -> Result<String, SandboxError> {
        if !self.sandbox.is_running().await? {
            return Err(SandboxError::SandboxLost(self.sandbox.id().to_string()));
        }
        if !self.kernel_started {
            self.start_kernel().await?;
        }

        // Clear any stale response, then commit the request. The code enters
        // the history only once the request is actually in flight, keeping
        // the two histories one-to-one on every failure path.
        self.sandbox.remove_file(CODE_OUTPUT_PATH).await?;
        self.sandbox.write_file(CODE_INPUT_PATH, code).await?;
        self.code_history.push(code.to_string());

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(raw) = self.sandbox.read_file(CODE_OUTPUT_PATH).await? {
                // The marker is the commit; keep polling until it appears.
                if let Some((payload, failed)) = split_output(&raw, &self.output_marker) {
                    let cleaned = payload.trim_end().to_string();
                    self.output_history.push(cleaned.clone());
                    if failed {
                        tracing::warn!(session = %self.session_id, "kernel raised during execution");
                        return Err(SandboxError::Execution(cleaned));
                    }
                    tracing::debug!(
                        session = %self.session_id,
                        output_len = cleaned.len(),
                        "execution complete"
                    );
                    return Ok(cleaned);
                }
            }
            if tokio::time::Instant::now() >= deadline {
                // Nothing was observed, so nothing enters the output history;
                // drop the code entry to keep the histories one-to-one.
                self.code_history.pop();
                return Err(SandboxError::Timeout {
                    seconds: timeout.as_secs(),
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// All code blocks submitted in this session, in order.
    pub fn code_history(&self) -> &[String] {
        &self.code_history
    }

    /// Captured outputs, one per code block.
    pub fn output_history(&self) -> &[String] {
        &self.output_history
    }

    /// Render the session as a standalone replay script.
    ///
    /// Each block is numbered, and every block carries an output section
    /// (empty output renders as the literal `# (no output)`) so block
    /// boundaries stay unambiguous and the script is executable against a
    /// fresh kernel.
    pub fn session_script(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        for (i, (code, output)) in self
            .code_history
            .iter()
            .zip(self.output_history.iter())
            .enumerate()
        {
            parts.push(format!("# === Code Block {} ===", i + 1));
            parts.push(code.clone());
            parts.push(String::new());
            parts.push(format!("# --- Output {} ---", i + 1));
            if output.is_empty() {
                parts.push("# (no output)".into());
            } else {
                for line in output.split('\n') {
                    parts.push(format!("# {line}"));
                }
            }
            parts.push(String::new());
        }
        parts.join("\n")
    }

    /// Discard all in-kernel state.
    ///
    /// Terminates the kernel process, deletes the channel files, and clears
    /// both histories. The next `execute` starts a fresh kernel on this
    /// runtime with the same environment.
    pub async fn reset(&mut self) -> Result<(), SandboxError> {
        self.sandbox.terminate(KERNEL_PATTERN).await?;
        self.sandbox.remove_file(CODE_INPUT_PATH).await?;
        self.sandbox.remove_file(CODE_OUTPUT_PATH).await?;
        self.sandbox.remove_file(KERNEL_PATH).await?;
        self.code_history.clear();
        self.output_history.clear();
        self.kernel_started = false;
        tracing::debug!(session = %self.session_id, "runtime reset");
        Ok(())
    }

    /// Boot the kernel: kill any stale kernel left by a previous session on
    /// this sandbox, install the bootstrap script, and start it detached.
    async fn start_kernel(&mut self) -> Result<(), SandboxError> {
        self.sandbox.terminate(KERNEL_PATTERN).await?;
        self.sandbox.remove_file(CODE_INPUT_PATH).await?;
        self.sandbox.remove_file(CODE_OUTPUT_PATH).await?;

        let script = kernel_script(&self.env, &self.output_marker);
        self.sandbox.write_file(KERNEL_PATH, &script).await?;
        self.sandbox
            .spawn(&format!(
                "{KERNEL_PATTERN} > {KERNEL_LOG_PATH} 2>&1"
            ))
            .await?;
        tokio::time::sleep(STARTUP_GRACE).await;
        self.kernel_started = true;
        tracing::debug!(
            session = %self.session_id,
            sandbox = %self.sandbox.id(),
            "kernel started"
        );
        Ok(())
    }
}

/// Split a raw response file into `(payload, failed)` once the marker has
/// been committed. Returns `None` while the marker is still absent.
fn split_output(raw: &str, marker: &str) -> Option<(String, bool)> {
    let needle = format!("\n{marker}\n");
    let idx = raw.find(&needle)?;
    let payload = raw[..idx].to_string();
    let tail = &raw[idx + needle.len()..];
    let failed = tail.lines().any(|line| line == ERROR_SENTINEL);
    Some((payload, failed))
}

/// Render the kernel bootstrap script for one session.
///
/// The per-run environment is embedded directly so nothing from a previous
/// run can leak into this kernel's process environment.
fn kernel_script(env: &RunEnv, marker: &str) -> String {
    format!(
        r#"import sys
import os
import time
import traceback
from io import StringIO

os.environ["DB_CONNECTION_STRING"] = {db}
os.environ["AWS_ACCESS_KEY_ID"] = {access_key}
os.environ["AWS_SECRET_ACCESS_KEY"] = {secret_key}
os.environ["AWS_DEFAULT_REGION"] = {region}
os.environ["S3_BUCKET"] = {bucket}
os.environ["S3_ENDPOINT_URL"] = {endpoint}

_globals = {{"__name__": "__main__"}}

while True:
    if not os.path.exists({input_path}):
        time.sleep(0.1)
        continue

    with open({input_path}, "r") as f:
        code = f.read()
    os.remove({input_path})

    buffer = StringIO()
    failed = False
    old_stdout = sys.stdout
    old_stderr = sys.stderr
    sys.stdout = buffer
    sys.stderr = buffer
    try:
        exec(code, _globals)
    except BaseException:
        failed = True
        traceback.print_exc()
    finally:
        sys.stdout = old_stdout
        sys.stderr = old_stderr

    with open({output_path}, "w") as f:
        f.write(buffer.getvalue())
        f.write("\n" + {marker} + "\n")
        if failed:
            f.write({error_sentinel} + "\n")
"#,
        db = py_str(env.db_connection_string.as_deref().unwrap_or("")),
        access_key = py_str(&env.store_access_key_id),
        secret_key = py_str(&env.store_secret_access_key),
        region = py_str(&env.store_region),
        bucket = py_str(&env.store_bucket),
        endpoint = py_str(env.store_endpoint.as_deref().unwrap_or("")),
        input_path = py_str(CODE_INPUT_PATH),
        output_path = py_str(CODE_OUTPUT_PATH),
        marker = py_str(marker),
        error_sentinel = py_str(ERROR_SENTINEL),
    )
}

/// Render a Python string literal.
fn py_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(ch),
        }
    }
    out.push('"');
    out
}
