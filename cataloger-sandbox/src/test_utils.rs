//! In-memory [`Sandbox`] implementations for tests.
//!
//! [`FakeSandbox`] keeps a HashMap filesystem and simulates the kernel side
//! of the file channel: when the code-input file lands while a kernel is
//! active, it replies with the next scripted [`KernelReply`], committed with
//! the same marker the real kernel would use (recovered from the bootstrap
//! script, exactly as the Python process would read it).

use crate::error::SandboxError;
use crate::sandbox::{Sandbox, SandboxFactory};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// One scripted kernel response.
#[derive(Debug, Clone)]
pub enum KernelReply {
    /// Successful execution with this captured output.
    Output(String),
    /// Execution raised; this is the captured output (traceback included).
    Error(String),
    /// The kernel never answers (drives the supervisor into its timeout).
    Silent,
}

/// In-memory sandbox with a scripted kernel.
pub struct FakeSandbox {
    id: String,
    running: AtomicBool,
    kernel_active: AtomicBool,
    files: Mutex<HashMap<String, String>>,
    replies: Mutex<VecDeque<KernelReply>>,
    spawned: Mutex<Vec<String>>,
    terminated: Mutex<Vec<String>>,
}

impl FakeSandbox {
    /// Create a fake sandbox with the given id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            running: AtomicBool::new(true),
            kernel_active: AtomicBool::new(false),
            files: Mutex::new(HashMap::new()),
            replies: Mutex::new(VecDeque::new()),
            spawned: Mutex::new(Vec::new()),
            terminated: Mutex::new(Vec::new()),
        }
    }

    /// Queue scripted kernel replies and wrap into the shape runtimes take.
    ///
    /// Once the scripted replies are exhausted, further submissions reply
    /// with empty output.
    pub fn with_scripted_kernel(self, replies: Vec<KernelReply>) -> Arc<Self> {
        *self.replies.lock().unwrap() = replies.into();
        Arc::new(self)
    }

    /// Append more scripted replies.
    pub fn push_replies(&self, replies: Vec<KernelReply>) {
        self.replies.lock().unwrap().extend(replies);
    }

    /// Flip the running state (simulates a crashed or stopped sandbox).
    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    /// The bootstrap script currently installed, if any.
    pub fn bootstrap_script(&self) -> Option<String> {
        self.files.lock().unwrap().get("/tmp/kernel.py").cloned()
    }

    /// Commands passed to `terminate`, in order.
    pub fn terminated(&self) -> Vec<String> {
        self.terminated.lock().unwrap().clone()
    }

    /// Number of detached processes spawned (kernel generations).
    pub fn spawn_count(&self) -> usize {
        self.spawned.lock().unwrap().len()
    }

    /// Recover the end-of-output marker the way the kernel process would:
    /// by reading it out of the bootstrap script.
    fn marker(&self) -> Option<String> {
        let script = self.bootstrap_script()?;
        let start = script.find("__KERNEL_OUTPUT_END_")?;
        let rest = &script[start..];
        let prefix_len = "__KERNEL_OUTPUT_END_".len();
        let end = rest[prefix_len..].find("__")? + prefix_len + 2;
        Some(rest[..end].to_string())
    }

    /// Simulate the kernel consuming the code file and committing a reply.
    fn service_submission(&self) {
        if !self.kernel_active.load(Ordering::SeqCst) {
            return;
        }
        let Some(marker) = self.marker() else { return };

        let mut files = self.files.lock().unwrap();
        if files.remove("/tmp/code_input.py").is_none() {
            return;
        }
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(KernelReply::Output(String::new()));
        let committed = match reply {
            KernelReply::Output(out) => format!("{out}\n{marker}\n"),
            KernelReply::Error(out) => format!("{out}\n{marker}\nERROR\n"),
            KernelReply::Silent => return,
        };
        files.insert("/tmp/code_output.txt".into(), committed);
    }
}

#[async_trait]
impl Sandbox for FakeSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn is_running(&self) -> Result<bool, SandboxError> {
        Ok(self.running.load(Ordering::SeqCst))
    }

    async fn restart(&self) -> Result<(), SandboxError> {
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn write_file(&self, path: &str, contents: &str) -> Result<(), SandboxError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(SandboxError::SandboxLost(self.id.clone()));
        }
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), contents.to_string());
        if path == "/tmp/code_input.py" {
            self.service_submission();
        }
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<Option<String>, SandboxError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(SandboxError::SandboxLost(self.id.clone()));
        }
        Ok(self.files.lock().unwrap().get(path).cloned())
    }

    async fn remove_file(&self, path: &str) -> Result<(), SandboxError> {
        self.files.lock().unwrap().remove(path);
        Ok(())
    }

    async fn spawn(&self, command: &str) -> Result<(), SandboxError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(SandboxError::SandboxLost(self.id.clone()));
        }
        self.spawned.lock().unwrap().push(command.to_string());
        if command.contains("kernel.py") {
            self.kernel_active.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn terminate(&self, pattern: &str) -> Result<(), SandboxError> {
        self.terminated.lock().unwrap().push(pattern.to_string());
        if pattern.contains("kernel.py") {
            self.kernel_active.store(false, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn remove(&self) -> Result<(), SandboxError> {
        self.running.store(false, Ordering::SeqCst);
        self.kernel_active.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Factory producing [`FakeSandbox`]es with empty scripted kernels.
#[derive(Default)]
pub struct FakeSandboxFactory {
    created: Mutex<Vec<Arc<FakeSandbox>>>,
}

impl FakeSandboxFactory {
    /// Create an empty factory.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// All sandboxes created so far, in creation order.
    pub fn created(&self) -> Vec<Arc<FakeSandbox>> {
        self.created.lock().unwrap().clone()
    }

    /// How many sandboxes have been created.
    pub fn create_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }
}

#[async_trait]
impl SandboxFactory for FakeSandboxFactory {
    async fn create(&self) -> Result<Arc<dyn Sandbox>, SandboxError> {
        let mut created = self.created.lock().unwrap();
        let sandbox = Arc::new(FakeSandbox::new(format!("fake-{}", created.len())));
        created.push(Arc::clone(&sandbox));
        Ok(sandbox)
    }
}
