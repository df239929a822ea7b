//! Error types for sandbox provisioning, execution, and pooling.

use thiserror::Error;

/// Errors from the sandbox layer.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum SandboxError {
    /// Every sandbox is issued and the pool is at its size bound.
    /// Terminal for the admission decision; the caller is expected to retry.
    #[error("sandbox pool exhausted (size={size})")]
    PoolExhausted {
        /// Configured pool size bound.
        size: usize,
    },

    /// The sandbox backing this runtime is no longer running.
    /// Fatal to the runtime; it must be discarded, not reused.
    #[error("sandbox lost: {0}")]
    SandboxLost(String),

    /// No output appeared within the execution deadline.
    /// The runtime itself survives.
    #[error("code execution timeout after {seconds}s")]
    Timeout {
        /// The deadline that elapsed, in seconds.
        seconds: u64,
    },

    /// The kernel raised while executing submitted code.
    /// Carries the captured output (including the traceback) as payload.
    #[error("code execution failed:\n{0}")]
    Execution(String),

    /// Provisioning failed: missing image, container refused to start.
    #[error("provisioning failed: {0}")]
    Provision(String),

    /// A runtime was released that the pool never issued.
    #[error("sandbox not issued by this pool: {0}")]
    NotIssued(String),

    /// The isolation backend failed underneath us.
    #[error("sandbox backend error: {0}")]
    Backend(String),

    /// Catch-all. Include context.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_context() {
        assert_eq!(
            SandboxError::PoolExhausted { size: 5 }.to_string(),
            "sandbox pool exhausted (size=5)"
        );
        assert_eq!(
            SandboxError::Timeout { seconds: 60 }.to_string(),
            "code execution timeout after 60s"
        );
        assert!(
            SandboxError::Execution("ValueError: boom".into())
                .to_string()
                .contains("ValueError")
        );
    }
}
