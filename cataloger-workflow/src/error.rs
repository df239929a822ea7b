//! Error types for workflow orchestration and service configuration.

use cataloger_agent::AgentError;
use cataloger_sandbox::SandboxError;
use cataloger_store::StoreError;
use thiserror::Error;

/// Terminal failures of a workflow invocation.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The request failed validation before any work started.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// A required environment variable is absent.
    #[error("missing environment variable: {var}")]
    ConfigMissing {
        /// The variable that was not set.
        var: String,
    },

    /// An environment variable is present but unusable.
    #[error("invalid environment variable {var}: {reason}")]
    ConfigInvalid {
        /// The offending variable.
        var: String,
        /// Why it could not be used.
        reason: String,
    },

    /// The step journal failed; durability cannot be guaranteed.
    #[error("journal error: {0}")]
    Journal(String),

    /// Sandbox layer failure (pool exhaustion, lost sandboxes).
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    /// Object-store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Agent run failure.
    #[error(transparent)]
    Agent(#[from] AgentError),
}

impl WorkflowError {
    /// Whether this failure destroyed the runtime's sandbox.
    ///
    /// Such runtimes are discarded rather than released back to the pool.
    pub fn lost_sandbox(&self) -> bool {
        matches!(
            self,
            WorkflowError::Sandbox(SandboxError::SandboxLost(_))
                | WorkflowError::Agent(AgentError::Sandbox(SandboxError::SandboxLost(_)))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lost_sandbox_is_detected_through_both_paths() {
        let direct = WorkflowError::Sandbox(SandboxError::SandboxLost("sb".into()));
        assert!(direct.lost_sandbox());

        let through_agent = WorkflowError::Agent(AgentError::Sandbox(
            SandboxError::SandboxLost("sb".into()),
        ));
        assert!(through_agent.lost_sandbox());

        let benign = WorkflowError::BadRequest("no tables".into());
        assert!(!benign.lost_sandbox());
    }
}
