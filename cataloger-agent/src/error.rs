//! Error types for the agent loop.

use cataloger_model::ProviderError;
use cataloger_sandbox::SandboxError;
use thiserror::Error;

/// Terminal failures of one agent run.
///
/// Kernel execution errors and truncated tool calls never appear here;
/// they are handed back to the model as tool-result text and the loop
/// continues.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum AgentError {
    /// The model ended its turn without calling any tool.
    #[error("agent ended conversation without submitting an artifact")]
    EndedWithoutSubmit,

    /// Accumulated output tokens crossed the configured budget.
    #[error("agent exceeded token budget: {used} > {budget}")]
    TokenBudgetExceeded {
        /// Output tokens consumed so far.
        used: u64,
        /// The configured budget.
        budget: u64,
    },

    /// The outer loop hit its hard iteration cap.
    #[error("agent exceeded max iterations: {limit}")]
    MaxIterationsExceeded {
        /// The iteration cap.
        limit: u32,
    },

    /// The provider refused to generate.
    #[error("content filtered by provider")]
    ContentFiltered,

    /// A provider call failed.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// The sandbox failed in a way the loop cannot recover in-band.
    #[error("sandbox error: {0}")]
    Sandbox(#[from] SandboxError),
}
