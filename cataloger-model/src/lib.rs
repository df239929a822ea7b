#![deny(missing_docs)]
//! Internal conversation types and the [`Provider`] trait.
//!
//! These are the lingua franca between the agent loop and any LLM backend,
//! not vendor wire types. Backends convert to/from these.

pub mod provider;
pub mod types;

pub use provider::{Provider, ProviderError};
pub use types::{
    ContentPart, ProviderMessage, ProviderRequest, ProviderResponse, Role, StopReason,
    TokenUsage, ToolSchema,
};
