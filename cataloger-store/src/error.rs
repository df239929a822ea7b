//! Error types for the object-store layer.

use thiserror::Error;

/// Errors from blob backends and the catalog adapter.
///
/// Listing operations and optional reads treat absence as empty rather than
/// error; only strict reads produce [`StoreError::NotFound`].
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum StoreError {
    /// A strict read missed.
    #[error("not found: {key}")]
    NotFound {
        /// The object key that was requested.
        key: String,
    },

    /// The backend rejected the caller's credentials for this operation.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// The backend failed underneath us.
    #[error("transport error: {0}")]
    Transport(String),

    /// Catch-all. Include context.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}
