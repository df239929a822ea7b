//! The ObjectStore protocol — a minimal blob-store seam.

use crate::error::StoreError;
use async_trait::async_trait;

/// Result of a prefix listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Listing {
    /// Object keys under the prefix (not grouped behind the delimiter).
    pub keys: Vec<String>,
    /// Grouped key prefixes, one per "directory" when a delimiter was given.
    pub common_prefixes: Vec<String>,
}

/// Minimal view of a versioned blob store.
///
/// Deliberately small: put, get, list. Domain shape (timestamps, artifact
/// names, comment conventions) lives in [`crate::CatalogStore`] above this
/// seam, so any backend that can do these three operations can hold runs.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write an object. Creates or overwrites.
    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<(), StoreError>;

    /// Read an object. Absence is `Ok(None)`, not an error.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// List keys under a prefix, optionally grouping behind a delimiter.
    async fn list(&self, prefix: &str, delimiter: Option<&str>) -> Result<Listing, StoreError>;

    /// Render the canonical URI for a key in this store.
    fn uri(&self, key: &str) -> String;
}
