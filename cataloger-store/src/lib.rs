#![deny(missing_docs)]
//! Versioned object-store adapter for cataloger run artifacts.
//!
//! All paths follow `{prefix}/{timestamp}/...` with timestamps in the fixed
//! ISO-Z format, which makes lexicographic order creation order. The
//! [`ObjectStore`] trait is the seam between the domain-shaped
//! [`CatalogStore`] and any blob backend: S3 (and S3-compatible endpoints)
//! in production, an in-memory map in tests.

pub mod catalog;
pub mod error;
pub mod object;
pub mod s3;

#[cfg(any(test, feature = "test-utils"))]
pub mod memory;

pub use catalog::{
    CatalogStore, CommentInfo, CommentReceipt, FileEntry, FileListing, StoreCredentials,
    now_timestamp,
};
pub use error::StoreError;
pub use object::{Listing, ObjectStore};
pub use s3::{S3Config, S3Store};

#[cfg(any(test, feature = "test-utils"))]
pub use memory::MemoryStore;
