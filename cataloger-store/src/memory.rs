//! In-memory [`ObjectStore`] for tests.

use crate::error::StoreError;
use crate::object::{Listing, ObjectStore};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// BTreeMap-backed object store. Keys stay sorted, which mirrors the
/// lexicographic listing order the S3 backend provides.
pub struct MemoryStore {
    bucket: String,
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Create an empty store labeled with a bucket name.
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: Mutex::new(BTreeMap::new()),
        }
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    /// Whether the store holds nothing.
    pub fn is_empty(&self) -> bool {
        self.objects.lock().unwrap().is_empty()
    }

    /// All keys in sorted order.
    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put(&self, key: &str, body: Vec<u8>, _content_type: &str) -> Result<(), StoreError> {
        self.objects.lock().unwrap().insert(key.to_string(), body);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.objects.lock().unwrap().get(key).cloned())
    }

    async fn list(&self, prefix: &str, delimiter: Option<&str>) -> Result<Listing, StoreError> {
        let objects = self.objects.lock().unwrap();
        let mut listing = Listing::default();

        for key in objects.keys() {
            let Some(rest) = key.strip_prefix(prefix) else {
                continue;
            };
            match delimiter {
                Some(delim) => match rest.find(delim) {
                    Some(idx) => {
                        let grouped = format!("{prefix}{}", &rest[..idx + delim.len()]);
                        if listing.common_prefixes.last() != Some(&grouped) {
                            listing.common_prefixes.push(grouped);
                        }
                    }
                    None => listing.keys.push(key.clone()),
                },
                None => listing.keys.push(key.clone()),
            }
        }
        Ok(listing)
    }

    fn uri(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key)
    }
}
