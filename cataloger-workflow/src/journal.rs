//! Step journal: durable records of completed workflow units.
//!
//! The journal is the durability seam. `FsJournal` stores one JSON file
//! per key under a root directory, which survives process restarts on a
//! single machine; `MemoryJournal` backs tests and fire-and-forget
//! deployments that accept re-execution on retry.

use crate::error::WorkflowError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

/// Durable key/value records for workflow steps.
#[async_trait]
pub trait Journal: Send + Sync {
    /// Fetch a previously recorded value, if any.
    async fn lookup(&self, key: &str) -> Result<Option<serde_json::Value>, WorkflowError>;

    /// Record a completed unit. Records are written before the workflow
    /// moves on, and never rewritten.
    async fn record(&self, key: &str, value: serde_json::Value) -> Result<(), WorkflowError>;
}

/// Filesystem journal: one `.json` file per key under a root directory.
pub struct FsJournal {
    root: PathBuf,
}

impl FsJournal {
    /// Create a journal rooted at the given directory.
    ///
    /// The directory is created lazily on first record.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key_to_filename(key))
    }
}

/// Encode a key into a safe filename.
fn key_to_filename(key: &str) -> String {
    let mut encoded = String::new();
    for ch in key.chars() {
        match ch {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => encoded.push(ch),
            _ => {
                for byte in ch.to_string().as_bytes() {
                    encoded.push_str(&format!("%{byte:02X}"));
                }
            }
        }
    }
    format!("{encoded}.json")
}

#[async_trait]
impl Journal for FsJournal {
    async fn lookup(&self, key: &str) -> Result<Option<serde_json::Value>, WorkflowError> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(contents) => {
                let value = serde_json::from_str(&contents)
                    .map_err(|e| WorkflowError::Journal(format!("corrupt record {key}: {e}")))?;
                Ok(Some(value))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(WorkflowError::Journal(e.to_string())),
        }
    }

    async fn record(&self, key: &str, value: serde_json::Value) -> Result<(), WorkflowError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| WorkflowError::Journal(e.to_string()))?;
        let contents = serde_json::to_string_pretty(&value)
            .map_err(|e| WorkflowError::Journal(e.to_string()))?;
        tokio::fs::write(self.path_for(key), contents)
            .await
            .map_err(|e| WorkflowError::Journal(e.to_string()))
    }
}

/// In-memory journal.
#[derive(Default)]
pub struct MemoryJournal {
    records: Mutex<HashMap<String, serde_json::Value>>,
}

impl MemoryJournal {
    /// Create an empty journal.
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded keys, for assertions.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.records.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl Journal for MemoryJournal {
    async fn lookup(&self, key: &str) -> Result<Option<serde_json::Value>, WorkflowError> {
        Ok(self.records.lock().unwrap().get(key).cloned())
    }

    async fn record(&self, key: &str, value: serde_json::Value) -> Result<(), WorkflowError> {
        self.records.lock().unwrap().insert(key.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_encoding_is_filesystem_safe() {
        let filename = key_to_filename("cust/db/ik-1/timestamp");
        assert!(!filename.contains('/'));
        assert!(filename.ends_with(".json"));
    }

    #[tokio::test]
    async fn fs_journal_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let journal = FsJournal::new(dir.path());

        assert!(journal.lookup("a/b/timestamp").await.unwrap().is_none());
        journal
            .record("a/b/timestamp", json!("2024-01-15T10:00:00Z"))
            .await
            .unwrap();
        let value = journal.lookup("a/b/timestamp").await.unwrap().unwrap();
        assert_eq!(value, json!("2024-01-15T10:00:00Z"));
    }

    #[tokio::test]
    async fn fs_journal_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let journal = FsJournal::new(dir.path());
            journal.record("k", json!({"uri": "s3://x"})).await.unwrap();
        }
        let reopened = FsJournal::new(dir.path());
        let value = reopened.lookup("k").await.unwrap().unwrap();
        assert_eq!(value["uri"], "s3://x");
    }

    #[tokio::test]
    async fn memory_journal_roundtrip() {
        let journal = MemoryJournal::new();
        journal.record("k", json!(1)).await.unwrap();
        assert_eq!(journal.lookup("k").await.unwrap(), Some(json!(1)));
        assert_eq!(journal.keys(), vec!["k"]);
    }
}
