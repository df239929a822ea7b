//! Domain-shaped view over an [`ObjectStore`]: runs, artifacts, scripts,
//! and comments under `{prefix}/{timestamp}/...`.

use crate::error::StoreError;
use crate::object::ObjectStore;

/// Fixed-width UTC timestamp length (`YYYY-MM-DDTHH:MM:SSZ`).
const TIMESTAMP_LEN: usize = 20;

/// Generate the current UTC timestamp in the fixed path format.
///
/// Fixed width makes lexicographic order creation order, which every
/// listing operation relies on.
pub fn now_timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Credential bundle reinjected into sandboxes so agent code can reach the
/// same store the service writes to.
#[derive(Debug, Clone, Default)]
pub struct StoreCredentials {
    /// Access key id.
    pub access_key_id: String,
    /// Secret access key.
    pub secret_access_key: String,
    /// Region.
    pub region: String,
    /// Bucket.
    pub bucket: String,
    /// Endpoint override, when a local-compatible backend is in use.
    pub endpoint: Option<String>,
}

/// A single stored file, as surfaced by listing operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Bare filename (last path segment).
    pub filename: String,
    /// Full object key.
    pub key: String,
}

/// Every file under one run, categorized.
#[derive(Debug, Clone, Default)]
pub struct FileListing {
    /// HTML artifacts.
    pub html: Vec<FileEntry>,
    /// Replay scripts.
    pub scripts: Vec<FileEntry>,
    /// Human feedback notes.
    pub comments: Vec<FileEntry>,
    /// Anything else.
    pub other: Vec<FileEntry>,
}

/// One comment file, with user and date parsed back out of the filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentInfo {
    /// Bare filename, e.g. `alice-2024-01-15T10:00:00Z.txt`.
    pub filename: String,
    /// The commenting user.
    pub user: String,
    /// When the comment was written.
    pub date: String,
}

/// Receipt for a freshly written comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentReceipt {
    /// URI of the stored comment.
    pub uri: String,
    /// The commenting user.
    pub user: String,
    /// Timestamp embedded in the comment filename.
    pub timestamp: String,
}

/// Domain adapter over any [`ObjectStore`].
///
/// Writes are intentional overwrites for the four initial artifacts of a
/// run; the workflow, not this adapter, enforces that published runs are
/// never rewritten. Comments are append-only by construction (each write
/// names a new file).
pub struct CatalogStore<S> {
    store: S,
    credentials: StoreCredentials,
}

impl<S: ObjectStore> CatalogStore<S> {
    /// Wrap an object store.
    pub fn new(store: S, credentials: StoreCredentials) -> Self {
        Self { store, credentials }
    }

    /// The credential bundle handed to sandboxes.
    pub fn credentials(&self) -> &StoreCredentials {
        &self.credentials
    }

    /// Access the underlying object store.
    pub fn inner(&self) -> &S {
        &self.store
    }

    fn key(prefix: &str, timestamp: &str, filename: &str) -> String {
        format!("{prefix}/{timestamp}/{filename}")
    }

    /// Write an HTML artifact; returns its URI.
    pub async fn write_html(
        &self,
        prefix: &str,
        timestamp: &str,
        filename: &str,
        content: &str,
    ) -> Result<String, StoreError> {
        let key = Self::key(prefix, timestamp, filename);
        self.store
            .put(&key, content.as_bytes().to_vec(), "text/html")
            .await?;
        let uri = self.store.uri(&key);
        tracing::info!(uri = %uri, size = content.len(), "wrote artifact");
        Ok(uri)
    }

    /// Read an HTML artifact. Strict: missing keys are an error.
    pub async fn read_html(
        &self,
        prefix: &str,
        timestamp: &str,
        filename: &str,
    ) -> Result<String, StoreError> {
        let key = Self::key(prefix, timestamp, filename);
        match self.store.get(&key).await? {
            Some(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            None => Err(StoreError::NotFound { key }),
        }
    }

    /// Write a replay script; returns its URI.
    pub async fn write_script(
        &self,
        prefix: &str,
        timestamp: &str,
        filename: &str,
        content: &str,
    ) -> Result<String, StoreError> {
        let key = Self::key(prefix, timestamp, filename);
        self.store
            .put(&key, content.as_bytes().to_vec(), "text/x-python")
            .await?;
        let uri = self.store.uri(&key);
        tracing::info!(uri = %uri, size = content.len(), "wrote script");
        Ok(uri)
    }

    /// Read a replay script. Absence is `Ok(None)`, not an error.
    pub async fn read_script(
        &self,
        prefix: &str,
        timestamp: &str,
        filename: &str,
    ) -> Result<Option<String>, StoreError> {
        let key = Self::key(prefix, timestamp, filename);
        Ok(self
            .store
            .get(&key)
            .await?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    /// Walk recent timestamps (newest first) until a matching script is
    /// found. Returns `(timestamp, content)`.
    pub async fn get_latest_script(
        &self,
        prefix: &str,
        filename: &str,
    ) -> Result<Option<(String, String)>, StoreError> {
        for timestamp in self.list_timestamps(prefix, 10).await? {
            if let Some(script) = self.read_script(prefix, &timestamp, filename).await? {
                return Ok(Some((timestamp, script)));
            }
        }
        Ok(None)
    }

    /// List run timestamps for a prefix, newest first.
    pub async fn list_timestamps(
        &self,
        prefix: &str,
        limit: usize,
    ) -> Result<Vec<String>, StoreError> {
        let listing = self.store.list(&format!("{prefix}/"), Some("/")).await?;
        let mut timestamps: Vec<String> = listing
            .common_prefixes
            .iter()
            .filter_map(|cp| {
                cp.trim_end_matches('/')
                    .rsplit('/')
                    .next()
                    .map(str::to_string)
            })
            .collect();
        timestamps.sort_unstable_by(|a, b| b.cmp(a));
        timestamps.truncate(limit);
        Ok(timestamps)
    }

    /// List known `customer/database` prefixes.
    ///
    /// Two path segments before the timestamp directory is a convention,
    /// not an invariant; prefixes of other shapes simply never show up.
    pub async fn list_prefixes(&self, limit: usize) -> Result<Vec<String>, StoreError> {
        let mut prefixes = Vec::new();
        let top = self.store.list("", Some("/")).await?;
        for customer in &top.common_prefixes {
            let nested = self.store.list(customer, Some("/")).await?;
            for database in &nested.common_prefixes {
                prefixes.push(database.trim_end_matches('/').to_string());
                if prefixes.len() >= limit {
                    return Ok(prefixes);
                }
            }
        }
        Ok(prefixes)
    }

    /// List the HTML artifacts of one run.
    pub async fn list_catalogs(
        &self,
        prefix: &str,
        timestamp: &str,
    ) -> Result<Vec<FileEntry>, StoreError> {
        let listing = self
            .store
            .list(&format!("{prefix}/{timestamp}/"), None)
            .await?;
        Ok(listing
            .keys
            .into_iter()
            .filter(|key| key.ends_with(".html"))
            .map(|key| FileEntry {
                filename: key.rsplit('/').next().unwrap_or_default().to_string(),
                key,
            })
            .collect())
    }

    /// List every file of one run, categorized.
    pub async fn list_all_files(
        &self,
        prefix: &str,
        timestamp: &str,
    ) -> Result<FileListing, StoreError> {
        let listing = self
            .store
            .list(&format!("{prefix}/{timestamp}/"), None)
            .await?;
        let mut files = FileListing::default();
        for key in listing.keys {
            let entry = FileEntry {
                filename: key.rsplit('/').next().unwrap_or_default().to_string(),
                key: key.clone(),
            };
            if key.contains("/comments/") {
                files.comments.push(entry);
            } else if key.ends_with(".html") {
                files.html.push(entry);
            } else if key.ends_with(".py") {
                files.scripts.push(entry);
            } else {
                files.other.push(entry);
            }
        }
        Ok(files)
    }

    /// Attach a human feedback note to a run.
    ///
    /// Comments are append-only: each write names a fresh
    /// `comments/{user}-{now}.txt` file.
    pub async fn write_comment(
        &self,
        prefix: &str,
        timestamp: &str,
        user: &str,
        text: &str,
    ) -> Result<CommentReceipt, StoreError> {
        let comment_ts = now_timestamp();
        let key = format!("{prefix}/{timestamp}/comments/{user}-{comment_ts}.txt");
        self.store
            .put(&key, text.as_bytes().to_vec(), "text/plain")
            .await?;
        let uri = self.store.uri(&key);
        tracing::info!(uri = %uri, user = %user, "wrote comment");
        Ok(CommentReceipt {
            uri,
            user: user.to_string(),
            timestamp: comment_ts,
        })
    }

    /// List the comments of one run, oldest first.
    pub async fn list_comments(
        &self,
        prefix: &str,
        timestamp: &str,
    ) -> Result<Vec<CommentInfo>, StoreError> {
        let listing = self
            .store
            .list(&format!("{prefix}/{timestamp}/comments/"), None)
            .await?;
        Ok(listing
            .keys
            .iter()
            .filter_map(|key| {
                let filename = key.rsplit('/').next()?;
                parse_comment_filename(filename)
            })
            .collect())
    }

    /// Read one comment by filename. Absence is `Ok(None)`.
    pub async fn read_comment(
        &self,
        prefix: &str,
        timestamp: &str,
        filename: &str,
    ) -> Result<Option<String>, StoreError> {
        let key = format!("{prefix}/{timestamp}/comments/{filename}");
        Ok(self
            .store
            .get(&key)
            .await?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }
}

/// Parse `{user}-{commentTs}.txt` back into its parts.
///
/// The date is the fixed-width 20-char ISO-Z tail, so usernames containing
/// `-` parse correctly.
fn parse_comment_filename(filename: &str) -> Option<CommentInfo> {
    let stem = filename.strip_suffix(".txt")?;
    if stem.len() < TIMESTAMP_LEN + 2 {
        return None;
    }
    let (head, date) = stem.split_at(stem.len() - TIMESTAMP_LEN);
    let user = head.strip_suffix('-')?;
    if user.is_empty() {
        return None;
    }
    Some(CommentInfo {
        filename: filename.to_string(),
        user: user.to_string(),
        date: date.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    fn store() -> CatalogStore<MemoryStore> {
        CatalogStore::new(MemoryStore::new("catalogs"), StoreCredentials::default())
    }

    #[test]
    fn timestamp_is_fixed_width_utc() {
        let ts = now_timestamp();
        assert_eq!(ts.len(), TIMESTAMP_LEN);
        assert!(ts.ends_with('Z'));
        assert_eq!(&ts[4..5], "-");
        assert_eq!(&ts[10..11], "T");
    }

    #[test]
    fn comment_filename_roundtrip() {
        let info = parse_comment_filename("alice-2024-01-15T10:00:00Z.txt").unwrap();
        assert_eq!(info.user, "alice");
        assert_eq!(info.date, "2024-01-15T10:00:00Z");

        // Usernames with dashes survive the fixed-width parse.
        let info = parse_comment_filename("mary-anne-2024-01-15T10:00:00Z.txt").unwrap();
        assert_eq!(info.user, "mary-anne");

        assert!(parse_comment_filename("garbage.txt").is_none());
        assert!(parse_comment_filename("-2024-01-15T10:00:00Z.txt").is_none());
    }

    #[tokio::test]
    async fn html_roundtrip_verbatim() {
        let cat = store();
        let uri = cat
            .write_html("cust/db", "2024-01-15T10:00:00Z", "catalog.html", "<h1>T</h1>")
            .await
            .unwrap();
        assert_eq!(uri, "s3://catalogs/cust/db/2024-01-15T10:00:00Z/catalog.html");

        let content = cat
            .read_html("cust/db", "2024-01-15T10:00:00Z", "catalog.html")
            .await
            .unwrap();
        assert_eq!(content, "<h1>T</h1>");
    }

    #[tokio::test]
    async fn read_html_missing_is_not_found() {
        let cat = store();
        let err = cat
            .read_html("cust/db", "2024-01-15T10:00:00Z", "catalog.html")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { key } if key.contains("catalog.html")));
    }

    #[tokio::test]
    async fn read_script_missing_is_none() {
        let cat = store();
        let script = cat
            .read_script("cust/db", "2024-01-15T10:00:00Z", "catalog_script.py")
            .await
            .unwrap();
        assert!(script.is_none());
    }

    #[tokio::test]
    async fn script_roundtrip_verbatim() {
        let cat = store();
        let body = "# === Code Block 1 ===\nx = 10\n";
        cat.write_script("cust/db", "2024-01-15T10:00:00Z", "catalog_script.py", body)
            .await
            .unwrap();
        let back = cat
            .read_script("cust/db", "2024-01-15T10:00:00Z", "catalog_script.py")
            .await
            .unwrap();
        assert_eq!(back.as_deref(), Some(body));
    }

    #[tokio::test]
    async fn timestamps_list_newest_first() {
        let cat = store();
        for ts in [
            "2024-01-15T10:00:00Z",
            "2024-03-01T08:30:00Z",
            "2024-02-20T23:59:59Z",
        ] {
            cat.write_html("cust/db", ts, "catalog.html", "x").await.unwrap();
        }

        let timestamps = cat.list_timestamps("cust/db", 10).await.unwrap();
        assert_eq!(
            timestamps,
            vec![
                "2024-03-01T08:30:00Z",
                "2024-02-20T23:59:59Z",
                "2024-01-15T10:00:00Z",
            ]
        );

        let limited = cat.list_timestamps("cust/db", 1).await.unwrap();
        assert_eq!(limited, vec!["2024-03-01T08:30:00Z"]);
    }

    #[tokio::test]
    async fn list_timestamps_empty_prefix_is_empty() {
        let cat = store();
        assert!(cat.list_timestamps("nobody/nothing", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_prefixes_walks_two_levels() {
        let cat = store();
        cat.write_html("acme/orders", "2024-01-15T10:00:00Z", "catalog.html", "x")
            .await
            .unwrap();
        cat.write_html("acme/billing", "2024-01-15T10:00:00Z", "catalog.html", "x")
            .await
            .unwrap();
        cat.write_html("globex/crm", "2024-01-15T10:00:00Z", "catalog.html", "x")
            .await
            .unwrap();

        let prefixes = cat.list_prefixes(10).await.unwrap();
        assert_eq!(prefixes, vec!["acme/billing", "acme/orders", "globex/crm"]);
    }

    #[tokio::test]
    async fn list_catalogs_filters_html() {
        let cat = store();
        let ts = "2024-01-15T10:00:00Z";
        cat.write_html("cust/db", ts, "catalog.html", "x").await.unwrap();
        cat.write_html("cust/db", ts, "recent_summary.html", "y").await.unwrap();
        cat.write_script("cust/db", ts, "catalog_script.py", "z").await.unwrap();

        let catalogs = cat.list_catalogs("cust/db", ts).await.unwrap();
        let names: Vec<&str> = catalogs.iter().map(|c| c.filename.as_str()).collect();
        assert_eq!(names, vec!["catalog.html", "recent_summary.html"]);
    }

    #[tokio::test]
    async fn list_all_files_categorizes() {
        let cat = store();
        let ts = "2024-01-15T10:00:00Z";
        cat.write_html("cust/db", ts, "catalog.html", "x").await.unwrap();
        cat.write_script("cust/db", ts, "catalog_script.py", "y").await.unwrap();
        cat.write_comment("cust/db", ts, "alice", "looks good").await.unwrap();
        cat.inner()
            .put(
                &format!("cust/db/{ts}/notes.json"),
                b"{}".to_vec(),
                "application/json",
            )
            .await
            .unwrap();

        let files = cat.list_all_files("cust/db", ts).await.unwrap();
        assert_eq!(files.html.len(), 1);
        assert_eq!(files.scripts.len(), 1);
        assert_eq!(files.comments.len(), 1);
        assert_eq!(files.other.len(), 1);
        assert_eq!(files.other[0].filename, "notes.json");
    }

    #[tokio::test]
    async fn comments_roundtrip() {
        let cat = store();
        let ts = "2024-01-15T10:00:00Z";
        let receipt = cat
            .write_comment("cust/db", ts, "alice", "add row counts")
            .await
            .unwrap();
        assert_eq!(receipt.user, "alice");
        assert!(receipt.uri.contains("/comments/alice-"));

        let comments = cat.list_comments("cust/db", ts).await.unwrap();
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].user, "alice");

        let body = cat
            .read_comment("cust/db", ts, &comments[0].filename)
            .await
            .unwrap();
        assert_eq!(body.as_deref(), Some("add row counts"));
    }

    #[tokio::test]
    async fn get_latest_script_walks_back() {
        let cat = store();
        // Older run has a script, newest run has none.
        cat.write_script(
            "cust/db",
            "2024-01-15T10:00:00Z",
            "catalog_script.py",
            "old script",
        )
        .await
        .unwrap();
        cat.write_html("cust/db", "2024-02-15T10:00:00Z", "catalog.html", "x")
            .await
            .unwrap();

        let found = cat
            .get_latest_script("cust/db", "catalog_script.py")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.0, "2024-01-15T10:00:00Z");
        assert_eq!(found.1, "old script");

        let missing = cat
            .get_latest_script("cust/db", "summary_script.py")
            .await
            .unwrap();
        assert!(missing.is_none());
    }
}
