#![deny(missing_docs)]
//! Context assembly: bundle the previous run into one HTML document.
//!
//! The bundle is injected as `previous_context` into the next run's agents.
//! Section order is deliberate: human feedback first, then the prior
//! artifacts verbatim, then the replay scripts escaped into `<pre>` blocks.
//! Missing components are silently omitted, except the comments section,
//! which always renders (an explicit "no feedback" line teaches the model
//! the difference between "no feedback" and "unknown").

mod strip;

pub use strip::strip_tags;

use cataloger_store::{CatalogStore, ObjectStore, StoreError};

/// Produce the context document for `prefix`.
///
/// With no explicit `timestamp`, the newest run under the prefix is used;
/// with no prior run at all, the empty-context document is returned.
pub async fn assemble<S: ObjectStore>(
    store: &CatalogStore<S>,
    prefix: &str,
    timestamp: Option<&str>,
) -> Result<String, StoreError> {
    let timestamp = match timestamp {
        Some(ts) => ts.to_string(),
        None => match store.list_timestamps(prefix, 1).await?.into_iter().next() {
            Some(ts) => ts,
            None => {
                tracing::info!(prefix = %prefix, "no previous run");
                return Ok(empty_context(prefix));
            }
        },
    };

    tracing::info!(prefix = %prefix, timestamp = %timestamp, "assembling context");

    let catalog_html = optional_html(store, prefix, &timestamp, "catalog.html").await?;
    let summary_html = optional_html(store, prefix, &timestamp, "recent_summary.html").await?;
    let catalog_script = store
        .read_script(prefix, &timestamp, "catalog_script.py")
        .await?;
    let summary_script = store
        .read_script(prefix, &timestamp, "summary_script.py")
        .await?;

    let mut comments = Vec::new();
    for info in store.list_comments(prefix, &timestamp).await? {
        if let Some(content) = store.read_comment(prefix, &timestamp, &info.filename).await? {
            comments.push((info.user, info.date, content));
        }
    }

    let doc = build_document(
        prefix,
        &timestamp,
        catalog_html.as_deref(),
        summary_html.as_deref(),
        catalog_script.as_deref(),
        summary_script.as_deref(),
        &comments,
    );
    tracing::info!(prefix = %prefix, timestamp = %timestamp, size = doc.len(), "context assembled");
    Ok(doc)
}

/// Strict read downgraded to optional: absence is omission, everything else
/// propagates.
async fn optional_html<S: ObjectStore>(
    store: &CatalogStore<S>,
    prefix: &str,
    timestamp: &str,
    filename: &str,
) -> Result<Option<String>, StoreError> {
    match store.read_html(prefix, timestamp, filename).await {
        Ok(content) => Ok(Some(content)),
        Err(StoreError::NotFound { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Escape HTML special characters.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

const STYLE: &str = r#"        body {
            font-family: sans-serif;
            max-width: 1200px;
            margin: 40px auto;
            padding: 20px;
            line-height: 1.6;
        }
        h1 { color: #333; border-bottom: 2px solid #2563eb; padding-bottom: 10px; }
        h2 { color: #2563eb; margin-top: 40px; }
        h3 { color: #666; }
        .section { margin-bottom: 40px; }
        .timestamp { color: #666; font-size: 0.9em; }
        .comment {
            background: #f8fafc;
            border-left: 4px solid #2563eb;
            padding: 15px;
            margin: 15px 0;
        }
        .comment-meta { color: #666; font-size: 0.9em; margin-bottom: 8px; }
        .comment-user { font-weight: bold; }
        pre {
            background: #1e293b;
            color: #e2e8f0;
            padding: 15px;
            border-radius: 5px;
            overflow-x: auto;
        }
        .catalog-content {
            border: 1px solid #e2e8f0;
            padding: 20px;
            border-radius: 5px;
            background: #ffffff;
        }
        .empty { color: #666; font-style: italic; }"#;

/// The document emitted when a prefix has no prior runs.
pub fn empty_context(prefix: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>Context Summary - {prefix}</title>
    <style>
{STYLE}
    </style>
</head>
<body>
    <h1>Context Summary: {prefix}</h1>
    <p class="empty">No previous catalog found. This will be the first run.</p>
</body>
</html>"#
    )
}

fn build_document(
    prefix: &str,
    timestamp: &str,
    catalog_html: Option<&str>,
    summary_html: Option<&str>,
    catalog_script: Option<&str>,
    summary_script: Option<&str>,
    comments: &[(String, String, String)],
) -> String {
    let mut sections = Vec::new();

    sections.push(format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>Context Summary - {prefix}</title>
    <style>
{STYLE}
    </style>
</head>
<body>
    <h1>Context Summary: {prefix}</h1>
    <p class="timestamp">Previous catalog from: <strong>{timestamp}</strong></p>"#
    ));

    // Feedback first: it is the most actionable context for the next agent.
    sections.push(r#"<div class="section">"#.into());
    sections.push("<h2>User Comments &amp; Feedback</h2>".into());
    if comments.is_empty() {
        sections.push(r#"<p class="empty">No comments on previous catalog.</p>"#.into());
    } else {
        for (user, date, content) in comments {
            sections.push(format!(
                r#"<div class="comment">
    <div class="comment-meta">
        <span class="comment-user">{}</span>
        <span>({})</span>
    </div>
    <div class="comment-content">{}</div>
</div>"#,
                escape_html(user),
                escape_html(date),
                escape_html(content),
            ));
        }
    }
    sections.push("</div>".into());

    if let Some(catalog) = catalog_html {
        sections.push(r#"<div class="section">"#.into());
        sections.push("<h2>Previous Catalog Results</h2>".into());
        sections.push(r#"<div class="catalog-content">"#.into());
        sections.push(catalog.to_string());
        sections.push("</div>".into());
        sections.push("</div>".into());
    }

    if let Some(summary) = summary_html {
        sections.push(r#"<div class="section">"#.into());
        sections.push("<h2>Previous Summary Analysis</h2>".into());
        sections.push(r#"<div class="catalog-content">"#.into());
        sections.push(summary.to_string());
        sections.push("</div>".into());
        sections.push("</div>".into());
    }

    if catalog_script.is_some() || summary_script.is_some() {
        sections.push(r#"<div class="section">"#.into());
        sections.push("<h2>Python Scripts</h2>".into());
        if let Some(script) = catalog_script {
            sections.push("<h3>Catalog Script</h3>".into());
            sections.push(format!("<pre>{}</pre>", escape_html(script)));
        }
        if let Some(script) = summary_script {
            sections.push("<h3>Summary Script</h3>".into());
            sections.push(format!("<pre>{}</pre>", escape_html(script)));
        }
        sections.push("</div>".into());
    }

    sections.push("</body>".into());
    sections.push("</html>".into());

    sections.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use cataloger_store::{MemoryStore, StoreCredentials};

    const TS: &str = "2024-01-15T10:00:00Z";

    fn store() -> CatalogStore<MemoryStore> {
        CatalogStore::new(MemoryStore::new("catalogs"), StoreCredentials::default())
    }

    #[test]
    fn escape_covers_the_five() {
        assert_eq!(
            escape_html(r#"<a href="x">&'"#),
            "&lt;a href=&quot;x&quot;&gt;&amp;&#x27;"
        );
    }

    #[tokio::test]
    async fn no_previous_run_yields_empty_context() {
        let cat = store();
        let doc = assemble(&cat, "cust/db", None).await.unwrap();
        assert!(doc.contains("No previous catalog found"));
        assert!(doc.contains("Context Summary: cust/db"));
    }

    #[tokio::test]
    async fn full_bundle_in_section_order() {
        let cat = store();
        cat.write_html("cust/db", TS, "catalog.html", "<table>catalog rows</table>")
            .await
            .unwrap();
        cat.write_html("cust/db", TS, "recent_summary.html", "<p>trends</p>")
            .await
            .unwrap();
        cat.write_script("cust/db", TS, "catalog_script.py", "x = 1 < 2")
            .await
            .unwrap();
        cat.write_script("cust/db", TS, "summary_script.py", "y = 2")
            .await
            .unwrap();
        cat.write_comment("cust/db", TS, "alice", "add <row> counts")
            .await
            .unwrap();

        let doc = assemble(&cat, "cust/db", Some(TS)).await.unwrap();

        // Artifact HTML is embedded verbatim; scripts and comments escaped.
        assert!(doc.contains("<table>catalog rows</table>"));
        assert!(doc.contains("<p>trends</p>"));
        assert!(doc.contains("x = 1 &lt; 2"));
        assert!(doc.contains("add &lt;row&gt; counts"));
        assert!(doc.contains(TS));

        let comments_at = doc.find("User Comments").unwrap();
        let catalog_at = doc.find("Previous Catalog Results").unwrap();
        let summary_at = doc.find("Previous Summary Analysis").unwrap();
        let scripts_at = doc.find("Python Scripts").unwrap();
        assert!(comments_at < catalog_at);
        assert!(catalog_at < summary_at);
        assert!(summary_at < scripts_at);
    }

    #[tokio::test]
    async fn missing_pieces_are_omitted_but_comments_always_render() {
        let cat = store();
        cat.write_html("cust/db", TS, "catalog.html", "<b>only catalog</b>")
            .await
            .unwrap();

        let doc = assemble(&cat, "cust/db", Some(TS)).await.unwrap();
        assert!(doc.contains("Previous Catalog Results"));
        assert!(!doc.contains("Previous Summary Analysis"));
        assert!(!doc.contains("Python Scripts"));
        assert!(doc.contains("No comments on previous catalog."));
    }

    #[tokio::test]
    async fn latest_timestamp_is_picked_when_unspecified() {
        let cat = store();
        cat.write_html("cust/db", "2024-01-01T00:00:00Z", "catalog.html", "first-run-body")
            .await
            .unwrap();
        cat.write_html("cust/db", "2024-06-01T00:00:00Z", "catalog.html", "second-run-body")
            .await
            .unwrap();

        let doc = assemble(&cat, "cust/db", None).await.unwrap();
        assert!(doc.contains("2024-06-01T00:00:00Z"));
        assert!(doc.contains("second-run-body"));
        assert!(!doc.contains("first-run-body"));
    }
}
