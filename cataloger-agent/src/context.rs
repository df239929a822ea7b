//! Context documents injected into the opening message.
//!
//! Each agent gets a fixed product; no other keys are ever serialized.

use serde::Serialize;

/// Context for the cataloging agent.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogContext {
    /// Tables the agent should explore.
    pub tables: Vec<String>,
    /// Tag-stripped digest of the previous run, when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_context: Option<String>,
}

/// Context for the trend-summary agent.
#[derive(Debug, Clone, Serialize)]
pub struct SummaryContext {
    /// Prefix grouping this database's runs in the object store.
    pub s3_prefix: String,
    /// Timestamp of the run in progress.
    pub current_timestamp: String,
    /// Tag-stripped digest of the previous run, when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_context: Option<String>,
}

/// Frame a context document as the user-role opening message.
pub fn opening_message<C: Serialize>(context: &C) -> String {
    let doc = serde_json::to_string_pretty(context).unwrap_or_else(|_| "{}".into());
    format!("Context:\n```json\n{doc}\n```\n\nBegin your analysis.")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_context_serializes_only_known_keys() {
        let ctx = CatalogContext {
            tables: vec!["orders".into(), "users".into()],
            previous_context: None,
        };
        let value = serde_json::to_value(&ctx).unwrap();
        let keys: Vec<&String> = value.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["tables"]);
    }

    #[test]
    fn summary_context_includes_previous_when_present() {
        let ctx = SummaryContext {
            s3_prefix: "cust/db".into(),
            current_timestamp: "2024-01-15T10:00:00Z".into(),
            previous_context: Some("prior notes".into()),
        };
        let value = serde_json::to_value(&ctx).unwrap();
        assert_eq!(value["s3_prefix"], "cust/db");
        assert_eq!(value["previous_context"], "prior notes");
    }

    #[test]
    fn opening_message_is_fenced_and_cued() {
        let ctx = CatalogContext {
            tables: vec!["orders".into()],
            previous_context: None,
        };
        let msg = opening_message(&ctx);
        assert!(msg.starts_with("Context:\n```json\n"));
        assert!(msg.ends_with("\n```\n\nBegin your analysis."));
        assert!(msg.contains("\"orders\""));
    }
}
