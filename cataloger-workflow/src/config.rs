//! Environment-driven service configuration.
//!
//! Agent prompts arrive base64-encoded so multi-line prompt text survives
//! every env-file and orchestrator quoting convention on the way in.

use crate::error::WorkflowError;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::path::PathBuf;

/// Everything the service reads from its environment at startup.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Sandbox image (`SANDBOX_IMAGE`).
    pub sandbox_image: String,
    /// Sandbox pool size bound (`POOL_SIZE`).
    pub pool_size: usize,
    /// Docker network for sandboxes (`DOCKER_NETWORK`).
    pub docker_network: Option<String>,
    /// Host directory mounted read-only at `/data` (`HOST_DATA_DIR`).
    pub data_dir: Option<String>,
    /// Artifact bucket (`OBJECT_STORE_BUCKET`).
    pub bucket: String,
    /// Store region (`OBJECT_STORE_REGION`).
    pub region: String,
    /// Endpoint override for local backends (`OBJECT_STORE_ENDPOINT`).
    pub endpoint: Option<String>,
    /// Store access key (`OBJECT_STORE_ACCESS_KEY_ID`).
    pub access_key_id: Option<String>,
    /// Store secret key (`OBJECT_STORE_SECRET_ACCESS_KEY`).
    pub secret_access_key: Option<String>,
    /// Model provider API key (`LLM_API_KEY`).
    pub llm_api_key: String,
    /// Model override (`MODEL_NAME`).
    pub model_name: Option<String>,
    /// Decoded cataloging prompt (`CATALOGING_AGENT_PROMPT`, base64).
    pub cataloging_prompt: String,
    /// Decoded summary prompt (`SUMMARY_AGENT_PROMPT`, base64).
    pub summary_prompt: String,
    /// Step-journal directory (`RUN_JOURNAL_DIR`).
    pub journal_dir: PathBuf,
}

impl ServiceConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, WorkflowError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read configuration through a lookup function (testable seam).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, WorkflowError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |var: &str| {
            lookup(var)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| WorkflowError::ConfigMissing {
                    var: var.to_string(),
                })
        };
        let optional = |var: &str| lookup(var).filter(|v| !v.is_empty());

        let pool_size = match optional("POOL_SIZE") {
            Some(raw) => raw.parse().map_err(|_| WorkflowError::ConfigInvalid {
                var: "POOL_SIZE".into(),
                reason: format!("not a number: {raw}"),
            })?,
            None => 5,
        };

        Ok(Self {
            sandbox_image: optional("SANDBOX_IMAGE")
                .unwrap_or_else(|| "cataloger-agent:latest".into()),
            pool_size,
            docker_network: optional("DOCKER_NETWORK"),
            data_dir: optional("HOST_DATA_DIR"),
            bucket: required("OBJECT_STORE_BUCKET")?,
            region: optional("OBJECT_STORE_REGION").unwrap_or_else(|| "us-east-1".into()),
            endpoint: optional("OBJECT_STORE_ENDPOINT"),
            access_key_id: optional("OBJECT_STORE_ACCESS_KEY_ID"),
            secret_access_key: optional("OBJECT_STORE_SECRET_ACCESS_KEY"),
            llm_api_key: required("LLM_API_KEY")?,
            model_name: optional("MODEL_NAME"),
            cataloging_prompt: decode_prompt(
                "CATALOGING_AGENT_PROMPT",
                required("CATALOGING_AGENT_PROMPT")?,
            )?,
            summary_prompt: decode_prompt(
                "SUMMARY_AGENT_PROMPT",
                required("SUMMARY_AGENT_PROMPT")?,
            )?,
            journal_dir: optional("RUN_JOURNAL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| std::env::temp_dir().join("cataloger-journal")),
        })
    }
}

/// Decode a base64-encoded prompt variable into plain text.
fn decode_prompt(var: &str, encoded: String) -> Result<String, WorkflowError> {
    let bytes = BASE64
        .decode(encoded.trim())
        .map_err(|e| WorkflowError::ConfigInvalid {
            var: var.to_string(),
            reason: format!("invalid base64: {e}"),
        })?;
    String::from_utf8(bytes).map_err(|e| WorkflowError::ConfigInvalid {
        var: var.to_string(),
        reason: format!("prompt is not UTF-8: {e}"),
    })
}
