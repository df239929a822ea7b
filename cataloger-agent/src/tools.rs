//! Tool schemas for agent execution.
//!
//! The surface is exactly two tools. `execute_code` keeps the schema tiny
//! and the session trace deterministic (one replay script per run);
//! `submit_artifact` is the only successful exit from the loop.

use cataloger_model::ToolSchema;
use serde_json::json;

/// Name of the code-execution tool.
pub const EXECUTE_CODE: &str = "execute_code";

/// Name of the artifact-submission tool.
pub const SUBMIT_ARTIFACT: &str = "submit_artifact";

/// The schemas sent verbatim to the model on every call.
pub fn tool_schemas() -> Vec<ToolSchema> {
    vec![
        ToolSchema {
            name: EXECUTE_CODE.into(),
            description: concat!(
                "Execute Python code in a persistent session. ",
                "State persists across calls, like IPython. ",
                "Returns a single output stream with expression results, print statements, and errors. ",
                "Available libraries: ibis, boto3, polars, pandas. ",
                "Environment variables: DB_CONNECTION_STRING, AWS_* for object-store access, S3_BUCKET."
            )
            .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "code": {
                        "type": "string",
                        "description": "Python code to execute",
                    }
                },
                "required": ["code"],
            }),
        },
        ToolSchema {
            name: SUBMIT_ARTIFACT.into(),
            description: concat!(
                "Submit the final HTML report. This terminates the agent loop. ",
                "The HTML should be a complete, self-contained document with inline CSS. ",
                "Keep tables to ~20 rows for readability."
            )
            .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "content": {
                        "type": "string",
                        "description": "Complete HTML document",
                    }
                },
                "required": ["content"],
            }),
        },
    ]
}
