//! Request/response mapping between cataloger-model types and the Anthropic
//! Messages API format.
//!
//! Reference: <https://docs.anthropic.com/en/api/messages>

use cataloger_model::{
    ContentPart, ProviderError, ProviderMessage, ProviderRequest, ProviderResponse, Role,
    StopReason, TokenUsage, ToolSchema,
};

// ─── Request mapping ─────────────────────────────────────────────────────────

/// Convert a [`ProviderRequest`] into the Anthropic Messages API JSON body.
#[must_use]
pub(crate) fn to_api_request(req: &ProviderRequest, default_model: &str) -> serde_json::Value {
    let model = req.model.clone().unwrap_or_else(|| default_model.to_string());

    let mut body = serde_json::json!({
        "model": model,
        "messages": map_messages(&req.messages),
        "max_tokens": req.max_tokens.unwrap_or(4096),
    });

    if let Some(system) = &req.system {
        body["system"] = serde_json::Value::String(system.clone());
    }

    if let Some(temp) = req.temperature {
        body["temperature"] = serde_json::Value::from(temp);
    }

    if !req.tools.is_empty() {
        body["tools"] = serde_json::Value::Array(req.tools.iter().map(map_tool_schema).collect());
    }

    body
}

/// Map a list of [`ProviderMessage`]s to Anthropic's message array format.
fn map_messages(messages: &[ProviderMessage]) -> serde_json::Value {
    let arr: Vec<serde_json::Value> = messages
        .iter()
        .map(|msg| {
            let role_str = match msg.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            let content: Vec<serde_json::Value> =
                msg.content.iter().map(map_content_part).collect();
            serde_json::json!({ "role": role_str, "content": content })
        })
        .collect();
    serde_json::Value::Array(arr)
}

/// Map a single [`ContentPart`] to its Anthropic JSON representation.
fn map_content_part(part: &ContentPart) -> serde_json::Value {
    match part {
        ContentPart::Text { text } => serde_json::json!({
            "type": "text",
            "text": text,
        }),
        ContentPart::ToolUse { id, name, input } => serde_json::json!({
            "type": "tool_use",
            "id": id,
            "name": name,
            "input": input,
        }),
        ContentPart::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => serde_json::json!({
            "type": "tool_result",
            "tool_use_id": tool_use_id,
            "content": content,
            "is_error": is_error,
        }),
    }
}

/// Map a [`ToolSchema`] to Anthropic's tool definition format.
fn map_tool_schema(tool: &ToolSchema) -> serde_json::Value {
    serde_json::json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": tool.input_schema,
    })
}

// ─── Response mapping ─────────────────────────────────────────────────────────

/// Parse an Anthropic Messages API response JSON into a [`ProviderResponse`].
///
/// # Errors
///
/// Returns [`ProviderError::InvalidResponse`] if required fields are missing
/// or malformed.
pub(crate) fn from_api_response(
    body: &serde_json::Value,
) -> Result<ProviderResponse, ProviderError> {
    let model = body["model"]
        .as_str()
        .ok_or_else(|| ProviderError::InvalidResponse("missing 'model' in response".into()))?
        .to_string();

    let content_arr = body["content"].as_array().ok_or_else(|| {
        ProviderError::InvalidResponse("missing 'content' array in response".into())
    })?;

    let mut content = Vec::with_capacity(content_arr.len());
    for block in content_arr {
        content.push(parse_content_block(block)?);
    }

    let usage = TokenUsage {
        input_tokens: body["usage"]["input_tokens"].as_u64().unwrap_or(0),
        output_tokens: body["usage"]["output_tokens"].as_u64().unwrap_or(0),
    };

    let stop_reason = body["stop_reason"]
        .as_str()
        .map(parse_stop_reason)
        .unwrap_or(StopReason::EndTurn);

    Ok(ProviderResponse {
        content,
        stop_reason,
        usage,
        model,
    })
}

/// Parse a single content block from the Anthropic response JSON.
fn parse_content_block(block: &serde_json::Value) -> Result<ContentPart, ProviderError> {
    let block_type = block["type"]
        .as_str()
        .ok_or_else(|| ProviderError::InvalidResponse("content block missing 'type'".into()))?;

    match block_type {
        "text" => {
            let text = block["text"]
                .as_str()
                .ok_or_else(|| {
                    ProviderError::InvalidResponse("text block missing 'text'".into())
                })?
                .to_string();
            Ok(ContentPart::Text { text })
        }
        "tool_use" => {
            let id = block["id"]
                .as_str()
                .ok_or_else(|| {
                    ProviderError::InvalidResponse("tool_use block missing 'id'".into())
                })?
                .to_string();
            let name = block["name"]
                .as_str()
                .ok_or_else(|| {
                    ProviderError::InvalidResponse("tool_use block missing 'name'".into())
                })?
                .to_string();
            let input = block["input"].clone();
            Ok(ContentPart::ToolUse { id, name, input })
        }
        other => Err(ProviderError::InvalidResponse(format!(
            "unknown content block type: {other}"
        ))),
    }
}

/// Map an Anthropic `stop_reason` string to a [`StopReason`].
fn parse_stop_reason(reason: &str) -> StopReason {
    match reason {
        "tool_use" => StopReason::ToolUse,
        "max_tokens" => StopReason::MaxTokens,
        "refusal" => StopReason::ContentFilter,
        _ => StopReason::EndTurn,
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
