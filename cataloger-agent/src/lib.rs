#![deny(missing_docs)]
//! Model-driven tool-use loop over a sandboxed code-execution session.
//!
//! The loop drives a provider through a conversation with exactly two
//! tools until the model submits an artifact. Kernel failures and
//! truncated tool calls are recovered in-band: they come back to the model
//! as tool-result text and the conversation continues. The only successful
//! termination is a well-formed `submit_artifact` call.

pub mod context;
pub mod error;
pub mod tools;

pub use context::{CatalogContext, SummaryContext, opening_message};
pub use error::AgentError;
pub use tools::{EXECUTE_CODE, SUBMIT_ARTIFACT, tool_schemas};

use cataloger_model::{
    ContentPart, Provider, ProviderMessage, ProviderRequest, Role, StopReason, TokenUsage,
};
use cataloger_sandbox::{SandboxError, SandboxRuntime};
use serde::Serialize;

/// Hard cap on outer-loop iterations, independent of the token budget.
const MAX_ITERATIONS: u32 = 50;

/// Reply sent when an `execute_code` call arrives without its `code` field.
const TRUNCATED_EXECUTE: &str =
    "Error: execute_code call was truncated. Please retry with complete code.";

/// Reply sent when a `submit_artifact` call arrives without its `content` field.
const TRUNCATED_SUBMIT: &str =
    "Error: submit_artifact call was truncated. Please retry with complete content.";

/// Static configuration for one agent run.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Model identifier (None = provider default).
    pub model: Option<String>,
    /// Budget on accumulated output tokens across the whole run.
    pub max_output_tokens: u64,
    /// Per-call generation limit (sized for HTML artifacts).
    pub per_call_max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: None,
            max_output_tokens: 100_000,
            per_call_max_tokens: 8192,
            temperature: 0.0,
        }
    }
}

/// What one dispatched tool call produced.
enum ToolOutcome {
    /// A result block to hand back to the model.
    Reply { content: String, is_error: bool },
    /// A well-formed submission: the loop is done.
    Submit(String),
}

/// The agent loop: one provider, one runtime, one artifact out.
pub struct AgentLoop<'a, P: Provider> {
    provider: &'a P,
    runtime: &'a mut SandboxRuntime,
    config: AgentConfig,
    usage: TokenUsage,
}

impl<'a, P: Provider> AgentLoop<'a, P> {
    /// Build a loop over the given provider and runtime.
    pub fn new(provider: &'a P, runtime: &'a mut SandboxRuntime, config: AgentConfig) -> Self {
        Self {
            provider,
            runtime,
            config,
            usage: TokenUsage::default(),
        }
    }

    /// Accumulated token usage for this run.
    pub fn token_usage(&self) -> &TokenUsage {
        &self.usage
    }

    /// Run until the model submits an artifact; returns its content.
    ///
    /// The runtime is left as the agent's session left it; extracting the
    /// replay script and `reset()`ing between agents is the caller's
    /// responsibility.
    pub async fn run<C: Serialize>(
        &mut self,
        system_prompt: &str,
        context: &C,
    ) -> Result<String, AgentError> {
        let mut messages = vec![ProviderMessage::user_text(opening_message(context))];
        let tools = tool_schemas();

        tracing::info!(
            session = %self.runtime.session_id(),
            "agent loop starting"
        );

        for iteration in 1..=MAX_ITERATIONS {
            let request = ProviderRequest {
                model: self.config.model.clone(),
                messages: messages.clone(),
                tools: tools.clone(),
                max_tokens: Some(self.config.per_call_max_tokens),
                temperature: Some(self.config.temperature),
                system: Some(system_prompt.to_string()),
            };
            let response = self.provider.complete(request).await?;

            self.usage.input_tokens += response.usage.input_tokens;
            self.usage.output_tokens += response.usage.output_tokens;

            tracing::info!(
                iteration,
                stop_reason = ?response.stop_reason,
                input_tokens = response.usage.input_tokens,
                output_tokens = response.usage.output_tokens,
                total_output = self.usage.output_tokens,
                "agent iteration"
            );

            if self.usage.output_tokens > self.config.max_output_tokens {
                return Err(AgentError::TokenBudgetExceeded {
                    used: self.usage.output_tokens,
                    budget: self.config.max_output_tokens,
                });
            }

            match response.stop_reason {
                StopReason::EndTurn => return Err(AgentError::EndedWithoutSubmit),
                StopReason::ContentFilter => return Err(AgentError::ContentFiltered),
                StopReason::ToolUse => {
                    if let Some(submitted) = self
                        .dispatch_tools(&response.content, &mut messages)
                        .await?
                    {
                        tracing::info!(iteration, "agent submitted artifact");
                        return Ok(submitted);
                    }
                }
                StopReason::MaxTokens => {
                    // Tool calls can be complete even when trailing text was
                    // cut off. With none present, the truncated text is
                    // discarded and the loop retries.
                    let has_tool_calls = response
                        .content
                        .iter()
                        .any(|part| matches!(part, ContentPart::ToolUse { .. }));
                    if has_tool_calls {
                        if let Some(submitted) = self
                            .dispatch_tools(&response.content, &mut messages)
                            .await?
                        {
                            tracing::info!(iteration, "agent submitted artifact");
                            return Ok(submitted);
                        }
                    } else {
                        tracing::warn!(iteration, "per-call token limit hit, retrying");
                    }
                }
            }
        }

        Err(AgentError::MaxIterationsExceeded {
            limit: MAX_ITERATIONS,
        })
    }

    /// Dispatch every tool-use block in an assistant message, then append
    /// the assistant message and one user message carrying the results.
    ///
    /// Returns `Some(content)` when a well-formed submission terminated the
    /// run.
    async fn dispatch_tools(
        &mut self,
        content: &[ContentPart],
        messages: &mut Vec<ProviderMessage>,
    ) -> Result<Option<String>, AgentError> {
        let mut results = Vec::new();

        for part in content {
            let ContentPart::ToolUse { id, name, input } = part else {
                continue;
            };
            tracing::debug!(tool = %name, "agent tool call");
            match self.handle_tool_call(name, input).await? {
                ToolOutcome::Submit(artifact) => return Ok(Some(artifact)),
                ToolOutcome::Reply { content, is_error } => {
                    results.push(ContentPart::ToolResult {
                        tool_use_id: id.clone(),
                        content,
                        is_error,
                    });
                }
            }
        }

        messages.push(ProviderMessage {
            role: Role::Assistant,
            content: content.to_vec(),
        });
        messages.push(ProviderMessage {
            role: Role::User,
            content: results,
        });
        Ok(None)
    }

    /// Handle one tool call. Kernel-level failures become reply text; only
    /// fatal sandbox conditions propagate.
    async fn handle_tool_call(
        &mut self,
        name: &str,
        input: &serde_json::Value,
    ) -> Result<ToolOutcome, AgentError> {
        match name {
            EXECUTE_CODE => {
                let Some(code) = input.get("code").and_then(|v| v.as_str()) else {
                    return Ok(ToolOutcome::Reply {
                        content: TRUNCATED_EXECUTE.into(),
                        is_error: false,
                    });
                };
                match self.runtime.execute(code).await {
                    Ok(output) => Ok(ToolOutcome::Reply {
                        content: output,
                        is_error: false,
                    }),
                    Err(SandboxError::Execution(payload)) => Ok(ToolOutcome::Reply {
                        content: format!("Execution error:\n{payload}"),
                        is_error: true,
                    }),
                    Err(timeout @ SandboxError::Timeout { .. }) => Ok(ToolOutcome::Reply {
                        content: format!("Execution error:\n{timeout}"),
                        is_error: true,
                    }),
                    Err(fatal) => Err(fatal.into()),
                }
            }
            SUBMIT_ARTIFACT => match input.get("content").and_then(|v| v.as_str()) {
                Some(artifact) => Ok(ToolOutcome::Submit(artifact.to_string())),
                None => Ok(ToolOutcome::Reply {
                    content: TRUNCATED_SUBMIT.into(),
                    is_error: false,
                }),
            },
            other => Ok(ToolOutcome::Reply {
                content: format!("Unknown tool: {other}"),
                is_error: true,
            }),
        }
    }
}
