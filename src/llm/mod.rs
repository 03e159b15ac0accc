//! LLM provider interface
//!
//! The orchestrator treats the model as an opaque text and tool-selection
//! oracle. Which model or vendor sits behind it is configuration.

use crate::error::OrchestrationError;
use crate::models::ToolCall;
use crate::tools::ToolDescriptor;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub mod gemini;
pub use gemini::GeminiProvider;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Set on `Tool` messages: which tool produced this content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(ChatRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content)
    }

    pub fn assistant_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::new(ChatRole::Assistant, "")
        }
    }

    pub fn tool_result(tool_name: &str, content: impl Into<String>) -> Self {
        Self {
            tool_name: Some(tool_name.to_string()),
            ..Self::new(ChatRole::Tool, content)
        }
    }
}

/// Tool advertisement in provider-neutral form
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl From<&ToolDescriptor> for ToolSpec {
    fn from(descriptor: &ToolDescriptor) -> Self {
        Self {
            name: descriptor.name.clone(),
            description: descriptor.description.clone(),
            parameters: descriptor.schema.to_json_schema(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

impl LlmResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Trimmed text, `None` when blank
    pub fn text_content(&self) -> Option<&str> {
        self.content
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn model(&self) -> &str;

    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolSpec]>,
    ) -> Result<LlmResponse>;
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub timeout: Duration,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            timeout: Duration::from_secs(30),
            base_backoff: Duration::from_millis(500),
        }
    }
}

/// Adds a per-call timeout and bounded exponential-backoff retries.
///
/// Only transient failures are retried; a malformed response or a
/// rejected request is returned immediately.
pub struct RetryingProvider {
    inner: Arc<dyn LlmProvider>,
    policy: RetryPolicy,
}

impl RetryingProvider {
    pub fn new(inner: Arc<dyn LlmProvider>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl LlmProvider for RetryingProvider {
    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolSpec]>,
    ) -> Result<LlmResponse> {
        let mut attempt: u32 = 0;

        loop {
            let outcome =
                match tokio::time::timeout(self.policy.timeout, self.inner.complete(messages, tools))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(OrchestrationError::ProviderUnavailable(format!(
                        "{} timed out after {:?}",
                        self.inner.model(),
                        self.policy.timeout
                    ))),
                };

            match outcome {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < self.policy.max_retries => {
                    let backoff = self.policy.base_backoff * 2u32.saturating_pow(attempt);
                    warn!(
                        model = self.inner.model(),
                        attempt = attempt + 1,
                        error = %e,
                        backoff_ms = backoff.as_millis() as u64,
                        "LLM call failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) if e.is_retryable() => {
                    return Err(OrchestrationError::ProviderUnavailable(format!(
                        "giving up after {} attempts: {}",
                        attempt + 1,
                        e
                    )));
                }
                Err(e) => return Err(e),
            }
        }
    }
}
