//! The reasoning service capability.

use async_trait::async_trait;

use crate::error::LlmResult;
use crate::types::{ChatMessage, Completion, SamplingOptions, ToolDefinition};

/// A backing model that turns a conversation into a completion.
///
/// Implementations must be safe to share between concurrent pipeline runs.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    /// Plain completion without tools.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &SamplingOptions,
    ) -> LlmResult<Completion>;

    /// Completion with a tool catalog. The reply may carry tool calls
    /// instead of (or alongside) text.
    async fn complete_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        options: &SamplingOptions,
    ) -> LlmResult<Completion>;

    /// Model identifier used for logging.
    fn model(&self) -> &str;
}
