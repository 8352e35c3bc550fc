//! Bounded tool-call loop.
//!
//! The service may answer a tool-enabled request with tool calls instead of
//! text. The loop executes them, feeds the results back and asks again, for
//! at most `max_rounds` rounds. The round counter is plain state carried by
//! the loop, so an endlessly tool-hungry model still terminates.

use async_trait::async_trait;
use tracing::debug;

use crate::error::LlmResult;
use crate::observability::ToolInvocation;
use crate::service::ReasoningService;
use crate::types::{ChatMessage, Completion, SamplingOptions, TokenUsage, ToolCall, ToolDefinition};

/// Executes tool calls on behalf of the reasoning service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Run one call and return the text handed back to the service.
    async fn handle(&self, call: &ToolCall) -> String;
}

/// Result of a finished loop.
#[derive(Debug, Clone)]
pub struct ToolLoopOutcome {
    /// The last reply received. May still carry tool calls when the round
    /// ceiling was hit.
    pub completion: Completion,
    pub rounds: u32,
    pub invocations: Vec<ToolInvocation>,
    pub usage: TokenUsage,
}

impl ToolLoopOutcome {
    pub fn hit_ceiling(&self) -> bool {
        self.completion.has_tool_calls()
    }
}

/// Loop configuration.
#[derive(Debug, Clone, Copy)]
pub struct ToolLoop {
    pub max_rounds: u32,
}

impl Default for ToolLoop {
    fn default() -> Self {
        Self { max_rounds: 3 }
    }
}

impl ToolLoop {
    pub fn new(max_rounds: u32) -> Self {
        Self { max_rounds }
    }

    /// Drive the conversation until the service stops calling tools or the
    /// round ceiling is reached.
    pub async fn run(
        &self,
        service: &dyn ReasoningService,
        mut messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
        handler: &dyn ToolHandler,
        options: &SamplingOptions,
    ) -> LlmResult<ToolLoopOutcome> {
        let mut completion = service.complete_with_tools(&messages, tools, options).await?;
        let mut usage = completion.usage;
        let mut invocations = Vec::new();
        let mut rounds = 0;

        while completion.has_tool_calls() && rounds < self.max_rounds {
            rounds += 1;
            debug!(round = rounds, calls = completion.tool_calls.len(), "Executing tool calls");

            messages.push(ChatMessage::assistant_tool_calls(
                completion.content.clone(),
                completion.tool_calls.clone(),
            ));

            for call in &completion.tool_calls {
                let result = handler.handle(call).await;
                invocations.push(ToolInvocation {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                    result: result.clone(),
                });
                messages.push(ChatMessage::tool_result(&call.id, result));
            }

            completion = service.complete_with_tools(&messages, tools, options).await?;
            usage.add(completion.usage);
        }

        Ok(ToolLoopOutcome {
            completion,
            rounds,
            invocations,
            usage,
        })
    }
}
