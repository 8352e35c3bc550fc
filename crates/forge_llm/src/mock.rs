//! Scripted reasoning service for testing.
//!
//! Replies are handed out in the order they were scripted and every request
//! is captured, so tests can assert both what the pipeline did with a reply
//! and what it sent. Running out of script is a network error, which makes
//! "this path must not call the service" easy to check.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{LlmError, LlmResult};
use crate::service::ReasoningService;
use crate::types::{ChatMessage, Completion, SamplingOptions, TokenUsage, ToolCall, ToolDefinition};

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    ToolCalls {
        content: Option<String>,
        calls: Vec<ToolCall>,
    },
    Failure(String),
}

impl ScriptedReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text(content.into())
    }

    /// A JSON value rendered as reply text.
    pub fn json(value: serde_json::Value) -> Self {
        Self::Text(value.to_string())
    }

    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self::ToolCalls {
            content: None,
            calls,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure(message.into())
    }
}

/// Captured request information for verification.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<String>,
    pub options: SamplingOptions,
}

impl CapturedRequest {
    /// Text of the first system turn.
    pub fn system_prompt(&self) -> &str {
        self.messages
            .iter()
            .find(|m| m.role == crate::types::Role::System)
            .map(ChatMessage::text)
            .unwrap_or("")
    }

    /// Text of the last user turn.
    pub fn user_payload(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == crate::types::Role::User)
            .map(ChatMessage::text)
            .unwrap_or("")
    }
}

/// Reasoning service that replays a script.
#[derive(Clone, Default)]
pub struct ScriptedReasoner {
    replies: Arc<RwLock<VecDeque<ScriptedReply>>>,
    requests: Arc<RwLock<Vec<CapturedRequest>>>,
}

impl ScriptedReasoner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply.
    pub fn reply(self, reply: ScriptedReply) -> Self {
        self.replies.write().push_back(reply);
        self
    }

    /// Replace the whole script.
    pub fn with_replies(self, replies: Vec<ScriptedReply>) -> Self {
        *self.replies.write() = replies.into();
        self
    }

    /// Queue a reply on a shared handle.
    pub fn push(&self, reply: ScriptedReply) {
        self.replies.write().push_back(reply);
    }

    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.read().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.read().len()
    }

    pub fn remaining(&self) -> usize {
        self.replies.read().len()
    }

    fn answer(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        options: &SamplingOptions,
    ) -> LlmResult<Completion> {
        self.requests.write().push(CapturedRequest {
            messages: messages.to_vec(),
            tools: tools.iter().map(|t| t.name.clone()).collect(),
            options: *options,
        });

        let next = self.replies.write().pop_front();
        let usage = TokenUsage {
            prompt_tokens: 10,
            completion_tokens: 5,
        };
        match next {
            Some(ScriptedReply::Text(text)) => {
                let mut completion = Completion::text(text, self.model());
                completion.usage = usage;
                Ok(completion)
            }
            Some(ScriptedReply::ToolCalls { content, calls }) => {
                let mut completion = Completion::with_tool_calls(calls, self.model());
                completion.content = content;
                completion.usage = usage;
                Ok(completion)
            }
            Some(ScriptedReply::Failure(message)) => Err(LlmError::Network(message)),
            None => Err(LlmError::Network("script exhausted".to_string())),
        }
    }
}

#[async_trait]
impl ReasoningService for ScriptedReasoner {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &SamplingOptions,
    ) -> LlmResult<Completion> {
        self.answer(messages, &[], options)
    }

    async fn complete_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        options: &SamplingOptions,
    ) -> LlmResult<Completion> {
        self.answer(messages, tools, options)
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replies_in_order() {
        let service = ScriptedReasoner::new()
            .reply(ScriptedReply::text("first"))
            .reply(ScriptedReply::text("second"));

        let options = SamplingOptions::default();
        let a = service.complete(&[ChatMessage::user("1")], &options).await.unwrap();
        let b = service.complete(&[ChatMessage::user("2")], &options).await.unwrap();

        assert_eq!(a.text_or_empty(), "first");
        assert_eq!(b.text_or_empty(), "second");
        assert_eq!(service.requests()[1].user_payload(), "2");
    }

    #[tokio::test]
    async fn test_exhausted_script_fails() {
        let service = ScriptedReasoner::new();
        let result = service
            .complete(&[ChatMessage::user("x")], &SamplingOptions::default())
            .await;
        assert!(matches!(result, Err(LlmError::Network(_))));
        assert_eq!(service.call_count(), 1);
    }

    #[tokio::test]
    async fn test_failure_reply() {
        let service = ScriptedReasoner::new().reply(ScriptedReply::failure("timeout"));
        let err = service
            .complete(&[ChatMessage::user("x")], &SamplingOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_transport());
    }
}
