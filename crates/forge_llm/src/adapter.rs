//! HTTP adapter for hosted reasoning services.
//!
//! Supports OpenAI and Anthropic APIs, selected via environment variables
//! or explicit settings.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::{LlmError, LlmResult};
use crate::service::ReasoningService;
use crate::types::{
    ChatMessage, Completion, FinishReason, Role, SamplingOptions, TokenUsage, ToolCall,
    ToolDefinition,
};

/// LLM provider type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAI,
    Anthropic,
}

impl LlmProvider {
    pub fn parse(name: &str) -> LlmResult<Self> {
        match name.to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "anthropic" => Ok(Self::Anthropic),
            other => Err(LlmError::UnknownProvider(other.to_string())),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::OpenAI => "OpenAI",
            Self::Anthropic => "Anthropic",
        }
    }

    fn key_var(&self) -> &'static str {
        match self {
            Self::OpenAI => "OPENAI_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
        }
    }
}

/// Reasoning service backed by a hosted API.
pub struct LlmAdapter {
    provider: LlmProvider,
    api_key: String,
    model: String,
    base_url: Option<String>,
    client: reqwest::Client,
}

const MAX_RETRIES: u32 = 3;

impl LlmAdapter {
    /// Create a new LLM adapter with explicit configuration
    pub fn new(provider: LlmProvider, api_key: String, model: Option<String>) -> Self {
        let default_model = match provider {
            LlmProvider::OpenAI => "gpt-5-mini".to_string(),
            LlmProvider::Anthropic => "claude-sonnet-4.5".to_string(),
        };

        Self {
            provider,
            api_key,
            model: model.unwrap_or(default_model),
            base_url: None,
            client: reqwest::Client::new(),
        }
    }

    /// Point the adapter at a compatible endpoint instead of the public API.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Create an LLM adapter from environment variables
    ///
    /// Checks `OPENAI_API_KEY`, then `ANTHROPIC_API_KEY`. `FORGE_LLM_MODEL`
    /// overrides the default model.
    pub fn from_env() -> LlmResult<Self> {
        let custom_model = std::env::var("FORGE_LLM_MODEL").ok().filter(|m| !m.is_empty());

        for provider in [LlmProvider::OpenAI, LlmProvider::Anthropic] {
            if let Ok(api_key) = std::env::var(provider.key_var()) {
                if !api_key.is_empty() {
                    return Ok(Self::new(provider, api_key, custom_model));
                }
            }
        }

        Err(LlmError::NotConfigured)
    }

    /// Create an adapter from explicit settings. Without a provider name the
    /// environment decides.
    pub fn from_settings(
        provider: Option<&str>,
        model: Option<String>,
        base_url: Option<String>,
    ) -> LlmResult<Self> {
        let adapter = match provider {
            None => {
                let mut adapter = Self::from_env()?;
                if let Some(model) = model {
                    adapter.model = model;
                }
                adapter
            }
            Some(name) => {
                let provider = LlmProvider::parse(name)?;
                let key = std::env::var(provider.key_var()).map_err(|_| LlmError::NotConfigured)?;
                if key.is_empty() {
                    return Err(LlmError::NotConfigured);
                }
                Self::new(provider, key, model)
            }
        };

        Ok(match base_url {
            Some(url) => adapter.with_base_url(url),
            None => adapter,
        })
    }

    /// Get the current provider
    pub fn provider(&self) -> &LlmProvider {
        &self.provider
    }

    fn endpoint(&self) -> String {
        match (&self.provider, &self.base_url) {
            (LlmProvider::OpenAI, Some(base)) => {
                format!("{}/chat/completions", base.trim_end_matches('/'))
            }
            (LlmProvider::OpenAI, None) => "https://api.openai.com/v1/chat/completions".to_string(),
            (LlmProvider::Anthropic, Some(base)) => {
                format!("{}/messages", base.trim_end_matches('/'))
            }
            (LlmProvider::Anthropic, None) => "https://api.anthropic.com/v1/messages".to_string(),
        }
    }

    /// POST with retries on network errors, 5xx and 429.
    async fn post_with_retry(&self, body: &Value) -> LlmResult<reqwest::Response> {
        let url = self.endpoint();
        let provider = self.provider.label();
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                // Exponential backoff: 2s, 4s
                let delay = Duration::from_secs(1 << attempt);
                debug!(attempt, ?delay, "Retrying {} request", provider);
                tokio::time::sleep(delay).await;
            }

            let request = self.client.post(&url).json(body);
            let request = match self.provider {
                LlmProvider::OpenAI => {
                    request.header("Authorization", format!("Bearer {}", self.api_key))
                }
                LlmProvider::Anthropic => request
                    .header("x-api-key", &self.api_key)
                    .header("anthropic-version", "2023-06-01"),
            };

            let response = match request.send().await {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = Some(LlmError::Network(e.to_string()));
                    continue;
                }
            };

            let status = response.status();
            if status.is_server_error() || status.as_u16() == 429 {
                let body = response.text().await.unwrap_or_default();
                warn!(
                    status = status.as_u16(),
                    attempt = attempt + 1,
                    "{} API transient error",
                    provider
                );
                last_error = Some(LlmError::Api {
                    provider: provider.to_string(),
                    status: status.as_u16(),
                    body,
                });
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(LlmError::Api {
                    provider: provider.to_string(),
                    status: status.as_u16(),
                    body,
                });
            }

            return Ok(response);
        }

        Err(last_error.unwrap_or_else(|| LlmError::Network("Max retries exceeded".to_string())))
    }

    async fn send(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        options: &SamplingOptions,
    ) -> LlmResult<Completion> {
        match self.provider {
            LlmProvider::OpenAI => {
                let body = openai_request(&self.model, messages, tools, options);
                let response: OpenAIResponse = self
                    .post_with_retry(&body)
                    .await?
                    .json()
                    .await
                    .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
                openai_completion(response, &self.model)
            }
            LlmProvider::Anthropic => {
                let body = anthropic_request(&self.model, messages, tools, options);
                let response: AnthropicResponse = self
                    .post_with_retry(&body)
                    .await?
                    .json()
                    .await
                    .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
                Ok(anthropic_completion(response, &self.model))
            }
        }
    }
}

#[async_trait]
impl ReasoningService for LlmAdapter {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &SamplingOptions,
    ) -> LlmResult<Completion> {
        self.send(messages, &[], options).await
    }

    async fn complete_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        options: &SamplingOptions,
    ) -> LlmResult<Completion> {
        self.send(messages, tools, options).await
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// OpenAI API types

fn openai_request(
    model: &str,
    messages: &[ChatMessage],
    tools: &[ToolDefinition],
    options: &SamplingOptions,
) -> Value {
    let messages: Vec<Value> = messages
        .iter()
        .map(|m| {
            let mut entry = json!({ "role": m.role.as_str(), "content": m.content });
            if !m.tool_calls.is_empty() {
                entry["tool_calls"] = m
                    .tool_calls
                    .iter()
                    .map(|c| {
                        json!({
                            "id": c.id,
                            "type": "function",
                            "function": { "name": c.name, "arguments": c.arguments },
                        })
                    })
                    .collect();
            }
            if let Some(id) = &m.tool_call_id {
                entry["tool_call_id"] = json!(id);
            }
            entry
        })
        .collect();

    let mut body = json!({
        "model": model,
        "messages": messages,
        "temperature": options.temperature,
        "max_completion_tokens": options.max_tokens,
    });
    if !tools.is_empty() {
        body["tools"] = tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    },
                })
            })
            .collect();
    }
    body
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<OpenAIToolCall>,
}

#[derive(Debug, Deserialize)]
struct OpenAIToolCall {
    id: String,
    function: OpenAIFunctionCall,
}

#[derive(Debug, Deserialize)]
struct OpenAIFunctionCall {
    name: String,
    arguments: String,
}

fn openai_completion(response: OpenAIResponse, model: &str) -> LlmResult<Completion> {
    let usage = response
        .usage
        .map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
        })
        .unwrap_or_default();

    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::InvalidResponse("No response from OpenAI".to_string()))?;

    let tool_calls: Vec<ToolCall> = choice
        .message
        .tool_calls
        .into_iter()
        .map(|c| ToolCall::new(c.id, c.function.name, c.function.arguments))
        .collect();

    let finish_reason = match choice.finish_reason.as_deref() {
        Some("stop") => FinishReason::Stop,
        Some("tool_calls") => FinishReason::ToolCalls,
        Some("length") => FinishReason::Length,
        _ if !tool_calls.is_empty() => FinishReason::ToolCalls,
        _ => FinishReason::Other,
    };

    Ok(Completion {
        content: choice.message.content,
        tool_calls,
        finish_reason,
        usage,
        model: model.to_string(),
    })
}

// Anthropic API types

fn anthropic_request(
    model: &str,
    messages: &[ChatMessage],
    tools: &[ToolDefinition],
    options: &SamplingOptions,
) -> Value {
    // Anthropic requires system messages to be separate
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(ChatMessage::text)
        .collect();

    let mut turns: Vec<Value> = Vec::new();
    for message in messages.iter().filter(|m| m.role != Role::System) {
        match message.role {
            Role::Assistant if !message.tool_calls.is_empty() => {
                let mut blocks = Vec::new();
                if let Some(text) = message.content.as_deref().filter(|t| !t.is_empty()) {
                    blocks.push(json!({ "type": "text", "text": text }));
                }
                for call in &message.tool_calls {
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": call.id,
                        "name": call.name,
                        "input": call.parsed_arguments(),
                    }));
                }
                turns.push(json!({ "role": "assistant", "content": blocks }));
            }
            Role::Tool => {
                let block = json!({
                    "type": "tool_result",
                    "tool_use_id": message.tool_call_id,
                    "content": message.text(),
                });
                // Consecutive tool results share one user turn.
                let appended = match turns.last_mut() {
                    Some(last) if last["role"] == "user" && last["content"].is_array() => {
                        if let Some(blocks) = last["content"].as_array_mut() {
                            blocks.push(block.clone());
                        }
                        true
                    }
                    _ => false,
                };
                if !appended {
                    turns.push(json!({ "role": "user", "content": [block] }));
                }
            }
            Role::Assistant => {
                turns.push(json!({ "role": "assistant", "content": message.text() }));
            }
            Role::User | Role::System => {
                turns.push(json!({ "role": "user", "content": message.text() }));
            }
        }
    }

    let mut body = json!({
        "model": model,
        "max_tokens": options.max_tokens,
        "temperature": options.temperature,
        "messages": turns,
    });
    if !system.is_empty() {
        body["system"] = json!(system.join("\n\n"));
    }
    if !tools.is_empty() {
        body["tools"] = tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters,
                })
            })
            .collect();
    }
    body
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
    stop_reason: Option<String>,
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContent {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(other)]
    Unknown,
}

fn anthropic_completion(response: AnthropicResponse, model: &str) -> Completion {
    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for block in response.content {
        match block {
            AnthropicContent::Text { text: t } => text.push_str(&t),
            AnthropicContent::ToolUse { id, name, input } => {
                tool_calls.push(ToolCall::new(id, name, input.to_string()));
            }
            AnthropicContent::Unknown => {}
        }
    }

    let finish_reason = match response.stop_reason.as_deref() {
        Some("end_turn") | Some("stop_sequence") => FinishReason::Stop,
        Some("tool_use") => FinishReason::ToolCalls,
        Some("max_tokens") => FinishReason::Length,
        _ => FinishReason::Other,
    };

    Completion {
        content: if text.is_empty() { None } else { Some(text) },
        tool_calls,
        finish_reason,
        usage: response
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.input_tokens,
                completion_tokens: u.output_tokens,
            })
            .unwrap_or_default(),
        model: model.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_detection() {
        // Clear env vars for predictable test
        std::env::remove_var("OPENAI_API_KEY");
        std::env::remove_var("ANTHROPIC_API_KEY");

        // Should fail when no keys are set
        assert!(LlmAdapter::from_env().is_err());

        // Test with OpenAI key
        std::env::set_var("OPENAI_API_KEY", "test-key");
        let adapter = LlmAdapter::from_env().unwrap();
        assert_eq!(adapter.provider(), &LlmProvider::OpenAI);
        std::env::remove_var("OPENAI_API_KEY");

        // Test with Anthropic key
        std::env::set_var("ANTHROPIC_API_KEY", "test-key");
        let adapter = LlmAdapter::from_env().unwrap();
        assert_eq!(adapter.provider(), &LlmProvider::Anthropic);
        std::env::remove_var("ANTHROPIC_API_KEY");
    }

    #[test]
    fn test_default_models() {
        let openai = LlmAdapter::new(LlmProvider::OpenAI, "key".to_string(), None);
        assert_eq!(openai.model(), "gpt-5-mini");

        let anthropic = LlmAdapter::new(LlmProvider::Anthropic, "key".to_string(), None);
        assert_eq!(anthropic.model(), "claude-sonnet-4.5");
    }

    #[test]
    fn test_unknown_provider() {
        assert!(matches!(
            LlmProvider::parse("mistral"),
            Err(LlmError::UnknownProvider(_))
        ));
        assert_eq!(LlmProvider::parse("OpenAI").unwrap(), LlmProvider::OpenAI);
    }

    #[test]
    fn test_base_url_endpoint() {
        let adapter = LlmAdapter::new(LlmProvider::OpenAI, "key".into(), None)
            .with_base_url("http://localhost:8080/v1/");
        assert_eq!(adapter.endpoint(), "http://localhost:8080/v1/chat/completions");
    }

    #[test]
    fn test_openai_request_carries_tools_and_results() {
        let messages = vec![
            ChatMessage::system("sys"),
            ChatMessage::user("go"),
            ChatMessage::assistant_tool_calls(
                None,
                vec![ToolCall::new("c1", "search_memory", r#"{"query":"x"}"#)],
            ),
            ChatMessage::tool_result("c1", "nothing"),
        ];
        let tools = vec![ToolDefinition::new("search_memory", "search", json!({"type": "object"}))];
        let body = openai_request("m", &messages, &tools, &SamplingOptions::default());

        assert_eq!(body["tools"][0]["function"]["name"], "search_memory");
        assert_eq!(body["messages"][2]["tool_calls"][0]["id"], "c1");
        assert_eq!(body["messages"][3]["tool_call_id"], "c1");
    }

    #[test]
    fn test_anthropic_request_groups_tool_results() {
        let messages = vec![
            ChatMessage::system("sys"),
            ChatMessage::user("go"),
            ChatMessage::assistant_tool_calls(
                None,
                vec![
                    ToolCall::new("a", "write_file", r#"{"file_path":"index.html"}"#),
                    ToolCall::new("b", "delete_file", r#"{"file_path":"old.js"}"#),
                ],
            ),
            ChatMessage::tool_result("a", "File written: index.html"),
            ChatMessage::tool_result("b", "File deleted: old.js"),
        ];
        let body = anthropic_request("m", &messages, &[], &SamplingOptions::default());

        assert_eq!(body["system"], "sys");
        let turns = body["messages"].as_array().unwrap();
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[1]["content"][1]["type"], "tool_use");
        assert_eq!(turns[2]["content"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_openai_completion_parsing() {
        let response: OpenAIResponse = serde_json::from_value(json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": { "name": "search_memory", "arguments": "{\"query\":\"q\"}" }
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": { "prompt_tokens": 12, "completion_tokens": 3 }
        }))
        .unwrap();

        let completion = openai_completion(response, "m").unwrap();
        assert_eq!(completion.finish_reason, FinishReason::ToolCalls);
        assert_eq!(completion.tool_calls[0].name, "search_memory");
        assert_eq!(completion.usage.total(), 15);
    }

    #[test]
    fn test_anthropic_completion_parsing() {
        let response: AnthropicResponse = serde_json::from_value(json!({
            "content": [
                { "type": "text", "text": "Looking it up." },
                { "type": "tool_use", "id": "tu_1", "name": "search_memory", "input": { "query": "q" } }
            ],
            "stop_reason": "tool_use",
            "usage": { "input_tokens": 4, "output_tokens": 2 }
        }))
        .unwrap();

        let completion = anthropic_completion(response, "m");
        assert_eq!(completion.content.as_deref(), Some("Looking it up."));
        assert_eq!(completion.tool_calls[0].string_argument("query").as_deref(), Some("q"));
        assert_eq!(completion.finish_reason, FinishReason::ToolCalls);
    }
}
