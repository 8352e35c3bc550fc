//! Stage pipeline.
//!
//! A stage is one reasoning service call with a prompt, sampling options,
//! optional tools and an output contract. [`StageRunner`] performs the call
//! and records it in the call log; the stage modules build prompts and turn
//! replies into typed results.

pub mod chat;
pub mod contracts;
pub mod design;
pub mod generate;
pub mod prompts;

use std::sync::Arc;

use forge_llm::{
    parse_json_reply, CallLog, CallRecord, ChatMessage, LlmError, ReasoningService, Role,
    SamplingOptions, ToolDefinition, ToolHandler, ToolLoop,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::Limits;
use crate::error::{EngineError, EngineResult, ErrorKind};

pub use chat::{FileOpRecorder, Intent, IntentType, Plan, PlannedFile};
pub use contracts::{Contract, StageContracts};
pub use design::CurrentGame;

/// Tools offered to one call.
#[derive(Clone, Copy)]
pub struct ToolUse<'a> {
    pub tools: &'a [ToolDefinition],
    pub handler: &'a dyn ToolHandler,
    pub max_rounds: u32,
}

/// Performs stage calls and records each in the call log.
#[derive(Clone)]
pub struct StageRunner {
    service: Arc<dyn ReasoningService>,
    call_log: Arc<dyn CallLog>,
}

impl StageRunner {
    pub fn new(service: Arc<dyn ReasoningService>, call_log: Arc<dyn CallLog>) -> Self {
        Self { service, call_log }
    }

    pub fn model(&self) -> &str {
        self.service.model()
    }

    async fn exchange(
        &self,
        record: &mut CallRecord,
        messages: Vec<ChatMessage>,
        options: &SamplingOptions,
        tools: Option<ToolUse<'_>>,
    ) -> Result<String, LlmError> {
        match tools {
            Some(tool_use) => {
                let outcome = ToolLoop::new(tool_use.max_rounds)
                    .run(
                        self.service.as_ref(),
                        messages,
                        tool_use.tools,
                        tool_use.handler,
                        options,
                    )
                    .await?;
                if outcome.hit_ceiling() {
                    warn!(
                        stage = %record.label,
                        rounds = outcome.rounds,
                        "Tool round ceiling reached, using last reply"
                    );
                }
                record.tool_calls = outcome.invocations;
                record.usage = outcome.usage;
                Ok(outcome.completion.text_or_empty().to_string())
            }
            None => {
                let completion = self.service.complete(&messages, options).await?;
                record.usage = completion.usage;
                Ok(completion.text_or_empty().to_string())
            }
        }
    }

    /// One call returning the raw reply text.
    pub async fn call_text(
        &self,
        label: &str,
        messages: Vec<ChatMessage>,
        options: SamplingOptions,
        tools: Option<ToolUse<'_>>,
    ) -> EngineResult<String> {
        let mut record = CallRecord::new(label, self.service.model());
        debug!(stage = label, messages = messages.len(), "Calling reasoning service");

        let result = self.exchange(&mut record, messages, &options, tools).await;
        match &result {
            Ok(text) => record.raw_response = Some(text.clone()),
            Err(e) => record.error = Some(e.to_string()),
        }
        self.call_log.record(record.finish());

        result.map_err(|e| EngineError::service(label, e))
    }

    /// One call whose reply must be JSON satisfying `contract`.
    pub async fn call_json(
        &self,
        label: &str,
        contracts: &StageContracts,
        contract: Contract,
        messages: Vec<ChatMessage>,
        options: SamplingOptions,
        tools: Option<ToolUse<'_>>,
    ) -> EngineResult<Value> {
        let mut record = CallRecord::new(label, self.service.model());
        debug!(stage = label, %contract, "Calling reasoning service");

        let text = match self.exchange(&mut record, messages, &options, tools).await {
            Ok(text) => text,
            Err(e) => {
                record.error = Some(e.to_string());
                self.call_log.record(record.finish());
                return Err(EngineError::service(label, e));
            }
        };
        record.raw_response = Some(text.clone());

        let checked = parse_json_reply(&text)
            .map_err(|e| EngineError::service(label, e))
            .and_then(|value| {
                contracts
                    .check(contract, value)
                    .map_err(|message| EngineError::contract(label, message))
            });

        match &checked {
            Ok(value) => record.parsed = Some(value.clone()),
            Err(e) => record.error = Some(e.to_string()),
        }
        self.call_log.record(record.finish());
        checked
    }
}

/// Substitute `fallback` for a contract failure. Transport and internal
/// errors still propagate.
pub fn degrade<T>(stage: &str, result: EngineResult<T>, fallback: impl FnOnce() -> T) -> EngineResult<T> {
    match result {
        Err(e) if e.kind() == ErrorKind::Contract => {
            warn!(stage, "Unusable reply, using fallback: {}", e);
            Ok(fallback())
        }
        other => other,
    }
}

/// Deserialize a contract-checked value into its typed form.
pub fn decode<T: DeserializeOwned>(stage: &str, value: Value) -> EngineResult<T> {
    serde_json::from_value(value).map_err(|e| EngineError::contract(stage, e.to_string()))
}

/// Prepend retrieved memory as an extra system message.
pub(crate) fn with_memory(
    mut messages: Vec<ChatMessage>,
    memory_block: &str,
) -> Vec<ChatMessage> {
    if !memory_block.trim().is_empty() {
        let at = messages
            .iter()
            .position(|m| m.role != Role::System)
            .unwrap_or(messages.len());
        messages.insert(at, ChatMessage::system(memory_block));
    }
    messages
}

/// Everything a stage needs: the runner, compiled contracts and limits.
#[derive(Clone)]
pub struct StagePipeline {
    pub(crate) runner: StageRunner,
    pub(crate) contracts: Arc<StageContracts>,
    pub(crate) limits: Limits,
}

impl StagePipeline {
    pub fn new(
        service: Arc<dyn ReasoningService>,
        call_log: Arc<dyn CallLog>,
        limits: Limits,
    ) -> EngineResult<Self> {
        Ok(Self {
            runner: StageRunner::new(service, call_log),
            contracts: Arc::new(StageContracts::new()?),
            limits,
        })
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn runner(&self) -> &StageRunner {
        &self.runner
    }

    pub(crate) async fn json(
        &self,
        label: &str,
        contract: Contract,
        messages: Vec<ChatMessage>,
        options: SamplingOptions,
        tools: Option<ToolUse<'_>>,
    ) -> EngineResult<Value> {
        self.runner
            .call_json(label, &self.contracts, contract, messages, options, tools)
            .await
    }
}

/// Truncate to at most `max` characters on a char boundary.
pub(crate) fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Pretty JSON, or `{}` if the value cannot be rendered.
pub(crate) fn pretty(value: &impl serde::Serialize) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_llm::{RingCallLog, ScriptedReasoner, ScriptedReply};
    use serde_json::json;

    fn runner(service: ScriptedReasoner) -> (StageRunner, Arc<RingCallLog>) {
        let log = Arc::new(RingCallLog::new(10));
        (StageRunner::new(Arc::new(service), log.clone()), log)
    }

    #[tokio::test]
    async fn test_call_json_records_parsed_reply() {
        let (runner, log) =
            runner(ScriptedReasoner::new().reply(ScriptedReply::text("```json\n[\"a\"]\n```")));
        let contracts = StageContracts::new().unwrap();
        let value = runner
            .call_json(
                "facts",
                &contracts,
                Contract::Facts,
                vec![ChatMessage::user("hi")],
                SamplingOptions::default(),
                None,
            )
            .await
            .unwrap();
        assert_eq!(value, json!(["a"]));

        let records = log.list();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].label, "facts");
        assert_eq!(records[0].parsed, Some(json!(["a"])));
        assert!(records[0].succeeded());
    }

    #[tokio::test]
    async fn test_contract_failure_is_logged_and_classified() {
        let (runner, log) = runner(
            ScriptedReasoner::new()
                .reply(ScriptedReply::text("not json"))
                .reply(ScriptedReply::json(json!({"intent_type": "dance"}))),
        );
        let contracts = StageContracts::new().unwrap();

        for _ in 0..2 {
            let err = runner
                .call_json(
                    "intent",
                    &contracts,
                    Contract::Intent,
                    vec![ChatMessage::user("hi")],
                    SamplingOptions::default(),
                    None,
                )
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Contract);
        }
        assert!(log.list().iter().all(|r| r.error.is_some() && r.raw_response.is_some()));
    }

    #[tokio::test]
    async fn test_transport_failure_propagates_through_degrade() {
        let (runner, log) = runner(ScriptedReasoner::new().reply(ScriptedReply::failure("down")));
        let result = runner
            .call_text("answer", vec![ChatMessage::user("hi")], SamplingOptions::default(), None)
            .await;
        let degraded = degrade("answer", result, String::new);
        assert_eq!(degraded.unwrap_err().kind(), ErrorKind::Transport);
        assert!(log.list()[0].raw_response.is_none());
    }

    #[test]
    fn test_degrade_replaces_contract_failures() {
        let result: EngineResult<Vec<String>> = Err(EngineError::contract("facts", "bad"));
        assert_eq!(degrade("facts", result, Vec::new).unwrap(), Vec::<String>::new());
    }

    #[test]
    fn test_memory_block_goes_after_system_prompt() {
        let messages = with_memory(
            vec![ChatMessage::system("base"), ChatMessage::user("q")],
            "Relevant memories",
        );
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].text(), "Relevant memories");
        assert_eq!(with_memory(vec![ChatMessage::user("q")], "  ").len(), 1);
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("ab", 5), "ab");
    }
}
