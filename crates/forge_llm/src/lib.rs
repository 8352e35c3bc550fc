//! # forge_llm - Reasoning Service Client for Playforge
//!
//! Everything the engine needs to talk to a hosted model:
//!
//! - **ReasoningService**: the capability trait (`complete`, `complete_with_tools`)
//! - **LlmAdapter**: OpenAI and Anthropic backends with transient-failure retries
//! - **ToolLoop**: bounded tool-call round trips
//! - **Normalization**: markdown fence stripping and JSON reply parsing
//! - **CallLog**: injected observability sink for recent calls
//! - **Embedder**: text embeddings for memory retrieval
//! - **ScriptedReasoner**: deterministic test double

pub mod adapter;
pub mod embedding;
pub mod error;
pub mod mock;
pub mod normalize;
pub mod observability;
pub mod service;
pub mod tool_loop;
pub mod types;

pub use adapter::{LlmAdapter, LlmProvider};
pub use embedding::{cosine_similarity, Embedder, HashEmbedder, OpenAiEmbedder};
pub use error::{LlmError, LlmResult};
pub use mock::{CapturedRequest, ScriptedReasoner, ScriptedReply};
pub use normalize::{parse_json_reply, strip_code_fence};
pub use observability::{CallLog, CallRecord, NoopCallLog, RingCallLog, ToolInvocation};
pub use service::ReasoningService;
pub use tool_loop::{ToolHandler, ToolLoop, ToolLoopOutcome};
pub use types::*;
