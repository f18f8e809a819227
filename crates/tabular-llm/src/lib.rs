//! Tabular LLM - chat-completion abstraction with streaming and tool calls

pub mod openai;
pub mod provider;
pub mod types;

pub use openai::OpenAiProvider;
pub use provider::{open_stream_with_retry, LlmError, LlmProvider, LlmResult, LlmStream};
pub use types::{
    AccumulatedToolCall, ChatTool, LlmRequest, StreamDelta, TurnResponse,
};
