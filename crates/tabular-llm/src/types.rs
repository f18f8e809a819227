//! Request and streaming-response types

use serde::{Deserialize, Serialize};
use tabular_core::Message;

/// A chat-completion request
#[derive(Clone, Debug)]
pub struct LlmRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Option<Vec<ChatTool>>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl Default for LlmRequest {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            messages: Vec::new(),
            tools: None,
            max_tokens: Some(8192),
            temperature: None,
        }
    }
}

/// Tool definition advertised to the model
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatTool {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Streaming delta from the model
#[derive(Clone, Debug)]
pub enum StreamDelta {
    Content(String),
    /// Model reasoning trace - observational only, never persisted.
    Reasoning(String),
    ToolCallStart {
        index: u32,
        id: String,
        name: String,
    },
    ToolCallDelta {
        index: u32,
        arguments: String,
    },
    Done {
        finish_reason: Option<String>,
    },
}

/// Tool call accumulated from streaming deltas
#[derive(Clone, Debug, Default)]
pub struct AccumulatedToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl AccumulatedToolCall {
    pub fn parse_arguments(&self) -> Result<serde_json::Value, serde_json::Error> {
        if self.arguments.trim().is_empty() {
            return Ok(serde_json::json!({}));
        }
        serde_json::from_str(&self.arguments)
    }
}

/// A fully assembled model turn
#[derive(Clone, Debug)]
pub enum TurnResponse {
    /// Final textual turn.
    Content(String),
    /// Tool invocations only.
    ToolCalls(Vec<AccumulatedToolCall>),
    /// Text preamble plus tool invocations.
    Mixed(String, Vec<AccumulatedToolCall>),
}

impl TurnResponse {
    pub fn from_parts(text: String, calls: Vec<AccumulatedToolCall>) -> Self {
        match (text.trim().is_empty(), calls.is_empty()) {
            (_, true) => TurnResponse::Content(text),
            (true, false) => TurnResponse::ToolCalls(calls),
            (false, false) => TurnResponse::Mixed(text, calls),
        }
    }

    pub fn text(&self) -> &str {
        match self {
            TurnResponse::Content(t) | TurnResponse::Mixed(t, _) => t,
            TurnResponse::ToolCalls(_) => "",
        }
    }

    pub fn tool_calls(&self) -> &[AccumulatedToolCall] {
        match self {
            TurnResponse::Content(_) => &[],
            TurnResponse::ToolCalls(c) | TurnResponse::Mixed(_, c) => c,
        }
    }

    /// Purely textual turn - the only shape that can terminate a strategy.
    pub fn is_textual(&self) -> bool {
        matches!(self, TurnResponse::Content(_))
    }
}
