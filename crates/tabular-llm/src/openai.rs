//! OpenAI-compatible chat-completions provider with SSE streaming
//!
//! Targets any endpoint speaking the `/chat/completions` dialect; the
//! concrete endpoint and model come from configuration.

use crate::provider::{LlmError, LlmProvider, LlmResult, LlmStream};
use crate::types::{LlmRequest, StreamDelta};
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tabular_core::{Message, Role};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

const DEFAULT_TIMEOUT_SECS: u64 = 120;

pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    timeout_secs: u64,
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_timeout(api_key, DEFAULT_TIMEOUT_SECS)
    }

    pub fn with_timeout(api_key: impl Into<String>, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            timeout_secs,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait::async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    async fn complete_stream(
        &self,
        request: LlmRequest,
        cancel: Option<CancellationToken>,
    ) -> LlmResult<LlmStream> {
        let body = ChatRequest {
            model: request.model.clone(),
            messages: request.messages.iter().map(to_wire_message).collect(),
            stream: true,
            tools: request.tools.as_ref().map(|tools| {
                tools
                    .iter()
                    .map(|t| WireTool {
                        kind: "function",
                        function: WireFunctionDef {
                            name: t.name.clone(),
                            description: t.description.clone(),
                            parameters: t.input_schema.clone(),
                        },
                    })
                    .collect()
            }),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        debug!("chat request: model={} messages={}", body.model, body.messages.len());

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(self.timeout_secs)
                } else {
                    LlmError::Network(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("chat error {}: {}", status, error_text);

            return Err(match status.as_u16() {
                401 | 403 => LlmError::AuthFailed(error_text),
                429 => LlmError::RateLimited {
                    retry_after_ms: 60_000,
                },
                400 | 404 | 422 => LlmError::InvalidRequest(error_text),
                _ => LlmError::RequestFailed(format!("{}: {}", status, error_text)),
            });
        }

        let cancel = cancel.unwrap_or_default();
        let timeout_secs = self.timeout_secs;
        let stream = parse_sse_stream(response.bytes_stream(), cancel, timeout_secs);
        Ok(Box::pin(stream))
    }
}

fn parse_sse_stream(
    bytes_stream: impl futures::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
    cancel: CancellationToken,
    timeout_secs: u64,
) -> impl futures::Stream<Item = LlmResult<StreamDelta>> + Send {
    async_stream::stream! {
        let mut buffer = String::new();

        tokio::pin!(bytes_stream);

        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    yield Err(LlmError::Cancelled);
                    return;
                }
                chunk = bytes_stream.next() => chunk,
            };

            let chunk = match chunk {
                Some(Ok(c)) => c,
                Some(Err(e)) => {
                    if e.is_timeout() {
                        yield Err(LlmError::Timeout(timeout_secs));
                    } else {
                        yield Err(LlmError::StreamError(e.to_string()));
                    }
                    return;
                }
                None => return,
            };

            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(line_end) = buffer.find('\n') {
                let line = buffer[..line_end].trim_end_matches('\r').to_string();
                buffer = buffer[line_end + 1..].to_string();

                let Some(payload) = line.strip_prefix("data: ") else {
                    continue;
                };
                if payload == "[DONE]" {
                    return;
                }

                match parse_chunk_payload(payload) {
                    Ok(deltas) => {
                        for delta in deltas {
                            yield Ok(delta);
                        }
                    }
                    Err(e) => {
                        debug!("skipping unparseable stream chunk: {}", e);
                    }
                }
            }
        }
    }
}

/// Parse one `data:` JSON payload into zero or more deltas.
///
/// Public so the frame grammar is testable without a live endpoint.
pub fn parse_chunk_payload(payload: &str) -> Result<Vec<StreamDelta>, serde_json::Error> {
    let chunk: StreamChunk = serde_json::from_str(payload)?;
    let mut deltas = Vec::new();

    let Some(choice) = chunk.choices.into_iter().next() else {
        return Ok(deltas);
    };

    if let Some(reasoning) = choice.delta.reasoning_content.filter(|s| !s.is_empty()) {
        deltas.push(StreamDelta::Reasoning(reasoning));
    }
    if let Some(content) = choice.delta.content.filter(|s| !s.is_empty()) {
        deltas.push(StreamDelta::Content(content));
    }
    for tc in choice.delta.tool_calls.unwrap_or_default() {
        if let Some(id) = tc.id.filter(|s| !s.is_empty()) {
            deltas.push(StreamDelta::ToolCallStart {
                index: tc.index,
                id,
                name: tc
                    .function
                    .as_ref()
                    .and_then(|f| f.name.clone())
                    .unwrap_or_default(),
            });
        }
        if let Some(args) = tc.function.and_then(|f| f.arguments).filter(|s| !s.is_empty()) {
            deltas.push(StreamDelta::ToolCallDelta {
                index: tc.index,
                arguments: args,
            });
        }
    }
    if let Some(reason) = choice.finish_reason {
        deltas.push(StreamDelta::Done {
            finish_reason: Some(reason),
        });
    }

    Ok(deltas)
}

fn to_wire_message(message: &Message) -> WireMessage {
    WireMessage {
        role: match message.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        },
        content: message.content.clone(),
        tool_calls: message.tool_calls.as_ref().map(|calls| {
            calls
                .iter()
                .map(|c| WireToolCall {
                    id: c.id.clone(),
                    kind: "function",
                    function: WireFunctionCall {
                        name: c.name.clone(),
                        arguments: c.arguments.to_string(),
                    },
                })
                .collect()
        }),
        tool_call_id: message.tool_call_id.clone(),
    }
}

// ---------------------------------------------------------------------------
// Wire structs
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionCall,
}

#[derive(Serialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionDef,
}

#[derive(Serialize)]
struct WireFunctionDef {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: ChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default, alias = "reasoning")]
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ChunkToolCall>>,
}

#[derive(Deserialize)]
struct ChunkToolCall {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<ChunkFunction>,
}

#[derive(Deserialize)]
struct ChunkFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}
