//! LLM provider trait and retry policy

use crate::types::{LlmRequest, StreamDelta};
use futures::Stream;
use std::pin::Pin;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Result type for LLM operations
pub type LlmResult<T> = Result<T, LlmError>;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("rate limited: retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("stream error: {0}")]
    StreamError(String),

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("cancelled")]
    Cancelled,

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl LlmError {
    /// Whether a fresh attempt may succeed. Invalid requests and auth
    /// failures never will; cancellation must not be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Network(_)
            | LlmError::Timeout(_)
            | LlmError::RateLimited { .. }
            | LlmError::StreamError(_)
            | LlmError::RequestFailed(_) => true,
            LlmError::AuthFailed(_) | LlmError::InvalidRequest(_) | LlmError::Cancelled => false,
        }
    }
}

/// Stream of deltas for one chat-completion call
pub type LlmStream = Pin<Box<dyn Stream<Item = LlmResult<StreamDelta>> + Send>>;

/// Capability trait over a remote chat model.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Open a streaming completion. When `cancel` is triggered the
    /// underlying connection is dropped and the stream yields
    /// `LlmError::Cancelled`.
    async fn complete_stream(
        &self,
        request: LlmRequest,
        cancel: Option<CancellationToken>,
    ) -> LlmResult<LlmStream>;
}

/// Open a stream, retrying transient failures with exponential backoff.
///
/// Only the request-opening phase is retried; an error mid-stream is
/// surfaced to the caller, who owns the decision to re-drive the turn.
pub async fn open_stream_with_retry(
    provider: &dyn LlmProvider,
    request: &LlmRequest,
    max_retries: u32,
    cancel: Option<CancellationToken>,
) -> LlmResult<LlmStream> {
    let mut attempt = 0u32;
    loop {
        match provider
            .complete_stream(request.clone(), cancel.clone())
            .await
        {
            Ok(stream) => return Ok(stream),
            Err(e) if e.is_retryable() && attempt < max_retries => {
                attempt += 1;
                let backoff = Duration::from_millis(500u64.saturating_mul(1 << attempt.min(6)));
                warn!(
                    "llm request attempt {}/{} failed: {}, retrying in {:?}",
                    attempt, max_retries, e, backoff
                );
                if let Some(token) = &cancel {
                    tokio::select! {
                        _ = token.cancelled() => return Err(LlmError::Cancelled),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                } else {
                    tokio::time::sleep(backoff).await;
                }
            }
            Err(e) => return Err(e),
        }
    }
}
