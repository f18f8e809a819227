//! Error taxonomy for the runtime
//!
//! Every variant carries a stable upper-case kind string that is quoted on
//! the control surface and in tool-result payloads fed back to the LLM.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("executor unavailable: {0}")]
    ExecutorUnavailable(String),

    #[error("llm failed: {0}")]
    LlmFailed(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("unknown session: {0}")]
    UnknownSession(String),

    #[error("session not ready: {0}")]
    SessionNotReady(String),

    #[error("cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, AgentError>;

impl AgentError {
    /// Stable machine-readable kind tag.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::InvalidInput(_) => "INVALID_INPUT",
            AgentError::UnsupportedFormat(_) => "UNSUPPORTED_FORMAT",
            AgentError::ExecutorUnavailable(_) => "EXECUTOR_UNAVAILABLE",
            AgentError::LlmFailed(_) => "LLM_FAILED",
            AgentError::Timeout(_) => "TIMEOUT",
            AgentError::InvalidState(_) => "INVALID_STATE",
            AgentError::UnknownSession(_) => "UNKNOWN_SESSION",
            AgentError::SessionNotReady(_) => "SESSION_NOT_READY",
            AgentError::Cancelled => "CANCELLED",
            AgentError::Io(_) => "IO_ERROR",
            AgentError::Json(_) => "JSON_ERROR",
            AgentError::Internal(_) => "INTERNAL",
        }
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
