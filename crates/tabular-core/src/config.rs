//! Runtime configuration
//!
//! Loaded from an optional JSON file, then overridden by `TABULAR_*`
//! environment variables. Every key has a serde default so a partial (or
//! missing) file still yields a working config.

use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// API key for the LLM endpoint.
    pub llm_api_key: String,
    /// Base URL of an OpenAI-compatible chat-completions endpoint.
    pub llm_base_url: String,
    pub llm_model: String,
    /// Per-request LLM timeout in seconds.
    pub llm_timeout_seconds: u64,
    /// Transient-error retries per LLM call.
    pub llm_max_retries: u32,

    /// Default loop strategy tag (one of the five).
    pub agent_mode: String,
    /// Hard cap on LLM calls per session.
    pub max_iterations: u32,
    /// Inner per-task bound used by the hybrid and staged strategies.
    pub max_iterations_per_task: u32,

    /// Sandbox wall clock per `run_code` call, in seconds.
    pub code_timeout_seconds: u64,

    /// Root for session upload/working directories.
    pub upload_dir: PathBuf,
    pub max_file_size_bytes: u64,

    /// Per-subscriber event queue depth.
    pub event_buffer_size: usize,
    /// How long terminal sessions are retained before reclaim.
    pub session_retention_seconds: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            llm_api_key: String::new(),
            llm_base_url: "https://api.openai.com/v1".to_string(),
            llm_model: "gpt-4o-mini".to_string(),
            llm_timeout_seconds: 120,
            llm_max_retries: 3,
            agent_mode: "tool_driven".to_string(),
            max_iterations: 25,
            max_iterations_per_task: 5,
            code_timeout_seconds: 30,
            upload_dir: PathBuf::from("./uploads"),
            max_file_size_bytes: 100 * 1024 * 1024,
            event_buffer_size: 1024,
            session_retention_seconds: 3600,
        }
    }
}

impl RuntimeConfig {
    /// Load from a JSON file. A missing or unparseable file yields defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("config parse error in {}: {}, using defaults", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    /// Apply `TABULAR_*` environment overrides on top of the current values.
    pub fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("TABULAR_LLM_API_KEY") {
            self.llm_api_key = v;
        } else if let Ok(v) = std::env::var("OPENAI_API_KEY") {
            if self.llm_api_key.is_empty() {
                self.llm_api_key = v;
            }
        }
        if let Ok(v) = std::env::var("TABULAR_LLM_BASE_URL") {
            self.llm_base_url = v;
        }
        if let Ok(v) = std::env::var("TABULAR_LLM_MODEL") {
            self.llm_model = v;
        }
        if let Ok(v) = std::env::var("TABULAR_AGENT_MODE") {
            self.agent_mode = v;
        }
        if let Ok(v) = std::env::var("TABULAR_MAX_ITERATIONS") {
            if let Ok(n) = v.parse() {
                self.max_iterations = n;
            }
        }
        if let Ok(v) = std::env::var("TABULAR_CODE_TIMEOUT_SECONDS") {
            if let Ok(n) = v.parse() {
                self.code_timeout_seconds = n;
            }
        }
        if let Ok(v) = std::env::var("TABULAR_UPLOAD_DIR") {
            self.upload_dir = PathBuf::from(v);
        }
    }

    /// Convenience: defaults + env overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Canonical strategy tag: hyphens normalized to underscores.
    pub fn normalized_mode(tag: &str) -> String {
        tag.trim().to_ascii_lowercase().replace('-', "_")
    }
}
