//! Session manager - lifecycle, concurrency, cancellation, dispatch
//!
//! `start` validates the upload, materializes the session and its bus,
//! spawns the chosen strategy on its own task, and returns immediately.
//! Each session runs independently; the only cross-session state is the
//! id -> entry map. Terminal sessions are retained for a TTL so late
//! subscribers can replay and clients can fetch the report, then reclaimed.

use crate::bus::{SessionBus, Subscription};
use crate::session::Session;
use crate::strategies::{strategy_registry, LoopCtx, Strategy};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tabular_core::{
    AgentError, AgentEvent, DatasetHandle, Phase, Result, RuntimeConfig, SessionId,
};
use tabular_llm::LlmProvider;
use tabular_tools::{create_default_registry, dataset, ToolRegistry};
use tracing::{error, info, warn};

/// Raw upload as received from the client.
pub struct DatasetUpload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Clone, Debug, Serialize)]
pub struct StartOutcome {
    pub session_id: String,
    pub events_url: String,
}

/// What `fetch` returns once a session is terminal.
#[derive(Clone, Debug, Serialize)]
pub struct FinalArtifacts {
    pub report: String,
    pub images: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub phase: Phase,
    pub strategy: String,
    pub created_at: DateTime<Utc>,
}

struct SessionEntry {
    session: Arc<Session>,
    bus: Arc<SessionBus>,
}

pub struct SessionManager {
    config: Arc<RuntimeConfig>,
    provider: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    strategies: HashMap<&'static str, Arc<dyn Strategy>>,
    entries: Arc<DashMap<String, SessionEntry>>,
}

impl SessionManager {
    pub fn new(config: Arc<RuntimeConfig>, provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            config,
            provider,
            tools: Arc::new(create_default_registry()),
            strategies: strategy_registry(),
            entries: Arc::new(DashMap::new()),
        }
    }

    /// Validate the upload, persist the dataset, and launch the strategy.
    /// Returns as soon as the session task is spawned.
    pub async fn start(
        &self,
        upload: DatasetUpload,
        request: &str,
        strategy_tag: Option<&str>,
    ) -> Result<StartOutcome> {
        if request.trim().is_empty() {
            return Err(AgentError::invalid_input("analysis request is empty"));
        }
        if upload.bytes.is_empty() {
            return Err(AgentError::invalid_input("uploaded file is empty"));
        }
        if upload.bytes.len() as u64 > self.config.max_file_size_bytes {
            return Err(AgentError::invalid_input(format!(
                "file exceeds the {} byte limit",
                self.config.max_file_size_bytes
            )));
        }
        let extension = dataset::supported_extension(&upload.file_name).ok_or_else(|| {
            AgentError::UnsupportedFormat(format!(
                "'{}' is not a supported dataset (expected csv, tsv, xls, or xlsx)",
                upload.file_name
            ))
        })?;

        let tag = RuntimeConfig::normalized_mode(
            strategy_tag.unwrap_or(self.config.agent_mode.as_str()),
        );
        let strategy = self
            .strategies
            .get(tag.as_str())
            .cloned()
            .ok_or_else(|| AgentError::invalid_input(format!("unknown strategy '{}'", tag)))?;

        let id = SessionId::generate();
        let session_dir = self.config.upload_dir.join(id.as_str());
        tokio::fs::create_dir_all(&session_dir).await?;

        let dataset_path = session_dir.join(format!("dataset.{}", extension));
        tokio::fs::write(&dataset_path, &upload.bytes).await?;

        let handle = DatasetHandle {
            path: dataset_path,
            file_name: upload.file_name.clone(),
            extension,
            size_bytes: upload.bytes.len() as u64,
        };

        let session = Arc::new(Session::new(
            id.clone(),
            request,
            tag.clone(),
            handle,
            session_dir.join("runs"),
        ));
        let bus = Arc::new(SessionBus::new(id.clone(), self.config.event_buffer_size));

        self.entries.insert(
            id.to_string(),
            SessionEntry {
                session: session.clone(),
                bus: bus.clone(),
            },
        );

        info!(
            "session {} starting: strategy={} file={} ({} bytes)",
            id,
            tag,
            upload.file_name,
            upload.bytes.len()
        );

        self.spawn_session(id.clone(), session, bus, strategy, session_dir);

        Ok(StartOutcome {
            session_id: id.to_string(),
            events_url: format!("/sessions/{}/events", id),
        })
    }

    fn spawn_session(
        &self,
        id: SessionId,
        session: Arc<Session>,
        bus: Arc<SessionBus>,
        strategy: Arc<dyn Strategy>,
        session_dir: std::path::PathBuf,
    ) {
        let ctx = LoopCtx {
            session,
            bus,
            provider: self.provider.clone(),
            tools: self.tools.clone(),
            config: self.config.clone(),
        };
        let entries = self.entries.clone();
        let retention = Duration::from_secs(self.config.session_retention_seconds);

        tokio::spawn(async move {
            match strategy.run(&ctx).await {
                Ok(cause) => {
                    info!("session {} ended: {:?}", id, cause);
                }
                Err(e) => {
                    error!("session {} failed: {}", id, e);
                    if ctx.session.set_phase(Phase::Failed).await {
                        ctx.bus.emit(AgentEvent::PhaseChange {
                            phase: Phase::Failed,
                        });
                    }
                    ctx.bus.emit(AgentEvent::AgentError {
                        error: e.to_string(),
                        location: error_location(&e).to_string(),
                    });
                }
            }

            if !ctx.bus.is_closed() {
                warn!("session {} ended without a terminal event", id);
                ctx.bus.emit(AgentEvent::AgentError {
                    error: "strategy ended without a terminal event".to_string(),
                    location: "manager".to_string(),
                });
            }

            // Retain for late subscribers and report fetches, then reclaim.
            tokio::time::sleep(retention).await;
            entries.remove(id.as_str());
            if let Err(e) = tokio::fs::remove_dir_all(&session_dir).await {
                warn!("session {} cleanup failed: {}", id, e);
            }
        });
    }

    /// Flip the session's cancellation flag. The strategy observes it at
    /// its next checkpoint and finishes with `agent_stopped`.
    pub fn stop(&self, id: &str) -> Result<()> {
        let entry = self
            .entries
            .get(id)
            .ok_or_else(|| AgentError::UnknownSession(id.to_string()))?;
        entry.session.cancel();
        Ok(())
    }

    /// Subscription handle over the session's bus; buffered events replay
    /// before live ones.
    pub fn subscribe(&self, id: &str) -> Result<Subscription> {
        let entry = self
            .entries
            .get(id)
            .ok_or_else(|| AgentError::UnknownSession(id.to_string()))?;
        Ok(entry.bus.subscribe())
    }

    /// Final report and images, only once the session is terminal.
    pub async fn fetch(&self, id: &str) -> Result<FinalArtifacts> {
        let session = {
            let entry = self
                .entries
                .get(id)
                .ok_or_else(|| AgentError::UnknownSession(id.to_string()))?;
            entry.session.clone()
        };

        if !session.phase().await.is_terminal() {
            return Err(AgentError::SessionNotReady(id.to_string()));
        }

        Ok(FinalArtifacts {
            report: session.report().await.unwrap_or_default(),
            images: session.images_base64().await,
        })
    }

    pub async fn list(&self) -> Vec<SessionInfo> {
        let sessions: Vec<Arc<Session>> = self
            .entries
            .iter()
            .map(|entry| entry.session.clone())
            .collect();

        let mut infos = Vec::with_capacity(sessions.len());
        for session in sessions {
            let snapshot = session.snapshot().await;
            infos.push(SessionInfo {
                id: snapshot.id,
                phase: snapshot.phase,
                strategy: snapshot.strategy,
                created_at: snapshot.created_at,
            });
        }
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        infos
    }

    pub fn session_count(&self) -> usize {
        self.entries.len()
    }

    pub fn tool_count(&self) -> usize {
        self.tools.list().len()
    }
}

/// Where an infrastructure failure originated, for the `agent_error`
/// payload.
fn error_location(error: &AgentError) -> &'static str {
    match error {
        AgentError::ExecutorUnavailable(_) => "sandbox",
        AgentError::LlmFailed(_) => "llm",
        AgentError::Io(_) => "filesystem",
        AgentError::UnsupportedFormat(_) | AgentError::InvalidInput(_) => "dataset",
        _ => "strategy",
    }
}
