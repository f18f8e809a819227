//! Per-session state
//!
//! A session exclusively owns its message history, task list, artifacts, and
//! report. The running strategy is the only writer; mutations are rejected
//! (silently, with a warning) once the session reaches a terminal phase.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use tabular_core::{Artifact, DatasetHandle, Message, Phase, Role, SessionId, Task, TaskStatus};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub struct Session {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub request: String,
    pub strategy: String,
    pub dataset: DatasetHandle,
    /// Root for this session's sandbox run directories.
    pub work_root: PathBuf,
    cancel: CancellationToken,
    phase: RwLock<Phase>,
    messages: RwLock<Vec<Message>>,
    tasks: RwLock<Vec<Task>>,
    artifacts: RwLock<Vec<Artifact>>,
    report: RwLock<Option<String>>,
    iterations: AtomicU32,
}

impl Session {
    pub fn new(
        id: SessionId,
        request: impl Into<String>,
        strategy: impl Into<String>,
        dataset: DatasetHandle,
        work_root: PathBuf,
    ) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            request: request.into(),
            strategy: strategy.into(),
            dataset,
            work_root,
            cancel: CancellationToken::new(),
            phase: RwLock::new(Phase::Initializing),
            messages: RwLock::new(Vec::new()),
            tasks: RwLock::new(Vec::new()),
            artifacts: RwLock::new(Vec::new()),
            report: RwLock::new(None),
            iterations: AtomicU32::new(0),
        }
    }

    // -- cancellation -------------------------------------------------------

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    // -- phase --------------------------------------------------------------

    pub async fn phase(&self) -> Phase {
        *self.phase.read().await
    }

    /// Transition the phase. Returns false (and leaves state untouched)
    /// when the session is already terminal.
    pub async fn set_phase(&self, phase: Phase) -> bool {
        let mut guard = self.phase.write().await;
        if guard.is_terminal() {
            warn!(
                "session {}: ignoring phase change {} -> {}",
                self.id,
                guard.as_str(),
                phase.as_str()
            );
            return false;
        }
        *guard = phase;
        true
    }

    async fn is_terminal(&self) -> bool {
        self.phase.read().await.is_terminal()
    }

    // -- message history (append-only) --------------------------------------

    pub async fn append_message(&self, message: Message) -> bool {
        if self.is_terminal().await {
            warn!("session {}: ignoring message append after terminal phase", self.id);
            return false;
        }
        self.messages.write().await.push(message);
        true
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.messages.read().await.clone()
    }

    pub async fn message_count(&self) -> usize {
        self.messages.read().await.len()
    }

    /// Content of the most recent assistant turn that carried text.
    pub async fn last_assistant_text(&self) -> Option<String> {
        self.messages
            .read()
            .await
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant && !m.content.trim().is_empty())
            .map(|m| m.content.clone())
    }

    // -- task list -----------------------------------------------------------

    pub async fn tasks(&self) -> Vec<Task> {
        self.tasks.read().await.clone()
    }

    pub async fn replace_tasks(&self, tasks: Vec<Task>) -> bool {
        if self.is_terminal().await {
            warn!("session {}: ignoring task update after terminal phase", self.id);
            return false;
        }
        *self.tasks.write().await = tasks;
        true
    }

    /// Apply `update` to the task with the given id, if present.
    pub async fn update_task(&self, id: u32, update: impl FnOnce(&mut Task)) -> bool {
        if self.is_terminal().await {
            return false;
        }
        let mut tasks = self.tasks.write().await;
        match tasks.iter_mut().find(|t| t.id == id) {
            Some(task) => {
                update(task);
                true
            }
            None => false,
        }
    }

    /// First task currently in progress, if any.
    pub async fn current_task(&self) -> Option<Task> {
        self.tasks
            .read()
            .await
            .iter()
            .find(|t| t.status == TaskStatus::InProgress)
            .cloned()
    }

    pub async fn incomplete_task_count(&self) -> usize {
        self.tasks
            .read()
            .await
            .iter()
            .filter(|t| t.status != TaskStatus::Completed)
            .count()
    }

    // -- artifacts -----------------------------------------------------------

    pub async fn push_artifact(&self, artifact: Artifact) -> bool {
        if self.is_terminal().await {
            return false;
        }
        self.artifacts.write().await.push(artifact);
        true
    }

    pub async fn artifact_count(&self) -> usize {
        self.artifacts.read().await.len()
    }

    /// All generated images, base64-encoded for the wire.
    pub async fn images_base64(&self) -> Vec<String> {
        self.artifacts
            .read()
            .await
            .iter()
            .filter_map(|a| a.image.as_ref())
            .map(|img| BASE64.encode(&img.bytes))
            .collect()
    }

    // -- report + iterations -------------------------------------------------

    pub async fn set_report(&self, report: impl Into<String>) {
        *self.report.write().await = Some(report.into());
    }

    pub async fn report(&self) -> Option<String> {
        self.report.read().await.clone()
    }

    /// Increment the iteration counter and return the new value (1-based).
    pub fn next_iteration(&self) -> u32 {
        self.iterations.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn iterations(&self) -> u32 {
        self.iterations.load(Ordering::SeqCst)
    }

    // -- snapshot ------------------------------------------------------------

    pub async fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.to_string(),
            created_at: self.created_at,
            request: self.request.clone(),
            strategy: self.strategy.clone(),
            phase: self.phase().await,
            tasks: self.tasks().await,
            report: self.report().await,
            iterations: self.iterations(),
        }
    }
}

/// Immutable view of a session, suitable for terminal events and listings.
#[derive(Clone, Debug, Serialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub request: String,
    pub strategy: String,
    pub phase: Phase,
    pub tasks: Vec<Task>,
    pub report: Option<String>,
    pub iterations: u32,
}
