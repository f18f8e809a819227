//! Typed session events and the wire envelope
//!
//! Events are a closed sum - one variant per taxonomy entry - and are only
//! flattened into the `{type, timestamp, session_id, payload}` envelope when
//! they cross the process boundary (event bus history / WebSocket frames).

use crate::types::{DatasetSummary, Phase, SessionId, Task, TaskSource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Delta classification for `llm_streaming` events
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Content,
    Reasoning,
    ToolCallChunk,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Content => "content",
            StreamKind::Reasoning => "reasoning",
            StreamKind::ToolCallChunk => "tool_call_chunk",
        }
    }
}

/// Everything a session can emit on its event stream.
#[derive(Clone, Debug)]
pub enum AgentEvent {
    /// Subscriber handshake acknowledgment (sent by the transport layer).
    Connected,
    AgentStarted {
        request: String,
        strategy: String,
    },
    PhaseChange {
        phase: Phase,
    },
    DataExplored {
        summary: DatasetSummary,
    },
    /// Initial code-authored task list.
    TasksPlanned {
        tasks: Vec<Task>,
    },
    /// Full task list snapshot after any change.
    TasksUpdated {
        tasks: Vec<Task>,
        source: TaskSource,
    },
    TaskStarted {
        task_id: u32,
        task_name: String,
    },
    TaskCompleted {
        task_id: u32,
        task_name: String,
    },
    TaskFailed {
        task_id: u32,
        task_name: String,
        error: String,
    },
    LlmStreaming {
        iteration: u32,
        kind: StreamKind,
        delta: String,
        full_content_so_far: String,
    },
    LlmThinking {
        content: String,
    },
    ToolCall {
        call_id: String,
        tool_name: String,
        arguments: Value,
        iteration: u32,
    },
    ToolResult {
        call_id: String,
        tool_name: String,
        status: String,
        stdout_preview: String,
        stderr_preview: Option<String>,
        has_image: bool,
        iteration: u32,
    },
    CodeGenerated {
        task_id: Option<u32>,
        code: String,
        description: String,
    },
    ImageGenerated {
        task_id: Option<u32>,
        task_name: String,
        image_base64: String,
    },
    ReportGenerated {
        report: String,
    },
    AgentWarning {
        message: String,
        incomplete_tasks_count: usize,
    },
    AgentCompleted {
        final_report: String,
        images: Vec<String>,
        reached_max_iterations: bool,
        incomplete_tasks_count: usize,
    },
    AgentError {
        error: String,
        location: String,
    },
    AgentStopped {
        reason: String,
    },
}

impl AgentEvent {
    /// Wire name of this event, matching the envelope `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentEvent::Connected => "connected",
            AgentEvent::AgentStarted { .. } => "agent_started",
            AgentEvent::PhaseChange { .. } => "phase_change",
            AgentEvent::DataExplored { .. } => "data_explored",
            AgentEvent::TasksPlanned { .. } => "tasks_planned",
            AgentEvent::TasksUpdated { .. } => "tasks_updated",
            AgentEvent::TaskStarted { .. } => "task_started",
            AgentEvent::TaskCompleted { .. } => "task_completed",
            AgentEvent::TaskFailed { .. } => "task_failed",
            AgentEvent::LlmStreaming { .. } => "llm_streaming",
            AgentEvent::LlmThinking { .. } => "llm_thinking",
            AgentEvent::ToolCall { .. } => "tool_call",
            AgentEvent::ToolResult { .. } => "tool_result",
            AgentEvent::CodeGenerated { .. } => "code_generated",
            AgentEvent::ImageGenerated { .. } => "image_generated",
            AgentEvent::ReportGenerated { .. } => "report_generated",
            AgentEvent::AgentWarning { .. } => "agent_warning",
            AgentEvent::AgentCompleted { .. } => "agent_completed",
            AgentEvent::AgentError { .. } => "agent_error",
            AgentEvent::AgentStopped { .. } => "agent_stopped",
        }
    }

    /// Terminal events close the session stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgentEvent::AgentCompleted { .. }
                | AgentEvent::AgentError { .. }
                | AgentEvent::AgentStopped { .. }
        )
    }

    /// Build the free-form payload map for the wire envelope.
    pub fn payload(&self) -> Value {
        match self {
            AgentEvent::Connected => json!({}),
            AgentEvent::AgentStarted { request, strategy } => json!({
                "request": request,
                "strategy": strategy,
            }),
            AgentEvent::PhaseChange { phase } => json!({ "phase": phase.as_str() }),
            AgentEvent::DataExplored { summary } => {
                serde_json::to_value(summary).unwrap_or_else(|_| json!({}))
            }
            AgentEvent::TasksPlanned { tasks } => json!({ "tasks": tasks }),
            AgentEvent::TasksUpdated { tasks, source } => json!({
                "tasks": tasks,
                "source": source,
            }),
            AgentEvent::TaskStarted { task_id, task_name } => json!({
                "task_id": task_id,
                "task_name": task_name,
            }),
            AgentEvent::TaskCompleted { task_id, task_name } => json!({
                "task_id": task_id,
                "task_name": task_name,
            }),
            AgentEvent::TaskFailed {
                task_id,
                task_name,
                error,
            } => json!({
                "task_id": task_id,
                "task_name": task_name,
                "error": error,
            }),
            AgentEvent::LlmStreaming {
                iteration,
                kind,
                delta,
                full_content_so_far,
            } => json!({
                "iteration": iteration,
                "type": kind.as_str(),
                "delta": delta,
                "full_content_so_far": full_content_so_far,
            }),
            AgentEvent::LlmThinking { content } => json!({ "content": content }),
            AgentEvent::ToolCall {
                call_id,
                tool_name,
                arguments,
                iteration,
            } => json!({
                "call_id": call_id,
                "tool_name": tool_name,
                "arguments": arguments,
                "iteration": iteration,
            }),
            AgentEvent::ToolResult {
                call_id,
                tool_name,
                status,
                stdout_preview,
                stderr_preview,
                has_image,
                iteration,
            } => {
                let mut v = json!({
                    "call_id": call_id,
                    "tool_name": tool_name,
                    "status": status,
                    "stdout_preview": stdout_preview,
                    "has_image": has_image,
                    "iteration": iteration,
                });
                if let Some(stderr) = stderr_preview {
                    v["stderr_preview"] = json!(stderr);
                }
                v
            }
            AgentEvent::CodeGenerated {
                task_id,
                code,
                description,
            } => json!({
                "task_id": task_id,
                "code": code,
                "description": description,
            }),
            AgentEvent::ImageGenerated {
                task_id,
                task_name,
                image_base64,
            } => json!({
                "task_id": task_id,
                "task_name": task_name,
                "image_base64": image_base64,
            }),
            AgentEvent::ReportGenerated { report } => json!({ "report": report }),
            AgentEvent::AgentWarning {
                message,
                incomplete_tasks_count,
            } => json!({
                "message": message,
                "incomplete_tasks_count": incomplete_tasks_count,
            }),
            AgentEvent::AgentCompleted {
                final_report,
                images,
                reached_max_iterations,
                incomplete_tasks_count,
            } => json!({
                "final_report": final_report,
                "images": images,
                "reached_max_iterations": reached_max_iterations,
                "incomplete_tasks_count": incomplete_tasks_count,
            }),
            AgentEvent::AgentError { error, location } => json!({
                "error": error,
                "where": location,
            }),
            AgentEvent::AgentStopped { reason } => json!({ "reason": reason }),
        }
    }
}

/// The wire shape: `{type, timestamp, session_id, payload}`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub payload: Value,
}

impl EventEnvelope {
    /// Stamp an event with the session id and the current UTC time.
    pub fn stamp(session_id: &SessionId, event: &AgentEvent) -> Self {
        Self {
            event_type: event.kind().to_string(),
            timestamp: Utc::now(),
            session_id: session_id.to_string(),
            payload: event.payload(),
        }
    }

    /// Synthetic per-subscriber marker emitted when a slow consumer is
    /// dropped. Not part of the session's ordered history.
    pub fn subscriber_lagged(session_id: &SessionId) -> Self {
        Self {
            event_type: "subscriber_lagged".to_string(),
            timestamp: Utc::now(),
            session_id: session_id.to_string(),
            payload: json!({
                "reason": "subscriber queue overflow; stream dropped"
            }),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.event_type.as_str(),
            "agent_completed" | "agent_error" | "agent_stopped"
        )
    }
}
