//! Shared execution substrate for all loop strategies
//!
//! One LLM turn = one iteration: stream the response (emitting
//! `llm_streaming` deltas), assemble text + tool calls, persist the
//! assistant message, then dispatch tool calls with schema validation and
//! side-effect application. Cancellation is observed at the loop top, at
//! every tool-call boundary, and inside the LLM stream drain.

use crate::prompts;
use crate::strategies::LoopCtx;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use futures::StreamExt;
use tabular_core::{
    AgentError, AgentEvent, DatasetSummary, Message, Phase, StreamKind, Task, TaskSource,
    TaskStatus, ToolCall,
};
use tabular_llm::{
    open_stream_with_retry, AccumulatedToolCall, LlmError, LlmRequest, StreamDelta, TurnResponse,
};
use tabular_tools::{dataset, SandboxConfig, ToolCtx};
use tracing::{debug, info};

/// Bound on the stdout excerpt carried by `tool_result` events.
const EVENT_PREVIEW_CHARS: usize = 500;
/// Bound on the request excerpt in `agent_started`.
const REQUEST_PREVIEW_CHARS: usize = 300;

/// One assembled LLM turn.
#[derive(Debug)]
pub struct Turn {
    pub iteration: u32,
    pub reasoning: String,
    /// Classified response: Content, ToolCalls, or Mixed. Text here is the
    /// raw model output, before any strategy-specific filtering.
    pub response: TurnResponse,
}

impl Turn {
    pub fn text(&self) -> &str {
        self.response.text()
    }

    pub fn calls(&self) -> &[AccumulatedToolCall] {
        self.response.tool_calls()
    }

    /// Purely textual turns are the only ones that can terminate a strategy.
    pub fn is_textual(&self) -> bool {
        self.response.is_textual()
    }
}

/// Outcome of asking for the next turn.
#[derive(Debug)]
pub enum TurnStep {
    Turn(Turn),
    /// The iteration counter hit `max_iterations`.
    Exhausted,
    /// Cancellation observed; partial output was discarded.
    Cancelled,
}

// ---------------------------------------------------------------------------
// Session opening
// ---------------------------------------------------------------------------

/// Common session opening: announce the run, inspect the dataset, and seed
/// the conversation with the system prompt and the initial user message.
pub async fn preamble(ctx: &LoopCtx, system_prompt: &str) -> Result<DatasetSummary, AgentError> {
    ctx.bus.emit(AgentEvent::AgentStarted {
        request: truncate_chars(&ctx.session.request, REQUEST_PREVIEW_CHARS),
        strategy: ctx.session.strategy.clone(),
    });
    transition_phase(ctx, Phase::Running).await;

    let summary = dataset::inspect(&ctx.session.dataset, None).await?;
    ctx.bus.emit(AgentEvent::DataExplored {
        summary: summary.clone(),
    });

    ctx.session
        .append_message(Message::system(system_prompt))
        .await;
    ctx.session
        .append_message(Message::user(prompts::initial_user(
            &ctx.session.request,
            &summary,
        )))
        .await;

    info!(
        "session {} started: strategy={} dataset={} ({} rows)",
        ctx.session.id, ctx.session.strategy, ctx.session.dataset.file_name, summary.total_rows
    );
    Ok(summary)
}

pub async fn transition_phase(ctx: &LoopCtx, phase: Phase) {
    if ctx.session.set_phase(phase).await {
        ctx.bus.emit(AgentEvent::PhaseChange { phase });
    }
}

// ---------------------------------------------------------------------------
// LLM turns
// ---------------------------------------------------------------------------

pub async fn next_turn(ctx: &LoopCtx) -> Result<TurnStep, AgentError> {
    next_turn_inner(ctx, None, None).await
}

/// Variant used by strategies that swap the system prompt per stage or
/// filter what gets persisted (e.g. stripping `<thinking>` blocks).
pub async fn next_turn_with(
    ctx: &LoopCtx,
    system_override: Option<&str>,
    persist_filter: Option<&(dyn Fn(&str) -> String + Sync)>,
) -> Result<TurnStep, AgentError> {
    next_turn_inner(ctx, system_override, persist_filter).await
}

async fn next_turn_inner(
    ctx: &LoopCtx,
    system_override: Option<&str>,
    persist_filter: Option<&(dyn Fn(&str) -> String + Sync)>,
) -> Result<TurnStep, AgentError> {
    if ctx.session.is_cancelled() {
        return Ok(TurnStep::Cancelled);
    }

    let iteration = ctx.session.next_iteration();
    if iteration > ctx.config.max_iterations {
        debug!(
            "session {}: iteration cap {} reached",
            ctx.session.id, ctx.config.max_iterations
        );
        return Ok(TurnStep::Exhausted);
    }

    let mut messages = ctx.session.messages().await;
    if let Some(system) = system_override {
        // The request copy gets the stage prompt; the canonical history
        // stays append-only.
        if let Some(first) = messages.first_mut() {
            if first.role == tabular_core::Role::System {
                first.content = system.to_string();
            }
        }
    }

    let request = LlmRequest {
        model: ctx.config.llm_model.clone(),
        messages,
        tools: Some(ctx.tools.definitions()),
        max_tokens: Some(8192),
        temperature: None,
    };

    let cancel = ctx.session.cancel_token();
    let stream = match open_stream_with_retry(
        ctx.provider.as_ref(),
        &request,
        ctx.config.llm_max_retries,
        Some(cancel.clone()),
    )
    .await
    {
        Ok(stream) => stream,
        Err(LlmError::Cancelled) => return Ok(TurnStep::Cancelled),
        Err(e) => return Err(AgentError::LlmFailed(e.to_string())),
    };

    let mut text = String::new();
    let mut reasoning = String::new();
    let mut pending: BTreeMap<u32, AccumulatedToolCall> = BTreeMap::new();
    let mut cancelled = false;

    tokio::pin!(stream);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                cancelled = true;
                break;
            }
            delta = stream.next() => {
                match delta {
                    Some(Ok(StreamDelta::Content(chunk))) => {
                        text.push_str(&chunk);
                        ctx.bus.emit(AgentEvent::LlmStreaming {
                            iteration,
                            kind: StreamKind::Content,
                            delta: chunk,
                            full_content_so_far: text.clone(),
                        });
                    }
                    Some(Ok(StreamDelta::Reasoning(chunk))) => {
                        reasoning.push_str(&chunk);
                        ctx.bus.emit(AgentEvent::LlmStreaming {
                            iteration,
                            kind: StreamKind::Reasoning,
                            delta: chunk,
                            full_content_so_far: reasoning.clone(),
                        });
                    }
                    Some(Ok(StreamDelta::ToolCallStart { index, id, name })) => {
                        let call = pending.entry(index).or_default();
                        call.id = id;
                        if !name.is_empty() {
                            call.name = name;
                        }
                    }
                    Some(Ok(StreamDelta::ToolCallDelta { index, arguments })) => {
                        let call = pending.entry(index).or_default();
                        call.arguments.push_str(&arguments);
                        ctx.bus.emit(AgentEvent::LlmStreaming {
                            iteration,
                            kind: StreamKind::ToolCallChunk,
                            delta: arguments,
                            full_content_so_far: call.arguments.clone(),
                        });
                    }
                    Some(Ok(StreamDelta::Done { .. })) => {}
                    Some(Err(LlmError::Cancelled)) => {
                        cancelled = true;
                        break;
                    }
                    Some(Err(e)) => {
                        return Err(AgentError::LlmFailed(e.to_string()));
                    }
                    None => break,
                }
            }
        }
    }

    if cancelled {
        // An aborted response is consumed and discarded, never persisted.
        debug!("session {}: llm turn {} cancelled", ctx.session.id, iteration);
        return Ok(TurnStep::Cancelled);
    }

    let calls: Vec<AccumulatedToolCall> = pending
        .into_values()
        .filter(|c| !c.id.is_empty() || !c.name.is_empty())
        .collect();

    let persisted = match persist_filter {
        Some(filter) => filter(&text),
        None => text.clone(),
    };
    if calls.is_empty() {
        ctx.session
            .append_message(Message::assistant(persisted))
            .await;
    } else {
        let descriptors = calls
            .iter()
            .map(|c| ToolCall {
                id: c.id.clone(),
                name: c.name.clone(),
                arguments: c
                    .parse_arguments()
                    .unwrap_or_else(|_| Value::String(c.arguments.clone())),
            })
            .collect();
        ctx.session
            .append_message(Message::assistant_with_tools(persisted, descriptors))
            .await;
    }

    // Reasoning traces are observational: consolidated into one
    // llm_thinking event, never written into the history.
    if !reasoning.trim().is_empty() {
        ctx.bus.emit(AgentEvent::LlmThinking {
            content: reasoning.clone(),
        });
    }

    Ok(TurnStep::Turn(Turn {
        iteration,
        reasoning,
        response: TurnResponse::from_parts(text, calls),
    }))
}

// ---------------------------------------------------------------------------
// Tool dispatch
// ---------------------------------------------------------------------------

/// Validate, invoke, and record every tool call of a turn in order.
///
/// Returns true when cancellation was observed between calls (the caller
/// finishes with `agent_stopped`). Argument and schema failures are
/// surfaced back to the LLM as tool messages; only infrastructure errors
/// propagate as `Err`.
pub async fn dispatch_tool_calls(ctx: &LoopCtx, turn: &Turn) -> Result<bool, AgentError> {
    for call in turn.calls() {
        if ctx.session.is_cancelled() {
            return Ok(true);
        }

        let (args, parse_error) = match call.parse_arguments() {
            Ok(value) => (value, None),
            Err(e) => (Value::String(call.arguments.clone()), Some(e.to_string())),
        };

        ctx.bus.emit(AgentEvent::ToolCall {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            arguments: args.clone(),
            iteration: turn.iteration,
        });

        if let Some(reason) = parse_error {
            reject_call(ctx, turn, call, format!("tool arguments are not valid JSON: {}", reason))
                .await;
            continue;
        }
        if let Err(reason) = ctx.tools.validate_args(&call.name, &args) {
            reject_call(ctx, turn, call, reason).await;
            continue;
        }

        let current = ctx.session.current_task().await;
        if call.name == "run_code" {
            let code = args["code"].as_str().unwrap_or_default().to_string();
            ctx.bus.emit(AgentEvent::CodeGenerated {
                task_id: current.as_ref().map(|t| t.id),
                code: code.clone(),
                description: current
                    .as_ref()
                    .map(|t| t.name.clone())
                    .unwrap_or_else(|| "analysis code".to_string()),
            });
            if let Some(task) = &current {
                ctx.session
                    .update_task(task.id, |t| t.code = Some(code.clone()))
                    .await;
            }
        }

        let tool_ctx = ToolCtx {
            dataset: ctx.session.dataset.clone(),
            tasks: ctx.session.tasks().await,
            work_root: ctx.session.work_root.clone(),
            sandbox: SandboxConfig {
                timeout: Duration::from_secs(ctx.config.code_timeout_seconds),
                ..SandboxConfig::default()
            },
            cancel: ctx.session.cancel_token(),
        };

        let outcome = ctx.tools.execute(&call.name, &tool_ctx, args).await?;

        let mut has_image = false;
        let mut stdout_preview = truncate_chars(&outcome.payload, EVENT_PREVIEW_CHARS);
        let mut stderr_preview = None;
        if let Some(artifact) = &outcome.artifact {
            has_image = artifact.image.is_some();
            stdout_preview = truncate_chars(&artifact.stdout, EVENT_PREVIEW_CHARS);
            if artifact.status != tabular_core::ExecStatus::Success {
                stderr_preview = Some(truncate_chars(&artifact.stderr, EVENT_PREVIEW_CHARS));
            }
        }

        // The call/result pair stays adjacent on the stream; side-effect
        // events follow the result.
        let status = if outcome.is_error {
            "error".to_string()
        } else {
            outcome.status.as_str().to_string()
        };
        ctx.bus.emit(AgentEvent::ToolResult {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            status,
            stdout_preview,
            stderr_preview,
            has_image,
            iteration: turn.iteration,
        });
        ctx.session
            .append_message(Message::tool_result(&call.id, &outcome.payload))
            .await;

        if let Some(artifact) = outcome.artifact {
            if let Some(image) = &artifact.image {
                ctx.bus.emit(AgentEvent::ImageGenerated {
                    task_id: current.as_ref().map(|t| t.id),
                    task_name: current
                        .as_ref()
                        .map(|t| t.name.clone())
                        .unwrap_or_else(|| "visualization".to_string()),
                    image_base64: BASE64.encode(&image.bytes),
                });
            }
            ctx.session.push_artifact(artifact).await;
        }

        if let Some(change) = outcome.tasks {
            apply_task_change(ctx, change.tasks, TaskSource::Tool).await;
        }

        if let Some(summary) = outcome.summary {
            ctx.bus.emit(AgentEvent::DataExplored { summary });
        }
    }

    Ok(false)
}

/// Emit the rejection pair for a call that failed validation and surface
/// the error back to the LLM so it can recover.
async fn reject_call(ctx: &LoopCtx, turn: &Turn, call: &AccumulatedToolCall, reason: String) {
    let payload = format!("INVALID_INPUT: {}", reason);
    ctx.bus.emit(AgentEvent::ToolResult {
        call_id: call.id.clone(),
        tool_name: call.name.clone(),
        status: "error".to_string(),
        stdout_preview: truncate_chars(&payload, EVENT_PREVIEW_CHARS),
        stderr_preview: None,
        has_image: false,
        iteration: turn.iteration,
    });
    ctx.session
        .append_message(Message::tool_result(&call.id, &payload))
        .await;
}

// ---------------------------------------------------------------------------
// Task-list updates
// ---------------------------------------------------------------------------

/// Install the initial code-authored plan.
pub async fn set_initial_plan(ctx: &LoopCtx, tasks: Vec<Task>) {
    if ctx.session.replace_tasks(tasks.clone()).await {
        ctx.bus.emit(AgentEvent::TasksPlanned { tasks });
    }
}

/// Replace the session task list and emit the snapshot plus per-task
/// transition events.
pub async fn apply_task_change(ctx: &LoopCtx, tasks: Vec<Task>, source: TaskSource) {
    let old = ctx.session.tasks().await;
    if !ctx.session.replace_tasks(tasks.clone()).await {
        return;
    }

    ctx.bus.emit(AgentEvent::TasksUpdated {
        tasks: tasks.clone(),
        source,
    });

    for task in &tasks {
        let previous = old.iter().find(|t| t.id == task.id).map(|t| t.status);
        if previous == Some(task.status) {
            continue;
        }
        match task.status {
            TaskStatus::InProgress => ctx.bus.emit(AgentEvent::TaskStarted {
                task_id: task.id,
                task_name: task.name.clone(),
            }),
            TaskStatus::Completed => ctx.bus.emit(AgentEvent::TaskCompleted {
                task_id: task.id,
                task_name: task.name.clone(),
            }),
            TaskStatus::Failed => ctx.bus.emit(AgentEvent::TaskFailed {
                task_id: task.id,
                task_name: task.name.clone(),
                error: task.error.clone().unwrap_or_default(),
            }),
            TaskStatus::Pending | TaskStatus::Skipped => {}
        }
    }
}

/// Set one task's status (code-sequenced strategies).
pub async fn mark_task(ctx: &LoopCtx, id: u32, status: TaskStatus, error: Option<String>) {
    let mut tasks = ctx.session.tasks().await;
    let Some(task) = tasks.iter_mut().find(|t| t.id == id) else {
        return;
    };
    task.status = status;
    if error.is_some() {
        task.error = error;
    }
    apply_task_change(ctx, tasks, TaskSource::Code).await;
}

// ---------------------------------------------------------------------------
// Terminal transitions
// ---------------------------------------------------------------------------

/// Normal completion: record the report and emit the terminal pair.
///
/// A completed session must carry a non-empty report; when no report text
/// survived (e.g. a closing turn that was all state blocks), the session
/// closes through the warning path instead of emitting an empty
/// `report_generated`.
pub async fn finish_completed(ctx: &LoopCtx, report: String) {
    let report = report.trim().to_string();
    if report.is_empty() {
        finish_warned(
            ctx,
            "analysis finished without producing report text".to_string(),
            String::new(),
            false,
        )
        .await;
        return;
    }

    ctx.session.set_report(&report).await;
    ctx.bus.emit(AgentEvent::ReportGenerated {
        report: report.clone(),
    });
    transition_phase(ctx, Phase::Completed).await;
    ctx.bus.emit(AgentEvent::AgentCompleted {
        final_report: report,
        images: ctx.session.images_base64().await,
        reached_max_iterations: false,
        incomplete_tasks_count: ctx.session.incomplete_task_count().await,
    });
    info!(
        "session {} completed after {} iterations",
        ctx.session.id,
        ctx.session.iterations()
    );
}

/// Iteration cap reached: soft completion carrying whatever report text has
/// accumulated, possibly none.
pub async fn finish_exhausted(ctx: &LoopCtx) {
    let incomplete = ctx.session.incomplete_task_count().await;
    let report = match ctx.session.report().await {
        Some(report) => report,
        None => ctx.session.last_assistant_text().await.unwrap_or_default(),
    };
    finish_warned(
        ctx,
        format!(
            "iteration cap of {} reached with {} unfinished tasks",
            ctx.config.max_iterations, incomplete
        ),
        report,
        true,
    )
    .await;
}

/// Soft completion: `agent_warning` followed by `agent_completed`.
async fn finish_warned(ctx: &LoopCtx, message: String, report: String, reached_max: bool) {
    let incomplete = ctx.session.incomplete_task_count().await;
    ctx.bus.emit(AgentEvent::AgentWarning {
        message: message.clone(),
        incomplete_tasks_count: incomplete,
    });

    ctx.session.set_report(&report).await;
    transition_phase(ctx, Phase::Completed).await;
    ctx.bus.emit(AgentEvent::AgentCompleted {
        final_report: report,
        images: ctx.session.images_base64().await,
        reached_max_iterations: reached_max,
        incomplete_tasks_count: incomplete,
    });
    info!("session {} completed with warning: {}", ctx.session.id, message);
}

/// Cooperative stop: emit the terminal pair and leave partial state intact.
pub async fn finish_stopped(ctx: &LoopCtx, reason: &str) {
    transition_phase(ctx, Phase::Stopped).await;
    ctx.bus.emit(AgentEvent::AgentStopped {
        reason: reason.to_string(),
    });
    info!("session {} stopped: {}", ctx.session.id, reason);
}

// ---------------------------------------------------------------------------
// Small helpers
// ---------------------------------------------------------------------------

pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    let trimmed = s.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(max_chars).collect();
    format!("{}...", cut)
}

/// The default four-step plan used when code owns the task list.
pub fn default_plan(request: &str) -> Vec<Task> {
    use tabular_core::TaskKind;
    vec![
        Task::new(1, "Explore the dataset structure", TaskKind::DataExploration),
        Task::new(2, "Run the core analysis", TaskKind::Analysis)
            .with_description(format!("Answer the request: {}", request)),
        Task::new(3, "Create supporting visualizations", TaskKind::Visualization),
        Task::new(4, "Write the final report", TaskKind::Report),
    ]
}
