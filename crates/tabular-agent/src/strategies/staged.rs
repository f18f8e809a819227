//! Staged strategy - code drives four fixed phases
//!
//! explore -> plan -> execute-each -> report, each with its own system
//! prompt (swapped per request; the canonical history stays append-only).
//! The most predictable of the five: the model never chooses what happens
//! next, only how to do the current step.

use crate::prompts;
use crate::strategies::{driver, LoopCtx, Strategy, TerminalCause};
use tabular_core::{AgentError, AgentEvent, Message, TaskKind, TaskStatus};

pub struct StagedStrategy;

/// How one stage's inner loop ended.
enum StageEnd {
    /// Stage produced its closing textual turn.
    Text(String),
    /// Per-stage iteration bound hit without a textual turn.
    BoundHit,
    Cancelled,
    Exhausted,
}

#[async_trait::async_trait]
impl Strategy for StagedStrategy {
    fn name(&self) -> &'static str {
        "staged"
    }

    async fn run(&self, ctx: &LoopCtx) -> Result<TerminalCause, AgentError> {
        driver::preamble(ctx, &prompts::staged()).await?;

        // -- Stage 1: explore -------------------------------------------------
        announce(ctx, 1, "exploring the dataset");
        ctx.session
            .append_message(Message::user(
                "Begin the exploration stage: describe the dataset's structure \
                 and anything notable for the analysis.",
            ))
            .await;
        match stage_loop(ctx, &prompts::staged_explore()).await? {
            StageEnd::Cancelled => return stopped(ctx).await,
            StageEnd::Exhausted => return exhausted(ctx).await,
            StageEnd::Text(_) | StageEnd::BoundHit => {}
        }

        // -- Stage 2: plan ----------------------------------------------------
        announce(ctx, 2, "planning the analysis");
        ctx.session
            .append_message(Message::user(prompts::plan_request()))
            .await;
        match stage_loop(ctx, &prompts::staged_plan()).await? {
            StageEnd::Cancelled => return stopped(ctx).await,
            StageEnd::Exhausted => return exhausted(ctx).await,
            StageEnd::Text(_) | StageEnd::BoundHit => {}
        }
        if ctx.session.tasks().await.is_empty() {
            driver::set_initial_plan(ctx, driver::default_plan(&ctx.session.request)).await;
        }

        // -- Stage 3: execute each non-report task ----------------------------
        announce(ctx, 3, "executing the planned tasks");
        let mut index = 0usize;
        loop {
            let tasks = ctx.session.tasks().await;
            let Some(task) = tasks.get(index).cloned() else {
                break;
            };
            index += 1;
            if task.status.is_terminal() || task.kind == TaskKind::Report {
                continue;
            }

            driver::mark_task(ctx, task.id, TaskStatus::InProgress, None).await;
            ctx.session
                .append_message(Message::user(prompts::task_instruction(&task)))
                .await;

            match stage_loop(ctx, &prompts::staged_execute()).await? {
                StageEnd::Cancelled => return stopped(ctx).await,
                StageEnd::Exhausted => return exhausted(ctx).await,
                StageEnd::Text(_) => {
                    driver::mark_task(ctx, task.id, TaskStatus::Completed, None).await;
                }
                StageEnd::BoundHit => {
                    driver::mark_task(
                        ctx,
                        task.id,
                        TaskStatus::Failed,
                        Some(format!(
                            "stage did not finish within {} iterations",
                            ctx.config.max_iterations_per_task
                        )),
                    )
                    .await;
                }
            }
        }

        // -- Stage 4: report --------------------------------------------------
        announce(ctx, 4, "writing the report");
        let report_task = ctx
            .session
            .tasks()
            .await
            .into_iter()
            .find(|t| t.kind == TaskKind::Report && !t.status.is_terminal());
        if let Some(task) = &report_task {
            driver::mark_task(ctx, task.id, TaskStatus::InProgress, None).await;
        }
        ctx.session
            .append_message(Message::user(
                "Write the final Markdown report for the analysis now.",
            ))
            .await;

        let report = match stage_loop(ctx, &prompts::staged_report()).await? {
            StageEnd::Cancelled => return stopped(ctx).await,
            StageEnd::Exhausted => return exhausted(ctx).await,
            StageEnd::Text(text) => text,
            StageEnd::BoundHit => ctx.session.last_assistant_text().await.unwrap_or_default(),
        };
        if let Some(task) = &report_task {
            driver::mark_task(ctx, task.id, TaskStatus::Completed, None).await;
        }

        driver::finish_completed(ctx, report).await;
        Ok(TerminalCause::Completed)
    }
}

/// Drive turns under one stage prompt until a textual turn, the per-stage
/// bound, cancellation, or global exhaustion.
async fn stage_loop(ctx: &LoopCtx, stage_prompt: &str) -> Result<StageEnd, AgentError> {
    for _ in 0..ctx.config.max_iterations_per_task {
        match driver::next_turn_with(ctx, Some(stage_prompt), None).await? {
            driver::TurnStep::Cancelled => return Ok(StageEnd::Cancelled),
            driver::TurnStep::Exhausted => return Ok(StageEnd::Exhausted),
            driver::TurnStep::Turn(turn) => {
                if turn.is_textual() {
                    return Ok(StageEnd::Text(turn.text().to_string()));
                }
                if driver::dispatch_tool_calls(ctx, &turn).await? {
                    return Ok(StageEnd::Cancelled);
                }
            }
        }
    }
    Ok(StageEnd::BoundHit)
}

/// Synthetic thinking line marking a stage transition.
fn announce(ctx: &LoopCtx, stage: u8, doing: &str) {
    ctx.bus.emit(AgentEvent::LlmThinking {
        content: format!("Stage {}/4: {}", stage, doing),
    });
}

async fn stopped(ctx: &LoopCtx) -> Result<TerminalCause, AgentError> {
    driver::finish_stopped(ctx, "cancelled by client").await;
    Ok(TerminalCause::Stopped)
}

async fn exhausted(ctx: &LoopCtx) -> Result<TerminalCause, AgentError> {
    driver::finish_exhausted(ctx).await;
    Ok(TerminalCause::CompletedExhausted)
}
