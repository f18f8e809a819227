//! Hybrid strategy - code owns the order, the LLM chooses the content
//!
//! The model plans its own task list via todo_write; code then walks that
//! list in order with a bounded number of iterations per task
//! (`max_iterations_per_task`). A task that exceeds its bound is marked
//! failed and the walk moves on. Terminates when every task is terminal.

use crate::prompts;
use crate::strategies::{driver, LoopCtx, Strategy, TerminalCause};
use tabular_core::{AgentError, Message, TaskKind, TaskStatus};

pub struct HybridStrategy;

#[async_trait::async_trait]
impl Strategy for HybridStrategy {
    fn name(&self) -> &'static str {
        "hybrid"
    }

    async fn run(&self, ctx: &LoopCtx) -> Result<TerminalCause, AgentError> {
        driver::preamble(ctx, &prompts::hybrid()).await?;

        // Planning: one turn for the model to call todo_write. Falls back
        // to the default plan if it does anything else.
        ctx.session
            .append_message(Message::user(prompts::plan_request()))
            .await;
        match driver::next_turn(ctx).await? {
            driver::TurnStep::Cancelled => {
                driver::finish_stopped(ctx, "cancelled by client").await;
                return Ok(TerminalCause::Stopped);
            }
            driver::TurnStep::Exhausted => {
                driver::finish_exhausted(ctx).await;
                return Ok(TerminalCause::CompletedExhausted);
            }
            driver::TurnStep::Turn(turn) => {
                if !turn.is_textual() && driver::dispatch_tool_calls(ctx, &turn).await? {
                    driver::finish_stopped(ctx, "cancelled by client").await;
                    return Ok(TerminalCause::Stopped);
                }
            }
        }
        if ctx.session.tasks().await.is_empty() {
            driver::set_initial_plan(ctx, driver::default_plan(&ctx.session.request)).await;
        }

        let mut report_text = String::new();

        let mut index = 0usize;
        loop {
            let tasks = ctx.session.tasks().await;
            let Some(task) = tasks.get(index).cloned() else {
                break;
            };
            index += 1;
            if task.status.is_terminal() {
                continue;
            }

            driver::mark_task(ctx, task.id, TaskStatus::InProgress, None).await;
            ctx.session
                .append_message(Message::user(prompts::task_instruction(&task)))
                .await;

            let mut closed = false;
            for _attempt in 0..ctx.config.max_iterations_per_task {
                match driver::next_turn(ctx).await? {
                    driver::TurnStep::Cancelled => {
                        driver::finish_stopped(ctx, "cancelled by client").await;
                        return Ok(TerminalCause::Stopped);
                    }
                    driver::TurnStep::Exhausted => {
                        driver::finish_exhausted(ctx).await;
                        return Ok(TerminalCause::CompletedExhausted);
                    }
                    driver::TurnStep::Turn(turn) => {
                        if turn.is_textual() {
                            if task.kind == TaskKind::Report {
                                report_text = turn.text().to_string();
                            }
                            driver::mark_task(ctx, task.id, TaskStatus::Completed, None).await;
                            closed = true;
                            break;
                        }

                        if driver::dispatch_tool_calls(ctx, &turn).await? {
                            driver::finish_stopped(ctx, "cancelled by client").await;
                            return Ok(TerminalCause::Stopped);
                        }

                        let now = ctx.session.tasks().await;
                        if now
                            .iter()
                            .find(|t| t.id == task.id)
                            .map(|t| t.status.is_terminal())
                            .unwrap_or(true)
                        {
                            closed = true;
                            break;
                        }
                    }
                }
            }

            if !closed {
                driver::mark_task(
                    ctx,
                    task.id,
                    TaskStatus::Failed,
                    Some(format!(
                        "task did not finish within {} iterations",
                        ctx.config.max_iterations_per_task
                    )),
                )
                .await;
            }
        }

        let report = if report_text.trim().is_empty() {
            ctx.session.last_assistant_text().await.unwrap_or_default()
        } else {
            report_text
        };
        driver::finish_completed(ctx, report).await;
        Ok(TerminalCause::Completed)
    }
}
