//! Task-driven strategy - code owns the task list
//!
//! A fixed four-step plan is installed up front; the loop walks it in
//! order, injecting "now execute task #k" user messages between turns. The
//! model may mark the current task completed early with todo_write
//! (merge=true), but a purely textual turn always closes it. Terminates
//! when every code-owned task has reached a terminal status.

use crate::prompts;
use crate::strategies::{driver, LoopCtx, Strategy, TerminalCause};
use tabular_core::{AgentError, Message, TaskKind, TaskStatus};

pub struct TaskDrivenStrategy;

#[async_trait::async_trait]
impl Strategy for TaskDrivenStrategy {
    fn name(&self) -> &'static str {
        "task_driven"
    }

    async fn run(&self, ctx: &LoopCtx) -> Result<TerminalCause, AgentError> {
        driver::preamble(ctx, &prompts::task_driven()).await?;
        driver::set_initial_plan(ctx, driver::default_plan(&ctx.session.request)).await;

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

            loop {
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
                            break;
                        }

                        if driver::dispatch_tool_calls(ctx, &turn).await? {
                            driver::finish_stopped(ctx, "cancelled by client").await;
                            return Ok(TerminalCause::Stopped);
                        }

                        // todo_write may have closed the task mid-turn.
                        let now = ctx.session.tasks().await;
                        if now
                            .iter()
                            .find(|t| t.id == task.id)
                            .map(|t| t.status.is_terminal())
                            .unwrap_or(true)
                        {
                            break;
                        }
                    }
                }
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
