//! Autonomous strategy - the LLM encodes its state inline
//!
//! No todo tool: the model maintains a `<tasks>` checklist and `<thinking>`
//! blocks directly in its replies, parsed each turn. Terminates on a
//! textual turn carrying the literal `[ANALYSIS_COMPLETE]` marker.

use crate::prompts;
use crate::strategies::{driver, tags, LoopCtx, Strategy, TerminalCause};
use tabular_core::{AgentError, AgentEvent, Message, Task, TaskSource};
use tabular_tools::tools::todo_write::infer_kind;

pub struct AutonomousStrategy;

#[async_trait::async_trait]
impl Strategy for AutonomousStrategy {
    fn name(&self) -> &'static str {
        "autonomous"
    }

    async fn run(&self, ctx: &LoopCtx) -> Result<TerminalCause, AgentError> {
        driver::preamble(ctx, &prompts::autonomous()).await?;

        loop {
            let step = driver::next_turn_with(ctx, None, Some(&tags::strip_thinking)).await?;
            match step {
                driver::TurnStep::Cancelled => {
                    driver::finish_stopped(ctx, "cancelled by client").await;
                    return Ok(TerminalCause::Stopped);
                }
                driver::TurnStep::Exhausted => {
                    driver::finish_exhausted(ctx).await;
                    return Ok(TerminalCause::CompletedExhausted);
                }
                driver::TurnStep::Turn(turn) => {
                    // Thinking blocks are observational; they never reach
                    // the history (next_turn_with stripped them). One
                    // consolidated event per turn, however many blocks.
                    let blocks = tags::parse_thinking(turn.text());
                    if !blocks.is_empty() {
                        ctx.bus.emit(AgentEvent::LlmThinking {
                            content: blocks.join("\n\n"),
                        });
                    }

                    if let Some(items) = tags::parse_tasks(turn.text()) {
                        let tasks: Vec<Task> = items
                            .into_iter()
                            .enumerate()
                            .map(|(i, (name, status))| {
                                Task::new(i as u32 + 1, name.clone(), infer_kind(&name))
                                    .with_status(status)
                            })
                            .collect();
                        driver::apply_task_change(ctx, tasks, TaskSource::Llm).await;
                    }

                    if !turn.is_textual() {
                        if driver::dispatch_tool_calls(ctx, &turn).await? {
                            driver::finish_stopped(ctx, "cancelled by client").await;
                            return Ok(TerminalCause::Stopped);
                        }
                        continue;
                    }

                    if turn.text().contains(tags::COMPLETE_SENTINEL) {
                        driver::finish_completed(ctx, tags::clean_report(turn.text())).await;
                        return Ok(TerminalCause::Completed);
                    }

                    // Textual but unfinished: keep the loop moving.
                    ctx.session
                        .append_message(Message::user(prompts::continue_nudge()))
                        .await;
                }
            }
        }
    }
}
