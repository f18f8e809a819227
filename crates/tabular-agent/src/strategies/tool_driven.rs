//! Tool-driven strategy - the LLM owns its task list via todo_write
//!
//! The recommended default. Code enforces only the iteration cap and the
//! single-in-progress invariant (via the tool); everything else - planning,
//! sequencing, completion - is the model's call. Terminates on a purely
//! textual turn once every declared task is resolved (or none were ever
//! declared).

use crate::prompts;
use crate::strategies::{driver, LoopCtx, Strategy, TerminalCause};
use tabular_core::{AgentError, Message};

pub struct ToolDrivenStrategy;

#[async_trait::async_trait]
impl Strategy for ToolDrivenStrategy {
    fn name(&self) -> &'static str {
        "tool_driven"
    }

    async fn run(&self, ctx: &LoopCtx) -> Result<TerminalCause, AgentError> {
        driver::preamble(ctx, &prompts::tool_driven()).await?;

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
                    if !turn.is_textual() {
                        if driver::dispatch_tool_calls(ctx, &turn).await? {
                            driver::finish_stopped(ctx, "cancelled by client").await;
                            return Ok(TerminalCause::Stopped);
                        }
                        continue;
                    }

                    let tasks = ctx.session.tasks().await;
                    let resolved =
                        tasks.is_empty() || tasks.iter().all(|t| t.status.is_terminal());
                    if resolved {
                        driver::finish_completed(ctx, turn.text().to_string()).await;
                        return Ok(TerminalCause::Completed);
                    }

                    // A textual turn with open tasks would otherwise repeat
                    // verbatim next iteration; name the stragglers.
                    let unfinished: Vec<String> = tasks
                        .iter()
                        .filter(|t| !t.status.is_terminal())
                        .map(|t| format!("#{} {}", t.id, t.name))
                        .collect();
                    ctx.session
                        .append_message(Message::user(prompts::unfinished_reminder(&unfinished)))
                        .await;
                }
            }
        }
    }
}
