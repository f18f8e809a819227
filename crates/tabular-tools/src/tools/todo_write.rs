//! todo_write tool - LLM-managed task list
//!
//! `merge=false` replaces the session task list (initial planning);
//! `merge=true` updates matching ids and appends unknown ones. Rejects any
//! update that would leave two tasks in_progress at once.

use crate::registry::{Tool, ToolCtx, ToolOutcome};
use serde_json::{json, Value};
use tabular_core::{AgentError, Task, TaskKind, TaskStatus};
use tracing::debug;

pub struct TodoWriteTool;

impl TodoWriteTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TodoWriteTool {
    fn default() -> Self {
        Self::new()
    }
}

struct TodoEntry {
    id: u32,
    content: String,
    status: Option<TaskStatus>,
}

#[async_trait::async_trait]
impl Tool for TodoWriteTool {
    fn name(&self) -> &str {
        "todo_write"
    }

    fn description(&self) -> &str {
        "Create or update your analysis task list. Call with merge=false \
         once to plan the full list, then with merge=true to change task \
         statuses as you work. Keep exactly one task in_progress at a time."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "todos": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": { "type": "integer", "description": "Stable task id" },
                            "content": { "type": "string", "description": "Task name" },
                            "status": {
                                "type": "string",
                                "enum": ["pending", "in_progress", "completed", "failed", "skipped"]
                            }
                        },
                        "required": ["id", "content"]
                    }
                },
                "merge": {
                    "type": "boolean",
                    "description": "false replaces the whole list, true updates by id"
                }
            },
            "required": ["todos", "merge"]
        })
    }

    async fn execute(&self, ctx: &ToolCtx, args: Value) -> Result<ToolOutcome, AgentError> {
        let Some(raw_todos) = args["todos"].as_array() else {
            return Ok(ToolOutcome::tagged_error(
                "INVALID_INPUT",
                "missing required parameter: todos",
            ));
        };
        let Some(merge) = args["merge"].as_bool() else {
            return Ok(ToolOutcome::tagged_error(
                "INVALID_INPUT",
                "missing required parameter: merge",
            ));
        };

        let mut entries = Vec::with_capacity(raw_todos.len());
        for (i, raw) in raw_todos.iter().enumerate() {
            match parse_entry(raw) {
                Ok(entry) => entries.push(entry),
                Err(reason) => {
                    return Ok(ToolOutcome::tagged_error(
                        "INVALID_INPUT",
                        format!("todos[{}]: {}", i, reason),
                    ));
                }
            }
        }

        let next = if merge {
            merge_entries(&ctx.tasks, entries)
        } else {
            match replace_entries(entries) {
                Ok(tasks) => tasks,
                Err(reason) => {
                    return Ok(ToolOutcome::tagged_error("INVALID_INPUT", reason));
                }
            }
        };

        let in_progress = next
            .iter()
            .filter(|t| t.status == TaskStatus::InProgress)
            .count();
        if in_progress > 1 {
            return Ok(ToolOutcome::tagged_error(
                "INVALID_STATE",
                "more than one task would be in_progress; complete the current \
                 task in the same call before starting the next",
            ));
        }

        debug!(
            "todo_write: {} tasks ({})",
            next.len(),
            if merge { "merge" } else { "replace" }
        );

        let count = next.len();
        Ok(
            ToolOutcome::text(format!("Task list updated: {} tasks", count))
                .with_tasks(next, !merge),
        )
    }
}

fn parse_entry(raw: &Value) -> Result<TodoEntry, String> {
    let id = raw["id"]
        .as_u64()
        .ok_or("missing or non-integer id")?
        .try_into()
        .map_err(|_| "id out of range".to_string())?;
    let content = raw["content"]
        .as_str()
        .ok_or("missing content")?
        .trim()
        .to_string();
    let status = match raw.get("status").and_then(|s| s.as_str()) {
        Some(s) => Some(
            TaskStatus::parse(s).ok_or_else(|| format!("unknown status '{}'", s))?,
        ),
        None => None,
    };
    Ok(TodoEntry {
        id,
        content,
        status,
    })
}

/// merge=false: the list as given becomes the session task list.
fn replace_entries(entries: Vec<TodoEntry>) -> Result<Vec<Task>, String> {
    let mut seen = std::collections::HashSet::new();
    let mut tasks = Vec::with_capacity(entries.len());
    for entry in entries {
        if !seen.insert(entry.id) {
            return Err(format!("duplicate task id {}", entry.id));
        }
        let mut task = Task::new(entry.id, entry.content.clone(), infer_kind(&entry.content));
        task.status = entry.status.unwrap_or(TaskStatus::Pending);
        tasks.push(task);
    }
    Ok(tasks)
}

/// merge=true: update matching ids (status, plus late-bound name if unset);
/// unknown ids are appended.
fn merge_entries(current: &[Task], entries: Vec<TodoEntry>) -> Vec<Task> {
    let mut tasks = current.to_vec();
    for entry in entries {
        if let Some(task) = tasks.iter_mut().find(|t| t.id == entry.id) {
            if let Some(status) = entry.status {
                task.status = status;
            }
            if task.name.is_empty() && !entry.content.is_empty() {
                task.name = entry.content.clone();
                task.description = entry.content;
            }
        } else {
            let mut task = Task::new(entry.id, entry.content.clone(), infer_kind(&entry.content));
            task.status = entry.status.unwrap_or(TaskStatus::Pending);
            tasks.push(task);
        }
    }
    tasks
}

/// Classify a task from its wording. The todo surface carries no explicit
/// type, so the kind tag is a best-effort read of the task name.
pub fn infer_kind(content: &str) -> TaskKind {
    let lower = content.to_ascii_lowercase();
    if lower.contains("report") || lower.contains("summar") {
        TaskKind::Report
    } else if lower.contains("chart")
        || lower.contains("plot")
        || lower.contains("visual")
        || lower.contains("graph")
    {
        TaskKind::Visualization
    } else if lower.contains("explor")
        || lower.contains("schema")
        || lower.contains("overview")
        || lower.contains("load")
    {
        TaskKind::DataExploration
    } else {
        TaskKind::Analysis
    }
}
