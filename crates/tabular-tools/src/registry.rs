//! Tool trait, invocation context, and registry
//!
//! Tools never touch session state directly. They receive a read-only
//! snapshot via [`ToolCtx`] and hand side effects (artifacts, task-list
//! changes) back in the [`ToolOutcome`]; the loop driver applies them and
//! emits the corresponding events. This keeps executors unit-testable and
//! the crate spine acyclic.

use crate::sandbox::SandboxConfig;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tabular_core::{AgentError, Artifact, DatasetHandle, DatasetSummary, ExecStatus, Task};
use tabular_llm::ChatTool;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Read-only invocation context handed to a tool by the loop driver.
#[derive(Clone)]
pub struct ToolCtx {
    pub dataset: DatasetHandle,
    /// Snapshot of the session task list at dispatch time.
    pub tasks: Vec<Task>,
    /// Root under which sandbox run directories are created.
    pub work_root: PathBuf,
    pub sandbox: SandboxConfig,
    pub cancel: CancellationToken,
}

/// Replacement or merge result for the session task list.
#[derive(Clone, Debug)]
pub struct TaskListChange {
    pub tasks: Vec<Task>,
    /// true when the whole list was replaced (merge=false).
    pub replaced: bool,
}

/// What a tool invocation produced.
#[derive(Debug)]
pub struct ToolOutcome {
    /// Text payload recorded as the tool message for the LLM.
    pub payload: String,
    pub status: ExecStatus,
    /// Tool-contract failure (bad arguments, invalid state) as opposed to
    /// an observable execution error.
    pub is_error: bool,
    pub artifact: Option<Artifact>,
    pub tasks: Option<TaskListChange>,
    pub summary: Option<DatasetSummary>,
}

impl ToolOutcome {
    pub fn text(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            status: ExecStatus::Success,
            is_error: false,
            artifact: None,
            tasks: None,
            summary: None,
        }
    }

    pub fn error(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            status: ExecStatus::Error,
            is_error: true,
            artifact: None,
            tasks: None,
            summary: None,
        }
    }

    /// Tagged tool-contract error, e.g. `INVALID_INPUT: missing code`.
    pub fn tagged_error(kind: &str, message: impl std::fmt::Display) -> Self {
        Self::error(format!("{}: {}", kind, message))
    }

    pub fn with_artifact(mut self, artifact: Artifact) -> Self {
        self.artifact = Some(artifact);
        self
    }

    pub fn with_tasks(mut self, tasks: Vec<Task>, replaced: bool) -> Self {
        self.tasks = Some(TaskListChange { tasks, replaced });
        self
    }

    pub fn with_summary(mut self, summary: DatasetSummary) -> Self {
        self.summary = Some(summary);
        self
    }

    pub fn with_status(mut self, status: ExecStatus) -> Self {
        self.status = status;
        self
    }
}

/// The Tool trait - implement this to add a new capability.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    /// Stable tool name quoted in LLM messages.
    fn name(&self) -> &str;

    /// Human-readable description advertised to the LLM.
    fn description(&self) -> &str;

    /// JSON Schema for input parameters.
    fn input_schema(&self) -> Value;

    /// Execute the tool. Only infrastructural failures (cannot spawn,
    /// filesystem denied) may surface as `Err`; everything the LLM authored
    /// comes back as a normal outcome.
    async fn execute(&self, ctx: &ToolCtx, args: Value) -> Result<ToolOutcome, AgentError>;

    /// Convert to the LLM tool definition format.
    fn to_definition(&self) -> ChatTool {
        ChatTool {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

/// Read-only after startup.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn list(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    /// LLM tool definitions for advertisement.
    pub fn definitions(&self) -> Vec<ChatTool> {
        self.tools.values().map(|t| t.to_definition()).collect()
    }

    /// Validate arguments against the named tool's schema.
    ///
    /// Returns the joined validation errors on mismatch. A schema that
    /// fails to compile is skipped rather than blocking execution.
    pub fn validate_args(&self, name: &str, args: &Value) -> Result<(), String> {
        let Some(tool) = self.tools.get(name) else {
            return Err(format!("unknown tool: {}", name));
        };

        let schema = tool.input_schema();
        let Ok(validator) = jsonschema::validator_for(&schema) else {
            return Ok(());
        };

        let errors: Vec<String> = validator.iter_errors(args).map(|e| e.to_string()).collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.join("; "))
        }
    }

    /// Execute a tool by name. An unknown name is a tool-contract error the
    /// LLM can recover from, not an infrastructure failure.
    pub async fn execute(
        &self,
        name: &str,
        ctx: &ToolCtx,
        args: Value,
    ) -> Result<ToolOutcome, AgentError> {
        match self.tools.get(name) {
            Some(tool) => tool.execute(ctx, args).await,
            None => Ok(ToolOutcome::tagged_error(
                "INVALID_INPUT",
                format!("tool not found: {}", name),
            )),
        }
    }
}
