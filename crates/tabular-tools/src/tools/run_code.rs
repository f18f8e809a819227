//! run_code tool - sandboxed execution of model-generated analysis code

use crate::registry::{Tool, ToolCtx, ToolOutcome};
use crate::sandbox::{CodeSandbox, DATASET_VAR, RESULT_IMAGE, RESULT_JSON};
use serde_json::{json, Value};
use tabular_core::{AgentError, Artifact, ExecStatus};
use tracing::debug;

/// How much stdout/stderr goes back into the LLM context.
const STDOUT_PREVIEW_CHARS: usize = 2000;
const STDERR_PREVIEW_CHARS: usize = 1500;

pub struct RunCodeTool;

impl RunCodeTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RunCodeTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Tool for RunCodeTool {
    fn name(&self) -> &str {
        "run_code"
    }

    fn description(&self) -> &str {
        "Execute a Python analysis snippet against the dataset in a fresh \
         sandbox. The dataset path is available in the DATASET_PATH \
         variable. Save visualizations to result.png, structured findings \
         to result.json, and print salient results to stdout."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "Python code to execute in the sandbox"
                }
            },
            "required": ["code"]
        })
    }

    async fn execute(&self, ctx: &ToolCtx, args: Value) -> Result<ToolOutcome, AgentError> {
        let Some(code) = args["code"].as_str() else {
            return Ok(ToolOutcome::tagged_error(
                "INVALID_INPUT",
                "missing required parameter: code",
            ));
        };
        if code.trim().is_empty() {
            return Ok(ToolOutcome::tagged_error("INVALID_INPUT", "code is empty"));
        }

        debug!("run_code: {} chars", code.len());

        let sandbox = CodeSandbox::new(ctx.sandbox.clone());
        let outcome = sandbox
            .run(code, &ctx.dataset, &ctx.work_root, &ctx.cancel)
            .await?;

        let mut payload = format!("Status: {}\n", outcome.status.as_str());
        let stdout_preview = truncate(&outcome.stdout, STDOUT_PREVIEW_CHARS);
        if stdout_preview.is_empty() {
            payload.push_str("Stdout: (empty)\n");
        } else {
            payload.push_str(&format!("Stdout:\n{}\n", stdout_preview));
        }
        if outcome.status != ExecStatus::Success {
            let stderr_preview = truncate(&outcome.stderr, STDERR_PREVIEW_CHARS);
            if !stderr_preview.is_empty() {
                payload.push_str(&format!("Stderr:\n{}\n", stderr_preview));
            }
        }
        payload.push_str(&format!(
            "Image produced ({}): {}\nStructured result ({}): {}\n",
            RESULT_IMAGE,
            if outcome.has_image() { "yes" } else { "no" },
            RESULT_JSON,
            if outcome.has_structured() { "yes" } else { "no" },
        ));
        if outcome.status == ExecStatus::Timeout {
            payload.push_str(&format!(
                "The code exceeded the {}s limit. Simplify it or operate on fewer rows, \
                 then call run_code again. {} is still bound to the dataset.\n",
                ctx.sandbox.timeout.as_secs(),
                DATASET_VAR
            ));
        }

        let status = outcome.status;
        let artifact = Artifact {
            stdout: outcome.stdout,
            stderr: outcome.stderr,
            status,
            image: outcome.image,
            structured: outcome.structured,
        };

        // Execution errors are an observable outcome for the LLM to react
        // to, never a tool-contract failure.
        Ok(ToolOutcome::text(payload)
            .with_status(status)
            .with_artifact(artifact))
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    let trimmed = s.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(max_chars).collect();
    format!("{}\n... [truncated]", cut)
}
