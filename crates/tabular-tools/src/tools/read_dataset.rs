//! read_dataset tool - structured summary of the session's dataset

use crate::dataset;
use crate::registry::{Tool, ToolCtx, ToolOutcome};
use serde_json::{json, Value};
use tabular_core::AgentError;
use tracing::debug;

pub struct ReadDatasetTool;

impl ReadDatasetTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ReadDatasetTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Tool for ReadDatasetTool {
    fn name(&self) -> &str {
        "read_dataset"
    }

    fn description(&self) -> &str {
        "Read the uploaded dataset and return its structure: row and column \
         counts, per-column types with sample values, missing-value ratio, \
         and a short preview. Idempotent - call it again any time you need \
         to re-check the schema."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path of the dataset to read (use the documented dataset path)"
                },
                "sheet_name": {
                    "type": "string",
                    "description": "Worksheet to read for spreadsheet files (default: first sheet)"
                }
            },
            "required": ["file_path"]
        })
    }

    async fn execute(&self, ctx: &ToolCtx, args: Value) -> Result<ToolOutcome, AgentError> {
        let Some(path) = args["file_path"].as_str() else {
            return Ok(ToolOutcome::tagged_error(
                "INVALID_INPUT",
                "missing required parameter: file_path",
            ));
        };
        let sheet = args["sheet_name"].as_str();

        // The session owns exactly one dataset; accept its conventional
        // sandbox name, its original upload name, or its real path.
        let known = [
            ctx.dataset.sandbox_name(),
            ctx.dataset.file_name.clone(),
            ctx.dataset.path.display().to_string(),
        ];
        if !known.iter().any(|k| k == path) {
            return Ok(ToolOutcome::tagged_error(
                "INVALID_INPUT",
                format!(
                    "unknown file '{}'; the dataset for this session is '{}'",
                    path,
                    ctx.dataset.sandbox_name()
                ),
            ));
        }

        debug!("read_dataset: {} (sheet={:?})", path, sheet);

        match dataset::inspect(&ctx.dataset, sheet).await {
            Ok(summary) => {
                let payload = summary.render();
                Ok(ToolOutcome::text(payload).with_summary(summary))
            }
            Err(e @ AgentError::InvalidInput(_)) | Err(e @ AgentError::UnsupportedFormat(_)) => {
                Ok(ToolOutcome::tagged_error(e.kind(), e))
            }
            Err(e) => Err(e),
        }
    }
}
