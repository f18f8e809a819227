//! Tabular Tools - the agent's tool surface and the code sandbox
//!
//! Each tool is a self-contained file in src/tools/. To add a tool: create
//! the file, implement the Tool trait, register it in
//! create_default_registry().

pub mod dataset;
pub mod registry;
pub mod sandbox;
pub mod tools;

pub use registry::{TaskListChange, Tool, ToolCtx, ToolOutcome, ToolRegistry};
pub use sandbox::{CodeSandbox, ExecOutcome, SandboxConfig};

/// Create the default tool registry with all builtin tools.
pub fn create_default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    registry.register(tools::read_dataset::ReadDatasetTool::new());
    registry.register(tools::run_code::RunCodeTool::new());
    registry.register(tools::todo_write::TodoWriteTool::new());

    registry
}
