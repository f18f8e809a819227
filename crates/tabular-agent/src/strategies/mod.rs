//! Loop strategies - five interchangeable reason-act drivers
//!
//! The strategies form a capability ladder from "code orchestrates, LLM
//! executes" (staged, task_driven) to "LLM orchestrates via tools"
//! (tool_driven). All five share the driver module's execution substrate:
//! identical tool surface, event taxonomy, and iteration accounting. The
//! only variation is who sequences tasks and how termination is detected.

pub mod autonomous;
pub mod driver;
pub mod hybrid;
pub mod staged;
pub mod tags;
pub mod task_driven;
pub mod tool_driven;

use crate::bus::SessionBus;
use crate::session::Session;
use std::collections::HashMap;
use std::sync::Arc;
use tabular_core::{AgentError, RuntimeConfig};
use tabular_llm::LlmProvider;
use tabular_tools::ToolRegistry;

/// Everything a strategy needs to drive one session.
#[derive(Clone)]
pub struct LoopCtx {
    pub session: Arc<Session>,
    pub bus: Arc<SessionBus>,
    pub provider: Arc<dyn LlmProvider>,
    pub tools: Arc<ToolRegistry>,
    pub config: Arc<RuntimeConfig>,
}

/// Why a strategy run ended. Every variant corresponds to exactly one
/// terminal event already emitted on the bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TerminalCause {
    Completed,
    /// Iteration cap reached - soft completion with a warning.
    CompletedExhausted,
    Stopped,
}

/// One of the five loop algorithms.
#[async_trait::async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Drive the session to a terminal event. On `Ok` the strategy has
    /// emitted its terminal event; on `Err` the manager emits `agent_error`.
    async fn run(&self, ctx: &LoopCtx) -> Result<TerminalCause, AgentError>;
}

/// All registered strategies, keyed by canonical tag.
pub fn strategy_registry() -> HashMap<&'static str, Arc<dyn Strategy>> {
    let mut registry: HashMap<&'static str, Arc<dyn Strategy>> = HashMap::new();
    for strategy in [
        Arc::new(tool_driven::ToolDrivenStrategy) as Arc<dyn Strategy>,
        Arc::new(task_driven::TaskDrivenStrategy),
        Arc::new(hybrid::HybridStrategy),
        Arc::new(autonomous::AutonomousStrategy),
        Arc::new(staged::StagedStrategy),
    ] {
        registry.insert(strategy.name(), strategy);
    }
    registry
}
