//! System prompts and canned user messages, one set per strategy

use tabular_core::{DatasetSummary, Task};

/// Sandbox contract shared by every strategy prompt. The file names are a
/// stable external contract with clients.
const SANDBOX_CONTRACT: &str = "\
Code execution rules:\n\
- Use the run_code tool to execute Python against the dataset.\n\
- The dataset path is bound to the DATASET_PATH variable in every snippet.\n\
- Save any visualization to result.png and structured findings to result.json.\n\
- Print salient numbers and findings to stdout; long dumps are truncated.\n\
- If a run fails you will see the stderr excerpt; fix the code and retry.";

pub fn tool_driven() -> String {
    format!(
        "You are an autonomous data analyst. Plan your work with the \
         todo_write tool (merge=false once to create the plan, merge=true to \
         update statuses), keep exactly one task in_progress at a time, and \
         work through the tasks in order. Inspect the data with read_dataset \
         before analyzing it.\n\n{}\n\n\
         When every task is completed, reply with the final Markdown report \
         and no tool calls. The report should reference the charts you \
         produced and state concrete findings.",
        SANDBOX_CONTRACT
    )
}

pub fn task_driven() -> String {
    format!(
        "You are a data analyst executing a prepared task list one task at a \
         time. Each user message tells you which task to execute. Use \
         read_dataset and run_code as needed; you may mark the current task \
         completed with todo_write (merge=true) when you finish early. When a \
         task is done, reply with a short textual summary of what you found \
         and no tool calls.\n\n{}",
        SANDBOX_CONTRACT
    )
}

pub fn hybrid() -> String {
    format!(
        "You are a data analyst. First plan the analysis as a todo list with \
         the todo_write tool (merge=false). After that, each user message \
         names the task to work on; you decide how to accomplish it. Reply \
         with a short textual summary (no tool calls) when the current task \
         is done.\n\n{}",
        SANDBOX_CONTRACT
    )
}

pub fn autonomous() -> String {
    format!(
        "You are a fully autonomous data analyst. Manage your own state \
         inline in your replies:\n\
         - Wrap private planning in <thinking>...</thinking> blocks.\n\
         - Maintain your task list in a <tasks> block, one line per task, \
           formatted exactly as `- [ ] name` (pending) or `- [x] name` (done).\n\
         - When the whole analysis is finished, write the final Markdown \
           report and include the literal marker [ANALYSIS_COMPLETE].\n\n{}",
        SANDBOX_CONTRACT
    )
}

/// Base prompt for the staged strategy; each stage overrides it.
pub fn staged() -> String {
    format!(
        "You are a data analyst working through a staged workflow: explore, \
         plan, execute, report. Follow the instructions for the current \
         stage only.\n\n{}",
        SANDBOX_CONTRACT
    )
}

pub fn staged_explore() -> String {
    format!(
        "Stage: exploration. Inspect the dataset with read_dataset and a \
         run_code probe if needed, then reply with a textual summary of its \
         structure and notable quirks. No planning yet.\n\n{}",
        SANDBOX_CONTRACT
    )
}

pub fn staged_plan() -> String {
    "Stage: planning. Based on the exploration, create the analysis task \
     list with todo_write (merge=false): 3 to 5 ordered tasks ending with a \
     report task. Then reply with one sentence confirming the plan."
        .to_string()
}

pub fn staged_execute() -> String {
    format!(
        "Stage: execution. Work on exactly the task named in the user \
         message, using run_code as needed. Reply with a short textual \
         summary (no tool calls) when it is done.\n\n{}",
        SANDBOX_CONTRACT
    )
}

pub fn staged_report() -> String {
    "Stage: reporting. Write the final Markdown report: objective, method, \
     findings with concrete numbers, and references to the generated \
     charts. Reply with the report text only - no tool calls."
        .to_string()
}

/// The opening user message: request plus dataset summary.
pub fn initial_user(request: &str, summary: &DatasetSummary) -> String {
    format!(
        "Analysis request: {}\n\nDataset summary:\n{}",
        request,
        summary.render()
    )
}

/// Injected between turns by the code-sequenced strategies.
pub fn task_instruction(task: &Task) -> String {
    format!(
        "Now execute task #{}: {}\n{}",
        task.id, task.name, task.description
    )
}

/// Nudge after a textual turn that left tasks unfinished (tool-driven).
pub fn unfinished_reminder(names: &[String]) -> String {
    format!(
        "These tasks are not completed yet: {}. Continue working on them \
         (update statuses with todo_write), or mark them skipped/failed with \
         a reason. Reply with the final report only once every task is \
         resolved.",
        names.join(", ")
    )
}

/// Nudge for the autonomous strategy after a turn without the completion
/// marker.
pub fn continue_nudge() -> String {
    "Continue with the next pending task. Remember to keep your <tasks> \
     block up to date and to emit [ANALYSIS_COMPLETE] with the final report \
     when everything is done."
        .to_string()
}

/// Asks the hybrid strategy's model for its plan.
pub fn plan_request() -> String {
    "Plan the analysis now: call todo_write with merge=false and 3 to 5 \
     ordered tasks that answer the request, ending with a report task."
        .to_string()
}
