//! Inline state grammar for the autonomous strategy
//!
//! The model keeps its own state in `<thinking>` and `<tasks>` blocks:
//!
//! ```text
//! <thinking>private planning, never persisted</thinking>
//! <tasks>
//! - [x] Explore the dataset
//! - [ ] Plot monthly revenue
//! </tasks>
//! ```
//!
//! Parsing is defensive: a missing or malformed block yields no update,
//! never an error.

use regex::Regex;
use std::sync::OnceLock;
use tabular_core::TaskStatus;

/// Literal completion marker for the autonomous strategy.
pub const COMPLETE_SENTINEL: &str = "[ANALYSIS_COMPLETE]";

fn thinking_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<thinking>(.*?)</thinking>").expect("thinking regex"))
}

fn tasks_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<tasks>(.*?)</tasks>").expect("tasks regex"))
}

fn task_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^- \[(x| )\] (.+)$").expect("task line regex"))
}

fn paren_suffix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Trailing parenthetical status note, ASCII or full-width
    RE.get_or_init(|| Regex::new(r"\s*[（(][^（）()]*[）)]\s*$").expect("paren regex"))
}

/// Inner text of every `<thinking>` block, in order.
pub fn parse_thinking(text: &str) -> Vec<String> {
    thinking_re()
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse the first `<tasks>` block into `(name, status)` pairs.
///
/// `x` means completed, a space means pending; parenthetical status
/// suffixes are stripped; the ordinal is the 1-based line index. Returns
/// `None` when there is no parseable block - the caller skips the task
/// update for that turn.
pub fn parse_tasks(text: &str) -> Option<Vec<(String, TaskStatus)>> {
    let block = tasks_re().captures(text)?.get(1)?.as_str();

    let mut items = Vec::new();
    for line in block.lines() {
        let Some(captures) = task_line_re().captures(line.trim()) else {
            continue;
        };
        let status = if &captures[1] == "x" {
            TaskStatus::Completed
        } else {
            TaskStatus::Pending
        };
        let name = paren_suffix_re()
            .replace(captures[2].trim(), "")
            .trim()
            .to_string();
        if !name.is_empty() {
            items.push((name, status));
        }
    }

    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

/// Render a task list in the same grammar `parse_tasks` reads.
pub fn render_tasks(items: &[(String, TaskStatus)]) -> String {
    let mut out = String::from("<tasks>\n");
    for (name, status) in items {
        let mark = if *status == TaskStatus::Completed {
            'x'
        } else {
            ' '
        };
        out.push_str(&format!("- [{}] {}\n", mark, name));
    }
    out.push_str("</tasks>");
    out
}

/// Remove `<thinking>` blocks from text kept in the message history.
pub fn strip_thinking(text: &str) -> String {
    thinking_re().replace_all(text, "").trim().to_string()
}

/// Turn a final autonomous reply into report text: drop state blocks and
/// the completion sentinel.
pub fn clean_report(text: &str) -> String {
    let without_thinking = thinking_re().replace_all(text, "");
    let without_tasks = tasks_re().replace_all(&without_thinking, "");
    without_tasks.replace(COMPLETE_SENTINEL, "").trim().to_string()
}
