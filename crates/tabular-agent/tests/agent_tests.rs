//! Tests for tabular-agent: bus replay semantics, session invariants, the
//! autonomous tag grammar, and end-to-end strategy runs over a scripted
//! provider.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tabular_agent::strategies::tags;
use tabular_agent::{DatasetUpload, SessionBus, SessionManager};
use tabular_core::{
    AgentEvent, DatasetHandle, EventEnvelope, Message, Phase, RuntimeConfig, SessionId,
    TaskStatus,
};
use tabular_llm::{LlmProvider, LlmRequest, LlmResult, LlmStream, StreamDelta};
use tokio_util::sync::CancellationToken;

// ===========================================================================
// Scripted provider
// ===========================================================================

/// Replays pre-scripted delta sequences, one per LLM call; when the script
/// runs dry it repeats the fallback turn. An optional per-delta delay keeps
/// a stream open long enough for cancellation tests.
struct ScriptedProvider {
    turns: Mutex<VecDeque<Vec<StreamDelta>>>,
    fallback: Vec<StreamDelta>,
    delta_delay: Duration,
}

impl ScriptedProvider {
    fn new(turns: Vec<Vec<StreamDelta>>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            fallback: text_turn("Still working on the analysis."),
            delta_delay: Duration::ZERO,
        }
    }

    fn with_fallback(mut self, fallback: Vec<StreamDelta>) -> Self {
        self.fallback = fallback;
        self
    }

    fn with_delta_delay(mut self, delay: Duration) -> Self {
        self.delta_delay = delay;
        self
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete_stream(
        &self,
        _request: LlmRequest,
        _cancel: Option<CancellationToken>,
    ) -> LlmResult<LlmStream> {
        let deltas = self
            .turns
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        let delay = self.delta_delay;

        let stream = async_stream::stream! {
            for delta in deltas {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                yield Ok(delta);
            }
        };
        Ok(Box::pin(stream))
    }
}

fn text_turn(text: &str) -> Vec<StreamDelta> {
    vec![
        StreamDelta::Content(text.to_string()),
        StreamDelta::Done {
            finish_reason: Some("stop".into()),
        },
    ]
}

fn tool_turn(id: &str, name: &str, args: serde_json::Value) -> Vec<StreamDelta> {
    vec![
        StreamDelta::ToolCallStart {
            index: 0,
            id: id.to_string(),
            name: name.to_string(),
        },
        StreamDelta::ToolCallDelta {
            index: 0,
            arguments: args.to_string(),
        },
        StreamDelta::Done {
            finish_reason: Some("tool_calls".into()),
        },
    ]
}

// ===========================================================================
// Test harness
// ===========================================================================

struct Harness {
    manager: SessionManager,
    _dir: tempfile::TempDir,
}

fn harness(provider: ScriptedProvider, tweak: impl FnOnce(&mut RuntimeConfig)) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = RuntimeConfig {
        upload_dir: dir.path().to_path_buf(),
        ..RuntimeConfig::default()
    };
    tweak(&mut config);
    Harness {
        manager: SessionManager::new(Arc::new(config), Arc::new(provider)),
        _dir: dir,
    }
}

fn csv_upload() -> DatasetUpload {
    DatasetUpload {
        file_name: "sales.csv".to_string(),
        bytes: b"month,sales\n2024-01,100\n2024-02,250\n2024-03,175\n".to_vec(),
    }
}

/// Drain a subscription to the terminal envelope (with a deadline).
async fn drain(manager: &SessionManager, id: &str) -> Vec<Arc<EventEnvelope>> {
    let mut subscription = manager.subscribe(id).unwrap();
    let mut events = Vec::new();
    let deadline = tokio::time::timeout(Duration::from_secs(15), async {
        while let Some(envelope) = subscription.next().await {
            let terminal = envelope.is_terminal();
            events.push(envelope);
            if terminal {
                break;
            }
        }
    });
    deadline.await.expect("stream did not terminate in time");
    events
}

fn kinds(events: &[Arc<EventEnvelope>]) -> Vec<&str> {
    events.iter().map(|e| e.event_type.as_str()).collect()
}

// ===========================================================================
// Event bus
// ===========================================================================

fn sample_event(n: usize) -> AgentEvent {
    AgentEvent::AgentWarning {
        message: format!("event {}", n),
        incomplete_tasks_count: n,
    }
}

fn terminal_event() -> AgentEvent {
    AgentEvent::AgentCompleted {
        final_report: "done".into(),
        images: vec![],
        reached_max_iterations: false,
        incomplete_tasks_count: 0,
    }
}

#[tokio::test]
async fn bus_replays_pre_subscriber_events() {
    let bus = SessionBus::new(SessionId::new("b1"), 16);
    bus.emit(sample_event(0));
    bus.emit(sample_event(1));

    let mut sub = bus.subscribe();
    bus.emit(terminal_event());

    let mut seen = Vec::new();
    while let Some(envelope) = sub.next().await {
        seen.push(envelope.event_type.clone());
    }
    assert_eq!(seen, vec!["agent_warning", "agent_warning", "agent_completed"]);
}

#[tokio::test]
async fn bus_orders_identically_across_subscribers() {
    let bus = SessionBus::new(SessionId::new("b2"), 64);
    bus.emit(sample_event(0));
    let mut early = bus.subscribe();
    for i in 1..10 {
        bus.emit(sample_event(i));
    }
    let mut late = bus.subscribe();
    bus.emit(terminal_event());

    let mut early_seen = Vec::new();
    while let Some(e) = early.next().await {
        early_seen.push(e.payload["incomplete_tasks_count"].clone());
    }
    let mut late_seen = Vec::new();
    while let Some(e) = late.next().await {
        late_seen.push(e.payload["incomplete_tasks_count"].clone());
    }

    // Both observe the identical prefix ordering; `late` simply joined with
    // the backlog already complete.
    assert_eq!(early_seen.len(), 11);
    assert_eq!(late_seen.len(), 11);
    assert_eq!(early_seen, late_seen);
}

#[tokio::test]
async fn bus_late_subscriber_replays_through_terminal() {
    let bus = SessionBus::new(SessionId::new("b3"), 16);
    bus.emit(sample_event(0));
    bus.emit(terminal_event());
    assert!(bus.is_closed());

    let mut sub = bus.subscribe();
    let first = sub.next().await.unwrap();
    assert_eq!(first.event_type, "agent_warning");
    let second = sub.next().await.unwrap();
    assert!(second.is_terminal());
    assert!(sub.next().await.is_none());
}

#[tokio::test]
async fn bus_emissions_after_terminal_are_dropped() {
    let bus = SessionBus::new(SessionId::new("b4"), 16);
    bus.emit(terminal_event());
    bus.emit(sample_event(7));
    assert_eq!(bus.history_len(), 1);
}

#[tokio::test]
async fn bus_drops_lagged_subscriber_with_marker() {
    let bus = SessionBus::new(SessionId::new("b5"), 2);
    let mut sub = bus.subscribe();

    // Queue depth 2; the third live emission overflows and drops us.
    for i in 0..5 {
        bus.emit(sample_event(i));
    }

    let mut seen = Vec::new();
    while let Some(e) = sub.next().await {
        seen.push(e.event_type.clone());
    }
    assert_eq!(seen.last().map(String::as_str), Some("subscriber_lagged"));
    // The session itself was never blocked
    assert_eq!(bus.history_len(), 5);
}

#[tokio::test]
async fn bus_timestamps_are_monotone() {
    let bus = SessionBus::new(SessionId::new("b6"), 64);
    for i in 0..20 {
        bus.emit(sample_event(i));
    }
    bus.emit(terminal_event());

    let mut sub = bus.subscribe();
    let mut previous = None;
    while let Some(e) = sub.next().await {
        if let Some(prev) = previous {
            assert!(e.timestamp >= prev);
        }
        previous = Some(e.timestamp);
    }
}

// ===========================================================================
// Session invariants
// ===========================================================================

fn dummy_session() -> tabular_agent::Session {
    tabular_agent::Session::new(
        SessionId::new("s1"),
        "analyze",
        "tool_driven",
        DatasetHandle {
            path: "/tmp/none.csv".into(),
            file_name: "none.csv".into(),
            extension: "csv".into(),
            size_bytes: 0,
        },
        "/tmp/none-runs".into(),
    )
}

#[tokio::test]
async fn session_terminal_phase_blocks_mutation() {
    let session = dummy_session();
    assert!(session.set_phase(Phase::Running).await);
    assert!(session.set_phase(Phase::Completed).await);

    // I4: mutations after a terminal phase are ignored
    assert!(!session.set_phase(Phase::Running).await);
    assert!(!session.append_message(Message::user("late")).await);
    assert!(!session.replace_tasks(vec![]).await);
    assert_eq!(session.message_count().await, 0);
}

#[tokio::test]
async fn session_iteration_counter() {
    let session = dummy_session();
    assert_eq!(session.iterations(), 0);
    assert_eq!(session.next_iteration(), 1);
    assert_eq!(session.next_iteration(), 2);
    assert_eq!(session.iterations(), 2);
}

#[tokio::test]
async fn session_snapshot_reflects_state() {
    let session = dummy_session();
    session.set_phase(Phase::Running).await;
    session.next_iteration();
    session
        .replace_tasks(vec![tabular_core::Task::new(
            1,
            "Explore",
            tabular_core::TaskKind::DataExploration,
        )])
        .await;
    session.set_report("## Done").await;

    let snapshot = session.snapshot().await;
    assert_eq!(snapshot.id, "s1");
    assert_eq!(snapshot.phase, Phase::Running);
    assert_eq!(snapshot.strategy, "tool_driven");
    assert_eq!(snapshot.iterations, 1);
    assert_eq!(snapshot.tasks.len(), 1);
    assert_eq!(snapshot.report.as_deref(), Some("## Done"));
}

#[tokio::test]
async fn session_last_assistant_text_skips_tool_turns() {
    let session = dummy_session();
    session
        .append_message(Message::assistant("first finding"))
        .await;
    session
        .append_message(Message::assistant_with_tools(
            "",
            vec![tabular_core::ToolCall {
                id: "c1".into(),
                name: "run_code".into(),
                arguments: serde_json::json!({}),
            }],
        ))
        .await;
    assert_eq!(
        session.last_assistant_text().await.as_deref(),
        Some("first finding")
    );
}

// ===========================================================================
// Autonomous tag grammar
// ===========================================================================

#[test]
fn tags_parse_mixed_statuses_and_suffixes() {
    let text = "<tasks>\n- [x] A\n- [ ] B （进行中）\n</tasks>";
    let items = tags::parse_tasks(text).unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0], ("A".to_string(), TaskStatus::Completed));
    assert_eq!(items[1], ("B".to_string(), TaskStatus::Pending));
}

#[test]
fn tags_round_trip_law() {
    let list = vec![
        ("Explore the dataset".to_string(), TaskStatus::Pending),
        ("Plot revenue".to_string(), TaskStatus::Completed),
        ("Write report".to_string(), TaskStatus::Pending),
    ];
    assert_eq!(tags::parse_tasks(&tags::render_tasks(&list)).unwrap(), list);
}

#[test]
fn tags_malformed_block_is_ignored() {
    assert!(tags::parse_tasks("no block at all").is_none());
    assert!(tags::parse_tasks("<tasks>garbage lines only</tasks>").is_none());
    assert!(tags::parse_tasks("<tasks></tasks>").is_none());
}

#[test]
fn tags_thinking_extraction() {
    let text = "<thinking>step one</thinking>between<thinking>step\ntwo</thinking>";
    let blocks = tags::parse_thinking(text);
    assert_eq!(blocks, vec!["step one".to_string(), "step\ntwo".to_string()]);
    assert_eq!(tags::strip_thinking(text), "between");
}

#[test]
fn tags_clean_report_removes_state_blocks() {
    let text = "<thinking>hm</thinking>\n<tasks>\n- [x] A\n</tasks>\n## Report\nDone. [ANALYSIS_COMPLETE]";
    let report = tags::clean_report(text);
    assert!(report.starts_with("## Report"));
    assert!(!report.contains("ANALYSIS_COMPLETE"));
    assert!(!report.contains("<tasks>"));
}

// ===========================================================================
// End-to-end: tool-driven happy path
// ===========================================================================

#[tokio::test]
async fn tool_driven_happy_path() {
    let provider = ScriptedProvider::new(vec![
        tool_turn(
            "call-1",
            "todo_write",
            serde_json::json!({
                "merge": false,
                "todos": [
                    {"id": 1, "content": "Explore the dataset", "status": "in_progress"},
                    {"id": 2, "content": "Plot monthly sales chart"},
                    {"id": 3, "content": "Write the report"},
                ]
            }),
        ),
        tool_turn(
            "call-2",
            "todo_write",
            serde_json::json!({
                "merge": true,
                "todos": [
                    {"id": 1, "content": "Explore the dataset", "status": "completed"},
                    {"id": 2, "content": "Plot monthly sales chart", "status": "in_progress"},
                ]
            }),
        ),
        tool_turn(
            "call-3",
            "todo_write",
            serde_json::json!({
                "merge": true,
                "todos": [
                    {"id": 2, "content": "Plot monthly sales chart", "status": "completed"},
                    {"id": 3, "content": "Write the report", "status": "completed"},
                ]
            }),
        ),
        text_turn("## Sales Report\n\nMonthly sales averaged 175 units."),
    ]);
    let h = harness(provider, |_| {});

    let started = h
        .manager
        .start(csv_upload(), "Summarize monthly sales", None)
        .await
        .unwrap();
    let events = drain(&h.manager, &started.session_id).await;
    let names = kinds(&events);

    assert_eq!(names.first(), Some(&"agent_started"));
    assert!(names.contains(&"phase_change"));
    assert!(names.contains(&"data_explored"));
    assert!(names.contains(&"llm_streaming"));
    assert!(names.contains(&"task_started"));
    assert!(names.contains(&"task_completed"));
    assert!(names.contains(&"report_generated"));
    assert_eq!(names.last(), Some(&"agent_completed"));

    // data_explored carries the dataset statistics
    let explored = events
        .iter()
        .find(|e| e.event_type == "data_explored")
        .unwrap();
    assert_eq!(explored.payload["total_rows"], 3);

    // Three task-list snapshots, all tool-sourced
    let updates: Vec<_> = events
        .iter()
        .filter(|e| e.event_type == "tasks_updated")
        .collect();
    assert_eq!(updates.len(), 3);
    assert!(updates.iter().all(|e| e.payload["source"] == "tool"));

    // Every tool_call has exactly one matching tool_result
    for call in events.iter().filter(|e| e.event_type == "tool_call") {
        let call_id = call.payload["call_id"].as_str().unwrap();
        let matching = events
            .iter()
            .filter(|e| {
                e.event_type == "tool_result" && e.payload["call_id"] == call_id
            })
            .count();
        assert_eq!(matching, 1, "call {} should have one result", call_id);
    }

    let completed = events.last().unwrap();
    assert_eq!(completed.payload["reached_max_iterations"], false);
    assert_eq!(completed.payload["incomplete_tasks_count"], 0);
    assert!(completed.payload["final_report"]
        .as_str()
        .unwrap()
        .contains("Sales Report"));

    // fetch() now serves the final artifacts
    let artifacts = h.manager.fetch(&started.session_id).await.unwrap();
    assert!(artifacts.report.contains("Sales Report"));
}

// ===========================================================================
// End-to-end: invalid tool arguments are LLM-recoverable (S2 shape)
// ===========================================================================

#[tokio::test]
async fn bad_tool_arguments_feed_back_and_loop_recovers() {
    let provider = ScriptedProvider::new(vec![
        // Wrong type for `code` - schema validation must reject it
        tool_turn("call-1", "run_code", serde_json::json!({"code": 42})),
        text_turn("## Report\nRecovered after the argument error."),
    ]);
    let h = harness(provider, |_| {});

    let started = h
        .manager
        .start(csv_upload(), "Summarize", None)
        .await
        .unwrap();
    let events = drain(&h.manager, &started.session_id).await;

    let result = events
        .iter()
        .find(|e| e.event_type == "tool_result")
        .expect("rejection surfaced as a tool_result");
    assert_eq!(result.payload["status"], "error");
    assert!(result.payload["stdout_preview"]
        .as_str()
        .unwrap()
        .contains("INVALID_INPUT"));

    // The failure was observable, not terminal: the loop went on to finish
    let completed = events.last().unwrap();
    assert_eq!(completed.event_type, "agent_completed");
    assert_eq!(completed.payload["reached_max_iterations"], false);
}

// ===========================================================================
// End-to-end: iteration overrun (S4)
// ===========================================================================

#[tokio::test]
async fn iteration_overrun_is_soft_completion() {
    let provider = ScriptedProvider::new(vec![tool_turn(
        "call-1",
        "todo_write",
        serde_json::json!({
            "merge": false,
            "todos": [{"id": 1, "content": "Endless analysis", "status": "in_progress"}]
        }),
    )])
    .with_fallback(text_turn("Still thinking about it."));
    let h = harness(provider, |c| c.max_iterations = 3);

    let started = h
        .manager
        .start(csv_upload(), "Summarize", None)
        .await
        .unwrap();
    let events = drain(&h.manager, &started.session_id).await;
    let names = kinds(&events);

    let warning = events
        .iter()
        .find(|e| e.event_type == "agent_warning")
        .expect("agent_warning before soft completion");
    assert!(warning.payload["incomplete_tasks_count"].as_u64().unwrap() >= 1);

    let completed = events.last().unwrap();
    assert_eq!(completed.event_type, "agent_completed");
    assert_eq!(completed.payload["reached_max_iterations"], true);

    // Property 6: LLM calls never exceed max_iterations
    let max_iteration = events
        .iter()
        .filter(|e| e.event_type == "llm_streaming")
        .filter_map(|e| e.payload["iteration"].as_u64())
        .max()
        .unwrap();
    assert!(max_iteration <= 3);

    assert!(!names.contains(&"agent_error"));
}

// ===========================================================================
// End-to-end: cancellation (S3)
// ===========================================================================

#[tokio::test]
async fn stop_terminates_with_single_stopped_event() {
    let provider = ScriptedProvider::new(vec![tool_turn(
        "call-1",
        "todo_write",
        serde_json::json!({
            "merge": false,
            "todos": [{"id": 1, "content": "Explore", "status": "in_progress"}]
        }),
    )])
    .with_fallback(vec![
        StreamDelta::Content("chunk ".into());
        60
    ])
    .with_delta_delay(Duration::from_millis(25));
    let h = harness(provider, |_| {});

    let started = h
        .manager
        .start(csv_upload(), "Summarize", None)
        .await
        .unwrap();

    // Wait for the first tool_result, then stop mid-second-turn.
    let mut subscription = h.manager.subscribe(&started.session_id).unwrap();
    tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(envelope) = subscription.next().await {
            if envelope.event_type == "tool_result" {
                break;
            }
        }
    })
    .await
    .expect("never saw a tool_result");
    h.manager.stop(&started.session_id).unwrap();

    let events = drain(&h.manager, &started.session_id).await;
    let names = kinds(&events);

    let stopped_count = names.iter().filter(|n| **n == "agent_stopped").count();
    assert_eq!(stopped_count, 1);
    assert_eq!(names.last(), Some(&"agent_stopped"));

    // No tool activity after the first (and only) dispatched call
    let call_count = names.iter().filter(|n| **n == "tool_call").count();
    assert_eq!(call_count, 1);
}

// ===========================================================================
// End-to-end: autonomous strategy (S5)
// ===========================================================================

#[tokio::test]
async fn autonomous_inline_state_and_sentinel() {
    let provider = ScriptedProvider::new(vec![
        text_turn(
            "<thinking>start with A</thinking>\n<tasks>\n- [x] A\n- [ ] B （进行中）\n</tasks>\nWorking on B next.",
        ),
        text_turn(
            "<tasks>\n- [x] A\n- [x] B\n</tasks>\n## Findings\nB is resolved. [ANALYSIS_COMPLETE]",
        ),
    ]);
    let h = harness(provider, |_| {});

    let started = h
        .manager
        .start(csv_upload(), "Summarize", Some("autonomous"))
        .await
        .unwrap();
    let events = drain(&h.manager, &started.session_id).await;

    let updates: Vec<_> = events
        .iter()
        .filter(|e| e.event_type == "tasks_updated")
        .collect();
    assert!(!updates.is_empty());
    assert!(updates.iter().all(|e| e.payload["source"] == "llm"));

    let first = &updates[0].payload["tasks"];
    assert_eq!(first[0]["id"], 1);
    assert_eq!(first[0]["name"], "A");
    assert_eq!(first[0]["status"], "completed");
    assert_eq!(first[1]["id"], 2);
    assert_eq!(first[1]["name"], "B");
    assert_eq!(first[1]["status"], "pending");

    // Thinking surfaced as events, stripped from the report
    assert!(events.iter().any(|e| e.event_type == "llm_thinking"));
    let report = events
        .iter()
        .find(|e| e.event_type == "report_generated")
        .unwrap();
    let text = report.payload["report"].as_str().unwrap();
    assert!(text.contains("Findings"));
    assert!(!text.contains("ANALYSIS_COMPLETE"));
    assert!(!text.contains("<tasks>"));

    assert_eq!(events.last().unwrap().event_type, "agent_completed");
}

#[tokio::test]
async fn autonomous_empty_report_closes_with_warning() {
    // Two thinking blocks in one turn; the closing turn is nothing but
    // state blocks and the sentinel, so no report text survives cleanup.
    let provider = ScriptedProvider::new(vec![
        text_turn(
            "<thinking>look at A</thinking>\n<thinking>then B</thinking>\n<tasks>\n- [ ] A\n</tasks>\nStarting.",
        ),
        text_turn("<tasks>\n- [x] A\n</tasks>\n[ANALYSIS_COMPLETE]"),
    ]);
    let h = harness(provider, |_| {});

    let started = h
        .manager
        .start(csv_upload(), "Summarize", Some("autonomous"))
        .await
        .unwrap();
    let events = drain(&h.manager, &started.session_id).await;
    let names = kinds(&events);

    // One consolidated llm_thinking for the two-block turn
    let thinking_count = names.iter().filter(|n| **n == "llm_thinking").count();
    assert_eq!(thinking_count, 1);
    let thinking = events
        .iter()
        .find(|e| e.event_type == "llm_thinking")
        .unwrap();
    let content = thinking.payload["content"].as_str().unwrap();
    assert!(content.contains("look at A"));
    assert!(content.contains("then B"));

    // No usable report text: warning-then-completed, never an empty
    // report_generated
    assert!(!names.contains(&"report_generated"));
    let warning = events
        .iter()
        .find(|e| e.event_type == "agent_warning")
        .expect("agent_warning before completion");
    assert!(warning.payload["message"]
        .as_str()
        .unwrap()
        .contains("without producing report text"));

    let completed = events.last().unwrap();
    assert_eq!(completed.event_type, "agent_completed");
    assert_eq!(completed.payload["final_report"], "");
    assert_eq!(completed.payload["reached_max_iterations"], false);
}

// ===========================================================================
// End-to-end: task-driven strategy plans in code
// ===========================================================================

#[tokio::test]
async fn task_driven_walks_code_owned_plan() {
    // One textual closing turn per default task
    let provider = ScriptedProvider::new(vec![
        text_turn("Explored: 3 rows, 2 columns."),
        text_turn("Core analysis: average sales 175."),
        text_turn("Visualization described."),
        text_turn("## Report\nAverage monthly sales were 175."),
    ]);
    let h = harness(provider, |_| {});

    let started = h
        .manager
        .start(csv_upload(), "Summarize", Some("task-driven"))
        .await
        .unwrap();
    let events = drain(&h.manager, &started.session_id).await;
    let names = kinds(&events);

    assert!(names.contains(&"tasks_planned"));
    let started_count = names.iter().filter(|n| **n == "task_started").count();
    let completed_count = names.iter().filter(|n| **n == "task_completed").count();
    assert_eq!(started_count, 4);
    assert_eq!(completed_count, 4);

    let completed = events.last().unwrap();
    assert_eq!(completed.event_type, "agent_completed");
    assert!(completed.payload["final_report"]
        .as_str()
        .unwrap()
        .contains("Average monthly sales"));
}

// ===========================================================================
// Manager control surface errors
// ===========================================================================

#[tokio::test]
async fn start_rejects_bad_uploads() {
    let h = harness(ScriptedProvider::new(vec![]), |_| {});

    let err = h
        .manager
        .start(csv_upload(), "   ", None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "INVALID_INPUT");

    let err = h
        .manager
        .start(
            DatasetUpload {
                file_name: "notes.pdf".into(),
                bytes: b"x".to_vec(),
            },
            "Summarize",
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "UNSUPPORTED_FORMAT");

    let err = h
        .manager
        .start(
            DatasetUpload {
                file_name: "empty.csv".into(),
                bytes: vec![],
            },
            "Summarize",
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "INVALID_INPUT");

    let err = h
        .manager
        .start(csv_upload(), "Summarize", Some("quantum"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "INVALID_INPUT");
}

#[tokio::test]
async fn unknown_session_errors() {
    let h = harness(ScriptedProvider::new(vec![]), |_| {});
    assert_eq!(h.manager.stop("ghost").unwrap_err().kind(), "UNKNOWN_SESSION");
    assert_eq!(
        h.manager.subscribe("ghost").unwrap_err().kind(),
        "UNKNOWN_SESSION"
    );
    assert_eq!(
        h.manager.fetch("ghost").await.unwrap_err().kind(),
        "UNKNOWN_SESSION"
    );
}

#[tokio::test]
async fn fetch_before_terminal_is_not_ready() {
    // Slow stream keeps the session running while we probe fetch()
    let provider = ScriptedProvider::new(vec![])
        .with_fallback(vec![StreamDelta::Content("slow".into()); 100])
        .with_delta_delay(Duration::from_millis(50));
    let h = harness(provider, |_| {});

    let started = h
        .manager
        .start(csv_upload(), "Summarize", None)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let err = h.manager.fetch(&started.session_id).await.unwrap_err();
    assert_eq!(err.kind(), "SESSION_NOT_READY");

    h.manager.stop(&started.session_id).unwrap();
    let events = drain(&h.manager, &started.session_id).await;
    assert_eq!(events.last().unwrap().event_type, "agent_stopped");
}

// ===========================================================================
// Late subscriber replay (S6)
// ===========================================================================

#[tokio::test]
async fn late_subscriber_sees_full_log() {
    let provider = ScriptedProvider::new(vec![text_turn("## Report\nNothing to plan; all done.")]);
    let h = harness(provider, |_| {});

    let started = h
        .manager
        .start(csv_upload(), "Summarize", None)
        .await
        .unwrap();

    // First subscriber drains to the terminal event
    let first = drain(&h.manager, &started.session_id).await;
    assert_eq!(first.last().unwrap().event_type, "agent_completed");

    // A subscriber attaching after completion replays everything in order
    let replay = drain(&h.manager, &started.session_id).await;
    assert_eq!(kinds(&first), kinds(&replay));
}
