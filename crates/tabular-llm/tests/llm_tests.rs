//! Tests for tabular-llm: turn assembly, tool-call accumulation, SSE grammar

use tabular_llm::openai::parse_chunk_payload;
use tabular_llm::*;

// ===========================================================================
// TurnResponse assembly
// ===========================================================================

#[test]
fn turn_response_content_only() {
    let turn = TurnResponse::from_parts("The analysis is done.".into(), vec![]);
    assert!(turn.is_textual());
    assert_eq!(turn.text(), "The analysis is done.");
    assert!(turn.tool_calls().is_empty());
}

#[test]
fn turn_response_tool_calls_only() {
    let turn = TurnResponse::from_parts(
        "".into(),
        vec![AccumulatedToolCall {
            id: "c1".into(),
            name: "run_code".into(),
            arguments: "{}".into(),
        }],
    );
    assert!(!turn.is_textual());
    assert!(matches!(turn, TurnResponse::ToolCalls(_)));
}

#[test]
fn turn_response_mixed() {
    let turn = TurnResponse::from_parts(
        "Let me check the data.".into(),
        vec![AccumulatedToolCall {
            id: "c1".into(),
            name: "read_dataset".into(),
            arguments: "{}".into(),
        }],
    );
    assert!(matches!(turn, TurnResponse::Mixed(_, _)));
    assert_eq!(turn.text(), "Let me check the data.");
    assert_eq!(turn.tool_calls().len(), 1);
}

#[test]
fn whitespace_only_text_with_calls_is_tool_calls() {
    let turn = TurnResponse::from_parts(
        "  \n".into(),
        vec![AccumulatedToolCall::default()],
    );
    assert!(matches!(turn, TurnResponse::ToolCalls(_)));
}

// ===========================================================================
// AccumulatedToolCall
// ===========================================================================

#[test]
fn accumulated_call_parses_arguments() {
    let call = AccumulatedToolCall {
        id: "c1".into(),
        name: "todo_write".into(),
        arguments: r#"{"merge": false, "todos": []}"#.into(),
    };
    let args = call.parse_arguments().unwrap();
    assert_eq!(args["merge"], false);
}

#[test]
fn accumulated_call_empty_arguments_yield_empty_object() {
    let call = AccumulatedToolCall {
        id: "c1".into(),
        name: "read_dataset".into(),
        arguments: "".into(),
    };
    assert!(call.parse_arguments().unwrap().as_object().unwrap().is_empty());
}

#[test]
fn accumulated_call_invalid_arguments_error() {
    let call = AccumulatedToolCall {
        id: "c1".into(),
        name: "run_code".into(),
        arguments: "{not json".into(),
    };
    assert!(call.parse_arguments().is_err());
}

// ===========================================================================
// Retry policy
// ===========================================================================

#[test]
fn retryable_errors() {
    assert!(LlmError::StreamError("reset".into()).is_retryable());
    assert!(LlmError::Timeout(120).is_retryable());
    assert!(LlmError::RateLimited { retry_after_ms: 1 }.is_retryable());
    assert!(LlmError::RequestFailed("503".into()).is_retryable());

    assert!(!LlmError::InvalidRequest("bad schema".into()).is_retryable());
    assert!(!LlmError::AuthFailed("401".into()).is_retryable());
    assert!(!LlmError::Cancelled.is_retryable());
}

// ===========================================================================
// SSE chunk grammar
// ===========================================================================

#[test]
fn parse_content_chunk() {
    let deltas = parse_chunk_payload(
        r#"{"choices":[{"delta":{"content":"Hello"},"finish_reason":null}]}"#,
    )
    .unwrap();
    assert_eq!(deltas.len(), 1);
    assert!(matches!(&deltas[0], StreamDelta::Content(t) if t == "Hello"));
}

#[test]
fn parse_reasoning_chunk() {
    let deltas = parse_chunk_payload(
        r#"{"choices":[{"delta":{"reasoning_content":"thinking..."},"finish_reason":null}]}"#,
    )
    .unwrap();
    assert!(matches!(&deltas[0], StreamDelta::Reasoning(t) if t == "thinking..."));
}

#[test]
fn parse_tool_call_start_and_delta() {
    let deltas = parse_chunk_payload(
        r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"run_code","arguments":"{\"co"}}]},"finish_reason":null}]}"#,
    )
    .unwrap();
    assert_eq!(deltas.len(), 2);
    assert!(
        matches!(&deltas[0], StreamDelta::ToolCallStart { id, name, .. } if id == "call_1" && name == "run_code")
    );
    assert!(matches!(&deltas[1], StreamDelta::ToolCallDelta { arguments, .. } if arguments == "{\"co"));
}

#[test]
fn parse_tool_call_continuation_has_no_start() {
    let deltas = parse_chunk_payload(
        r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"de\": 1}"}}]},"finish_reason":null}]}"#,
    )
    .unwrap();
    assert_eq!(deltas.len(), 1);
    assert!(matches!(&deltas[0], StreamDelta::ToolCallDelta { .. }));
}

#[test]
fn parse_finish_reason() {
    let deltas = parse_chunk_payload(
        r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
    )
    .unwrap();
    assert!(
        matches!(&deltas[0], StreamDelta::Done { finish_reason: Some(r) } if r == "tool_calls")
    );
}

#[test]
fn parse_empty_choices_yields_nothing() {
    let deltas = parse_chunk_payload(r#"{"choices":[]}"#).unwrap();
    assert!(deltas.is_empty());
}

#[test]
fn parse_garbage_is_error() {
    assert!(parse_chunk_payload("not json").is_err());
}
