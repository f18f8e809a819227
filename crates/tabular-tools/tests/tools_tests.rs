//! Tests for tabular-tools: dataset inspection, registry validation,
//! todo_write semantics, and the code sandbox (skipped without python3)

use std::path::PathBuf;
use std::time::Duration;
use tabular_core::{DatasetHandle, ExecStatus, Task, TaskKind, TaskStatus};
use tabular_tools::sandbox::{CodeSandbox, SandboxConfig};
use tabular_tools::{create_default_registry, dataset, ToolCtx};
use tokio_util::sync::CancellationToken;

fn write_dataset(dir: &std::path::Path, name: &str, contents: &str) -> DatasetHandle {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    let extension = dataset::supported_extension(name).expect("supported extension");
    DatasetHandle {
        path,
        file_name: name.to_string(),
        extension,
        size_bytes: contents.len() as u64,
    }
}

fn test_ctx(dir: &std::path::Path, handle: DatasetHandle) -> ToolCtx {
    ToolCtx {
        dataset: handle,
        tasks: Vec::new(),
        work_root: dir.join("runs"),
        sandbox: SandboxConfig {
            timeout: Duration::from_secs(5),
            ..SandboxConfig::default()
        },
        cancel: CancellationToken::new(),
    }
}

fn python_available() -> bool {
    std::process::Command::new("python3")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

// ===========================================================================
// Dataset inspection
// ===========================================================================

#[test]
fn supported_extensions() {
    assert_eq!(dataset::supported_extension("sales.csv").as_deref(), Some("csv"));
    assert_eq!(dataset::supported_extension("Sales.XLSX").as_deref(), Some("xlsx"));
    assert_eq!(dataset::supported_extension("data.tsv").as_deref(), Some("tsv"));
    assert!(dataset::supported_extension("notes.pdf").is_none());
    assert!(dataset::supported_extension("no_extension").is_none());
}

#[tokio::test]
async fn inspect_csv_summary() {
    let dir = tempfile::tempdir().unwrap();
    let handle = write_dataset(
        dir.path(),
        "sales.csv",
        "month,amount,region\n2024-01,100,north\n2024-02,250,south\n2024-03,,north\n",
    );

    let summary = dataset::inspect(&handle, None).await.unwrap();
    assert_eq!(summary.total_rows, 3);
    assert_eq!(summary.total_columns, 3);
    assert_eq!(summary.columns[0].name, "month");
    assert_eq!(summary.columns[1].dtype, "int");
    assert_eq!(summary.columns[2].dtype, "string");
    // 1 empty cell of 9
    assert!((summary.missing_ratio - 1.0 / 9.0).abs() < 1e-9);
    assert!(summary.preview.contains("month | amount | region"));
}

#[tokio::test]
async fn inspect_csv_float_and_date_columns() {
    let dir = tempfile::tempdir().unwrap();
    let handle = write_dataset(
        dir.path(),
        "metrics.csv",
        "day,value\n2024-01-05,1.5\n2024-01-06,2.25\n",
    );
    let summary = dataset::inspect(&handle, None).await.unwrap();
    assert_eq!(summary.columns[0].dtype, "date");
    assert_eq!(summary.columns[1].dtype, "float");
}

#[tokio::test]
async fn inspect_tsv_uses_tab_delimiter() {
    let dir = tempfile::tempdir().unwrap();
    let handle = write_dataset(dir.path(), "data.tsv", "a\tb\n1\t2\n");
    let summary = dataset::inspect(&handle, None).await.unwrap();
    assert_eq!(summary.total_columns, 2);
    assert_eq!(summary.total_rows, 1);
}

#[tokio::test]
async fn inspect_missing_file_is_invalid_input() {
    let handle = DatasetHandle {
        path: PathBuf::from("/nonexistent/file.csv"),
        file_name: "file.csv".into(),
        extension: "csv".into(),
        size_bytes: 0,
    };
    let err = dataset::inspect(&handle, None).await.unwrap_err();
    assert_eq!(err.kind(), "INVALID_INPUT");
}

// ===========================================================================
// Registry + schema validation
// ===========================================================================

#[test]
fn default_registry_tools() {
    let registry = create_default_registry();
    let mut names = registry.list();
    names.sort();
    assert_eq!(names, vec!["read_dataset", "run_code", "todo_write"]);
    assert_eq!(registry.definitions().len(), 3);
}

#[test]
fn validate_args_accepts_good_input() {
    let registry = create_default_registry();
    assert!(registry
        .validate_args("run_code", &serde_json::json!({"code": "print(1)"}))
        .is_ok());
    assert!(registry
        .validate_args(
            "todo_write",
            &serde_json::json!({"merge": false, "todos": [{"id": 1, "content": "explore"}]})
        )
        .is_ok());
}

#[test]
fn validate_args_rejects_type_mismatch() {
    let registry = create_default_registry();
    assert!(registry
        .validate_args("run_code", &serde_json::json!({"code": 42}))
        .is_err());
    assert!(registry
        .validate_args("todo_write", &serde_json::json!({"merge": "no", "todos": []}))
        .is_err());
    assert!(registry
        .validate_args("read_dataset", &serde_json::json!({}))
        .is_err());
}

#[tokio::test]
async fn unknown_tool_is_recoverable_error() {
    let dir = tempfile::tempdir().unwrap();
    let handle = write_dataset(dir.path(), "d.csv", "a\n1\n");
    let ctx = test_ctx(dir.path(), handle);
    let registry = create_default_registry();

    let outcome = registry
        .execute("make_coffee", &ctx, serde_json::json!({}))
        .await
        .unwrap();
    assert!(outcome.is_error);
    assert!(outcome.payload.contains("INVALID_INPUT"));
}

// ===========================================================================
// read_dataset tool
// ===========================================================================

#[tokio::test]
async fn read_dataset_accepts_sandbox_name() {
    let dir = tempfile::tempdir().unwrap();
    let handle = write_dataset(dir.path(), "sales.csv", "a,b\n1,2\n");
    let ctx = test_ctx(dir.path(), handle);
    let registry = create_default_registry();

    let outcome = registry
        .execute(
            "read_dataset",
            &ctx,
            serde_json::json!({"file_path": "dataset.csv"}),
        )
        .await
        .unwrap();
    assert!(!outcome.is_error);
    assert!(outcome.summary.is_some());
    assert!(outcome.payload.contains("Rows: 1"));
}

#[tokio::test]
async fn read_dataset_rejects_unknown_path() {
    let dir = tempfile::tempdir().unwrap();
    let handle = write_dataset(dir.path(), "sales.csv", "a,b\n1,2\n");
    let ctx = test_ctx(dir.path(), handle);
    let registry = create_default_registry();

    let outcome = registry
        .execute(
            "read_dataset",
            &ctx,
            serde_json::json!({"file_path": "/etc/passwd"}),
        )
        .await
        .unwrap();
    assert!(outcome.is_error);
    assert!(outcome.payload.contains("INVALID_INPUT"));
}

// ===========================================================================
// todo_write tool
// ===========================================================================

#[tokio::test]
async fn todo_write_replace_yields_exact_list() {
    let dir = tempfile::tempdir().unwrap();
    let handle = write_dataset(dir.path(), "d.csv", "a\n1\n");
    let ctx = test_ctx(dir.path(), handle);
    let registry = create_default_registry();

    let outcome = registry
        .execute(
            "todo_write",
            &ctx,
            serde_json::json!({
                "merge": false,
                "todos": [
                    {"id": 1, "content": "Explore the dataset", "status": "in_progress"},
                    {"id": 2, "content": "Plot monthly sales chart"},
                    {"id": 3, "content": "Write final report"},
                ]
            }),
        )
        .await
        .unwrap();

    let change = outcome.tasks.expect("task change");
    assert!(change.replaced);
    assert_eq!(change.tasks.len(), 3);
    assert_eq!(change.tasks[0].status, TaskStatus::InProgress);
    assert_eq!(change.tasks[0].kind, TaskKind::DataExploration);
    assert_eq!(change.tasks[1].kind, TaskKind::Visualization);
    assert_eq!(change.tasks[2].kind, TaskKind::Report);
    assert_eq!(change.tasks[1].status, TaskStatus::Pending);
}

#[tokio::test]
async fn todo_write_merge_updates_and_appends() {
    let dir = tempfile::tempdir().unwrap();
    let handle = write_dataset(dir.path(), "d.csv", "a\n1\n");
    let mut ctx = test_ctx(dir.path(), handle);
    ctx.tasks = vec![
        Task::new(1, "Explore", TaskKind::DataExploration).with_status(TaskStatus::InProgress),
        Task::new(2, "Analyze", TaskKind::Analysis),
    ];
    let registry = create_default_registry();

    let outcome = registry
        .execute(
            "todo_write",
            &ctx,
            serde_json::json!({
                "merge": true,
                "todos": [
                    {"id": 1, "content": "Explore", "status": "completed"},
                    {"id": 2, "content": "Analyze", "status": "in_progress"},
                    {"id": 9, "content": "Extra validation step"},
                ]
            }),
        )
        .await
        .unwrap();

    let change = outcome.tasks.expect("task change");
    assert!(!change.replaced);
    assert_eq!(change.tasks.len(), 3);
    assert_eq!(change.tasks[0].status, TaskStatus::Completed);
    assert_eq!(change.tasks[1].status, TaskStatus::InProgress);
    assert_eq!(change.tasks[2].id, 9);
    assert_eq!(change.tasks[2].status, TaskStatus::Pending);
}

#[tokio::test]
async fn todo_write_rejects_two_in_progress() {
    let dir = tempfile::tempdir().unwrap();
    let handle = write_dataset(dir.path(), "d.csv", "a\n1\n");
    let mut ctx = test_ctx(dir.path(), handle);
    ctx.tasks = vec![
        Task::new(1, "Explore", TaskKind::DataExploration).with_status(TaskStatus::InProgress),
        Task::new(2, "Analyze", TaskKind::Analysis),
    ];
    let registry = create_default_registry();

    // Starts task 2 without resolving task 1 in the same call
    let outcome = registry
        .execute(
            "todo_write",
            &ctx,
            serde_json::json!({
                "merge": true,
                "todos": [{"id": 2, "content": "Analyze", "status": "in_progress"}]
            }),
        )
        .await
        .unwrap();
    assert!(outcome.is_error);
    assert!(outcome.payload.contains("INVALID_STATE"));
    assert!(outcome.tasks.is_none());
}

#[tokio::test]
async fn todo_write_rejects_duplicate_ids_on_replace() {
    let dir = tempfile::tempdir().unwrap();
    let handle = write_dataset(dir.path(), "d.csv", "a\n1\n");
    let ctx = test_ctx(dir.path(), handle);
    let registry = create_default_registry();

    let outcome = registry
        .execute(
            "todo_write",
            &ctx,
            serde_json::json!({
                "merge": false,
                "todos": [
                    {"id": 1, "content": "A"},
                    {"id": 1, "content": "B"},
                ]
            }),
        )
        .await
        .unwrap();
    assert!(outcome.is_error);
    assert!(outcome.payload.contains("duplicate"));
}

// ===========================================================================
// Code sandbox (requires python3)
// ===========================================================================

#[tokio::test]
async fn sandbox_captures_stdout_and_dataset() {
    if !python_available() {
        eprintln!("SKIP: python3 not available");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let handle = write_dataset(dir.path(), "d.csv", "a,b\n1,2\n");
    let sandbox = CodeSandbox::new(SandboxConfig::default());
    let cancel = CancellationToken::new();

    let outcome = sandbox
        .run(
            "print(open(DATASET_PATH).read().strip())",
            &handle,
            &dir.path().join("runs"),
            &cancel,
        )
        .await
        .unwrap();

    assert_eq!(outcome.status, ExecStatus::Success);
    assert!(outcome.stdout.contains("a,b"));
    assert_eq!(outcome.exit_code, Some(0));
}

#[tokio::test]
async fn sandbox_collects_result_artifacts() {
    if !python_available() {
        eprintln!("SKIP: python3 not available");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let handle = write_dataset(dir.path(), "d.csv", "a\n1\n");
    let sandbox = CodeSandbox::new(SandboxConfig::default());
    let cancel = CancellationToken::new();

    let code = r#"
import json
with open("result.json", "w") as f:
    json.dump({"total": 42}, f)
with open("result.png", "wb") as f:
    f.write(b"\x89PNG\r\n\x1a\nfake")
print("done")
"#;
    let outcome = sandbox
        .run(code, &handle, &dir.path().join("runs"), &cancel)
        .await
        .unwrap();

    assert_eq!(outcome.status, ExecStatus::Success);
    assert!(outcome.has_image());
    assert_eq!(outcome.structured.as_ref().unwrap()["total"], 42);
}

#[tokio::test]
async fn sandbox_reports_execution_error() {
    if !python_available() {
        eprintln!("SKIP: python3 not available");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let handle = write_dataset(dir.path(), "d.csv", "a\n1\n");
    let sandbox = CodeSandbox::new(SandboxConfig::default());
    let cancel = CancellationToken::new();

    let outcome = sandbox
        .run(
            "raise ValueError('broken column name')",
            &handle,
            &dir.path().join("runs"),
            &cancel,
        )
        .await
        .unwrap();

    assert_eq!(outcome.status, ExecStatus::Error);
    assert!(outcome.stderr.contains("broken column name"));
    assert_ne!(outcome.exit_code, Some(0));
}

#[tokio::test]
async fn sandbox_timeout_kills_child() {
    if !python_available() {
        eprintln!("SKIP: python3 not available");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let handle = write_dataset(dir.path(), "d.csv", "a\n1\n");
    let sandbox = CodeSandbox::new(SandboxConfig {
        timeout: Duration::from_secs(1),
        ..SandboxConfig::default()
    });
    let cancel = CancellationToken::new();

    let start = std::time::Instant::now();
    let outcome = sandbox
        .run(
            "import time\nprint('starting')\ntime.sleep(60)",
            &handle,
            &dir.path().join("runs"),
            &cancel,
        )
        .await
        .unwrap();

    assert_eq!(outcome.status, ExecStatus::Timeout);
    assert!(outcome.stderr.contains("timeout"));
    // 1 s budget + 2 s grace, with headroom for slow machines
    assert!(start.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn sandbox_missing_interpreter_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let handle = write_dataset(dir.path(), "d.csv", "a\n1\n");
    let sandbox = CodeSandbox::new(SandboxConfig {
        python_bin: "definitely-not-a-python".into(),
        ..SandboxConfig::default()
    });
    let cancel = CancellationToken::new();

    let err = sandbox
        .run("print(1)", &handle, &dir.path().join("runs"), &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "EXECUTOR_UNAVAILABLE");
}

// ===========================================================================
// run_code tool payload
// ===========================================================================

#[tokio::test]
async fn run_code_payload_flags() {
    if !python_available() {
        eprintln!("SKIP: python3 not available");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let handle = write_dataset(dir.path(), "d.csv", "a\n1\n");
    let ctx = test_ctx(dir.path(), handle);
    let registry = create_default_registry();

    let outcome = registry
        .execute(
            "run_code",
            &ctx,
            serde_json::json!({"code": "print('found 3 clusters')"}),
        )
        .await
        .unwrap();

    assert!(!outcome.is_error);
    assert_eq!(outcome.status, ExecStatus::Success);
    assert!(outcome.payload.contains("Status: success"));
    assert!(outcome.payload.contains("found 3 clusters"));
    assert!(outcome.payload.contains("Image produced (result.png): no"));
    let artifact = outcome.artifact.expect("artifact");
    assert!(artifact.stdout.contains("found 3 clusters"));
}

#[tokio::test]
async fn run_code_missing_code_is_invalid_input() {
    let dir = tempfile::tempdir().unwrap();
    let handle = write_dataset(dir.path(), "d.csv", "a\n1\n");
    let ctx = test_ctx(dir.path(), handle);
    let registry = create_default_registry();

    let outcome = registry
        .execute("run_code", &ctx, serde_json::json!({}))
        .await
        .unwrap();
    assert!(outcome.is_error);
    assert!(outcome.payload.contains("INVALID_INPUT"));
}
