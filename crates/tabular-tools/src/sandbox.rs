//! Code sandbox - one-shot subprocess execution of model-generated scripts
//!
//! Every call gets a fresh working directory seeded with the dataset at its
//! conventional name (`dataset.<ext>`). The child runs with that directory
//! as cwd; stdout/stderr are captured into capped buffers; after exit the
//! directory is scanned for `result.png` and `result.json`. On timeout the
//! whole process group receives SIGTERM, then SIGKILL after a 2-second
//! grace period.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tabular_core::{AgentError, DatasetHandle, ExecStatus, ImageData};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// File names forming the sandbox output contract with the LLM.
pub const RESULT_IMAGE: &str = "result.png";
pub const RESULT_JSON: &str = "result.json";
/// Well-known variable the generated code reads the dataset path from.
pub const DATASET_VAR: &str = "DATASET_PATH";

const KILL_GRACE: Duration = Duration::from_secs(2);

#[derive(Clone, Debug)]
pub struct SandboxConfig {
    pub timeout: Duration,
    pub python_bin: String,
    /// Hard cap per captured stream; bytes beyond it are discarded and the
    /// buffer carries a truncation marker.
    pub max_capture_bytes: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            python_bin: "python3".to_string(),
            max_capture_bytes: 64 * 1024,
        }
    }
}

/// Result of one sandboxed execution.
#[derive(Debug)]
pub struct ExecOutcome {
    pub status: ExecStatus,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub image: Option<ImageData>,
    pub structured: Option<serde_json::Value>,
    pub duration_ms: u64,
}

impl ExecOutcome {
    pub fn has_image(&self) -> bool {
        self.image.is_some()
    }

    pub fn has_structured(&self) -> bool {
        self.structured.is_some()
    }
}

pub struct CodeSandbox {
    config: SandboxConfig,
}

impl CodeSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    /// Execute `code` in a fresh working directory under `work_root`.
    ///
    /// Only infrastructural failures (cannot create the directory, cannot
    /// spawn the interpreter) return `Err`; everything the script does -
    /// including crashing or timing out - is reported in the outcome.
    pub async fn run(
        &self,
        code: &str,
        dataset: &DatasetHandle,
        work_root: &Path,
        cancel: &CancellationToken,
    ) -> Result<ExecOutcome, AgentError> {
        let run_dir = work_root.join(format!("run-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&run_dir)
            .await
            .map_err(|e| AgentError::ExecutorUnavailable(format!("create workdir: {}", e)))?;

        let seeded = run_dir.join(dataset.sandbox_name());
        tokio::fs::copy(&dataset.path, &seeded)
            .await
            .map_err(|e| AgentError::ExecutorUnavailable(format!("seed dataset: {}", e)))?;

        // Prologue binds the well-known dataset variable the prompt
        // documents, then the model's code runs verbatim.
        let script = format!(
            "{} = {:?}\n\n{}",
            DATASET_VAR,
            dataset.sandbox_name(),
            code
        );
        let script_path = run_dir.join("main.py");
        tokio::fs::write(&script_path, &script)
            .await
            .map_err(|e| AgentError::ExecutorUnavailable(format!("write script: {}", e)))?;

        let outcome = self.spawn_and_collect(&run_dir, cancel).await;

        if let Err(e) = tokio::fs::remove_dir_all(&run_dir).await {
            warn!("sandbox cleanup failed for {}: {}", run_dir.display(), e);
        }

        outcome
    }

    async fn spawn_and_collect(
        &self,
        run_dir: &PathBuf,
        cancel: &CancellationToken,
    ) -> Result<ExecOutcome, AgentError> {
        let mut cmd = Command::new(&self.config.python_bin);
        cmd.arg("main.py")
            .current_dir(run_dir)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        // New process group so the kill sequence reaches grandchildren.
        #[cfg(unix)]
        cmd.process_group(0);

        let start = std::time::Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|e| AgentError::ExecutorUnavailable(format!("spawn interpreter: {}", e)))?;
        let child_pid = child.id();

        // Reader tasks own the pipes so capture survives a timeout kill.
        let cap = self.config.max_capture_bytes;
        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        let stdout_task = tokio::spawn(read_capped(stdout_pipe, cap));
        let stderr_task = tokio::spawn(read_capped(stderr_pipe, cap));

        let mut timed_out = false;
        let mut cancelled = false;

        let exit = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                cancelled = true;
                None
            }
            waited = tokio::time::timeout(self.config.timeout, child.wait()) => {
                match waited {
                    Ok(Ok(status)) => Some(status),
                    Ok(Err(e)) => {
                        return Err(AgentError::ExecutorUnavailable(format!(
                            "wait for interpreter: {}",
                            e
                        )));
                    }
                    Err(_elapsed) => {
                        timed_out = true;
                        None
                    }
                }
            }
        };

        // Terminate-then-kill: SIGTERM, 2 s grace, SIGKILL. Targets the
        // process group so the interpreter's own children are reaped too.
        let exit = match exit {
            Some(status) => Some(status),
            None => {
                #[cfg(unix)]
                if let Some(pid) = child_pid {
                    sigterm_process_group(pid);
                }
                #[cfg(not(unix))]
                {
                    let _ = child.start_kill();
                }

                match tokio::time::timeout(KILL_GRACE, child.wait()).await {
                    Ok(Ok(status)) => Some(status),
                    _ => {
                        #[cfg(unix)]
                        if let Some(pid) = child_pid {
                            sigkill_process_group(pid);
                        }
                        #[cfg(not(unix))]
                        {
                            let _ = child.start_kill();
                        }
                        let _ = child.wait().await; // reap
                        None
                    }
                }
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let mut stderr = stderr_task.await.unwrap_or_default();
        let duration_ms = start.elapsed().as_millis() as u64;

        let (status, exit_code) = if cancelled {
            stderr.push_str("\n[terminated: session cancelled]");
            (ExecStatus::Error, None)
        } else if timed_out {
            stderr.push_str(&format!(
                "\n[terminated: execution exceeded {}s timeout]",
                self.config.timeout.as_secs()
            ));
            (ExecStatus::Timeout, None)
        } else {
            let code = exit.and_then(|s| s.code());
            let status = match code {
                Some(0) => ExecStatus::Success,
                _ => ExecStatus::Error,
            };
            (status, code)
        };

        debug!(
            "sandbox run finished: status={} exit={:?} {}ms",
            status.as_str(),
            exit_code,
            duration_ms
        );

        let image = load_image(run_dir).await;
        let structured = load_structured(run_dir).await;

        Ok(ExecOutcome {
            status,
            stdout,
            stderr,
            exit_code,
            image,
            structured,
            duration_ms,
        })
    }
}

/// Read a pipe into a string, discarding (with a marker) beyond `cap` bytes.
async fn read_capped(pipe: Option<impl tokio::io::AsyncRead + Unpin>, cap: usize) -> String {
    let Some(mut pipe) = pipe else {
        return String::new();
    };

    let mut kept: Vec<u8> = Vec::new();
    let mut discarded = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        match pipe.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                let room = cap.saturating_sub(kept.len());
                let take = n.min(room);
                kept.extend_from_slice(&chunk[..take]);
                discarded += n - take;
            }
            Err(_) => break,
        }
    }

    let mut out = String::from_utf8_lossy(&kept).into_owned();
    if discarded > 0 {
        out.push_str(&format!("\n[output truncated: {} bytes discarded]", discarded));
    }
    out
}

async fn load_image(run_dir: &Path) -> Option<ImageData> {
    let bytes = tokio::fs::read(run_dir.join(RESULT_IMAGE)).await.ok()?;
    if bytes.is_empty() {
        return None;
    }
    Some(ImageData {
        bytes,
        mime: "image/png".to_string(),
    })
}

async fn load_structured(run_dir: &Path) -> Option<serde_json::Value> {
    let text = tokio::fs::read_to_string(run_dir.join(RESULT_JSON)).await.ok()?;
    match serde_json::from_str(&text) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("result.json present but unparseable: {}", e);
            None
        }
    }
}

/// Send a signal to every process in a process group on Unix.
///
/// The only unsafe calls in the crate, isolated here. Sound because `pid`
/// comes from a just-spawned `tokio::process::Child` and negating it targets
/// the group per POSIX `kill(2)`.
#[cfg(unix)]
fn sigterm_process_group(pid: u32) {
    unsafe {
        libc::kill(-(pid as i32), libc::SIGTERM);
    }
}

#[cfg(unix)]
fn sigkill_process_group(pid: u32) {
    unsafe {
        libc::kill(-(pid as i32), libc::SIGKILL);
    }
}
