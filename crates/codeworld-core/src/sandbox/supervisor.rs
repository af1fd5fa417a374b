//! Caller side of the runner protocol: launch one runner process per
//! candidate, enforce a wall-clock budget and decode its output line.

use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::error::{SandboxError, SandboxResult, Stage};
use super::protocol::{ExecutionResult, RunnerKind};
use crate::metrics::METRICS;
use crate::obs;

/// Configuration for supervised runner launches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Wall-clock budget for one runner process (milliseconds).
    pub timeout_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self { timeout_ms: 3_000 }
    }
}

/// A runner executable and the protocol it speaks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerBinary {
    pub kind: RunnerKind,
    pub path: PathBuf,
}

impl RunnerBinary {
    pub fn new(kind: RunnerKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }

    /// The runner installed next to the current executable.
    pub fn sibling(kind: RunnerKind) -> SandboxResult<Self> {
        let exe = std::env::current_exe()?;
        let dir = exe
            .parent()
            .ok_or_else(|| SandboxError::Spawn("current executable has no parent".into()))?;
        let mut path = dir.join(kind.binary_name());
        if cfg!(windows) {
            path.set_extension("exe");
        }
        Ok(Self::new(kind, path))
    }
}

/// What came back from one supervised runner process.
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerOutcome {
    pub result: ExecutionResult,
    /// Wall-clock time from spawn to exit.
    pub duration_ms: u64,
    /// Exit status; `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
}

#[cfg(unix)]
fn terminating_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn terminating_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}

fn write_program(source: &str) -> SandboxResult<tempfile::NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("codeworld-")
        .suffix(".cw")
        .tempfile()?;
    file.write_all(source.as_bytes())?;
    file.flush()?;
    Ok(file)
}

/// Run `source` under `runner`, feeding it `payload` on stdin.
///
/// The process is killed when the wall-clock budget runs out. No retries.
pub async fn launch(
    runner: &RunnerBinary,
    source: &str,
    payload: &serde_json::Value,
    config: &SupervisorConfig,
) -> SandboxResult<RunnerOutcome> {
    let program = write_program(source)?;
    let body = serde_json::to_vec(payload)
        .map_err(|e| SandboxError::Protocol(format!("cannot encode payload: {e}")))?;

    let start = Instant::now();
    let mut child = Command::new(&runner.path)
        .arg(program.path())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| SandboxError::Spawn(format!("{}: {e}", runner.path.display())))?;
    METRICS.inc_runner_launches();

    let stdin = child.stdin.take();
    let run = async move {
        if let Some(mut stdin) = stdin {
            // A runner that exits before reading (usage error) closes the pipe.
            if let Err(e) = stdin.write_all(&body).await {
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(e);
                }
            }
        }
        child.wait_with_output().await
    };

    let limit = Duration::from_millis(config.timeout_ms);
    let output = match tokio::time::timeout(limit, run).await {
        Ok(output) => output?,
        Err(_) => {
            let elapsed_ms = start.elapsed().as_millis() as u64;
            METRICS.inc_runner_timeouts();
            obs::emit_runner_timed_out(runner.kind.binary_name(), elapsed_ms, config.timeout_ms);
            return Err(SandboxError::Timeout {
                elapsed_ms,
                limit_ms: config.timeout_ms,
            });
        }
    };
    let duration_ms = start.elapsed().as_millis() as u64;
    drop(program);

    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        debug!(runner = runner.kind.binary_name(), stderr = %stderr.trim(), "runner stderr");
    }

    let exit_code = output.status.code();
    let result = match (exit_code, terminating_signal(&output.status)) {
        (None, Some(signal)) => {
            ExecutionResult::failure(Stage::Invocation, format!("terminated by signal {signal}"))
        }
        (code, _) => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let line = stdout
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .ok_or_else(|| SandboxError::Protocol("runner produced no output".into()))?;
            runner.kind.decode(line, code.unwrap_or(-1))?
        }
    };

    obs::emit_runner_finished(
        runner.kind.binary_name(),
        duration_ms,
        exit_code,
        result.is_success(),
    );
    Ok(RunnerOutcome {
        result,
        duration_ms,
        exit_code,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supervisor_config_default() {
        assert_eq!(SupervisorConfig::default().timeout_ms, 3_000);
    }

    #[test]
    fn test_supervisor_config_serde_roundtrip() {
        let cfg = SupervisorConfig { timeout_ms: 750 };
        let json = serde_json::to_string(&cfg).expect("serialize");
        let back: SupervisorConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(cfg, back);
        let empty: SupervisorConfig = serde_json::from_str("{}").expect("deserialize");
        assert_eq!(empty, SupervisorConfig::default());
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let runner = RunnerBinary::new(RunnerKind::Strategy, "/nonexistent/strategy-runner");
        let err = launch(&runner, "", &serde_json::json!({}), &SupervisorConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Spawn(_)), "{err}");
    }

    // The tests below use `/bin/sh` as a stand-in runner: the "program" file
    // is a shell script, which is enough to exercise process handling.
    #[cfg(unix)]
    mod shell {
        use super::*;
        use serde_json::json;

        fn sh(kind: RunnerKind) -> RunnerBinary {
            RunnerBinary::new(kind, "/bin/sh")
        }

        #[tokio::test]
        async fn test_payload_reaches_stdin_and_result_decodes() {
            let payload = json!({"result": [1, 2], "loc": 4});
            let outcome = launch(
                &sh(RunnerKind::Strategy),
                "cat\n",
                &payload,
                &SupervisorConfig::default(),
            )
            .await
            .expect("launch failed");
            assert_eq!(outcome.exit_code, Some(0));
            assert_eq!(
                outcome.result,
                ExecutionResult::Success {
                    value: json!([1, 2]),
                    loc: 4
                }
            );
        }

        #[tokio::test]
        async fn test_stage_failure_decodes() {
            let src = "echo '{\"error\": \"encoding_failed: not JSON serializable\"}'\nexit 1\n";
            let outcome = launch(
                &sh(RunnerKind::Strategy),
                src,
                &json!({}),
                &SupervisorConfig::default(),
            )
            .await
            .expect("launch failed");
            assert_eq!(
                outcome.result,
                ExecutionResult::failure(Stage::Encoding, "not JSON serializable")
            );
        }

        #[tokio::test]
        async fn test_wall_clock_budget_kills_runner() {
            let cfg = SupervisorConfig { timeout_ms: 200 };
            let err = launch(&sh(RunnerKind::Strategy), "sleep 5\n", &json!({}), &cfg)
                .await
                .unwrap_err();
            assert!(
                matches!(err, SandboxError::Timeout { limit_ms: 200, .. }),
                "{err}"
            );
        }

        #[tokio::test]
        async fn test_signal_death_is_invocation_failure() {
            let outcome = launch(
                &sh(RunnerKind::Scoring),
                "kill -9 $$\n",
                &json!({}),
                &SupervisorConfig::default(),
            )
            .await
            .expect("launch failed");
            assert_eq!(outcome.exit_code, None);
            assert_eq!(
                outcome.result,
                ExecutionResult::failure(Stage::Invocation, "terminated by signal 9")
            );
        }

        #[tokio::test]
        async fn test_invalid_payload_exit_status() {
            let src = "echo '{\"error\": \"invalid_payload: expected value\"}'\nexit 2\n";
            let err = launch(
                &sh(RunnerKind::Strategy),
                src,
                &json!({}),
                &SupervisorConfig::default(),
            )
            .await
            .unwrap_err();
            assert!(matches!(err, SandboxError::PayloadInvalid(_)), "{err}");
        }

        #[tokio::test]
        async fn test_silent_runner_is_protocol_error() {
            let err = launch(
                &sh(RunnerKind::Strategy),
                "exit 0\n",
                &json!({}),
                &SupervisorConfig::default(),
            )
            .await
            .unwrap_err();
            assert!(matches!(err, SandboxError::Protocol(_)), "{err}");
        }
    }
}
