//! # Sandbox Executor
//!
//! Runs generated code, shell commands and test suites as isolated child
//! processes rooted at the workspace directory. Each invocation is
//! stateless: a fresh process, a restricted environment, a watchdog
//! timeout, and capped output capture.

use crate::domain::config::ExecutorConfig;
use crate::domain::types::{ExecMode, ExecutionResult};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;

const RESULT_TAG: &str = "RESULT_VALUE: ";
const TRUNCATION_MARKER: &str = "\n... [output truncated]";

pub struct SandboxExecutor {
    workspace: PathBuf,
    timeout: Duration,
    max_output: usize,
    env_allowlist: Vec<String>,
    interpreter: String,
    test_runner: Vec<String>,
}

impl SandboxExecutor {
    pub fn new(config: &ExecutorConfig, workspace: &Path) -> Self {
        Self {
            workspace: workspace.to_path_buf(),
            timeout: Duration::from_secs(config.timeout_secs),
            max_output: (config.max_output_kb * 1024) as usize,
            env_allowlist: config.env_allowlist.clone(),
            interpreter: config.interpreter.clone(),
            test_runner: config.test_runner.clone(),
        }
    }

    /// Execute a code payload. `Exec` runs the payload verbatim as a script;
    /// `Eval` wraps it so the child prints one tagged result line that is
    /// decoded into `return_value`.
    pub async fn execute_code(&self, code: &str, mode: ExecMode) -> ExecutionResult {
        let payload = match mode {
            ExecMode::Exec => code.to_string(),
            ExecMode::Eval => {
                // A JSON string literal is also a valid Python string literal.
                let literal = match serde_json::to_string(code) {
                    Ok(l) => l,
                    Err(e) => return Self::internal_failure(format!("Failed to encode payload: {e}")),
                };
                format!(
                    "import json\nresult = eval({literal})\nprint(\"{RESULT_TAG}\" + json.dumps(result, default=str))\n"
                )
            }
        };

        let script = match tempfile::Builder::new()
            .prefix("devagent-")
            .suffix(".py")
            .tempfile()
        {
            Ok(f) => f,
            Err(e) => return Self::internal_failure(format!("Failed to create temp script: {e}")),
        };
        if let Err(e) = std::fs::write(script.path(), &payload) {
            return Self::internal_failure(format!("Failed to write temp script: {e}"));
        }

        let mut cmd = self.restricted_command(&self.interpreter);
        cmd.arg(script.path());
        let mut result = self.run_child(cmd).await;

        if mode == ExecMode::Eval && result.success {
            result.return_value = extract_return_value(&result.output);
        }
        result
    }

    /// Run a shell command in the workspace directory.
    pub async fn run_command(&self, command: &str) -> ExecutionResult {
        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = self.restricted_command("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = self.restricted_command("sh");
            c.args(["-c", command]);
            c
        };
        cmd.stdin(Stdio::null());
        self.run_child(cmd).await
    }

    /// Delegate to the configured external test-runner process.
    pub async fn run_test(&self, test_path: &str) -> ExecutionResult {
        let Some((program, args)) = self.test_runner.split_first() else {
            return Self::internal_failure("No test runner configured");
        };
        let mut cmd = self.restricted_command(program);
        cmd.args(args);
        cmd.arg(self.workspace.join(test_path));
        self.run_child(cmd).await
    }

    /// Return the last `num_lines` lines of a file under the workspace
    /// root, or an explicit message when it is absent. Never errors.
    pub async fn read_logs(&self, log_path: &str, num_lines: usize) -> String {
        let full = self.workspace.join(log_path);
        if !full.is_file() {
            return format!("Error: Log file '{log_path}' does not exist");
        }
        match tokio::fs::read_to_string(&full).await {
            Ok(content) => {
                let lines: Vec<&str> = content.lines().collect();
                let start = lines.len().saturating_sub(num_lines);
                lines[start..].join("\n")
            }
            Err(e) => format!("Error reading log file: {e}"),
        }
    }

    /// Build a command rooted at the workspace with a cleared environment:
    /// only the allow-listed variables are inherited, plus the workspace
    /// path injected for module resolution.
    fn restricted_command(&self, program: &str) -> Command {
        let mut cmd = Command::new(program);
        cmd.env_clear();
        for key in &self.env_allowlist {
            if let Ok(value) = std::env::var(key) {
                cmd.env(key, value);
            }
        }
        cmd.env("PYTHONPATH", &self.workspace);
        cmd.current_dir(&self.workspace);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        // The watchdog path drops the child future; the process must die
        // with it, not linger.
        cmd.kill_on_drop(true);
        cmd
    }

    /// Spawn the child and wait under the watchdog timeout. Timeouts report
    /// a distinct error with the elapsed time pinned to the configured
    /// timeout, not the wall-clock overrun.
    async fn run_child(&self, mut cmd: Command) -> ExecutionResult {
        let start = Instant::now();
        let child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => return Self::internal_failure(format!("Failed to spawn process: {e}")),
        };

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let stdout = self.truncate(String::from_utf8_lossy(&output.stdout).into_owned());
                let stderr = self.truncate(String::from_utf8_lossy(&output.stderr).into_owned());
                ExecutionResult {
                    success: output.status.success(),
                    output: stdout,
                    error: stderr,
                    return_value: None,
                    execution_time: start.elapsed().as_secs_f64(),
                }
            }
            Ok(Err(e)) => Self::internal_failure(format!("Failed to collect process output: {e}")),
            Err(_) => {
                tracing::warn!("Process killed by watchdog after {:?}", self.timeout);
                ExecutionResult {
                    success: false,
                    output: String::new(),
                    error: format!(
                        "Execution timed out after {} seconds",
                        self.timeout.as_secs()
                    ),
                    return_value: None,
                    execution_time: self.timeout.as_secs_f64(),
                }
            }
        }
    }

    /// Cap captured output at the configured ceiling. Truncation is silent
    /// data loss by design, marked but not an error.
    fn truncate(&self, mut text: String) -> String {
        if text.len() > self.max_output {
            let mut cut = self.max_output;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text.truncate(cut);
            text.push_str(TRUNCATION_MARKER);
        }
        text
    }

    fn internal_failure(message: impl Into<String>) -> ExecutionResult {
        ExecutionResult {
            success: false,
            output: String::new(),
            error: message.into(),
            return_value: None,
            execution_time: 0.0,
        }
    }
}

/// Decode the tagged result line an eval-mode child prints. A missing or
/// undecodable tag yields no value rather than an error.
fn extract_return_value(stdout: &str) -> Option<Value> {
    stdout
        .lines()
        .find_map(|line| line.strip_prefix(RESULT_TAG))
        .and_then(|payload| serde_json::from_str(payload).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_executor(workspace: &Path, timeout_secs: u64) -> SandboxExecutor {
        let config = ExecutorConfig {
            timeout_secs,
            // sh stands in for the real interpreter so tests stay
            // independent of an installed python.
            interpreter: "sh".to_string(),
            test_runner: vec!["sh".to_string(), "-c".to_string(), "true".to_string()],
            ..ExecutorConfig::default()
        };
        SandboxExecutor::new(&config, workspace)
    }

    #[tokio::test]
    async fn test_run_command_captures_output() {
        let dir = tempdir().unwrap();
        let exec = test_executor(dir.path(), 10);
        let result = exec.run_command("echo hello").await;
        assert!(result.success);
        assert!(result.output.contains("hello"));
        assert!(result.error.is_empty());
        assert!(result.execution_time < 10.0);
    }

    #[tokio::test]
    async fn test_run_command_nonzero_exit() {
        let dir = tempdir().unwrap();
        let exec = test_executor(dir.path(), 10);
        let result = exec.run_command("echo oops >&2; exit 3").await;
        assert!(!result.success);
        assert!(result.error.contains("oops"));
    }

    #[tokio::test]
    async fn test_timeout_contract() {
        let dir = tempdir().unwrap();
        let exec = test_executor(dir.path(), 2);
        let start = Instant::now();
        let result = exec.run_command("sleep 30").await;
        assert!(start.elapsed() < Duration::from_secs(10));
        assert!(!result.success);
        assert!(result.error.contains("timed out"));
        assert_eq!(result.execution_time, 2.0);
    }

    #[tokio::test]
    async fn test_execute_code_never_terminating_times_out() {
        let dir = tempdir().unwrap();
        let exec = test_executor(dir.path(), 2);
        let result = exec
            .execute_code("while :; do :; done", ExecMode::Exec)
            .await;
        assert!(!result.success);
        assert!(result.error.contains("timed out"));
        assert_eq!(result.execution_time, 2.0);
    }

    #[tokio::test]
    async fn test_execute_code_exec_runs_script() {
        let dir = tempdir().unwrap();
        let exec = test_executor(dir.path(), 10);
        let result = exec.execute_code("echo from-script", ExecMode::Exec).await;
        assert!(result.success);
        assert!(result.output.contains("from-script"));
        assert!(result.return_value.is_none());
    }

    #[tokio::test]
    async fn test_workspace_path_injected() {
        let dir = tempdir().unwrap();
        let exec = test_executor(dir.path(), 10);
        let result = exec.run_command("echo $PYTHONPATH && pwd").await;
        assert!(result.success);
        assert!(result.output.contains(&dir.path().to_string_lossy().to_string()));
    }

    #[tokio::test]
    async fn test_output_truncation() {
        let dir = tempdir().unwrap();
        let config = ExecutorConfig {
            max_output_kb: 1,
            interpreter: "sh".to_string(),
            ..ExecutorConfig::default()
        };
        let exec = SandboxExecutor::new(&config, dir.path());
        let result = exec
            .run_command("i=0; while [ $i -lt 300 ]; do echo aaaaaaaaaa; i=$((i+1)); done")
            .await;
        assert!(result.success);
        assert!(result.output.ends_with(TRUNCATION_MARKER));
        assert_eq!(
            result.output.len(),
            1024 + TRUNCATION_MARKER.len()
        );
    }

    #[tokio::test]
    async fn test_run_test_delegates_to_runner() {
        let dir = tempdir().unwrap();
        let exec = test_executor(dir.path(), 10);
        // Runner is `sh -c true <path>`: exits zero regardless of the path.
        let result = exec.run_test("tests/test_x.py").await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_read_logs_tail() {
        let dir = tempdir().unwrap();
        let exec = test_executor(dir.path(), 10);
        std::fs::write(
            dir.path().join("app.log"),
            "one\ntwo\nthree\nfour\nfive\n",
        )
        .unwrap();
        let tail = exec.read_logs("app.log", 2).await;
        assert_eq!(tail, "four\nfive");

        let all = exec.read_logs("app.log", 100).await;
        assert_eq!(all, "one\ntwo\nthree\nfour\nfive");
    }

    #[tokio::test]
    async fn test_read_logs_missing_file() {
        let dir = tempdir().unwrap();
        let exec = test_executor(dir.path(), 10);
        let message = exec.read_logs("ghost.log", 10).await;
        assert!(message.contains("does not exist"));
    }

    #[test]
    fn test_extract_return_value() {
        assert_eq!(
            extract_return_value("noise\nRESULT_VALUE: [1, 2]\n"),
            Some(serde_json::json!([1, 2]))
        );
        assert_eq!(extract_return_value("no tag here\n"), None);
        assert_eq!(extract_return_value("RESULT_VALUE: not-json\n"), None);
    }
}
