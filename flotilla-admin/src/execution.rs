//! OS side of the admin server
//!
//! - Delayed power actions (shutdown, reboot) on a detached task
//! - Shell execution with combined stdout/stderr, optional timeout
//! - Metrics collection for status reports

use crate::metrics::SystemMetrics;
use async_trait::async_trait;
use serde::Serialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command as AsyncCommand;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerAction {
    Shutdown,
    Reboot,
}

impl PowerAction {
    pub fn label(self) -> &'static str {
        match self {
            Self::Shutdown => "Shutdown",
            Self::Reboot => "Reboot",
        }
    }

    fn argv(self) -> &'static [&'static str] {
        match self {
            Self::Shutdown => &["sudo", "shutdown", "-h", "now"],
            Self::Reboot => &["sudo", "reboot"],
        }
    }
}

/// Result of an `execute` command, serialized as the command result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ExecOutcome {
    Completed { output: String },
    Failed { error: String, output: String },
}

/// Everything the fleet node asks of the operating system.
#[async_trait]
pub trait HostControl: Send + Sync + 'static {
    /// Run `action` after `delay` without waiting for it.
    fn schedule_power(&self, action: PowerAction, delay: Duration);

    async fn execute(&self, command: &str, timeout: Option<Duration>) -> ExecOutcome;

    async fn system_metrics(&self) -> SystemMetrics;
}

/// The real host.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsHost;

#[async_trait]
impl HostControl for OsHost {
    fn schedule_power(&self, action: PowerAction, delay: Duration) {
        info!("{} scheduled in {}s", action.label(), delay.as_secs());
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let argv = action.argv();
            match AsyncCommand::new(argv[0]).args(&argv[1..]).status().await {
                Ok(status) if status.success() => info!("{} started", action.label()),
                Ok(status) => error!("{} failed: {status}", action.label()),
                Err(e) => error!("{} failed: {e}", action.label()),
            }
        });
    }

    async fn execute(&self, command: &str, timeout: Option<Duration>) -> ExecOutcome {
        run_shell(command, timeout).await
    }

    async fn system_metrics(&self) -> SystemMetrics {
        SystemMetrics::collect().await
    }
}

/// `sh -c` with stderr folded into stdout so the output keeps its order.
pub async fn run_shell(command: &str, timeout: Option<Duration>) -> ExecOutcome {
    debug!("Executing shell command: {command} (timeout: {timeout:?})");
    let script = format!("exec 2>&1\n{command}");
    let child = AsyncCommand::new("sh")
        .arg("-c")
        .arg(script)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn();
    let child = match child {
        Ok(child) => child,
        Err(e) => {
            return ExecOutcome::Failed {
                error: format!("Failed to start shell: {e}"),
                output: String::new(),
            }
        }
    };

    let waited = match timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(waited) => waited,
            Err(_) => {
                warn!("command timed out after {limit:?}: {command}");
                return ExecOutcome::Failed {
                    error: format!("Command '{command}' timed out after {} seconds", limit.as_secs()),
                    output: String::new(),
                };
            }
        },
        None => child.wait_with_output().await,
    };

    let output = match waited {
        Ok(output) => output,
        Err(e) => {
            return ExecOutcome::Failed {
                error: format!("Failed to wait for command: {e}"),
                output: String::new(),
            }
        }
    };
    let text = String::from_utf8_lossy(&output.stdout).into_owned();

    if output.status.success() {
        return ExecOutcome::Completed { output: text };
    }
    let error = match output.status.code() {
        Some(code) => format!("Command '{command}' returned non-zero exit status {code}."),
        None => format!("Command '{command}' was terminated by a signal."),
    };
    ExecOutcome::Failed { error, output: text }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_captures_stdout() {
        let outcome = run_shell("echo hello", None).await;
        assert_eq!(outcome, ExecOutcome::Completed { output: "hello\n".into() });
    }

    #[tokio::test]
    async fn test_merges_stderr_in_order() {
        let outcome = run_shell("echo one; echo two >&2; echo three", None).await;
        assert_eq!(outcome, ExecOutcome::Completed { output: "one\ntwo\nthree\n".into() });
    }

    #[tokio::test]
    async fn test_non_zero_exit_keeps_output() {
        match run_shell("echo partial; exit 3", None).await {
            ExecOutcome::Failed { error, output } => {
                assert!(error.contains("exit status 3"), "{error}");
                assert_eq!(output, "partial\n");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout() {
        let outcome = run_shell("sleep 5", Some(Duration::from_millis(100))).await;
        assert!(matches!(outcome, ExecOutcome::Failed { ref error, .. } if error.contains("timed out")));
    }

    #[test]
    fn test_outcome_shape() {
        let ok = serde_json::to_value(ExecOutcome::Completed { output: "x".into() }).unwrap();
        assert_eq!(ok, serde_json::json!({"output": "x"}));
        let failed = serde_json::to_value(ExecOutcome::Failed { error: "e".into(), output: "".into() }).unwrap();
        assert_eq!(failed, serde_json::json!({"error": "e", "output": ""}));
    }

    #[test]
    fn test_power_commands() {
        assert_eq!(PowerAction::Shutdown.argv(), ["sudo", "shutdown", "-h", "now"]);
        assert_eq!(PowerAction::Reboot.argv(), ["sudo", "reboot"]);
    }
}
