use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

/// Captured result of one finished external process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` if the process was killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Best available description of why the process failed.
    pub fn failure_message(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_string();
        }
        match self.status {
            Some(code) => format!("exit code {}", code),
            None => "terminated by signal".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("failed to start: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("failed to collect output: {0}")]
    Io(#[source] std::io::Error),
}

/// Abstraction over external process execution for testability.
/// Real implementation: `ProcessRunner`. Tests script their own.
///
/// Every call names its working directory explicitly; the process-wide
/// current directory is never changed.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        cwd: &Path,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, RunError>;

    /// `run` with extra environment variables set for the child only.
    /// Runners that cannot pass an environment fall back to `run`.
    async fn run_with_env(
        &self,
        program: &str,
        args: &[&str],
        cwd: &Path,
        env: &[(&str, &str)],
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, RunError> {
        let _ = env;
        self.run(program, args, cwd, timeout).await
    }
}

/// Runs commands with `tokio::process`. A timed-out child is killed.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    async fn spawn_and_wait(
        program: &str,
        args: &[&str],
        cwd: &Path,
        env: &[(&str, &str)],
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, RunError> {
        let child = Command::new(program)
            .args(args)
            .current_dir(cwd)
            // Never block on an interactive credential prompt.
            .env("GIT_TERMINAL_PROMPT", "0")
            .envs(env.iter().copied())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(RunError::Spawn)?;

        let output = match timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(result) => result.map_err(RunError::Io)?,
                Err(_) => return Err(RunError::Timeout(limit)),
            },
            None => child.wait_with_output().await.map_err(RunError::Io)?,
        };

        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        cwd: &Path,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, RunError> {
        Self::spawn_and_wait(program, args, cwd, &[], timeout).await
    }

    async fn run_with_env(
        &self,
        program: &str,
        args: &[&str],
        cwd: &Path,
        env: &[(&str, &str)],
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, RunError> {
        Self::spawn_and_wait(program, args, cwd, env, timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_failure_message_prefers_stderr() {
        let output = CommandOutput {
            status: Some(1),
            stdout: "out".into(),
            stderr: "  fatal: boom\n".into(),
        };
        assert_eq!(output.failure_message(), "fatal: boom");

        let output = CommandOutput {
            status: Some(128),
            ..Default::default()
        };
        assert_eq!(output.failure_message(), "exit code 128");
        assert!(!output.success());
    }

    #[tokio::test]
    async fn test_process_runner_captures_output_in_cwd() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();

        let output = ProcessRunner
            .run("ls", &[], dir.path(), Some(Duration::from_secs(10)))
            .await
            .unwrap();
        assert!(output.success());
        assert!(output.stdout.contains("marker.txt"));
    }

    #[tokio::test]
    async fn test_process_runner_sets_child_env() {
        let dir = tempdir().unwrap();
        let output = ProcessRunner
            .run_with_env(
                "printenv",
                &["CODERELAY_CHILD_VAR"],
                dir.path(),
                &[("CODERELAY_CHILD_VAR", "from-parent")],
                Some(Duration::from_secs(10)),
            )
            .await
            .unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "from-parent");
        assert!(std::env::var("CODERELAY_CHILD_VAR").is_err());
    }

    #[tokio::test]
    async fn test_process_runner_times_out() {
        let dir = tempdir().unwrap();
        let err = ProcessRunner
            .run("sleep", &["5"], dir.path(), Some(Duration::from_millis(100)))
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_process_runner_spawn_failure() {
        let dir = tempdir().unwrap();
        let err = ProcessRunner
            .run("definitely-not-a-real-binary-xyz", &[], dir.path(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Spawn(_)));
    }
}
