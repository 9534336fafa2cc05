//! External AI coding agent invocation.
//!
//! The agent is opaque: it receives a prompt and a working directory, edits
//! files there, and prints a text response. Nothing here inspects what it did;
//! the git handler discovers the changes afterwards.

use async_trait::async_trait;
use coderelay_common::Repository;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::config::Config;
use crate::errors::AgentError;
use crate::git::{CommandRunner, ProcessRunner, RunError};
use crate::relay_config::API_KEY_ENV;

const VERSION_TIMEOUT: Duration = Duration::from_secs(5);

/// Abstraction over the coding agent for testability.
/// Real implementation: `ClaudeAgent`.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    /// Run `prompt` with `working_dir` as the agent's current directory.
    async fn run(
        &self,
        prompt: &str,
        working_dir: &Path,
        timeout: Duration,
    ) -> Result<String, AgentError>;
}

pub struct ClaudeAgent {
    command: String,
    skip_permissions: bool,
    api_key: Option<String>,
    runner: Arc<dyn CommandRunner>,
}

impl ClaudeAgent {
    pub fn new(command: impl Into<String>, skip_permissions: bool) -> Self {
        Self::with_runner(command, skip_permissions, Arc::new(ProcessRunner))
    }

    /// Agent command, permission flag and API key from `config`.
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.agent_command(), config.skip_permissions())
            .with_api_key(config.agent_api_key())
    }

    pub fn with_runner(
        command: impl Into<String>,
        skip_permissions: bool,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            command: command.into(),
            skip_permissions,
            api_key: None,
            runner,
        }
    }

    /// Set `ANTHROPIC_API_KEY` for the agent process.
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    fn args<'a>(&self, prompt: &'a str) -> Vec<&'a str> {
        let mut args = Vec::with_capacity(3);
        if self.skip_permissions {
            args.push("--dangerously-skip-permissions");
        }
        args.push("-p");
        args.push(prompt);
        args
    }

    /// `<command> --version`, or `None` if the agent is not installed.
    pub async fn version(&self) -> Option<String> {
        let cwd = std::env::temp_dir();
        match self
            .runner
            .run(&self.command, &["--version"], &cwd, Some(VERSION_TIMEOUT))
            .await
        {
            Ok(output) if output.success() => Some(output.stdout.trim().to_string()),
            _ => None,
        }
    }
}

#[async_trait]
impl AgentRunner for ClaudeAgent {
    async fn run(
        &self,
        prompt: &str,
        working_dir: &Path,
        timeout: Duration,
    ) -> Result<String, AgentError> {
        info!(
            command = %self.command,
            dir = %working_dir.display(),
            prompt_chars = prompt.len(),
            api_key = self.api_key.is_some(),
            "Starting agent"
        );

        let env: Vec<(&str, &str)> = self
            .api_key
            .as_deref()
            .map(|key| (API_KEY_ENV, key))
            .into_iter()
            .collect();
        let output = self
            .runner
            .run_with_env(
                &self.command,
                &self.args(prompt),
                working_dir,
                &env,
                Some(timeout),
            )
            .await
            .map_err(|e| match e {
                RunError::Timeout(limit) => AgentError::Timeout {
                    secs: limit.as_secs(),
                },
                RunError::Spawn(source) | RunError::Io(source) => AgentError::Spawn {
                    command: self.command.clone(),
                    source,
                },
            })?;

        if !output.success() {
            let stderr = output.stderr.trim();
            let stderr = if stderr.is_empty() {
                "Unknown error".to_string()
            } else {
                stderr.to_string()
            };
            error!(code = ?output.status, stderr = %stderr, "Agent failed");
            return Err(AgentError::NonZeroExit {
                code: output.status,
                stderr,
            });
        }

        let response = output.stdout.trim().to_string();
        info!(response_chars = response.len(), "Agent finished");
        Ok(response)
    }
}

/// Prefix `request` with the repository context the agent works in.
pub fn build_repository_prompt(repository: &Repository, request: &str) -> String {
    let mut parts = vec![
        format!("You are working in the '{}' repository.", repository.name),
        format!("Repository path: {}", repository.path.display()),
    ];
    if !repository.description.is_empty() {
        parts.push(format!("Repository description: {}", repository.description));
    }
    parts.push(String::new());
    parts.push("You have full access to:".to_string());
    parts.push("- Read any file in this codebase using your file reading tools".to_string());
    parts.push("- Search for code patterns using grep/search tools".to_string());
    parts.push("- Explore the directory structure".to_string());
    parts.push("- Edit and create files as needed".to_string());
    parts.push(String::new());
    parts.push(
        "IMPORTANT: Before making changes, use your tools to explore the codebase and understand the existing structure."
            .to_string(),
    );
    parts.push(String::new());
    parts.push("User request:".to_string());
    parts.push(request.to_string());
    parts.join("\n")
}

/// Run the agent for `repository`, refusing working trees that have vanished.
pub async fn run_in_repository(
    agent: &dyn AgentRunner,
    repository: &Repository,
    request: &str,
    timeout: Duration,
) -> Result<String, AgentError> {
    if !repository.is_valid() {
        return Err(AgentError::InvalidRepository {
            name: repository.name.clone(),
        });
    }
    let prompt = build_repository_prompt(repository, request);
    agent.run(&prompt, &repository.path, timeout).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::CommandOutput;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Records the invocation and replays one canned result.
    struct RecordingRunner {
        result: Mutex<Option<Result<CommandOutput, RunError>>>,
        seen: Mutex<Option<(String, Vec<String>, PathBuf)>>,
        env: Mutex<Vec<(String, String)>>,
    }

    impl RecordingRunner {
        fn new(result: Result<CommandOutput, RunError>) -> Arc<Self> {
            Arc::new(Self {
                result: Mutex::new(Some(result)),
                seen: Mutex::new(None),
                env: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CommandRunner for RecordingRunner {
        async fn run(
            &self,
            program: &str,
            args: &[&str],
            cwd: &Path,
            _timeout: Option<Duration>,
        ) -> Result<CommandOutput, RunError> {
            *self.seen.lock().unwrap() = Some((
                program.to_string(),
                args.iter().map(|a| a.to_string()).collect(),
                cwd.to_path_buf(),
            ));
            self.result.lock().unwrap().take().unwrap()
        }

        async fn run_with_env(
            &self,
            program: &str,
            args: &[&str],
            cwd: &Path,
            env: &[(&str, &str)],
            timeout: Option<Duration>,
        ) -> Result<CommandOutput, RunError> {
            *self.env.lock().unwrap() = env
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            self.run(program, args, cwd, timeout).await
        }
    }

    fn output(status: i32, stdout: &str, stderr: &str) -> Result<CommandOutput, RunError> {
        Ok(CommandOutput {
            status: Some(status),
            stdout: stdout.into(),
            stderr: stderr.into(),
        })
    }

    #[tokio::test]
    async fn test_run_passes_prompt_and_working_dir() {
        let runner = RecordingRunner::new(output(0, "  Done! Added tests.\n", ""));
        let agent = ClaudeAgent::with_runner("claude", false, runner.clone());

        let response = agent
            .run("add tests", Path::new("/srv/api"), Duration::from_secs(120))
            .await
            .unwrap();
        assert_eq!(response, "Done! Added tests.");

        let (program, args, cwd) = runner.seen.lock().unwrap().clone().unwrap();
        assert_eq!(program, "claude");
        assert_eq!(args, vec!["-p", "add tests"]);
        assert_eq!(cwd, PathBuf::from("/srv/api"));
    }

    #[tokio::test]
    async fn test_api_key_is_passed_to_agent_process() {
        let runner = RecordingRunner::new(output(0, "ok", ""));
        let agent = ClaudeAgent::with_runner("claude", false, runner.clone())
            .with_api_key(Some("sk-test".to_string()));
        agent
            .run("x", Path::new("/tmp"), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(
            *runner.env.lock().unwrap(),
            vec![("ANTHROPIC_API_KEY".to_string(), "sk-test".to_string())]
        );

        let runner = RecordingRunner::new(output(0, "ok", ""));
        let agent = ClaudeAgent::with_runner("claude", false, runner.clone()).with_api_key(None);
        agent
            .run("x", Path::new("/tmp"), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(runner.env.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_skip_permissions_flag() {
        let runner = RecordingRunner::new(output(0, "ok", ""));
        let agent = ClaudeAgent::with_runner("claude", true, runner.clone());
        agent
            .run("x", Path::new("/tmp"), Duration::from_secs(1))
            .await
            .unwrap();
        let (_, args, _) = runner.seen.lock().unwrap().clone().unwrap();
        assert_eq!(args[0], "--dangerously-skip-permissions");
    }

    #[tokio::test]
    async fn test_failures_are_classified() {
        let agent = ClaudeAgent::with_runner(
            "claude",
            false,
            RecordingRunner::new(Err(RunError::Timeout(Duration::from_secs(120)))),
        );
        let err = agent
            .run("x", Path::new("/tmp"), Duration::from_secs(120))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Timeout { secs: 120 }));

        let agent = ClaudeAgent::with_runner("claude", false, RecordingRunner::new(output(2, "", "")));
        let err = agent
            .run("x", Path::new("/tmp"), Duration::from_secs(1))
            .await
            .unwrap_err();
        match err {
            AgentError::NonZeroExit { code, stderr } => {
                assert_eq!(code, Some(2));
                assert_eq!(stderr, "Unknown error");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let agent = ClaudeAgent::new("definitely-not-a-real-agent-xyz", false);
        let err = agent
            .run("x", &std::env::temp_dir(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Spawn { .. }));
        assert!(agent.version().await.is_none());
    }

    #[test]
    fn test_repository_prompt_includes_context() {
        let mut repo = Repository::new("api", "/srv/api");
        repo.description = "Billing service".into();
        let prompt = build_repository_prompt(&repo, "add a health endpoint");
        assert!(prompt.starts_with("You are working in the 'api' repository."));
        assert!(prompt.contains("Repository path: /srv/api"));
        assert!(prompt.contains("Repository description: Billing service"));
        assert!(prompt.ends_with("User request:\nadd a health endpoint"));

        let bare = build_repository_prompt(&Repository::new("web", "/srv/web"), "x");
        assert!(!bare.contains("Repository description"));
    }

    #[tokio::test]
    async fn test_run_in_repository_rejects_missing_tree() {
        let runner = RecordingRunner::new(output(0, "ok", ""));
        let agent = ClaudeAgent::with_runner("claude", false, runner.clone());
        let repo = Repository::new("gone", "/nonexistent/gone");
        let err = run_in_repository(&agent, &repo, "x", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidRepository { .. }));
        assert!(runner.seen.lock().unwrap().is_none());
    }
}
