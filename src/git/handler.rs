use chrono::{DateTime, Local};
use coderelay_common::is_working_tree;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::GitSettings;
use super::classify::{FailureClass, classify_failure};
use super::runner::{CommandOutput, CommandRunner, RunError};
use crate::errors::GitError;

/// Budget for local git commands (status, branch, add, commit).
const LOCAL_TIMEOUT: Duration = Duration::from_secs(60);

/// Git operations bound to one working tree.
///
/// Each coding request drives it through branch → commit → push. Only push
/// retries; the caller holds the per-repository lock across the sequence.
pub struct GitHandler {
    path: PathBuf,
    settings: GitSettings,
    runner: Arc<dyn CommandRunner>,
}

impl GitHandler {
    pub fn new(path: impl Into<PathBuf>, settings: GitSettings, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            path: path.into(),
            settings,
            runner,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> &GitSettings {
        &self.settings
    }

    pub fn is_repo(&self) -> bool {
        is_working_tree(&self.path)
    }

    async fn git(&self, args: &[&str], timeout: Duration) -> Result<CommandOutput, RunError> {
        debug!(repo = %self.path.display(), ?args, "Running git");
        self.runner.run("git", args, &self.path, Some(timeout)).await
    }

    /// Map a failed local command to an error. Non-credential failures are
    /// fatal because branch and commit are never retried.
    fn local_failure(&self, operation: &str, output: &CommandOutput) -> GitError {
        let message = output.failure_message();
        match classify_failure(&message) {
            FailureClass::NotARepository => GitError::NotARepository {
                path: self.path.clone(),
            },
            FailureClass::Authentication => GitError::Authentication {
                operation: operation.to_string(),
                message,
            },
            FailureClass::Other => GitError::Fatal {
                operation: operation.to_string(),
                message,
            },
        }
    }

    fn run_failure(&self, operation: &str, err: RunError) -> GitError {
        match err {
            RunError::Timeout(limit) => GitError::Timeout {
                operation: operation.to_string(),
                secs: limit.as_secs(),
            },
            RunError::Spawn(e) => GitError::Fatal {
                operation: operation.to_string(),
                message: format!("could not run git: {}", e),
            },
            RunError::Io(e) => GitError::Transient {
                operation: operation.to_string(),
                message: e.to_string(),
            },
        }
    }

    async fn run_local(&self, operation: &str, args: &[&str]) -> Result<CommandOutput, GitError> {
        let output = self
            .git(args, LOCAL_TIMEOUT)
            .await
            .map_err(|e| self.run_failure(operation, e))?;
        if output.success() {
            Ok(output)
        } else {
            Err(self.local_failure(operation, &output))
        }
    }

    pub async fn current_branch(&self) -> Option<String> {
        match self.git(&["rev-parse", "--abbrev-ref", "HEAD"], LOCAL_TIMEOUT).await {
            Ok(output) if output.success() => {
                let branch = output.stdout.trim();
                (!branch.is_empty()).then(|| branch.to_string())
            }
            _ => None,
        }
    }

    /// Modified and untracked paths relative to the working tree.
    ///
    /// A failed status query yields an empty list, indistinguishable from a
    /// clean tree; the failure is only logged.
    pub async fn changed_files(&self) -> Vec<String> {
        match self
            .git(&["status", "--porcelain", "--untracked-files=all"], LOCAL_TIMEOUT)
            .await
        {
            Ok(output) if output.success() => parse_porcelain(&output.stdout),
            Ok(output) => {
                warn!(
                    repo = %self.path.display(),
                    error = %output.failure_message(),
                    "git status failed; treating as no changes"
                );
                Vec::new()
            }
            Err(e) => {
                warn!(repo = %self.path.display(), error = %e, "git status failed; treating as no changes");
                Vec::new()
            }
        }
    }

    pub async fn has_uncommitted_changes(&self) -> bool {
        !self.changed_files().await.is_empty()
    }

    /// Create and switch to `<prefix>/<YYYYMMDD_HHMMSS_ffffff>`.
    pub async fn create_branch(&self, prefix: &str) -> Result<String, GitError> {
        if !self.is_repo() {
            return Err(GitError::NotARepository {
                path: self.path.clone(),
            });
        }
        let branch = branch_name(prefix, Local::now());
        self.run_local("checkout", &["checkout", "-b", &branch]).await?;
        info!(repo = %self.path.display(), branch = %branch, "Created branch");
        Ok(branch)
    }

    /// Stage every change, then commit.
    pub async fn commit_all(&self, message: &str) -> Result<(), GitError> {
        if !self.is_repo() {
            return Err(GitError::NotARepository {
                path: self.path.clone(),
            });
        }
        self.run_local("add", &["add", "-A"]).await?;
        self.run_local("commit", &["commit", "-m", message]).await?;
        info!(repo = %self.path.display(), "Committed changes");
        Ok(())
    }

    /// Delay before retry number `attempt` (1-based): base, 2×base, 4×base, ...
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.settings.backoff_base * 2u32.pow(exponent)
    }

    pub async fn push(&self, branch: &str) -> Result<(), GitError> {
        self.push_with_attempts(branch, self.settings.push_max_attempts)
            .await
    }

    /// Push `branch` to the configured remote.
    ///
    /// Timeouts and other failures are retried with exponential backoff; a
    /// credentials failure aborts at once. The local commit is untouched
    /// whatever the outcome.
    pub async fn push_with_attempts(&self, branch: &str, max_attempts: u32) -> Result<(), GitError> {
        let attempts = max_attempts.max(1);
        let timeout = self.settings.push_timeout;
        let remote = self.settings.remote.as_str();
        let mut last = None;

        for attempt in 1..=attempts {
            let err = match self.git(&["push", "-u", remote, branch], timeout).await {
                Ok(output) if output.success() => {
                    info!(repo = %self.path.display(), branch = %branch, attempt, "Pushed branch");
                    return Ok(());
                }
                Ok(output) => {
                    let message = output.failure_message();
                    match classify_failure(&message) {
                        FailureClass::Authentication => {
                            error!(branch = %branch, error = %message, "Push rejected credentials");
                            return Err(GitError::Authentication {
                                operation: "push".to_string(),
                                message,
                            });
                        }
                        FailureClass::NotARepository => {
                            return Err(GitError::NotARepository {
                                path: self.path.clone(),
                            });
                        }
                        FailureClass::Other => GitError::Transient {
                            operation: "push".to_string(),
                            message,
                        },
                    }
                }
                Err(RunError::Spawn(e)) => {
                    return Err(GitError::Fatal {
                        operation: "push".to_string(),
                        message: format!("could not run git: {}", e),
                    });
                }
                Err(e) => self.run_failure("push", e),
            };

            if attempt < attempts {
                let delay = self.backoff_delay(attempt);
                warn!(
                    branch = %branch,
                    attempt,
                    delay_secs = delay.as_secs(),
                    error = %err,
                    "Push attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
            } else {
                error!(branch = %branch, attempts, error = %err, "Push failed");
            }
            last = Some(err);
        }

        Err(GitError::RetriesExhausted {
            attempts,
            last: Box::new(last.unwrap_or_else(|| GitError::Fatal {
                operation: "push".to_string(),
                message: "no push attempted".to_string(),
            })),
        })
    }

    /// Browsable URL of the configured remote, if any.
    pub async fn repo_url(&self) -> Option<String> {
        let remote = self.settings.remote.as_str();
        match self.git(&["remote", "get-url", remote], LOCAL_TIMEOUT).await {
            Ok(output) if output.success() => {
                let url = output.stdout.trim();
                (!url.is_empty()).then(|| normalize_remote_url(url))
            }
            _ => None,
        }
    }

    pub async fn branch_url(&self, branch: &str) -> Option<String> {
        self.repo_url()
            .await
            .map(|url| format!("{}/tree/{}", url, branch))
    }
}

pub fn branch_name(prefix: &str, now: DateTime<Local>) -> String {
    format!("{}/{}", prefix, now.format("%Y%m%d_%H%M%S_%6f"))
}

/// `git@host:owner/repo.git` and `ssh://git@host/owner/repo.git` become
/// `https://host/owner/repo`; a trailing `.git` is always dropped.
pub fn normalize_remote_url(url: &str) -> String {
    let url = url.trim();
    let https = if let Some(rest) = url.strip_prefix("ssh://") {
        let rest = rest.split_once('@').map_or(rest, |(_, host)| host);
        format!("https://{}", rest)
    } else if let Some((user_host, path)) = url.split_once(':')
        && !url.contains("://")
        && user_host.contains('@')
    {
        let host = user_host.split_once('@').map_or(user_host, |(_, h)| h);
        format!("https://{}/{}", host, path)
    } else {
        url.to_string()
    };
    https
        .strip_suffix(".git")
        .map(str::to_string)
        .unwrap_or(https)
}

/// Paths from `git status --porcelain` output. Renames report the new path.
fn parse_porcelain(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter(|line| line.len() > 3)
        .map(|line| {
            let path = &line[3..];
            let path = path.split_once(" -> ").map_or(path, |(_, new)| new);
            path.trim().trim_matches('"').to_string()
        })
        .filter(|path| !path.is_empty())
        .collect()
}
