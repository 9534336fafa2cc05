//! The coding-request pipeline: agent call, then branch, commit and push.

use coderelay_common::Permission;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use super::Orchestrator;
use crate::agent::run_in_repository;
use crate::errors::RelayError;
use crate::responses::NewResponse;
use crate::summary::CodingReport;

const COMMIT_SUBJECT_CHARS: usize = 50;

/// Result of one coding request.
#[derive(Debug, Clone, Serialize)]
pub struct CodingOutcome {
    pub repository: String,
    /// Task branch holding the commit; `None` when the agent changed nothing.
    pub branch: Option<String>,
    pub pushed: bool,
    pub files_changed: Vec<String>,
    pub response_id: String,
    pub summary: String,
}

impl CodingOutcome {
    /// Branch as shown to the user, marked when the push did not complete.
    pub fn branch_label(&self) -> Option<String> {
        branch_label(self.branch.as_deref(), self.pushed)
    }
}

fn branch_label(branch: Option<&str>, pushed: bool) -> Option<String> {
    branch.map(|branch| {
        if pushed {
            branch.to_string()
        } else {
            format!("{} (push failed)", branch)
        }
    })
}

/// `SMS request: <first 50 characters of the request>`.
pub fn commit_message(request: &str) -> String {
    let subject: String = request.chars().take(COMMIT_SUBJECT_CHARS).collect();
    format!("SMS request: {}", subject)
}

impl Orchestrator {
    /// Run `payload` against `repository` on behalf of `user`.
    ///
    /// The repository's lock is held from the agent call until the push
    /// finishes, so requests against one working tree run one at a time.
    /// A failed push keeps the local commit.
    pub async fn run_coding_request(
        &self,
        user: &str,
        repository: &str,
        payload: &str,
    ) -> Result<CodingOutcome, RelayError> {
        let repo = self
            .registry
            .validate_access(user, repository, Permission::Write)?;
        info!(user = %user, repository = %repo.name, "Running coding request");

        // Held from the agent call through the push: the agent edits the
        // shared working tree and `commit_all` stages everything in it.
        let lock = self.git.lock_for(&repo);
        let _guard = lock.lock().await;

        let agent = Arc::clone(&self.agent);
        let task_repo = repo.clone();
        let request = payload.to_string();
        let timeout = self.agent_timeout;
        let response = tokio::spawn(async move {
            run_in_repository(agent.as_ref(), &task_repo, &request, timeout).await
        })
        .await??;

        let handler = self.git.get_handler(&repo);
        let files_changed = if handler.is_repo() {
            handler.changed_files().await
        } else {
            Vec::new()
        };

        let (branch, pushed) = if files_changed.is_empty() {
            (None, false)
        } else {
            let branch = handler
                .create_branch(&handler.settings().branch_prefix)
                .await?;
            handler.commit_all(&commit_message(payload)).await?;
            let pushed = match handler.push(&branch).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(repository = %repo.name, branch = %branch, error = %e, "Push failed, keeping local commit");
                    false
                }
            };
            (Some(branch), pushed)
        };

        let label = branch_label(branch.as_deref(), pushed);
        let response_id = self.responses.save(NewResponse {
            user,
            prompt: payload,
            response: &response,
            repository: Some(&repo.name),
            branch: label.as_deref(),
            files_changed: &files_changed,
        })?;

        self.tracker.store().record_exchange(
            user,
            payload,
            &response,
            Some(&repo.name),
            branch.as_deref(),
        )?;
        self.tracker.record_successful_request(user, &repo.name)?;

        let summary = self.summary.coding_summary(&CodingReport {
            repository: &repo.name,
            response: &response,
            branch: label.as_deref(),
            files_changed: files_changed.len(),
            response_id: Some(&response_id),
        });
        info!(
            repository = %repo.name,
            branch = ?branch,
            pushed,
            files = files_changed.len(),
            "Coding request finished"
        );

        Ok(CodingOutcome {
            repository: repo.name,
            branch,
            pushed,
            files_changed,
            response_id,
            summary,
        })
    }
}
