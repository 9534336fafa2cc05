use serde::{Deserialize, Serialize};

/// What an inbound message asks the service to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandIntent {
    /// Make `repository` the user's active repository.
    SwitchRepository { repository: String },
    /// Run `payload` as a coding request against `repository` only.
    InlineRepository { repository: String, payload: String },
    ListRepositories,
    RepositoryInfo { repository: String },
    RepositoryStatus,
    /// A coding request for the user's active repository.
    PlainRequest { payload: String },
}

impl CommandIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandIntent::SwitchRepository { .. } => "switch_repository",
            CommandIntent::InlineRepository { .. } => "inline_repository",
            CommandIntent::ListRepositories => "list_repositories",
            CommandIntent::RepositoryInfo { .. } => "repository_info",
            CommandIntent::RepositoryStatus => "repository_status",
            CommandIntent::PlainRequest { .. } => "plain_request",
        }
    }

    /// The repository named by the message, if any.
    pub fn repository(&self) -> Option<&str> {
        match self {
            CommandIntent::SwitchRepository { repository }
            | CommandIntent::InlineRepository { repository, .. }
            | CommandIntent::RepositoryInfo { repository } => Some(repository),
            _ => None,
        }
    }
}
