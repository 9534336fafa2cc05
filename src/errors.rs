//! Typed error hierarchy for coderelay.
//!
//! One enum per subsystem:
//! - `RegistryError`: repository registration, lookup and access checks
//! - `GitError`: version-control operations run by `GitHandler`
//! - `AgentError`: the external coding agent call
//! - `SessionError`: active-repository tracking and session storage
//! - `RelayError`: message handling in the orchestrator
//!
//! Every enum maps onto the shared [`ErrorKind`] taxonomy via `kind()`.
//! `Display` strings are short enough to send back to a user as-is, except
//! for `GitError`/`AgentError`, which carry process output and are wrapped by
//! [`RelayError::user_message`].

use std::path::PathBuf;

use coderelay_common::Permission;
use thiserror::Error;

/// Classification shared by every subsystem error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidConfiguration,
    AccessDenied,
    Timeout,
    AuthenticationFailure,
    TransientFailure,
    Fatal,
}

impl ErrorKind {
    /// Whether the caller may reasonably try the same operation again.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Timeout | ErrorKind::TransientFailure)
    }
}

/// Errors from the repository registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Repository '{name}' not found")]
    NotFound { name: String },

    #[error("Repository name '{name}' already exists")]
    AlreadyExists { name: String },

    #[error("Repository name '{name}' is invalid (use letters, digits, '-' or '_')")]
    InvalidName { name: String },

    #[error("Repository path must be absolute: {}", .path.display())]
    PathNotAbsolute { path: PathBuf },

    #[error("Path does not exist: {}", .path.display())]
    PathMissing { path: PathBuf },

    #[error("Path is not a git repository: {}", .path.display())]
    NotAWorkingTree { path: PathBuf },

    #[error("Repository '{name}' is not valid or accessible")]
    Unavailable { name: String },

    #[error("No {permission} access to repository '{name}'")]
    AccessDenied {
        name: String,
        user: String,
        permission: Permission,
    },

    #[error("User {user} did not have access to repository '{name}'")]
    NoAccessRecorded { name: String, user: String },

    #[error("Failed to persist repository registry: {0:#}")]
    Storage(#[source] anyhow::Error),

    #[error("Repository registry lock poisoned")]
    LockPoisoned,
}

impl RegistryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::NotFound { .. } | RegistryError::NoAccessRecorded { .. } => {
                ErrorKind::NotFound
            }
            RegistryError::AlreadyExists { .. }
            | RegistryError::InvalidName { .. }
            | RegistryError::PathNotAbsolute { .. }
            | RegistryError::PathMissing { .. }
            | RegistryError::NotAWorkingTree { .. }
            | RegistryError::Unavailable { .. } => ErrorKind::InvalidConfiguration,
            RegistryError::AccessDenied { .. } => ErrorKind::AccessDenied,
            RegistryError::Storage(_) | RegistryError::LockPoisoned => ErrorKind::Fatal,
        }
    }
}

/// Errors from git operations against one working tree.
#[derive(Debug, Error)]
pub enum GitError {
    #[error("Not a git repository: {}", .path.display())]
    NotARepository { path: PathBuf },

    #[error("git {operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    #[error("Authentication failed during git {operation}: {message}")]
    Authentication { operation: String, message: String },

    #[error("git {operation} failed: {message}")]
    Transient { operation: String, message: String },

    #[error("git {operation} failed: {message}")]
    Fatal { operation: String, message: String },

    #[error("git push failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<GitError> },
}

impl GitError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GitError::NotARepository { .. } => ErrorKind::InvalidConfiguration,
            GitError::Timeout { .. } => ErrorKind::Timeout,
            GitError::Authentication { .. } => ErrorKind::AuthenticationFailure,
            GitError::Transient { .. } => ErrorKind::TransientFailure,
            GitError::Fatal { .. } => ErrorKind::Fatal,
            GitError::RetriesExhausted { last, .. } => last.kind(),
        }
    }
}

/// Errors from invoking the external coding agent.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Request timed out after {secs} seconds")]
    Timeout { secs: u64 },

    #[error("Agent exited with code {code:?}: {stderr}")]
    NonZeroExit { code: Option<i32>, stderr: String },

    #[error("Failed to start agent command '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Repository '{name}' is not valid or not accessible")]
    InvalidRepository { name: String },
}

impl AgentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::Timeout { .. } => ErrorKind::Timeout,
            AgentError::NonZeroExit { .. } => ErrorKind::TransientFailure,
            AgentError::Spawn { .. } => ErrorKind::Fatal,
            AgentError::InvalidRepository { .. } => ErrorKind::InvalidConfiguration,
        }
    }
}

/// Errors from the session store and active-repository tracker.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Failed to access session storage: {0:#}")]
    Storage(#[source] anyhow::Error),
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::Registry(e) => e.kind(),
            SessionError::Storage(_) => ErrorKind::Fatal,
        }
    }
}

/// Errors surfaced while handling one inbound message.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Sorry, you are not authorized to use this service.")]
    NotAuthorized { user: String },

    #[error("No repository selected. Send 'switch to <name>' or 'list repos'.")]
    NoRepositorySelected,

    #[error("Response {id} not found")]
    ResponseNotFound { id: String },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RelayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RelayError::NotAuthorized { .. } => ErrorKind::AccessDenied,
            RelayError::NoRepositorySelected | RelayError::ResponseNotFound { .. } => {
                ErrorKind::NotFound
            }
            RelayError::Registry(e) => e.kind(),
            RelayError::Session(e) => e.kind(),
            RelayError::Agent(e) => e.kind(),
            RelayError::Git(e) => e.kind(),
            RelayError::Join(_) | RelayError::Other(_) => ErrorKind::Fatal,
        }
    }

    /// Short, actionable text for the person who sent the message.
    ///
    /// Raw process output never reaches the user; it is logged instead.
    pub fn user_message(&self) -> String {
        match self {
            RelayError::Agent(AgentError::NonZeroExit { .. }) => {
                "Error: the coding agent could not complete the request.".to_string()
            }
            RelayError::Agent(AgentError::Spawn { .. }) => {
                "Error: the coding agent is not available on the server.".to_string()
            }
            RelayError::Agent(e) => format!("Error: {}", e),
            RelayError::Git(e) => match e.kind() {
                ErrorKind::Timeout => "Error: git timed out. Please try again.".to_string(),
                ErrorKind::AuthenticationFailure => {
                    "Error: the remote rejected our credentials.".to_string()
                }
                ErrorKind::InvalidConfiguration => {
                    "Error: the repository is no longer a git working tree.".to_string()
                }
                _ => "Error: a git operation failed.".to_string(),
            },
            RelayError::Registry(RegistryError::Storage(_))
            | RelayError::Registry(RegistryError::LockPoisoned)
            | RelayError::Session(SessionError::Storage(_))
            | RelayError::Join(_)
            | RelayError::Other(_) => {
                "An error occurred processing your request. Please try again.".to_string()
            }
            other => other.to_string(),
        }
    }
}
