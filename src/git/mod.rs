//! Git operations against registered working trees.
//!
//! - [`GitHandler`] runs status/branch/commit/push in one working tree, with
//!   retry and backoff on push only
//! - [`GitHandlerFactory`] caches handlers per repository and owns the
//!   per-repository locks
//! - [`CommandRunner`] is the process seam; tests substitute scripted output
//!
//! Every git invocation passes the repository path as its working directory.

pub mod classify;
pub mod factory;
pub mod handler;
pub mod runner;

use std::time::Duration;

pub use classify::{FailureClass, classify_failure};
pub use factory::GitHandlerFactory;
pub use handler::{GitHandler, branch_name, normalize_remote_url};
pub use runner::{CommandOutput, CommandRunner, ProcessRunner, RunError};

/// Branch naming and push policy shared by every handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitSettings {
    pub branch_prefix: String,
    pub remote: String,
    pub push_timeout: Duration,
    pub push_max_attempts: u32,
    pub backoff_base: Duration,
}

impl Default for GitSettings {
    fn default() -> Self {
        Self {
            branch_prefix: "sms".to_string(),
            remote: "origin".to_string(),
            push_timeout: Duration::from_secs(30),
            push_max_attempts: 4,
            backoff_base: Duration::from_secs(2),
        }
    }
}
