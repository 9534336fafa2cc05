//! Shared domain types for coderelay.
//!
//! Kept free of async and I/O-heavy dependencies so that both the service
//! and any external tooling (admin scripts, transports) can depend on it.

pub mod intent;
pub mod repository;

pub use intent::CommandIntent;
pub use repository::{AccessControl, Permission, PermissionParseError, Repository, is_working_tree};
