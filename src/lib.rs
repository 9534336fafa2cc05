pub mod agent;
pub mod config;
pub mod errors;
pub mod git;
pub mod logging;
pub mod orchestrator;
pub mod registry;
pub mod relay_config;
pub mod responses;
pub mod router;
pub mod session;
pub mod summary;
pub mod ui;

pub use coderelay_common::{AccessControl, CommandIntent, Permission, Repository, is_working_tree};
