//! Per-user session state: durable records plus the active-repository tracker.

pub mod store;
pub mod tracker;

pub use store::{Exchange, SessionRecord, SessionStore, normalize_user_id};
pub use tracker::{ActiveRepoTracker, SessionStatus};
