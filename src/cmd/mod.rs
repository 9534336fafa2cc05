//! CLI command implementations.
//!
//! | Module     | Commands handled     |
//! |------------|----------------------|
//! | `repo`     | `Repo`               |
//! | `message`  | `Send`, `Health`     |
//! | `session`  | `Session`            |
//! | `config`   | `Config`             |

pub mod config;
pub mod message;
pub mod repo;
pub mod session;

pub use config::cmd_config;
pub use message::{cmd_health, cmd_send};
pub use repo::cmd_repo;
pub use session::cmd_session;
