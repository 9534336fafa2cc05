//! Classifies inbound text into a [`CommandIntent`].
//!
//! Phrase families are matched in a fixed order (switch, inline, list, info,
//! status); anything else is a plain coding request for the active repository.

use coderelay_common::CommandIntent;
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

static SWITCH_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:switch\s+to|use|go\s+to|work\s+on|change\s+to)\s+([A-Za-z0-9_-]+)$")
        .unwrap()
});

// "in api: add x", "for web fix y", "@cli: bump version"
static INLINE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^(?:(?:in|for|on)\s+|@)([A-Za-z0-9_-]+)(?::\s*|\s+)(.+)$").unwrap()
});

static LIST_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:(?:list|show)\s+(?:repos?|repositories)|what\s+repos?|my\s+repos?|repos?)$")
        .unwrap()
});

static INFO_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:info|show|describe|details?)\s+([A-Za-z0-9_-]+)$").unwrap()
});

static STATUS_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:repos?\s+status|status\s+all|all\s+status)$").unwrap()
});

/// Session-level commands handled before intent routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecialCommand {
    NewSession,
    Status,
    /// `FULL <id>`: fetch an archived response.
    Full { id: String },
}

impl SpecialCommand {
    pub fn parse(message: &str) -> Option<Self> {
        let trimmed = message.trim();
        let upper = trimmed.to_uppercase();
        match upper.as_str() {
            "NEW SESSION" => Some(SpecialCommand::NewSession),
            "STATUS" => Some(SpecialCommand::Status),
            _ if upper.starts_with("FULL ") => {
                let id = trimmed.get(5..).unwrap_or_default().trim();
                (!id.is_empty()).then(|| SpecialCommand::Full { id: id.to_string() })
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CommandRouter;

impl CommandRouter {
    pub fn new() -> Self {
        Self
    }

    pub fn route(&self, message: &str) -> CommandIntent {
        let message = message.trim();

        let intent = if let Some(caps) = SWITCH_REGEX.captures(message) {
            CommandIntent::SwitchRepository {
                repository: caps[1].to_string(),
            }
        } else if let Some(caps) = INLINE_REGEX.captures(message) {
            CommandIntent::InlineRepository {
                repository: caps[1].to_string(),
                payload: caps[2].trim().to_string(),
            }
        } else if LIST_REGEX.is_match(message) {
            CommandIntent::ListRepositories
        } else if let Some(caps) = INFO_REGEX.captures(message) {
            CommandIntent::RepositoryInfo {
                repository: caps[1].to_string(),
            }
        } else if STATUS_REGEX.is_match(message) {
            CommandIntent::RepositoryStatus
        } else {
            CommandIntent::PlainRequest {
                payload: message.to_string(),
            }
        };

        debug!(intent = intent.as_str(), repository = ?intent.repository(), "Routed message");
        intent
    }
}
