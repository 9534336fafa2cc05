//! File-backed configuration for coderelay.
//!
//! Read from `<data_dir>/coderelay.toml`. Every key is optional; missing
//! keys fall back to the defaults below. Environment variables override
//! selected keys, and CLI flags override both (see [`crate::config::Config`]).
//!
//! # Configuration File Format
//!
//! ```toml
//! [storage]
//! repositories_file = "repositories.json"
//! sessions_dir = "sessions"
//! responses_dir = "responses"
//!
//! [git]
//! branch_prefix = "sms"
//! remote = "origin"
//! push_timeout_secs = 30
//! push_max_attempts = 4
//! backoff_base_secs = 2
//!
//! [agent]
//! command = "claude"
//! timeout_secs = 120
//! skip_permissions = false
//! api_key = "sk-ant-..."
//!
//! [session]
//! history_limit = 20
//! response_excerpt_chars = 200
//!
//! [access]
//! whitelist = ["+15550001111"]
//! allow_all = false
//!
//! [summary]
//! max_length = 150
//! base_url = "https://relay.example.com"
//!
//! [logging]
//! json_file = true
//! filter = "coderelay=debug"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "coderelay.toml";

pub const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

const WHITELIST_ENV_VARS: [&str; 2] = ["WHITELISTED_USERS", "WHITELISTED_NUMBERS"];

/// Where durable records live, relative to the data directory unless absolute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSection {
    #[serde(default = "default_repositories_file")]
    pub repositories_file: PathBuf,
    #[serde(default = "default_sessions_dir")]
    pub sessions_dir: PathBuf,
    #[serde(default = "default_responses_dir")]
    pub responses_dir: PathBuf,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            repositories_file: default_repositories_file(),
            sessions_dir: default_sessions_dir(),
            responses_dir: default_responses_dir(),
        }
    }
}

fn default_repositories_file() -> PathBuf {
    PathBuf::from("repositories.json")
}

fn default_sessions_dir() -> PathBuf {
    PathBuf::from("sessions")
}

fn default_responses_dir() -> PathBuf {
    PathBuf::from("responses")
}

/// Branch naming and push retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitSection {
    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,
    #[serde(default = "default_remote")]
    pub remote: String,
    #[serde(default = "default_push_timeout_secs")]
    pub push_timeout_secs: u64,
    #[serde(default = "default_push_max_attempts")]
    pub push_max_attempts: u32,
    /// First backoff delay; each further retry doubles it.
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,
}

impl Default for GitSection {
    fn default() -> Self {
        Self {
            branch_prefix: default_branch_prefix(),
            remote: default_remote(),
            push_timeout_secs: default_push_timeout_secs(),
            push_max_attempts: default_push_max_attempts(),
            backoff_base_secs: default_backoff_base_secs(),
        }
    }
}

fn default_branch_prefix() -> String {
    "sms".to_string()
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_push_timeout_secs() -> u64 {
    30
}

fn default_push_max_attempts() -> u32 {
    4
}

fn default_backoff_base_secs() -> u64 {
    2
}

/// External coding agent invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSection {
    /// Agent CLI command (default: "claude", or `CLAUDE_CMD`)
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default = "default_agent_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub skip_permissions: bool,
    /// Passed to the agent as `ANTHROPIC_API_KEY` (default: inherited env)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            command: None,
            timeout_secs: default_agent_timeout_secs(),
            skip_permissions: false,
            api_key: None,
        }
    }
}

fn default_agent_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSection {
    /// Most recent exchanges kept per user
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_response_excerpt_chars")]
    pub response_excerpt_chars: usize,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            response_excerpt_chars: default_response_excerpt_chars(),
        }
    }
}

fn default_history_limit() -> usize {
    20
}

fn default_response_excerpt_chars() -> usize {
    200
}

/// Which user identifiers may talk to the service at all.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessSection {
    #[serde(default)]
    pub whitelist: Vec<String>,
    /// Accept every sender, whitelisted or not. Off by default, so an empty
    /// whitelist rejects everyone.
    #[serde(default)]
    pub allow_all: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarySection {
    #[serde(default = "default_summary_max_length")]
    pub max_length: usize,
    /// Prefix for links to archived full responses
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Default for SummarySection {
    fn default() -> Self {
        Self {
            max_length: default_summary_max_length(),
            base_url: None,
        }
    }
}

fn default_summary_max_length() -> usize {
    150
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Also write JSON lines to a daily-rotated file under `<data_dir>/logs`
    #[serde(default)]
    pub json_file: bool,
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    #[serde(default)]
    pub filter: Option<String>,
}

/// The complete coderelay.toml structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayToml {
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub git: GitSection,
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub access: AccessSection,
    #[serde(default)]
    pub summary: SummarySection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl RelayToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse coderelay.toml")
    }

    /// Load `<data_dir>/coderelay.toml`, or defaults if it does not exist.
    pub fn load_or_default(data_dir: &Path) -> Result<Self> {
        let config_path = data_dir.join(CONFIG_FILE_NAME);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize coderelay.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Agent command (file → `CLAUDE_CMD` → "claude").
    pub fn agent_command(&self) -> String {
        self.agent
            .command
            .clone()
            .or_else(|| std::env::var("CLAUDE_CMD").ok())
            .unwrap_or_else(|| "claude".to_string())
    }

    /// API key for the agent (file → `ANTHROPIC_API_KEY`). Empty means unset.
    pub fn api_key(&self) -> Option<String> {
        self.agent
            .api_key
            .clone()
            .or_else(|| std::env::var(API_KEY_ENV).ok())
            .filter(|key| !key.is_empty())
    }

    /// Copy safe to print: secrets are masked.
    pub fn redacted(&self) -> Self {
        let mut shown = self.clone();
        if shown.agent.api_key.is_some() {
            shown.agent.api_key = Some("<redacted>".to_string());
        }
        shown
    }

    /// `SKIP_PERMISSIONS` overrides the file setting.
    pub fn skip_permissions(&self) -> bool {
        if let Ok(env_val) = std::env::var("SKIP_PERMISSIONS") {
            return env_val != "false";
        }
        self.agent.skip_permissions
    }

    /// File whitelist plus the comma-separated ids in `WHITELISTED_USERS`
    /// and its alias `WHITELISTED_NUMBERS`.
    pub fn whitelist(&self) -> Vec<String> {
        let from_env: Vec<String> = WHITELIST_ENV_VARS
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .collect();
        merge_whitelist(&self.access.whitelist, &from_env)
    }

    /// Link prefix for full responses (file → `BASE_URL`).
    pub fn base_url(&self) -> Option<String> {
        self.summary
            .base_url
            .clone()
            .or_else(|| std::env::var("BASE_URL").ok())
            .filter(|url| !url.is_empty())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.git.branch_prefix.is_empty() {
            warnings.push("git.branch_prefix is empty; task branches need a prefix".to_string());
        } else if self.git.branch_prefix.chars().any(char::is_whitespace) {
            warnings.push(format!(
                "git.branch_prefix '{}' contains whitespace, which git rejects",
                self.git.branch_prefix
            ));
        }
        if self.git.push_max_attempts == 0 {
            warnings.push("git.push_max_attempts is 0; a single push attempt will be made".to_string());
        }
        if self.git.push_timeout_secs == 0 {
            warnings.push("git.push_timeout_secs is 0; every push will time out".to_string());
        }
        if self.agent.timeout_secs == 0 {
            warnings.push("agent.timeout_secs is 0; every agent call will time out".to_string());
        }
        if self.session.history_limit == 0 {
            warnings.push("session.history_limit is 0; no history will be kept".to_string());
        }

        warnings
    }
}

/// `configured` followed by the comma-separated ids of each `extra` list not
/// already present.
fn merge_whitelist(configured: &[String], extra: &[String]) -> Vec<String> {
    let mut users = configured.to_vec();
    for user in extra
        .iter()
        .flat_map(|list| list.split(','))
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        if !users.iter().any(|u| u == user) {
            users.push(user.to_string());
        }
    }
    users
}
