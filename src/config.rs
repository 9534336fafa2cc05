use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::git::GitSettings;
use crate::relay_config::{CONFIG_FILE_NAME, RelayToml};

/// Default data directory, relative to the current working directory.
pub const DEFAULT_DATA_DIR: &str = ".coderelay";

/// Runtime configuration for coderelay.
///
/// Bridges the file-level [`RelayToml`] with the resolved absolute paths and
/// CLI overrides the service needs at run time.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub repositories_file: PathBuf,
    pub sessions_dir: PathBuf,
    pub responses_dir: PathBuf,
    pub log_dir: PathBuf,
    pub verbose: bool,
    toml: RelayToml,
}

impl Config {
    /// Resolve configuration rooted at `data_dir`, creating the directory if
    /// needed and loading `coderelay.toml` from it when present.
    pub fn new(data_dir: PathBuf, verbose: bool) -> Result<Self> {
        std::fs::create_dir_all(&data_dir).with_context(|| {
            format!("Failed to create data directory {}", data_dir.display())
        })?;
        let data_dir = data_dir
            .canonicalize()
            .context("Failed to resolve data directory")?;
        let toml = RelayToml::load_or_default(&data_dir)?;
        Ok(Self::from_toml(data_dir, toml, verbose))
    }

    /// Build a config from an already-parsed file (used by tests and `config init`).
    pub fn from_toml(data_dir: PathBuf, toml: RelayToml, verbose: bool) -> Self {
        let resolve = |p: &Path| {
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                data_dir.join(p)
            }
        };
        Self {
            repositories_file: resolve(&toml.storage.repositories_file),
            sessions_dir: resolve(&toml.storage.sessions_dir),
            responses_dir: resolve(&toml.storage.responses_dir),
            log_dir: data_dir.join("logs"),
            data_dir,
            verbose,
            toml,
        }
    }

    pub fn toml(&self) -> &RelayToml {
        &self.toml
    }

    pub fn config_file(&self) -> PathBuf {
        self.data_dir.join(CONFIG_FILE_NAME)
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.sessions_dir)
            .context("Failed to create sessions directory")?;
        std::fs::create_dir_all(&self.responses_dir)
            .context("Failed to create responses directory")?;
        std::fs::create_dir_all(&self.log_dir).context("Failed to create log directory")?;
        if let Some(parent) = self.repositories_file.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create repository config directory")?;
        }
        Ok(())
    }

    pub fn git_settings(&self) -> GitSettings {
        let git = &self.toml.git;
        GitSettings {
            branch_prefix: git.branch_prefix.clone(),
            remote: git.remote.clone(),
            push_timeout: Duration::from_secs(git.push_timeout_secs),
            push_max_attempts: git.push_max_attempts,
            backoff_base: Duration::from_secs(git.backoff_base_secs),
        }
    }

    pub fn agent_command(&self) -> String {
        self.toml.agent_command()
    }

    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.toml.agent.timeout_secs)
    }

    pub fn agent_api_key(&self) -> Option<String> {
        self.toml.api_key()
    }

    pub fn skip_permissions(&self) -> bool {
        self.toml.skip_permissions()
    }

    pub fn whitelist(&self) -> Vec<String> {
        self.toml.whitelist()
    }

    /// Every sender is accepted only when `[access] allow_all` is set.
    pub fn allow_all_users(&self) -> bool {
        self.toml.access.allow_all
    }

    /// File warnings plus a warning when no sender can get in.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = self.toml.validate();
        if !self.allow_all_users() && self.whitelist().is_empty() {
            warnings.push(
                "access.whitelist is empty and access.allow_all is false; every sender will be rejected"
                    .to_string(),
            );
        }
        warnings
    }
}
