//! tracing subscriber setup for the `coderelay` binary.
//!
//! Human-readable output goes to stderr. When `[logging] json_file` is set,
//! JSON lines are also written to a daily-rotated file under
//! `<data_dir>/logs`.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::Config;

pub const DEFAULT_FILTER: &str = "coderelay=info";
const VERBOSE_FILTER: &str = "coderelay=debug";
const LOG_FILE_PREFIX: &str = "coderelay.jsonl";

#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    pub filter: Option<String>,
    pub verbose: bool,
    /// Directory for the rotated JSON log; `None` disables file logging.
    pub json_dir: Option<PathBuf>,
}

impl LoggingConfig {
    pub fn from_config(config: &Config) -> Self {
        let logging = &config.toml().logging;
        Self {
            filter: logging.filter.clone(),
            verbose: config.verbose,
            json_dir: logging.json_file.then(|| config.log_dir.clone()),
        }
    }

    /// Filter directive used when `RUST_LOG` is not set.
    fn directive(&self) -> &str {
        if self.verbose {
            VERBOSE_FILTER
        } else {
            self.filter.as_deref().unwrap_or(DEFAULT_FILTER)
        }
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::try_new(self.directive()).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
        })
    }
}

/// Install the global subscriber.
///
/// The returned guard flushes the JSON file writer on drop and must be held
/// for the life of the process.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    let (json_layer, guard) = match &config.json_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_target(true)
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(config.env_filter())
        .with(stderr_layer)
        .with(json_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}
