use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use coderelay::config::{Config, DEFAULT_DATA_DIR};
use coderelay::logging::{self, LoggingConfig};

mod cmd;

#[derive(Parser)]
#[command(name = "coderelay")]
#[command(version, about = "Drive coding changes across registered repositories from short text commands")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Directory holding coderelay.toml, the registry, sessions and responses
    #[arg(long, global = true, env = "CODERELAY_DATA_DIR", default_value = DEFAULT_DATA_DIR)]
    pub data_dir: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage registered repositories
    Repo {
        #[command(subcommand)]
        command: RepoCommands,
    },
    /// Send one message as a user and print the reply
    Send {
        /// Sender id (phone number or handle)
        #[arg(short, long)]
        user: String,
        /// Message text
        message: Vec<String>,
    },
    /// Inspect or clear a user's session
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Check that the agent and registry are usable
    Health,
}

#[derive(Subcommand, Clone)]
pub enum RepoCommands {
    /// List registered repositories
    List {
        /// Only repositories this user can read
        #[arg(long)]
        user: Option<String>,
    },
    /// Register a git working tree under a name
    Register {
        name: String,
        path: PathBuf,
        #[arg(short, long)]
        description: Option<String>,
        /// Remote URL (detected from the working tree when omitted)
        #[arg(long)]
        remote: Option<String>,
        /// Grant admin access to this user
        #[arg(long)]
        admin: Option<String>,
    },
    /// Remove a repository from the registry (files are untouched)
    Unregister {
        name: String,
        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,
    },
    /// Set a user's permissions on a repository
    Grant {
        repo: String,
        user: String,
        /// Comma-separated: read, write, admin
        #[arg(short, long, default_value = "read,write")]
        permissions: String,
    },
    /// Remove a user's access to a repository
    Revoke { repo: String, user: String },
    /// Show registry entry and live git state
    Info { name: String },
    /// Find git working trees below a directory
    Discover {
        path: PathBuf,
        #[arg(long, default_value_t = coderelay::registry::DEFAULT_DISCOVERY_DEPTH)]
        depth: usize,
        /// Register every new working tree under its directory name
        #[arg(long)]
        auto_register: bool,
    },
    /// Make a repository the registry-wide default
    SetDefault { name: String },
}

#[derive(Subcommand, Clone)]
pub enum SessionCommands {
    /// Show a user's active repository and recent history
    Show {
        #[arg(short, long)]
        user: String,
    },
    /// Forget a user's session
    Clear {
        #[arg(short, long)]
        user: String,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default coderelay.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::new(cli.data_dir.clone(), cli.verbose)?;
    let _log_guard = logging::init(&LoggingConfig::from_config(&config))?;

    match &cli.command {
        Commands::Repo { command } => cmd::cmd_repo(&config, command.clone()).await?,
        Commands::Send { user, message } => cmd::cmd_send(&config, user, &message.join(" ")).await?,
        Commands::Session { command } => cmd::cmd_session(&config, command.clone())?,
        Commands::Config { command } => cmd::cmd_config(&config, command.clone())?,
        Commands::Health => cmd::cmd_health(&config).await?,
    }

    Ok(())
}
