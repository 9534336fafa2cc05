//! Configuration view and validation commands: `coderelay config`.

use anyhow::{Context, Result};
use coderelay::config::Config;
use coderelay::relay_config::RelayToml;
use coderelay::ui::icons;

use super::super::ConfigCommands;

pub fn cmd_config(config: &Config, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = config.config_file();

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("coderelay Configuration");
            println!("=======================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No coderelay.toml found at {}", config_path.display());
                println!("Using default configuration:");
            }
            println!();
            let rendered =
                toml::to_string_pretty(&config.toml().redacted()).context("Failed to render configuration")?;
            for line in rendered.lines() {
                println!("  {}", line);
            }
            println!();

            println!("Effective values (with env/CLI overrides):");
            println!("  data_dir = \"{}\"", config.data_dir.display());
            println!("  repositories_file = \"{}\"", config.repositories_file.display());
            println!("  sessions_dir = \"{}\"", config.sessions_dir.display());
            println!("  responses_dir = \"{}\"", config.responses_dir.display());
            println!("  agent_command = \"{}\"", config.agent_command());
            println!("  skip_permissions = {}", config.skip_permissions());
            println!(
                "  api_key = {}",
                if config.agent_api_key().is_some() { "(set)" } else { "(inherited)" }
            );
            let whitelist = config.whitelist();
            if config.allow_all_users() {
                println!("  whitelist = (everyone)");
            } else if whitelist.is_empty() {
                println!("  whitelist = (nobody)");
            } else {
                println!("  whitelist = {}", whitelist.join(", "));
            }
            if let Some(url) = config.toml().base_url() {
                println!("  base_url = \"{}\"", url);
            }
            println!();

            if !config_path.exists() {
                println!("Run 'coderelay config init' to create a coderelay.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No coderelay.toml found. Using defaults (valid).");
                return Ok(());
            }

            let warnings = config.validate();
            if warnings.is_empty() {
                println!("{}Configuration is valid.", icons::CHECK);
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  {}{}", icons::WARN, warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("coderelay.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            RelayToml::default().save(&config_path)?;

            println!("{}Created coderelay.toml at {}", icons::CHECK, config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [git] branch_prefix, remote, push retry settings");
            println!("  - [agent] command, timeout_secs, skip_permissions");
            println!("  - [access] whitelist, allow_all");
            println!();
        }
    }

    Ok(())
}
