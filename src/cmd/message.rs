//! Local message driver and health check: `coderelay send`, `coderelay health`.

use anyhow::Result;
use coderelay::agent::ClaudeAgent;
use coderelay::config::Config;
use coderelay::orchestrator::Orchestrator;
use coderelay::summary::{DEFAULT_CHUNK_LENGTH, split_long_message};
use coderelay::ui::icons;

/// Drive one message through the orchestrator and print the reply the
/// sender would receive, split the way a text channel would deliver it.
pub async fn cmd_send(config: &Config, user: &str, message: &str) -> Result<()> {
    let orchestrator = Orchestrator::from_config(config)?;
    let reply = orchestrator.handle_message(user, message).await;
    for chunk in split_long_message(&reply, DEFAULT_CHUNK_LENGTH) {
        println!("{}", chunk);
    }
    Ok(())
}

pub async fn cmd_health(config: &Config) -> Result<()> {
    let orchestrator = Orchestrator::from_config(config)?;
    let registry = orchestrator.registry();
    let mut healthy = true;

    let agent = ClaudeAgent::from_config(config);
    match agent.version().await {
        Some(version) => println!("{}Agent: {} ({})", icons::CHECK, agent.command(), version),
        None => {
            healthy = false;
            println!("{}Agent: '{}' is not available", icons::CROSS, agent.command());
        }
    }

    let repositories = registry.list(None)?;
    let invalid: Vec<_> = repositories
        .iter()
        .filter(|repo| !repo.is_valid())
        .map(|repo| repo.name.as_str())
        .collect();
    if invalid.is_empty() {
        println!("{}Repositories: {} registered", icons::CHECK, repositories.len());
    } else {
        healthy = false;
        println!(
            "{}Repositories: {} registered, invalid: {}",
            icons::CROSS,
            repositories.len(),
            invalid.join(", ")
        );
    }
    match registry.default_name()? {
        Some(name) => println!("   Default repository: {}", name),
        None => println!("   {}No default repository", icons::WARN),
    }

    for warning in config.validate() {
        println!("{}{}", icons::WARN, warning);
    }

    if healthy {
        println!("Status: healthy");
    } else {
        println!("Status: degraded");
    }
    Ok(())
}
