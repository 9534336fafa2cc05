//! Repository administration: `coderelay repo`.

use anyhow::{Context, Result, bail};
use coderelay::config::Config;
use coderelay::git::GitHandlerFactory;
use coderelay::orchestrator::Orchestrator;
use coderelay::registry::{Registration, RepositoryRegistry};
use coderelay::ui::icons;
use coderelay::{Permission, is_working_tree};
use console::style;
use std::collections::BTreeSet;
use std::path::Path;

use super::super::RepoCommands;

pub async fn cmd_repo(config: &Config, command: RepoCommands) -> Result<()> {
    config.ensure_directories()?;
    let registry = RepositoryRegistry::open(&config.repositories_file)?;
    let git = GitHandlerFactory::with_process_runner(config.git_settings());

    match command {
        RepoCommands::List { user } => {
            let repositories = registry.list(user.as_deref())?;
            if repositories.is_empty() {
                println!("No repositories registered.");
                println!("Run 'coderelay repo register <name> <path>' to add one.");
                return Ok(());
            }

            let default = registry.default_name()?;
            println!();
            println!("{:<2} {:<20} {:<6} Path", "", "Name", "Valid");
            println!("{:<2} {:<20} {:<6} ----", "", "----", "-----");
            for repo in &repositories {
                let marker = if default.as_deref() == Some(repo.name.as_str()) {
                    "*"
                } else {
                    ""
                };
                let valid = if repo.is_valid() {
                    style("yes").green()
                } else {
                    style("no").red()
                };
                println!(
                    "{:<2} {:<20} {:<6} {}",
                    marker,
                    repo.name,
                    valid,
                    repo.path.display()
                );
                if !repo.description.is_empty() {
                    println!("{:<2} {:<20} {}", "", "", style(&repo.description).dim());
                }
            }
            println!();
            println!("{} repositories (* = default)", repositories.len());
        }
        RepoCommands::Register {
            name,
            path,
            description,
            remote,
            admin,
        } => {
            let path = absolute(&path)?;
            let remote = match remote {
                Some(url) => Some(url),
                None if is_working_tree(&path) => {
                    let detected = git.handler_for_path(&path).repo_url().await;
                    if detected.is_none() {
                        tracing::info!(path = %path.display(), "No remote detected");
                    }
                    detected
                }
                None => None,
            };

            let mut registration = Registration::new(&name, &path);
            if let Some(description) = description {
                registration = registration.description(description);
            }
            if let Some(url) = remote {
                registration = registration.remote_url(url);
            }
            if let Some(user) = admin {
                registration = registration.grant(user, BTreeSet::from([Permission::Admin]));
            }

            let repo = registry.register(registration)?;
            println!(
                "{}Registered '{}' at {}",
                icons::CHECK,
                repo.name,
                repo.path.display()
            );
            if let Some(url) = &repo.remote_url {
                println!("   Remote: {}", url);
            }
            if registry.default_name()?.as_deref() == Some(repo.name.as_str()) {
                println!("   {}Default repository", icons::STAR);
            }
        }
        RepoCommands::Unregister { name, force } => {
            if !registry.contains(&name)? {
                bail!("Repository '{}' not found", name);
            }
            if !force {
                let confirm = dialoguer::Confirm::new()
                    .with_prompt(format!("Unregister repository '{}'?", name))
                    .default(false)
                    .interact()
                    .unwrap_or(false);
                if !confirm {
                    println!("Cancelled.");
                    return Ok(());
                }
            }

            let orchestrator = Orchestrator::from_config(config)?;
            let removed = orchestrator.unregister_repository(&name)?;
            println!(
                "{}Unregistered '{}' ({} left on disk)",
                icons::CHECK,
                removed.name,
                removed.path.display()
            );
            if let Some(default) = orchestrator.registry().default_name()? {
                println!("   Default repository: {}", default);
            }
        }
        RepoCommands::Grant {
            repo,
            user,
            permissions,
        } => {
            let permissions = Permission::parse_list(&permissions)?;
            if permissions.is_empty() {
                bail!("At least one permission is required (read, write, admin)");
            }
            let summary = permissions
                .iter()
                .map(Permission::to_string)
                .collect::<Vec<_>>()
                .join(",");
            registry.grant(&repo, &user, permissions)?;
            println!("{}Granted {} on '{}' to {}", icons::CHECK, summary, repo, user);
        }
        RepoCommands::Revoke { repo, user } => {
            registry.revoke(&repo, &user)?;
            println!("{}Revoked access to '{}' from {}", icons::CHECK, repo, user);
        }
        RepoCommands::Info { name } => {
            let stats = registry.stats(&name, &git).await?;
            let repo = registry
                .peek(&name)?
                .with_context(|| format!("Repository '{}' not found", name))?;

            println!();
            println!("{}{}", icons::FOLDER, style(&stats.name).bold());
            println!("  Path:          {}", stats.path.display());
            if !repo.description.is_empty() {
                println!("  Description:   {}", repo.description);
            }
            println!(
                "  Valid:         {}",
                if stats.is_valid { "yes" } else { "no" }
            );
            println!(
                "  Branch:        {}{}",
                icons::BRANCH,
                stats.current_branch.as_deref().unwrap_or("unknown")
            );
            println!(
                "  Uncommitted:   {}",
                if stats.has_changes { "yes" } else { "no" }
            );
            println!(
                "  Remote:        {}",
                stats.remote_url.as_deref().unwrap_or("(none)")
            );
            println!(
                "  Last accessed: {}",
                stats.last_accessed.format("%Y-%m-%d %H:%M:%S UTC")
            );
            if !repo.access_control.is_empty() {
                println!("  Access:");
                for (user, permissions) in &repo.access_control {
                    let list = permissions
                        .iter()
                        .map(Permission::to_string)
                        .collect::<Vec<_>>()
                        .join(",");
                    println!("    {:<20} {}", user, list);
                }
            }
            println!();
        }
        RepoCommands::Discover {
            path,
            depth,
            auto_register,
        } => {
            let root = absolute(&path)?;
            let found = registry.discover(&root, depth);
            if found.is_empty() {
                println!("No git working trees found under {}", root.display());
                return Ok(());
            }

            println!("Found {} working tree(s) under {}:", found.len(), root.display());
            for tree in found {
                if let Some(existing) = registry.find_by_path(&tree)? {
                    println!("  {} (registered as '{}')", tree.display(), existing.name);
                    continue;
                }
                if !auto_register {
                    println!("  {}", tree.display());
                    continue;
                }

                let name = tree
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(sanitize_name)
                    .unwrap_or_default();
                let mut registration = Registration::new(&name, &tree);
                if let Some(url) = git.handler_for_path(&tree).repo_url().await {
                    registration = registration.remote_url(url);
                }
                match registry.register(registration) {
                    Ok(repo) => println!("  {}{} -> '{}'", icons::CHECK, tree.display(), repo.name),
                    Err(e) => println!("  {}{}: {}", icons::CROSS, tree.display(), e),
                }
            }
        }
        RepoCommands::SetDefault { name } => {
            registry.set_default(&name)?;
            println!("{}Default repository set to '{}'", icons::CHECK, name);
        }
    }

    Ok(())
}

fn absolute(path: &Path) -> Result<std::path::PathBuf> {
    if path.exists() {
        path.canonicalize()
            .with_context(|| format!("Failed to resolve {}", path.display()))
    } else if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()
            .context("Failed to get current directory")?
            .join(path))
    }
}

/// Directory name reduced to the characters a repository name may use.
fn sanitize_name(dir_name: &str) -> String {
    dir_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("my-api"), "my-api");
        assert_eq!(sanitize_name("web app.v2"), "web-app-v2");
    }
}
