//! Session inspection: `coderelay session`.

use anyhow::Result;
use coderelay::config::Config;
use coderelay::session::SessionStore;
use coderelay::ui::icons;
use console::style;

use super::super::SessionCommands;

const SHOWN_EXCHANGES: usize = 5;

pub fn cmd_session(config: &Config, command: SessionCommands) -> Result<()> {
    let session = &config.toml().session;
    let store = SessionStore::new(
        &config.sessions_dir,
        session.history_limit,
        session.response_excerpt_chars,
    );

    match command {
        SessionCommands::Show { user } => {
            let Some(record) = store.load(&user)? else {
                println!("No session for {}", user);
                return Ok(());
            };

            println!();
            println!("Session for {}", style(&record.user_id).bold());
            println!(
                "  Active repository: {}",
                record.active_repository.as_deref().unwrap_or("(none)")
            );
            println!(
                "  Current branch:    {}",
                record.current_branch.as_deref().unwrap_or("(none)")
            );
            println!("  Messages:          {}", record.message_count());
            println!(
                "  Updated:           {}",
                record.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
            if !record.branches.is_empty() {
                println!("  Branches:");
                for (repo, branch) in &record.branches {
                    println!("    {:<20} {}", repo, branch);
                }
            }

            let skip = record
                .conversation_history
                .len()
                .saturating_sub(SHOWN_EXCHANGES);
            if skip < record.conversation_history.len() {
                println!();
                println!("Recent messages:");
                for exchange in record.conversation_history.iter().skip(skip) {
                    println!(
                        "  [{}] {}{}",
                        exchange.timestamp.format("%m-%d %H:%M"),
                        exchange
                            .repository
                            .as_deref()
                            .map(|r| format!("{}: ", r))
                            .unwrap_or_default(),
                        exchange.prompt
                    );
                    println!("      {}", style(&exchange.response).dim());
                }
            }
            println!();
        }
        SessionCommands::Clear { user } => {
            if store.clear(&user)? {
                println!("{}Cleared session for {}", icons::CHECK, user);
            } else {
                println!("No session for {}", user);
            }
        }
    }

    Ok(())
}
