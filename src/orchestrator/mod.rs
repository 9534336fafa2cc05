//! Message handling: one inbound text in, one short reply out.
//!
//! `handle_message` is the only entry point a transport needs. It checks the
//! whitelist, answers session commands, routes everything else through the
//! [`CommandRouter`] and runs coding requests via [`request`].

pub mod request;

use anyhow::Result;
use coderelay_common::{CommandIntent, Permission, Repository};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub use request::{CodingOutcome, commit_message};

use crate::agent::{AgentRunner, ClaudeAgent};
use crate::config::Config;
use crate::errors::{ErrorKind, RegistryError, RelayError};
use crate::git::GitHandlerFactory;
use crate::registry::RepositoryRegistry;
use crate::responses::ResponseStore;
use crate::router::{CommandRouter, SpecialCommand};
use crate::session::{ActiveRepoTracker, SessionStore, normalize_user_id};
use crate::summary::{SummaryGenerator, split_long_message};

/// `FULL <id>` replies are cut to one chunk of this size.
pub const FULL_RESPONSE_CHUNK: usize = 1500;

pub const EMPTY_MESSAGE_REPLY: &str = "Please send a message with your coding request.";
pub const NEW_SESSION_REPLY: &str = "New session started! Previous conversation cleared.";

pub struct Orchestrator {
    registry: Arc<RepositoryRegistry>,
    tracker: Arc<ActiveRepoTracker>,
    git: Arc<GitHandlerFactory>,
    agent: Arc<dyn AgentRunner>,
    responses: ResponseStore,
    summary: SummaryGenerator,
    router: CommandRouter,
    whitelist: BTreeSet<String>,
    allow_all: bool,
    agent_timeout: Duration,
}

impl Orchestrator {
    /// Wire every component from `config`, using the configured agent command.
    pub fn from_config(config: &Config) -> Result<Self> {
        let agent = ClaudeAgent::from_config(config);
        Self::with_agent(config, Arc::new(agent))
    }

    pub fn with_agent(config: &Config, agent: Arc<dyn AgentRunner>) -> Result<Self> {
        config.ensure_directories()?;
        let registry = Arc::new(RepositoryRegistry::open(&config.repositories_file)?);
        let session = &config.toml().session;
        let store = Arc::new(SessionStore::new(
            &config.sessions_dir,
            session.history_limit,
            session.response_excerpt_chars,
        ));
        let tracker = Arc::new(ActiveRepoTracker::new(Arc::clone(&registry), store));
        let git = Arc::new(GitHandlerFactory::with_process_runner(config.git_settings()));
        let summary = SummaryGenerator::new(
            config.toml().summary.max_length,
            config.toml().base_url(),
        );

        let whitelist: BTreeSet<String> = config
            .whitelist()
            .iter()
            .map(|user| normalize_user_id(user))
            .collect();
        let allow_all = config.allow_all_users();
        if whitelist.is_empty() && !allow_all {
            warn!("Whitelist is empty and allow_all is off; every sender will be rejected");
        }

        Ok(Self {
            registry,
            tracker,
            git,
            agent,
            responses: ResponseStore::new(&config.responses_dir),
            summary,
            router: CommandRouter::new(),
            whitelist,
            allow_all,
            agent_timeout: config.agent_timeout(),
        })
    }

    pub fn registry(&self) -> &Arc<RepositoryRegistry> {
        &self.registry
    }

    pub fn tracker(&self) -> &Arc<ActiveRepoTracker> {
        &self.tracker
    }

    pub fn git(&self) -> &Arc<GitHandlerFactory> {
        &self.git
    }

    pub fn responses(&self) -> &ResponseStore {
        &self.responses
    }

    /// Whitelisted senders only, unless `[access] allow_all` is set. An empty
    /// whitelist admits nobody.
    pub fn is_authorized(&self, user: &str) -> bool {
        self.allow_all || self.whitelist.contains(&normalize_user_id(user))
    }

    /// Handle one inbound message and produce the reply text.
    pub async fn handle_message(&self, user: &str, text: &str) -> String {
        match self.dispatch(user, text).await {
            Ok(reply) => reply,
            Err(e) => {
                match e.kind() {
                    ErrorKind::Fatal => error!(user = %user, error = %e, "Request failed"),
                    _ => warn!(user = %user, error = %e, "Request rejected"),
                }
                e.user_message()
            }
        }
    }

    async fn dispatch(&self, user: &str, text: &str) -> Result<String, RelayError> {
        if !self.is_authorized(user) {
            return Err(RelayError::NotAuthorized {
                user: user.to_string(),
            });
        }
        let text = text.trim();
        if text.is_empty() {
            return Ok(EMPTY_MESSAGE_REPLY.to_string());
        }
        if let Some(command) = SpecialCommand::parse(text) {
            return self.special(user, command);
        }

        match self.router.route(text) {
            CommandIntent::SwitchRepository { repository } => self.switch(user, &repository),
            CommandIntent::InlineRepository {
                repository,
                payload,
            } => Ok(self
                .run_coding_request(user, &repository, &payload)
                .await?
                .summary),
            CommandIntent::ListRepositories => self.list(user),
            CommandIntent::RepositoryInfo { repository } => self.info(user, &repository).await,
            CommandIntent::RepositoryStatus => self.repository_status(user).await,
            CommandIntent::PlainRequest { payload } => {
                let repository = self
                    .tracker
                    .active_name(user)?
                    .ok_or(RelayError::NoRepositorySelected)?;
                Ok(self
                    .run_coding_request(user, &repository, &payload)
                    .await?
                    .summary)
            }
        }
    }

    fn special(&self, user: &str, command: SpecialCommand) -> Result<String, RelayError> {
        match command {
            SpecialCommand::NewSession => {
                self.tracker.clear(user)?;
                Ok(NEW_SESSION_REPLY.to_string())
            }
            SpecialCommand::Status => {
                let status = self.tracker.status(user)?;
                let summary = self.summary.status_summary(
                    status.current_branch.as_deref(),
                    status.message_count > 0,
                    status.message_count,
                );
                Ok(match status.active_repository {
                    Some(repo) => format!("Repo: {}. {}", repo, summary),
                    None => summary,
                })
            }
            SpecialCommand::Full { id } => {
                let stored = self
                    .responses
                    .get(&id)?
                    .filter(|stored| stored.user_id == normalize_user_id(user))
                    .ok_or_else(|| RelayError::ResponseNotFound { id: id.clone() })?;
                debug!(user = %user, id = %id, "Serving archived response");
                Ok(split_long_message(&stored.response, FULL_RESPONSE_CHUNK)
                    .into_iter()
                    .next()
                    .unwrap_or_default())
            }
        }
    }

    fn switch(&self, user: &str, repository: &str) -> Result<String, RelayError> {
        match self.tracker.set_active(user, repository) {
            Ok(reply) => Ok(reply),
            Err(crate::errors::SessionError::Registry(RegistryError::NotFound { name })) => {
                let available = self.names(&self.tracker.list_accessible(user)?);
                if available.is_empty() {
                    Ok(format!("Repository '{}' not found", name))
                } else {
                    Ok(format!(
                        "Repository '{}' not found. Available: {}",
                        name,
                        available.join(", ")
                    ))
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    fn names(&self, repositories: &[Repository]) -> Vec<String> {
        repositories.iter().map(|repo| repo.name.clone()).collect()
    }

    fn list(&self, user: &str) -> Result<String, RelayError> {
        let repositories = self.tracker.list_accessible(user)?;
        if repositories.is_empty() {
            return Ok("No repositories available.".to_string());
        }
        let active = self.tracker.active_name(user)?;
        let entries: Vec<String> = repositories
            .iter()
            .map(|repo| {
                if active.as_deref() == Some(repo.name.as_str()) {
                    format!("{} (active)", repo.name)
                } else {
                    repo.name.clone()
                }
            })
            .collect();
        Ok(format!("Repositories: {}", entries.join(", ")))
    }

    async fn info(&self, user: &str, repository: &str) -> Result<String, RelayError> {
        let repo = self
            .registry
            .validate_access(user, repository, Permission::Read)?;
        let stats = self.registry.stats(&repo.name, &self.git).await?;

        let mut lines = vec![format!("{}: {}", stats.name, stats.path.display())];
        if !repo.description.is_empty() {
            lines.push(repo.description.clone());
        }
        lines.push(format!(
            "Branch: {}",
            stats.current_branch.as_deref().unwrap_or("unknown")
        ));
        lines.push(format!(
            "Changes: {}",
            if stats.has_changes { "yes" } else { "no" }
        ));
        if let Some(url) = &stats.remote_url {
            lines.push(format!("Remote: {}", url));
        }
        Ok(lines.join("\n"))
    }

    async fn repository_status(&self, user: &str) -> Result<String, RelayError> {
        let repositories = self.tracker.list_accessible(user)?;
        if repositories.is_empty() {
            return Ok("No repositories available.".to_string());
        }
        let mut lines = Vec::with_capacity(repositories.len());
        for repo in &repositories {
            let stats = self.registry.stats(&repo.name, &self.git).await?;
            lines.push(if !stats.is_valid {
                format!("{}: unavailable", stats.name)
            } else {
                format!(
                    "{}: {}{}",
                    stats.name,
                    stats.current_branch.as_deref().unwrap_or("unknown"),
                    if stats.has_changes { " (dirty)" } else { "" }
                )
            });
        }
        Ok(lines.join("\n"))
    }

    /// Remove `name` from the registry along with every cached reference to it.
    pub fn unregister_repository(&self, name: &str) -> Result<Repository, RelayError> {
        let removed = self.registry.unregister(name)?;
        self.git.invalidate(name);
        let users = self.tracker.forget_repository(name);
        info!(repository = %name, users, "Unregistered repository");
        Ok(removed)
    }

    pub fn agent_timeout(&self) -> Duration {
        self.agent_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AgentError;
    use crate::registry::Registration;
    use crate::relay_config::RelayToml;
    use async_trait::async_trait;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use tempfile::{TempDir, tempdir};

    /// Writes `file` into the working directory (when set) and replies.
    pub(super) struct ScriptedAgent {
        pub file: Option<&'static str>,
        pub reply: &'static str,
        pub prompts: Mutex<Vec<String>>,
    }

    impl ScriptedAgent {
        pub fn new(file: Option<&'static str>, reply: &'static str) -> Arc<Self> {
            Arc::new(Self {
                file,
                reply,
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl AgentRunner for ScriptedAgent {
        async fn run(
            &self,
            prompt: &str,
            working_dir: &Path,
            _timeout: Duration,
        ) -> Result<String, AgentError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            if let Some(file) = self.file {
                fs::write(working_dir.join(file), "generated\n").unwrap();
            }
            Ok(self.reply.to_string())
        }
    }

    pub(super) struct Fixture {
        pub dir: TempDir,
        pub orchestrator: Orchestrator,
    }

    impl Fixture {
        /// An empty `whitelist` opens the service to every sender.
        pub fn new(agent: Arc<dyn AgentRunner>, whitelist: &[&str]) -> Self {
            let dir = tempdir().unwrap();
            let mut toml = RelayToml::default();
            toml.git.push_max_attempts = 1;
            toml.git.backoff_base_secs = 0;
            toml.access.whitelist = whitelist.iter().map(|u| u.to_string()).collect();
            toml.access.allow_all = whitelist.is_empty();
            let config = Config::from_toml(dir.path().join("data"), toml, false);
            let orchestrator = Orchestrator::with_agent(&config, agent).unwrap();
            Self { dir, orchestrator }
        }

        /// Create a committed working tree named `name` and register it.
        pub fn add_repo(&self, name: &str, users: &[(&str, &str)]) -> PathBuf {
            let path = self.dir.path().join("repos").join(name);
            fs::create_dir_all(&path).unwrap();
            let repo = git2::Repository::init(&path).unwrap();
            let mut config = repo.config().unwrap();
            config.set_str("user.name", "test").unwrap();
            config.set_str("user.email", "test@test.com").unwrap();
            drop(config);

            fs::write(path.join("README.md"), "hello\n").unwrap();
            let mut index = repo.index().unwrap();
            index.add_path(Path::new("README.md")).unwrap();
            index.write().unwrap();
            let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
            let sig = repo.signature().unwrap();
            repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[])
                .unwrap();

            let mut registration = Registration::new(name, &path);
            for (user, perms) in users {
                registration = registration.grant(*user, Permission::parse_list(perms).unwrap());
            }
            self.orchestrator.registry().register(registration).unwrap();
            path
        }
    }

    fn quiet_agent() -> Arc<ScriptedAgent> {
        ScriptedAgent::new(None, "The router lives in the routes module")
    }

    #[tokio::test]
    async fn test_whitelist_rejects_unknown_users() {
        let fx = Fixture::new(quiet_agent(), &["+15550001111"]);
        let reply = fx.orchestrator.handle_message("+15559999999", "list repos").await;
        assert_eq!(reply, "Sorry, you are not authorized to use this service.");

        let reply = fx
            .orchestrator
            .handle_message("whatsapp:+15550001111", "list repos")
            .await;
        assert_eq!(reply, "No repositories available.");
    }

    #[tokio::test]
    async fn test_empty_whitelist_rejects_everyone() {
        let dir = tempdir().unwrap();
        let config = Config::from_toml(dir.path().join("data"), RelayToml::default(), false);
        let orchestrator = Orchestrator::with_agent(&config, quiet_agent()).unwrap();

        assert!(!orchestrator.is_authorized("+19998887777"));
        let reply = orchestrator.handle_message("+19998887777", "list repos").await;
        assert_eq!(reply, "Sorry, you are not authorized to use this service.");
    }

    #[tokio::test]
    async fn test_allow_all_admits_unlisted_senders() {
        let dir = tempdir().unwrap();
        let mut toml = RelayToml::default();
        toml.access.allow_all = true;
        let config = Config::from_toml(dir.path().join("data"), toml, false);
        let orchestrator = Orchestrator::with_agent(&config, quiet_agent()).unwrap();

        let reply = orchestrator.handle_message("+19998887777", "list repos").await;
        assert_eq!(reply, "No repositories available.");
    }

    #[tokio::test]
    async fn test_empty_message() {
        let fx = Fixture::new(quiet_agent(), &[]);
        assert_eq!(fx.orchestrator.handle_message("u", "   ").await, EMPTY_MESSAGE_REPLY);
    }

    #[tokio::test]
    async fn test_plain_request_without_repository() {
        let fx = Fixture::new(quiet_agent(), &[]);
        let reply = fx.orchestrator.handle_message("u", "add a README").await;
        assert_eq!(
            reply,
            "No repository selected. Send 'switch to <name>' or 'list repos'."
        );
    }

    #[tokio::test]
    async fn test_switch_and_list_marks_active() {
        let fx = Fixture::new(quiet_agent(), &[]);
        fx.add_repo("api", &[("u", "read,write")]);
        fx.add_repo("web", &[("u", "read")]);
        fx.add_repo("secret", &[("other", "admin")]);

        let orch = &fx.orchestrator;
        assert_eq!(orch.handle_message("u", "switch to web").await, "Switched to web");
        assert_eq!(
            orch.handle_message("u", "switch to api").await,
            "Switched to api (was: web)"
        );
        orch.handle_message("u", "work on web").await;
        assert_eq!(
            orch.handle_message("u", "list repos").await,
            "Repositories: api, web (active)"
        );
        assert_eq!(
            orch.handle_message("u", "use nope").await,
            "Repository 'nope' not found. Available: api, web"
        );
        assert_eq!(
            orch.handle_message("u", "use secret").await,
            "No read access to repository 'secret'"
        );
    }

    #[tokio::test]
    async fn test_info_and_status_intents() {
        let fx = Fixture::new(quiet_agent(), &[]);
        let path = fx.add_repo("api", &[("u", "read")]);
        fs::write(path.join("dirty.txt"), "x").unwrap();

        let info = fx.orchestrator.handle_message("u", "info api").await;
        assert!(info.starts_with("api: "), "{info}");
        assert!(info.contains("Changes: yes"), "{info}");

        let status = fx.orchestrator.handle_message("u", "repos status").await;
        assert!(status.starts_with("api: "), "{status}");
        assert!(status.ends_with("(dirty)"), "{status}");
    }

    #[tokio::test]
    async fn test_read_only_user_cannot_request_changes() {
        let agent = quiet_agent();
        let fx = Fixture::new(agent.clone(), &[]);
        fx.add_repo("api", &[("u", "read")]);

        let reply = fx.orchestrator.handle_message("u", "in api: add tests").await;
        assert_eq!(reply, "No write access to repository 'api'");
        assert!(agent.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_new_session_and_status() {
        let fx = Fixture::new(quiet_agent(), &[]);
        fx.add_repo("api", &[("u", "write")]);
        let orch = &fx.orchestrator;

        orch.handle_message("u", "explain the router").await;
        let status = orch.handle_message("u", "STATUS").await;
        assert_eq!(status, "Repo: api. Session active (1 msgs).");

        assert_eq!(orch.handle_message("u", "new session").await, NEW_SESSION_REPLY);
        assert_eq!(orch.handle_message("u", "status").await, "No active session.");
    }

    #[tokio::test]
    async fn test_full_returns_archived_response_to_its_owner() {
        let fx = Fixture::new(quiet_agent(), &[]);
        fx.add_repo("api", &[("u", "write"), ("other", "write")]);
        let orch = &fx.orchestrator;

        let outcome = orch.run_coding_request("u", "api", "explain").await.unwrap();
        let full = orch
            .handle_message("u", &format!("FULL {}", outcome.response_id))
            .await;
        assert_eq!(full, "The router lives in the routes module");

        let other = orch
            .handle_message("other", &format!("FULL {}", outcome.response_id))
            .await;
        assert_eq!(other, format!("Response {} not found", outcome.response_id));
    }

    #[tokio::test]
    async fn test_unregister_drops_cached_pointers() {
        let fx = Fixture::new(quiet_agent(), &[]);
        fx.add_repo("api", &[("u", "read")]);
        fx.add_repo("web", &[("u", "read")]);
        let orch = &fx.orchestrator;

        orch.handle_message("u", "switch to web").await;
        orch.unregister_repository("web").unwrap();
        assert_eq!(orch.tracker().active_name("u").unwrap().as_deref(), Some("api"));
        assert!(matches!(
            orch.unregister_repository("web"),
            Err(RelayError::Registry(RegistryError::NotFound { .. }))
        ));
    }
}
