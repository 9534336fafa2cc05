use coderelay_common::{Permission, Repository};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use super::store::{SessionStore, normalize_user_id};
use crate::errors::{RegistryError, SessionError};
use crate::registry::RepositoryRegistry;

/// What `STATUS` reports for one user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub active_repository: Option<String>,
    pub current_branch: Option<String>,
    pub message_count: usize,
}

/// Per-user active repository: in-memory cache over the durable session
/// record, falling back to the registry default.
///
/// The durable record is written before the cache is updated. The cache is
/// keyed by the normalized user id, like the durable record. Names that no
/// longer resolve in the registry, or that the user can no longer read, are
/// dropped silently and resolution falls through to the default.
pub struct ActiveRepoTracker {
    registry: Arc<RepositoryRegistry>,
    store: Arc<SessionStore>,
    active: DashMap<String, String>,
    user_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ActiveRepoTracker {
    pub fn new(registry: Arc<RepositoryRegistry>, store: Arc<SessionStore>) -> Self {
        Self {
            registry,
            store,
            active: DashMap::new(),
            user_locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    fn user_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let entry = self
            .user_locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())));
        Arc::clone(entry.value())
    }

    /// Run `f` with `user`'s cache key while holding that user's lock. Other
    /// users are not blocked.
    fn with_user<T>(
        &self,
        user: &str,
        f: impl FnOnce(&str) -> Result<T, SessionError>,
    ) -> Result<T, SessionError> {
        let key = normalize_user_id(user);
        let lock = self.user_lock(&key);
        let _guard = lock
            .lock()
            .map_err(|_| SessionError::Registry(RegistryError::LockPoisoned))?;
        f(&key)
    }

    /// Active name from cache or durable record, without default fallback.
    fn remembered(&self, user: &str, key: &str) -> Result<Option<String>, SessionError> {
        if let Some(name) = self.active.get(key) {
            return Ok(Some(name.clone()));
        }
        Ok(self
            .store
            .load(user)?
            .and_then(|record| record.active_repository))
    }

    fn activate(&self, user: &str, key: &str, name: &str) -> Result<(), SessionError> {
        self.store.set_active(user, Some(name))?;
        self.active.insert(key.to_string(), name.to_string());
        Ok(())
    }

    /// `name` if it is still registered and `user` can still read it.
    fn readable(&self, user: &str, name: &str) -> Result<Option<Repository>, SessionError> {
        Ok(self
            .registry
            .get(name)?
            .filter(|repo| repo.has_access(user, Permission::Read)))
    }

    pub fn get_active(&self, user: &str) -> Result<Option<Repository>, SessionError> {
        self.with_user(user, |key| self.resolve_active(user, key))
    }

    fn resolve_active(&self, user: &str, key: &str) -> Result<Option<Repository>, SessionError> {
        let cached = self.active.get(key).map(|name| name.clone());
        if let Some(name) = cached {
            if let Some(repo) = self.readable(user, &name)? {
                return Ok(Some(repo));
            }
            debug!(user = %user, repository = %name, "Dropping stale cached repository");
            self.active.remove(key);
        }

        let stored = self
            .store
            .load(user)?
            .and_then(|record| record.active_repository);
        if let Some(name) = stored {
            if let Some(repo) = self.readable(user, &name)? {
                self.active.insert(key.to_string(), name);
                return Ok(Some(repo));
            }
            debug!(user = %user, repository = %name, "Dropping stale stored repository");
            self.store.set_active(user, None)?;
        }

        match self.registry.default_repository()? {
            Some(repo) if repo.has_access(user, Permission::Read) => {
                self.activate(user, key, &repo.name)?;
                debug!(user = %user, repository = %repo.name, "Resolved default repository");
                Ok(Some(repo))
            }
            _ => Ok(None),
        }
    }

    pub fn active_name(&self, user: &str) -> Result<Option<String>, SessionError> {
        Ok(self.get_active(user)?.map(|repo| repo.name))
    }

    /// Switch `user` to `name` after checking it exists and is readable.
    /// Returns the confirmation text, naming the previous repository.
    pub fn set_active(&self, user: &str, name: &str) -> Result<String, SessionError> {
        self.with_user(user, |key| {
            self.registry.validate_access(user, name, Permission::Read)?;
            let previous = self.remembered(user, key)?;
            self.activate(user, key, name)?;
            info!(user = %user, repository = %name, previous = ?previous, "Switched repository");

            Ok(match previous {
                Some(old) if old != name => format!("Switched to {} (was: {})", name, old),
                _ => format!("Switched to {}", name),
            })
        })
    }

    /// A coding request succeeded in `repository`; make it the active one.
    pub fn record_successful_request(&self, user: &str, repository: &str) -> Result<(), SessionError> {
        self.with_user(user, |key| self.activate(user, key, repository))
    }

    /// Remove the cached pointer and the durable record. Idempotent.
    pub fn clear(&self, user: &str) -> Result<(), SessionError> {
        self.with_user(user, |key| {
            self.store.clear(user)?;
            self.active.remove(key);
            info!(user = %user, "Cleared session");
            Ok(())
        })
    }

    pub fn list_accessible(&self, user: &str) -> Result<Vec<Repository>, SessionError> {
        Ok(self.registry.list(Some(user))?)
    }

    pub fn status(&self, user: &str) -> Result<SessionStatus, SessionError> {
        self.with_user(user, |key| {
            let record = self.store.load(user)?;
            let active_repository = match self.active.get(key) {
                Some(name) => Some(name.clone()),
                None => record.as_ref().and_then(|r| r.active_repository.clone()),
            };
            Ok(SessionStatus {
                active_repository,
                current_branch: record.as_ref().and_then(|r| r.current_branch.clone()),
                message_count: record.as_ref().map_or(0, |r| r.message_count()),
            })
        })
    }

    /// Drop every cached pointer to `name`. Durable records are healed lazily
    /// on the next lookup. Returns how many users were pointing at it.
    pub fn forget_repository(&self, name: &str) -> usize {
        let before = self.active.len();
        self.active.retain(|_, active| active != name);
        let dropped = before - self.active.len();
        if dropped > 0 {
            info!(repository = %name, users = dropped, "Forgot unregistered repository");
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::registry::Registration;
    use std::fs;
    use std::path::{Path, PathBuf};
    use tempfile::{TempDir, tempdir};

    struct Fixture {
        _dir: TempDir,
        root: PathBuf,
        registry: Arc<RepositoryRegistry>,
        tracker: ActiveRepoTracker,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempdir().unwrap();
            let root = dir.path().canonicalize().unwrap();
            let registry =
                Arc::new(RepositoryRegistry::open(root.join("repositories.json")).unwrap());
            let tracker = Self::tracker_for(&root, &registry);
            Self {
                _dir: dir,
                root,
                registry,
                tracker,
            }
        }

        fn tracker_for(root: &Path, registry: &Arc<RepositoryRegistry>) -> ActiveRepoTracker {
            let store = Arc::new(SessionStore::new(root.join("sessions"), 20, 200));
            ActiveRepoTracker::new(Arc::clone(registry), store)
        }

        /// A fresh tracker over the same durable state, as after a restart.
        fn restarted(&self) -> ActiveRepoTracker {
            Self::tracker_for(&self.root, &self.registry)
        }

        fn register(&self, name: &str, readers: &[&str]) {
            let path = self.root.join("trees").join(name);
            fs::create_dir_all(path.join(".git")).unwrap();
            let mut registration = Registration::new(name, path);
            for user in readers {
                registration = registration.grant(*user, [Permission::Read].into());
            }
            self.registry.register(registration).unwrap();
        }
    }

    #[test]
    fn test_no_session_resolves_default_when_readable() {
        let fx = Fixture::new();
        fx.register("api", &["+1555"]);

        let repo = fx.tracker.get_active("+1555").unwrap().unwrap();
        assert_eq!(repo.name, "api");
        // Persisted for the next process.
        assert_eq!(
            fx.restarted().status("+1555").unwrap().active_repository.as_deref(),
            Some("api")
        );
    }

    #[test]
    fn test_no_session_and_no_access_resolves_none() {
        let fx = Fixture::new();
        fx.register("api", &["+1555"]);

        assert!(fx.tracker.get_active("+1999").unwrap().is_none());
        assert!(fx.tracker.store().load("+1999").unwrap().is_none());
        assert!(fx.tracker.status("+1999").unwrap().active_repository.is_none());
    }

    #[test]
    fn test_set_active_reports_previous() {
        let fx = Fixture::new();
        fx.register("api", &["+1555"]);
        fx.register("web", &["+1555"]);

        assert_eq!(fx.tracker.set_active("+1555", "web").unwrap(), "Switched to web");
        assert_eq!(
            fx.tracker.set_active("+1555", "api").unwrap(),
            "Switched to api (was: web)"
        );
        assert_eq!(fx.tracker.set_active("+1555", "api").unwrap(), "Switched to api");
        assert_eq!(fx.tracker.active_name("+1555").unwrap().as_deref(), Some("api"));
    }

    #[test]
    fn test_set_active_validates_repository_and_access() {
        let fx = Fixture::new();
        fx.register("api", &["+1555"]);

        let err = fx.tracker.set_active("+1555", "nope").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.to_string(), "Repository 'nope' not found");

        let err = fx.tracker.set_active("+1999", "api").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AccessDenied);
        assert!(fx.tracker.store().load("+1999").unwrap().is_none());
    }

    #[test]
    fn test_active_repository_survives_restart() {
        let fx = Fixture::new();
        fx.register("api", &["+1555"]);
        fx.register("web", &["+1555"]);
        fx.tracker.set_active("+1555", "web").unwrap();

        let restarted = fx.restarted();
        assert_eq!(restarted.active_name("+1555").unwrap().as_deref(), Some("web"));
    }

    #[test]
    fn test_unregistered_repository_falls_back_to_default() {
        let fx = Fixture::new();
        fx.register("api", &["+1555"]);
        fx.register("web", &["+1555"]);
        fx.tracker.set_active("+1555", "web").unwrap();

        fx.registry.unregister("web").unwrap();
        assert_eq!(fx.tracker.active_name("+1555").unwrap().as_deref(), Some("api"));

        // The durable pointer heals too.
        let restarted = fx.restarted();
        fx.registry.unregister("api").unwrap();
        assert!(restarted.get_active("+1555").unwrap().is_none());
        assert!(
            restarted
                .store()
                .load("+1555")
                .unwrap()
                .unwrap()
                .active_repository
                .is_none()
        );
    }

    #[test]
    fn test_revoked_access_falls_back_to_default() {
        let fx = Fixture::new();
        fx.register("api", &["u"]);
        fx.register("web", &["u"]);
        fx.tracker.set_active("u", "web").unwrap();

        fx.registry.revoke("web", "u").unwrap();
        assert_eq!(fx.tracker.active_name("u").unwrap().as_deref(), Some("api"));
        assert_eq!(
            fx.tracker.store().load("u").unwrap().unwrap().active_repository.as_deref(),
            Some("api")
        );
    }

    #[test]
    fn test_revoked_access_is_checked_after_restart() {
        let fx = Fixture::new();
        fx.register("api", &["u"]);
        fx.register("web", &["u"]);
        fx.tracker.set_active("u", "web").unwrap();
        fx.registry.revoke("web", "u").unwrap();

        let restarted = fx.restarted();
        assert_eq!(restarted.active_name("u").unwrap().as_deref(), Some("api"));
    }

    #[test]
    fn test_revoked_access_without_readable_default_resolves_none() {
        let fx = Fixture::new();
        fx.register("api", &[]);
        fx.register("web", &["u"]);
        fx.tracker.set_active("u", "web").unwrap();

        fx.registry.revoke("web", "u").unwrap();
        assert!(fx.tracker.get_active("u").unwrap().is_none());
        assert!(fx.tracker.store().load("u").unwrap().unwrap().active_repository.is_none());
    }

    #[test]
    fn test_cache_is_keyed_by_normalized_user() {
        let fx = Fixture::new();
        fx.register("api", &["+15551234"]);
        fx.register("web", &["+15551234"]);
        fx.tracker.set_active("+15551234", "web").unwrap();

        fx.tracker.clear("whatsapp:+15551234").unwrap();
        assert!(fx.tracker.status("+15551234").unwrap().active_repository.is_none());
        assert_eq!(fx.tracker.active_name("+15551234").unwrap().as_deref(), Some("api"));
    }

    #[test]
    fn test_forget_repository_drops_cached_pointers() {
        let fx = Fixture::new();
        fx.register("api", &["+1", "+2", "+3"]);
        fx.register("web", &["+1", "+2", "+3"]);
        fx.tracker.set_active("+1", "web").unwrap();
        fx.tracker.set_active("+2", "web").unwrap();
        fx.tracker.set_active("+3", "api").unwrap();

        assert_eq!(fx.tracker.forget_repository("web"), 2);
        assert_eq!(fx.tracker.forget_repository("web"), 0);
    }

    #[test]
    fn test_record_successful_request_switches_active() {
        let fx = Fixture::new();
        fx.register("api", &["+1555"]);
        fx.register("web", &["+1555"]);
        assert_eq!(fx.tracker.active_name("+1555").unwrap().as_deref(), Some("api"));

        fx.tracker.record_successful_request("+1555", "web").unwrap();
        assert_eq!(fx.tracker.active_name("+1555").unwrap().as_deref(), Some("web"));
    }

    #[test]
    fn test_clear_twice_leaves_no_record() {
        let fx = Fixture::new();
        fx.register("api", &["+1555"]);
        fx.tracker.set_active("+1555", "api").unwrap();

        fx.tracker.clear("+1555").unwrap();
        fx.tracker.clear("+1555").unwrap();
        assert!(!fx.tracker.store().path_for("+1555").exists());
        assert_eq!(fx.tracker.status("+1555").unwrap(), SessionStatus::default());
    }

    #[test]
    fn test_status_counts_history() {
        let fx = Fixture::new();
        fx.register("api", &["+1555"]);
        fx.tracker
            .store()
            .record_exchange("+1555", "add tests", "done", Some("api"), Some("sms/1"))
            .unwrap();

        let status = fx.tracker.status("+1555").unwrap();
        assert_eq!(status.message_count, 1);
        assert_eq!(status.current_branch.as_deref(), Some("sms/1"));
    }

    #[test]
    fn test_list_accessible() {
        let fx = Fixture::new();
        fx.register("api", &["+1555"]);
        fx.register("web", &[]);
        let names: Vec<_> = fx
            .tracker
            .list_accessible("+1555")
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["api"]);
    }
}
