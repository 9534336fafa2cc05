use coderelay_common::Repository;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::GitSettings;
use super::handler::GitHandler;
use super::runner::{CommandRunner, ProcessRunner};

/// Caches one [`GitHandler`] per repository name and hands out the
/// per-repository locks that serialize branch → commit → push.
///
/// Handlers are keyed by name and dropped on [`invalidate`]. Locks are keyed
/// by path and are never dropped, so a request that is still holding one
/// keeps excluding newcomers even if the handler is rebuilt meanwhile.
///
/// [`invalidate`]: GitHandlerFactory::invalidate
pub struct GitHandlerFactory {
    settings: GitSettings,
    runner: Arc<dyn CommandRunner>,
    handlers: DashMap<String, Arc<GitHandler>>,
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl GitHandlerFactory {
    pub fn new(settings: GitSettings, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            settings,
            runner,
            handlers: DashMap::new(),
            locks: DashMap::new(),
        }
    }

    pub fn with_process_runner(settings: GitSettings) -> Self {
        Self::new(settings, Arc::new(ProcessRunner))
    }

    pub fn settings(&self) -> &GitSettings {
        &self.settings
    }

    /// Cached handler for `repository`, rebuilt if its path has changed.
    pub fn get_handler(&self, repository: &Repository) -> Arc<GitHandler> {
        if let Some(handler) = self.handlers.get(&repository.name) {
            if handler.path() == repository.path.as_path() {
                debug!(repository = %repository.name, "Using cached git handler");
                return Arc::clone(&handler);
            }
            debug!(repository = %repository.name, "Repository path changed; rebuilding git handler");
        }

        let handler = Arc::new(self.handler_for_path(&repository.path));
        self.handlers
            .insert(repository.name.clone(), Arc::clone(&handler));
        info!(
            repository = %repository.name,
            path = %repository.path.display(),
            "Created git handler"
        );
        handler
    }

    /// Uncached handler for an arbitrary path (e.g. before registration).
    pub fn handler_for_path(&self, path: &Path) -> GitHandler {
        GitHandler::new(path, self.settings.clone(), Arc::clone(&self.runner))
    }

    /// Drop the cached handler for `name`. Returns whether one existed.
    pub fn invalidate(&self, name: &str) -> bool {
        let removed = self.handlers.remove(name).is_some();
        if removed {
            info!(repository = %name, "Invalidated git handler");
        }
        removed
    }

    pub fn invalidate_all(&self) {
        let count = self.handlers.len();
        self.handlers.clear();
        info!(count, "Invalidated all git handlers");
    }

    pub fn cached_count(&self) -> usize {
        self.handlers.len()
    }

    /// Mutex guarding git state changes in `repository`'s working tree.
    pub fn lock_for(&self, repository: &Repository) -> Arc<Mutex<()>> {
        let entry = self
            .locks
            .entry(repository.path.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())));
        Arc::clone(entry.value())
    }
}
