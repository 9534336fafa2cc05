//! Repository registry: the named set of working trees the service can
//! operate on, their access-control lists, and the default repository.
//!
//! Every mutation (including the `last_accessed` refresh done by [`get`])
//! is a locked read-modify-write against the durable record in
//! [`store::RegistryStore`], and the in-memory copy is only replaced after the
//! write succeeds. Unregistering does not reach into other components; the
//! caller must invalidate the git handler cache and the session tracker.
//!
//! [`get`]: RepositoryRegistry::get

pub mod discover;
pub mod store;

use chrono::{DateTime, Utc};
use coderelay_common::{AccessControl, Permission, Repository, is_working_tree};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::errors::RegistryError;
use crate::git::GitHandlerFactory;
pub use discover::{DEFAULT_DISCOVERY_DEPTH, discover_repositories};
use store::{RegistryRecord, RegistryStore};

/// Input to [`RepositoryRegistry::register`].
#[derive(Debug, Clone, Default)]
pub struct Registration {
    pub name: String,
    pub path: PathBuf,
    pub remote_url: Option<String>,
    pub description: Option<String>,
    pub initial_access: AccessControl,
}

impl Registration {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn remote_url(mut self, remote_url: impl Into<String>) -> Self {
        self.remote_url = Some(remote_url.into());
        self
    }

    pub fn grant(mut self, user: impl Into<String>, permissions: BTreeSet<Permission>) -> Self {
        self.initial_access.insert(user.into(), permissions);
        self
    }
}

/// Point-in-time view of one repository, including live git state.
#[derive(Debug, Clone, Serialize)]
pub struct RepositoryStats {
    pub name: String,
    pub path: PathBuf,
    pub is_valid: bool,
    pub current_branch: Option<String>,
    pub has_changes: bool,
    pub remote_url: Option<String>,
    pub last_accessed: DateTime<Utc>,
}

/// Names are addressed from short text messages, so keep them to one token.
fn validate_name(name: &str) -> Result<(), RegistryError> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(RegistryError::InvalidName {
            name: name.to_string(),
        })
    }
}

pub struct RepositoryRegistry {
    store: RegistryStore,
    state: Mutex<RegistryRecord>,
}

impl RepositoryRegistry {
    /// Load the registry persisted at `path`; a missing file is an empty registry.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let store = RegistryStore::new(path);
        let record = store.load().map_err(RegistryError::Storage)?;
        info!(
            count = record.repositories.len(),
            path = %store.path().display(),
            "Loaded repository registry"
        );
        Ok(Self {
            store,
            state: Mutex::new(record),
        })
    }

    pub fn path(&self) -> &Path {
        self.store.path()
    }

    fn lock(&self) -> Result<MutexGuard<'_, RegistryRecord>, RegistryError> {
        self.state.lock().map_err(|_| RegistryError::LockPoisoned)
    }

    /// Apply `apply` to the durable record and, once written, to the cache.
    fn mutate<T, F>(&self, apply: F) -> Result<T, RegistryError>
    where
        F: FnOnce(&mut RegistryRecord) -> Result<T, RegistryError>,
    {
        let mut state = self.lock()?;
        let (record, value) = self.store.update(apply)?;
        *state = record;
        Ok(value)
    }

    pub fn register(&self, registration: Registration) -> Result<Repository, RegistryError> {
        let Registration {
            name,
            path,
            remote_url,
            description,
            initial_access,
        } = registration;

        validate_name(&name)?;
        if !path.is_absolute() {
            return Err(RegistryError::PathNotAbsolute { path });
        }
        if !path.exists() {
            return Err(RegistryError::PathMissing { path });
        }
        if !is_working_tree(&path) {
            return Err(RegistryError::NotAWorkingTree { path });
        }

        let mut repository = Repository::new(&name, path);
        repository.remote_url = remote_url.filter(|url| !url.is_empty());
        repository.description = description.unwrap_or_default();
        repository.access_control = initial_access;

        let repository = self.mutate(move |record| {
            if record.repositories.contains_key(&repository.name) {
                return Err(RegistryError::AlreadyExists {
                    name: repository.name.clone(),
                });
            }
            record
                .repositories
                .insert(repository.name.clone(), repository.clone());
            if record.repositories.len() == 1 {
                record.default_repository = Some(repository.name.clone());
            }
            Ok(repository)
        })?;

        info!(
            repository = %repository.name,
            path = %repository.path.display(),
            "Registered repository"
        );
        Ok(repository)
    }

    /// Remove `name`. If it was the default, the first remaining entry (in
    /// name order) becomes the default, or the default is cleared.
    pub fn unregister(&self, name: &str) -> Result<Repository, RegistryError> {
        let removed = self.mutate(|record| {
            let removed =
                record
                    .repositories
                    .remove(name)
                    .ok_or_else(|| RegistryError::NotFound {
                        name: name.to_string(),
                    })?;
            if record.default_repository.as_deref() == Some(name) {
                record.default_repository = record.repositories.keys().next().cloned();
            }
            Ok(removed)
        })?;

        info!(repository = %name, "Unregistered repository");
        Ok(removed)
    }

    /// Look up `name`, refreshing and persisting its `last_accessed`.
    pub fn get(&self, name: &str) -> Result<Option<Repository>, RegistryError> {
        if !self.lock()?.repositories.contains_key(name) {
            return Ok(None);
        }
        self.mutate(|record| {
            Ok(record.repositories.get_mut(name).map(|repo| {
                repo.touch();
                repo.clone()
            }))
        })
    }

    /// Look up `name` without recording an access.
    pub fn peek(&self, name: &str) -> Result<Option<Repository>, RegistryError> {
        Ok(self.lock()?.repositories.get(name).cloned())
    }

    pub fn contains(&self, name: &str) -> Result<bool, RegistryError> {
        Ok(self.lock()?.repositories.contains_key(name))
    }

    /// All repositories in name order, or only those `user` can read.
    pub fn list(&self, user: Option<&str>) -> Result<Vec<Repository>, RegistryError> {
        let state = self.lock()?;
        Ok(state
            .repositories
            .values()
            .filter(|repo| user.is_none_or(|u| repo.has_access(u, Permission::Read)))
            .cloned()
            .collect())
    }

    pub fn len(&self) -> Result<usize, RegistryError> {
        Ok(self.lock()?.repositories.len())
    }

    pub fn is_empty(&self) -> Result<bool, RegistryError> {
        Ok(self.len()? == 0)
    }

    pub fn default_name(&self) -> Result<Option<String>, RegistryError> {
        Ok(self.lock()?.default_repository.clone())
    }

    /// The default repository, looked up with [`Self::get`] semantics.
    pub fn default_repository(&self) -> Result<Option<Repository>, RegistryError> {
        match self.default_name()? {
            Some(name) => self.get(&name),
            None => Ok(None),
        }
    }

    pub fn set_default(&self, name: &str) -> Result<(), RegistryError> {
        self.mutate(|record| {
            if !record.repositories.contains_key(name) {
                return Err(RegistryError::NotFound {
                    name: name.to_string(),
                });
            }
            record.default_repository = Some(name.to_string());
            Ok(())
        })?;
        info!(repository = %name, "Set default repository");
        Ok(())
    }

    /// Replace `user`'s permission set on `name`.
    pub fn grant(
        &self,
        name: &str,
        user: &str,
        permissions: BTreeSet<Permission>,
    ) -> Result<(), RegistryError> {
        let summary = permissions
            .iter()
            .map(Permission::to_string)
            .collect::<Vec<_>>()
            .join(",");
        self.mutate(|record| {
            let repo =
                record
                    .repositories
                    .get_mut(name)
                    .ok_or_else(|| RegistryError::NotFound {
                        name: name.to_string(),
                    })?;
            repo.access_control.insert(user.to_string(), permissions);
            Ok(())
        })?;
        info!(repository = %name, user = %user, permissions = %summary, "Granted access");
        Ok(())
    }

    pub fn revoke(&self, name: &str, user: &str) -> Result<(), RegistryError> {
        self.mutate(|record| {
            let repo =
                record
                    .repositories
                    .get_mut(name)
                    .ok_or_else(|| RegistryError::NotFound {
                        name: name.to_string(),
                    })?;
            repo.access_control
                .remove(user)
                .map(|_| ())
                .ok_or_else(|| RegistryError::NoAccessRecorded {
                    name: name.to_string(),
                    user: user.to_string(),
                })
        })?;
        info!(repository = %name, user = %user, "Revoked access");
        Ok(())
    }

    /// Existence, then validity, then permission; the first failing check wins.
    pub fn validate_access(
        &self,
        user: &str,
        name: &str,
        required: Permission,
    ) -> Result<Repository, RegistryError> {
        let repo = self.get(name)?.ok_or_else(|| RegistryError::NotFound {
            name: name.to_string(),
        })?;
        if !repo.is_valid() {
            return Err(RegistryError::Unavailable {
                name: name.to_string(),
            });
        }
        if !repo.has_access(user, required) {
            debug!(repository = %name, user = %user, permission = %required, "Access denied");
            return Err(RegistryError::AccessDenied {
                name: name.to_string(),
                user: user.to_string(),
                permission: required,
            });
        }
        Ok(repo)
    }

    pub fn discover(&self, root: &Path, max_depth: usize) -> Vec<PathBuf> {
        discover_repositories(root, max_depth)
    }

    pub fn find_by_path(&self, path: &Path) -> Result<Option<Repository>, RegistryError> {
        let state = self.lock()?;
        Ok(state
            .repositories
            .values()
            .find(|repo| repo.path == path)
            .cloned())
    }

    /// Registry entry plus live git state for `name`.
    pub async fn stats(
        &self,
        name: &str,
        git: &GitHandlerFactory,
    ) -> Result<RepositoryStats, RegistryError> {
        let repo = self.get(name)?.ok_or_else(|| RegistryError::NotFound {
            name: name.to_string(),
        })?;
        let is_valid = repo.is_valid();
        let (current_branch, has_changes) = if is_valid {
            let handler = git.get_handler(&repo);
            (
                handler.current_branch().await,
                handler.has_uncommitted_changes().await,
            )
        } else {
            (None, false)
        };

        Ok(RepositoryStats {
            name: repo.name,
            path: repo.path,
            is_valid,
            current_branch,
            has_changes,
            remote_url: repo.remote_url,
            last_accessed: repo.last_accessed,
        })
    }
}
