//! Durable record behind [`super::RepositoryRegistry`].
//!
//! The whole mapping and the default pointer live in one JSON file that is
//! read in full and rewritten in full. Writes go to `<file>.tmp` and are
//! renamed into place while an exclusive lock on `<file>.lock` is held, so a
//! reader never sees a half-written file and two processes (service and
//! admin CLI) never interleave a read-modify-write.

use anyhow::{Context, Result};
use coderelay_common::Repository;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::errors::RegistryError;

/// On-disk layout of `repositories.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryRecord {
    #[serde(default)]
    pub repositories: BTreeMap<String, Repository>,
    #[serde(default)]
    pub default_repository: Option<String>,
}

impl RegistryRecord {
    /// Drop a default pointer that does not name an existing entry.
    pub fn repair_default(&mut self) {
        if let Some(name) = &self.default_repository
            && !self.repositories.contains_key(name)
        {
            self.default_repository = self.repositories.keys().next().cloned();
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegistryStore {
    path: PathBuf,
}

impl RegistryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "repositories.json".into());
        name.push(suffix);
        self.path.with_file_name(name)
    }

    /// Read the record. A missing file is an empty registry.
    pub fn load(&self) -> Result<RegistryRecord> {
        if !self.path.exists() {
            return Ok(RegistryRecord::default());
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        if content.trim().is_empty() {
            return Ok(RegistryRecord::default());
        }
        let mut record: RegistryRecord = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", self.path.display()))?;
        record.repair_default();
        Ok(record)
    }

    fn acquire_lock(&self) -> Result<File> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let lock_path = self.sibling(".lock");
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .with_context(|| format!("Failed to open lock file {}", lock_path.display()))?;
        lock_file
            .lock_exclusive()
            .with_context(|| format!("Failed to lock {}", lock_path.display()))?;
        Ok(lock_file)
    }

    fn write_locked(&self, record: &RegistryRecord) -> Result<()> {
        let content =
            serde_json::to_string_pretty(record).context("Failed to serialize registry")?;
        let tmp_path = self.sibling(".tmp");
        fs::write(&tmp_path, content)
            .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }

    /// Overwrite the durable record.
    pub fn save(&self, record: &RegistryRecord) -> Result<()> {
        let _lock = self.acquire_lock()?;
        self.write_locked(record)
    }

    /// Locked read-modify-write against the latest durable record.
    ///
    /// `apply` works on a fresh copy read under the lock; nothing is written
    /// if it returns an error. Returns the new record alongside `apply`'s value.
    pub fn update<T, F>(&self, apply: F) -> Result<(RegistryRecord, T), RegistryError>
    where
        F: FnOnce(&mut RegistryRecord) -> Result<T, RegistryError>,
    {
        let _lock = self.acquire_lock().map_err(RegistryError::Storage)?;
        let mut record = self.load().map_err(RegistryError::Storage)?;
        let value = apply(&mut record)?;
        self.write_locked(&record).map_err(RegistryError::Storage)?;
        Ok((record, value))
    }
}
