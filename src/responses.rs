//! Archive of full agent responses.
//!
//! Short-text replies only carry a summary; the complete response is kept
//! here under a timestamp id so the user can fetch it with `FULL <id>`.

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::session::normalize_user_id;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredResponse {
    pub id: String,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub prompt: String,
    pub response: String,
    #[serde(default)]
    pub repository: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub files_changed: Vec<String>,
}

/// Fields of a response to archive.
#[derive(Debug, Clone, Copy)]
pub struct NewResponse<'a> {
    pub user: &'a str,
    pub prompt: &'a str,
    pub response: &'a str,
    pub repository: Option<&'a str>,
    pub branch: Option<&'a str>,
    pub files_changed: &'a [String],
}

#[derive(Debug, Clone)]
pub struct ResponseStore {
    dir: PathBuf,
}

fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_digit() || c == '_')
}

impl ResponseStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    /// Pick an unused id derived from the current time.
    fn next_id(&self) -> String {
        let base = Local::now().format("%Y%m%d_%H%M%S_%6f").to_string();
        if !self.path_for(&base).exists() {
            return base;
        }
        (1u32..)
            .map(|n| format!("{}_{}", base, n))
            .find(|id| !self.path_for(id).exists())
            .unwrap_or(base)
    }

    /// Archive a response and return its id.
    pub fn save(&self, new: NewResponse<'_>) -> Result<String> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        let id = self.next_id();
        let stored = StoredResponse {
            id: id.clone(),
            user_id: normalize_user_id(new.user),
            timestamp: Utc::now(),
            prompt: new.prompt.to_string(),
            response: new.response.to_string(),
            repository: new.repository.map(str::to_string),
            branch: new.branch.map(str::to_string),
            files_changed: new.files_changed.to_vec(),
        };
        let content =
            serde_json::to_string_pretty(&stored).context("Failed to serialize response")?;
        let path = self.path_for(&id);
        fs::write(&path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        debug!(id = %id, "Archived response");
        Ok(id)
    }

    pub fn get(&self, id: &str) -> Result<Option<StoredResponse>> {
        if !is_valid_id(id) {
            return Ok(None);
        }
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let stored = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Some(stored))
    }

    /// Most recent responses first, optionally only those from `user`.
    pub fn list(&self, user: Option<&str>, limit: usize) -> Result<Vec<StoredResponse>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let user_id = user.map(normalize_user_id);

        let mut ids: Vec<String> = fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to read {}", self.dir.display()))?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension()? != "json" {
                    return None;
                }
                Some(path.file_stem()?.to_str()?.to_string())
            })
            .filter(|id| is_valid_id(id))
            .collect();
        ids.sort_unstable_by(|a, b| b.cmp(a));

        let mut responses = Vec::new();
        for id in ids {
            if responses.len() >= limit {
                break;
            }
            match self.get(&id) {
                Ok(Some(stored)) => {
                    if user_id.as_ref().is_none_or(|u| *u == stored.user_id) {
                        responses.push(stored);
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(id = %id, error = %e, "Skipping unreadable response"),
            }
        }
        Ok(responses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn save(store: &ResponseStore, user: &str, prompt: &str) -> String {
        store
            .save(NewResponse {
                user,
                prompt,
                response: "Done. Created src/health.rs",
                repository: Some("api"),
                branch: Some("sms/20240101_000000_000001"),
                files_changed: &["src/health.rs".to_string()],
            })
            .unwrap()
    }

    #[test]
    fn test_save_and_get() {
        let dir = tempdir().unwrap();
        let store = ResponseStore::new(dir.path().join("responses"));
        let id = save(&store, "+15550001111", "add health endpoint");

        assert!(is_valid_id(&id));
        let stored = store.get(&id).unwrap().unwrap();
        assert_eq!(stored.user_id, "15550001111");
        assert_eq!(stored.prompt, "add health endpoint");
        assert_eq!(stored.files_changed, vec!["src/health.rs"]);
        assert!(store.get("20000101_000000_000000").unwrap().is_none());
    }

    #[test]
    fn test_ids_are_unique() {
        let dir = tempdir().unwrap();
        let store = ResponseStore::new(dir.path());
        let ids: std::collections::BTreeSet<_> =
            (0..5).map(|i| save(&store, "+1", &format!("p{i}"))).collect();
        assert_eq!(ids.len(), 5);
    }

    #[test]
    fn test_get_rejects_path_like_ids() {
        let dir = tempdir().unwrap();
        let store = ResponseStore::new(dir.path().join("responses"));
        fs::write(dir.path().join("secret.json"), "{}").unwrap();
        assert!(store.get("../secret").unwrap().is_none());
        assert!(store.get("").unwrap().is_none());
    }

    #[test]
    fn test_list_newest_first_filtered_by_user() {
        let dir = tempdir().unwrap();
        let store = ResponseStore::new(dir.path());
        save(&store, "+1", "first");
        save(&store, "+2", "other user");
        save(&store, "+1", "second");
        save(&store, "+1", "third");

        let mine: Vec<_> = store
            .list(Some("+1"), 2)
            .unwrap()
            .into_iter()
            .map(|r| r.prompt)
            .collect();
        assert_eq!(mine, vec!["third", "second"]);
        assert_eq!(store.list(None, 10).unwrap().len(), 4);
    }

    #[test]
    fn test_list_missing_dir_is_empty() {
        let dir = tempdir().unwrap();
        let store = ResponseStore::new(dir.path().join("nope"));
        assert!(store.list(None, 5).unwrap().is_empty());
    }
}
