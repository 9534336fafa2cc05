//! Durable per-user session records, one JSON file per user.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::errors::SessionError;

/// Transport prefixes stripped before a user id becomes a file name.
const TRANSPORT_PREFIXES: &[&str] = &["whatsapp:", "sms:"];

/// One prompt/response pair in a user's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    pub timestamp: DateTime<Utc>,
    pub prompt: String,
    /// Leading excerpt of the agent response.
    pub response: String,
    #[serde(default)]
    pub repository: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub active_repository: Option<String>,
    #[serde(default)]
    pub current_branch: Option<String>,
    /// Last task branch per repository.
    #[serde(default)]
    pub branches: BTreeMap<String, String>,
    #[serde(default)]
    pub conversation_history: Vec<Exchange>,
}

impl SessionRecord {
    pub fn new(user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.into(),
            created_at: now,
            updated_at: now,
            active_repository: None,
            current_branch: None,
            branches: BTreeMap::new(),
            conversation_history: Vec::new(),
        }
    }

    pub fn message_count(&self) -> usize {
        self.conversation_history.len()
    }
}

/// Storage key for a user id: transport prefix and punctuation removed.
pub fn normalize_user_id(user: &str) -> String {
    let mut id = user.trim();
    for prefix in TRANSPORT_PREFIXES {
        if id
            .get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
        {
            id = &id[prefix.len()..];
        }
    }
    let normalized: String = id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '@')
        .collect();
    if normalized.is_empty() {
        "unknown".to_string()
    } else {
        normalized
    }
}

fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
    history_limit: usize,
    excerpt_chars: usize,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>, history_limit: usize, excerpt_chars: usize) -> Self {
        Self {
            dir: dir.into(),
            history_limit,
            excerpt_chars,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, user: &str) -> PathBuf {
        self.dir.join(format!("{}.json", normalize_user_id(user)))
    }

    fn read(&self, user: &str) -> Result<Option<SessionRecord>> {
        let path = self.path_for(user);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read session {}", path.display()))?;
        let record = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse session {}", path.display()))?;
        Ok(Some(record))
    }

    fn write(&self, user: &str, record: &SessionRecord) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        let path = self.path_for(user);
        let tmp_path = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(record).context("Failed to serialize session")?;
        fs::write(&tmp_path, content)
            .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &path)
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }

    pub fn load(&self, user: &str) -> Result<Option<SessionRecord>, SessionError> {
        self.read(user).map_err(SessionError::Storage)
    }

    pub fn load_or_new(&self, user: &str) -> Result<SessionRecord, SessionError> {
        Ok(self
            .load(user)?
            .unwrap_or_else(|| SessionRecord::new(normalize_user_id(user))))
    }

    fn update<F>(&self, user: &str, apply: F) -> Result<SessionRecord, SessionError>
    where
        F: FnOnce(&mut SessionRecord),
    {
        let mut record = self.load_or_new(user)?;
        apply(&mut record);
        record.updated_at = Utc::now();
        self.write(user, &record).map_err(SessionError::Storage)?;
        Ok(record)
    }

    /// Append one exchange, keeping only the most recent `history_limit`.
    pub fn record_exchange(
        &self,
        user: &str,
        prompt: &str,
        response: &str,
        repository: Option<&str>,
        branch: Option<&str>,
    ) -> Result<SessionRecord, SessionError> {
        let exchange = Exchange {
            timestamp: Utc::now(),
            prompt: prompt.to_string(),
            response: excerpt(response, self.excerpt_chars),
            repository: repository.map(str::to_string),
            branch: branch.map(str::to_string),
        };
        let limit = self.history_limit;
        self.update(user, move |record| {
            if let Some(branch) = &exchange.branch {
                record.current_branch = Some(branch.clone());
                if let Some(repo) = &exchange.repository {
                    record.branches.insert(repo.clone(), branch.clone());
                }
            }
            record.conversation_history.push(exchange);
            let excess = record.conversation_history.len().saturating_sub(limit);
            record.conversation_history.drain(..excess);
        })
    }

    /// Persist the active repository pointer (`None` clears it).
    pub fn set_active(&self, user: &str, repository: Option<&str>) -> Result<(), SessionError> {
        self.update(user, |record| {
            record.active_repository = repository.map(str::to_string);
        })?;
        debug!(user = %user, repository = ?repository, "Persisted active repository");
        Ok(())
    }

    /// Delete the user's record. Returns whether one existed.
    pub fn clear(&self, user: &str) -> Result<bool, SessionError> {
        let path = self.path_for(user);
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(user = %user, "Cleared session record");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(SessionError::Storage(
                anyhow::Error::new(e).context(format!("Failed to remove {}", path.display())),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store(dir: &Path) -> SessionStore {
        SessionStore::new(dir.join("sessions"), 3, 10)
    }

    #[test]
    fn test_normalize_user_id() {
        assert_eq!(normalize_user_id("whatsapp:+1-555-000-1111"), "15550001111");
        assert_eq!(normalize_user_id("SMS:+44 20 7946 0000"), "442079460000");
        assert_eq!(normalize_user_id("../../etc/passwd"), "etcpasswd");
        assert_eq!(normalize_user_id("+-:"), "unknown");
    }

    #[test]
    fn test_transport_variants_share_one_record() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store.set_active("whatsapp:+15550001111", Some("api")).unwrap();
        let record = store.load("+1-555-000-1111").unwrap().unwrap();
        assert_eq!(record.active_repository.as_deref(), Some("api"));
    }

    #[test]
    fn test_load_missing_is_none() {
        let dir = tempdir().unwrap();
        assert!(store(dir.path()).load("+1555").unwrap().is_none());
    }

    #[test]
    fn test_record_exchange_bounds_history_and_truncates() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        for i in 0..5 {
            store
                .record_exchange("+1555", &format!("prompt {i}"), "a very long response body", Some("api"), None)
                .unwrap();
        }
        let record = store.load("+1555").unwrap().unwrap();
        assert_eq!(record.message_count(), 3);
        assert_eq!(record.conversation_history[0].prompt, "prompt 2");
        assert_eq!(record.conversation_history[2].response, "a very lon");
    }

    #[test]
    fn test_record_exchange_tracks_branch_per_repository() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store
            .record_exchange("+1555", "p", "r", Some("api"), Some("sms/1"))
            .unwrap();
        store
            .record_exchange("+1555", "p", "r", Some("web"), Some("sms/2"))
            .unwrap();
        let record = store
            .record_exchange("+1555", "p", "r", Some("api"), None)
            .unwrap();
        assert_eq!(record.current_branch.as_deref(), Some("sms/2"));
        assert_eq!(record.branches.get("api").map(String::as_str), Some("sms/1"));
        assert_eq!(record.branches.get("web").map(String::as_str), Some("sms/2"));
    }

    #[test]
    fn test_excerpt_respects_char_boundaries() {
        assert_eq!(excerpt("héllo wörld", 4), "héll");
        assert_eq!(excerpt("short", 10), "short");
    }

    #[test]
    fn test_clear_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store.set_active("+1555", Some("api")).unwrap();
        assert!(store.clear("+1555").unwrap());
        assert!(!store.clear("+1555").unwrap());
        assert!(!store.path_for("+1555").exists());
    }
}
