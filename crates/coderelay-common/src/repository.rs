use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// A permission token a user can hold on a repository.
///
/// Tokens are ordered `Read < Write < Admin`; holding a higher token
/// satisfies checks for every lower one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Read,
    Write,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid permission '{0}'. Valid values: read, write, admin")]
pub struct PermissionParseError(pub String);

impl Permission {
    /// True if holding `self` is enough for an operation requiring `required`.
    pub fn satisfies(self, required: Permission) -> bool {
        self >= required
    }

    /// Parse a comma-separated list such as `"read,write"`.
    pub fn parse_list(list: &str) -> Result<BTreeSet<Permission>, PermissionParseError> {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse)
            .collect()
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Permission::Read => write!(f, "read"),
            Permission::Write => write!(f, "write"),
            Permission::Admin => write!(f, "admin"),
        }
    }
}

impl std::str::FromStr for Permission {
    type Err = PermissionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "read" => Ok(Permission::Read),
            "write" => Ok(Permission::Write),
            "admin" => Ok(Permission::Admin),
            other => Err(PermissionParseError(other.to_string())),
        }
    }
}

/// User identifier → granted permission tokens.
pub type AccessControl = BTreeMap<String, BTreeSet<Permission>>;

/// A registered, named working tree the service can operate on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    pub path: PathBuf,
    #[serde(default)]
    pub remote_url: Option<String>,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    #[serde(default)]
    pub access_control: AccessControl,
}

impl Repository {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            path: path.into(),
            remote_url: None,
            description: String::new(),
            created_at: now,
            last_accessed: now,
            access_control: AccessControl::new(),
        }
    }

    /// Whether the path still exists and holds a `.git` directory.
    ///
    /// Evaluated against the filesystem on every call; never cached.
    pub fn is_valid(&self) -> bool {
        is_working_tree(&self.path)
    }

    pub fn permissions_for(&self, user: &str) -> Option<&BTreeSet<Permission>> {
        self.access_control.get(user)
    }

    pub fn has_access(&self, user: &str, required: Permission) -> bool {
        self.permissions_for(user)
            .is_some_and(|granted| granted.iter().any(|p| p.satisfies(required)))
    }

    /// Refresh `last_accessed` to now.
    pub fn touch(&mut self) {
        self.last_accessed = Utc::now();
    }
}

/// True if `path` is a directory containing a `.git` directory.
pub fn is_working_tree(path: &Path) -> bool {
    path.is_dir() && path.join(".git").is_dir()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn repo_with(user: &str, perms: &[Permission]) -> Repository {
        let mut repo = Repository::new("demo", "/nonexistent/demo");
        repo.access_control
            .insert(user.to_string(), perms.iter().copied().collect());
        repo
    }

    #[test]
    fn permission_parse_list_trims_and_skips_empty() {
        let perms = Permission::parse_list(" read, write ,,").unwrap();
        assert_eq!(
            perms,
            [Permission::Read, Permission::Write].into_iter().collect()
        );
    }

    #[test]
    fn permission_parse_list_rejects_unknown_token() {
        let err = Permission::parse_list("read,owner").unwrap_err();
        assert_eq!(err.0, "owner");
        assert!(err.to_string().contains("owner"));
    }

    #[test]
    fn write_and_admin_satisfy_read() {
        assert!(Permission::Write.satisfies(Permission::Read));
        assert!(Permission::Admin.satisfies(Permission::Write));
        assert!(!Permission::Read.satisfies(Permission::Write));
    }

    #[test]
    fn has_access_respects_hierarchy() {
        let reader = repo_with("+15550001", &[Permission::Read]);
        assert!(reader.has_access("+15550001", Permission::Read));
        assert!(!reader.has_access("+15550001", Permission::Write));

        let admin = repo_with("+15550002", &[Permission::Admin]);
        assert!(admin.has_access("+15550002", Permission::Write));
        assert!(!admin.has_access("+15550003", Permission::Read));
    }

    #[test]
    fn is_valid_tracks_filesystem() {
        let dir = tempdir().unwrap();
        let repo = Repository::new("demo", dir.path());
        assert!(!repo.is_valid());

        fs::create_dir(dir.path().join(".git")).unwrap();
        assert!(repo.is_valid());

        fs::remove_dir(dir.path().join(".git")).unwrap();
        assert!(!repo.is_valid());
    }

    #[test]
    fn access_control_serializes_as_lowercase_lists() {
        let repo = repo_with("+15550001", &[Permission::Write, Permission::Read]);
        let json = serde_json::to_value(&repo).unwrap();
        assert_eq!(
            json["access_control"]["+15550001"],
            serde_json::json!(["read", "write"])
        );
    }
}
