//! The `repositories.yaml` registration file.
//!
//! Older homes carry one of two out-of-date layouts which are migrated to the
//! current schema on load:
//! - no `apiVersion` key: either a flat `name: url` map, or a `repositories`
//!   list without the version header
//! - entries whose `cache` is an absolute path instead of a file name

use std::collections::BTreeMap;
use std::path::{Component, Path};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use super::error::{RepoError, RepoResult};
use crate::fs::write_atomic;

pub const API_VERSION: &str = "v1";

/// Name reserved for the local (non-remote) repository.
pub const LOCAL_REPOSITORY: &str = "local";

/// A registered remote repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryEntry {
    pub name: String,
    pub url: Url,
    /// Index file name, relative to the home `repository/` directory
    pub cache: String,
}

impl RepositoryEntry {
    pub fn new(name: impl Into<String>, url: Url) -> Self {
        let name = name.into();
        let cache = default_cache_name(&name);
        Self { name, url, cache }
    }

    pub fn with_cache(mut self, cache: impl Into<String>) -> Self {
        self.cache = cache.into();
        self
    }

    /// Validate the entry before it is registered.
    pub fn validate(&self) -> RepoResult<()> {
        let invalid = |reason: &str| RepoError::Invalid {
            name: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if self.name.contains('/') || self.name.contains(char::is_whitespace) {
            return Err(invalid("name must not contain '/' or whitespace"));
        }
        if self.name == LOCAL_REPOSITORY {
            return Err(invalid("name is reserved for the local repository"));
        }
        if !matches!(self.url.scheme(), "http" | "https" | "file") {
            return Err(invalid("url must use http, https, or file"));
        }
        ensure_relative_file(&self.cache).map_err(|reason| invalid(&reason))?;
        Ok(())
    }

    /// URL of the repository's `index.yaml`.
    pub fn index_url(&self) -> RepoResult<Url> {
        base_url(&self.url)
            .join("index.yaml")
            .map_err(|e| RepoError::Invalid {
                name: self.name.clone(),
                reason: e.to_string(),
            })
    }
}

/// The explicit entry for the local repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalRepository {
    pub name: String,
    /// Index file, relative to the home `repository/` directory
    pub index: String,
}

impl Default for LocalRepository {
    fn default() -> Self {
        Self {
            name: LOCAL_REPOSITORY.to_string(),
            index: format!("{}/index.yaml", LOCAL_REPOSITORY),
        }
    }
}

/// Whether loading had to rewrite an out-of-date file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Current,
    Migrated,
}

/// Registered repositories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryFile {
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    pub generated: DateTime<Utc>,

    #[serde(default)]
    pub repositories: Vec<RepositoryEntry>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local: Option<LocalRepository>,
}

impl Default for RepositoryFile {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct LegacyFile {
    #[serde(default)]
    repositories: Vec<LegacyEntry>,
}

#[derive(Debug, Deserialize)]
struct LegacyEntry {
    name: String,
    url: String,
    #[serde(default)]
    cache: Option<String>,
}

impl RepositoryFile {
    pub fn new() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            generated: Utc::now(),
            repositories: Vec::new(),
            local: None,
        }
    }

    /// Load and migrate in place when the file is out of date.
    pub fn load(path: &Path) -> RepoResult<Self> {
        Self::load_outcome(path).map(|(file, _)| file)
    }

    /// Load, reporting whether an out-of-date file was rewritten.
    pub fn load_outcome(path: &Path) -> RepoResult<(Self, LoadOutcome)> {
        let content = std::fs::read_to_string(path).map_err(|source| RepoError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let (file, outcome) = Self::parse(&content, &path.display().to_string())?;
        if outcome == LoadOutcome::Migrated {
            tracing::info!(path = %path.display(), "migrating out-of-date repositories file");
            file.save(path)?;
        }
        Ok((file, outcome))
    }

    /// Parse file content, converting out-of-date layouts.
    pub fn parse(content: &str, origin: &str) -> RepoResult<(Self, LoadOutcome)> {
        let parse_err = |source| RepoError::Parse {
            origin: origin.to_string(),
            source,
        };
        let value: serde_yaml::Value = serde_yaml::from_str(content).map_err(parse_err)?;

        let has_api_version = value
            .as_mapping()
            .is_some_and(|m| m.contains_key("apiVersion"));

        if has_api_version {
            let mut file: RepositoryFile = serde_yaml::from_value(value).map_err(parse_err)?;
            let mut outcome = LoadOutcome::Current;
            for entry in &mut file.repositories {
                if let Some(name) = absolute_cache_file_name(&entry.cache) {
                    entry.cache = name;
                    outcome = LoadOutcome::Migrated;
                }
            }
            return Ok((file, outcome));
        }

        let legacy = if value.is_null() {
            Vec::new()
        } else if value
            .as_mapping()
            .is_some_and(|m| m.contains_key("repositories"))
        {
            let legacy: LegacyFile = serde_yaml::from_value(value).map_err(parse_err)?;
            legacy.repositories
        } else {
            let map: BTreeMap<String, String> = serde_yaml::from_value(value).map_err(parse_err)?;
            map.into_iter()
                .map(|(name, url)| LegacyEntry {
                    name,
                    url,
                    cache: None,
                })
                .collect()
        };

        let mut file = RepositoryFile::new();
        for entry in legacy {
            if entry.name == LOCAL_REPOSITORY {
                file.local = Some(LocalRepository::default());
                continue;
            }
            let url = Url::parse(&entry.url).map_err(|e| RepoError::Invalid {
                name: entry.name.clone(),
                reason: format!("invalid url '{}': {}", entry.url, e),
            })?;
            let cache = entry
                .cache
                .map(|c| absolute_cache_file_name(&c).unwrap_or(c))
                .unwrap_or_else(|| default_cache_name(&entry.name));
            file.repositories
                .push(RepositoryEntry::new(entry.name, url).with_cache(cache));
        }
        Ok((file, LoadOutcome::Migrated))
    }

    pub fn save(&self, path: &Path) -> RepoResult<()> {
        let content = serde_yaml::to_string(self).map_err(|source| RepoError::Serialize {
            what: "repositories file",
            source,
        })?;
        write_atomic(path, content.as_bytes()).map_err(|source| RepoError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn get(&self, name: &str) -> Option<&RepositoryEntry> {
        self.repositories.iter().find(|r| r.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Register a new repository.
    pub fn add(&mut self, entry: RepositoryEntry) -> RepoResult<()> {
        entry.validate()?;
        if self.contains(&entry.name) {
            return Err(RepoError::Duplicate(entry.name));
        }
        self.repositories.push(entry);
        self.generated = Utc::now();
        Ok(())
    }

    /// Remove a repository. Returns `true` if it was registered.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.repositories.len();
        self.repositories.retain(|r| r.name != name);
        let removed = self.repositories.len() != before;
        if removed {
            self.generated = Utc::now();
        }
        removed
    }

    /// Local repository entry, if configured.
    pub fn local(&self) -> Option<&LocalRepository> {
        self.local.as_ref()
    }

    /// Point the local entry at `local`. Returns `true` if it changed.
    pub fn ensure_local(&mut self, local: LocalRepository) -> bool {
        if self.local.as_ref() == Some(&local) {
            return false;
        }
        self.local = Some(local);
        self.generated = Utc::now();
        true
    }
}

fn default_cache_name(name: &str) -> String {
    format!("{}-index.yaml", name)
}

/// Repository URL with a trailing slash so `join` appends instead of replacing.
pub(crate) fn base_url(url: &Url) -> Url {
    let mut base = url.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base
}

fn absolute_cache_file_name(cache: &str) -> Option<String> {
    let path = Path::new(cache);
    if !path.is_absolute() {
        return None;
    }
    path.file_name().map(|n| n.to_string_lossy().to_string())
}

fn ensure_relative_file(cache: &str) -> Result<(), String> {
    let path = Path::new(cache);
    if cache.is_empty() {
        return Err("cache must not be empty".to_string());
    }
    for component in path.components() {
        match component {
            Component::Normal(_) => {}
            Component::CurDir => {}
            Component::ParentDir => return Err("cache must not traverse upwards".to_string()),
            Component::Prefix(_) | Component::RootDir => {
                return Err("cache must be a relative path".to_string());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(name: &str) -> RepositoryEntry {
        RepositoryEntry::new(name, Url::parse("https://charts.example.com/stable").unwrap())
    }

    #[test]
    fn test_current_format_round_trips() {
        let mut file = RepositoryFile::new();
        file.add(entry("stable")).unwrap();
        file.ensure_local(LocalRepository::default());

        let content = serde_yaml::to_string(&file).unwrap();
        let (parsed, outcome) = RepositoryFile::parse(&content, "test").unwrap();
        assert_eq!(outcome, LoadOutcome::Current);
        assert_eq!(parsed, file);
    }

    #[test]
    fn test_legacy_flat_map_is_migrated() {
        let content = "stable: https://charts.example.com/stable\nlocal: http://127.0.0.1:8879\n";
        let (file, outcome) = RepositoryFile::parse(content, "test").unwrap();

        assert_eq!(outcome, LoadOutcome::Migrated);
        assert_eq!(file.api_version, API_VERSION);
        let stable = file.get("stable").unwrap();
        assert_eq!(stable.cache, "stable-index.yaml");
        assert_eq!(file.local(), Some(&LocalRepository::default()));
        assert!(!file.contains("local"));
    }

    #[test]
    fn test_legacy_list_with_absolute_cache_is_migrated() {
        let content = r#"
repositories:
  - name: stable
    url: https://charts.example.com/stable
    cache: /home/user/.helm/repository/cache/stable-index.yaml
"#;
        let (file, outcome) = RepositoryFile::parse(content, "test").unwrap();
        assert_eq!(outcome, LoadOutcome::Migrated);
        assert_eq!(file.get("stable").unwrap().cache, "stable-index.yaml");
    }

    #[test]
    fn test_absolute_cache_in_current_format_is_migrated() {
        let content = r#"
apiVersion: v1
generated: 2020-01-01T00:00:00Z
repositories:
  - name: stable
    url: https://charts.example.com/stable
    cache: /abs/path/stable-index.yaml
"#;
        let (file, outcome) = RepositoryFile::parse(content, "test").unwrap();
        assert_eq!(outcome, LoadOutcome::Migrated);
        assert_eq!(file.get("stable").unwrap().cache, "stable-index.yaml");
    }

    #[test]
    fn test_load_persists_migration() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("repositories.yaml");
        std::fs::write(&path, "stable: https://charts.example.com/stable\n").unwrap();

        let (_, first) = RepositoryFile::load_outcome(&path).unwrap();
        let (_, second) = RepositoryFile::load_outcome(&path).unwrap();

        assert_eq!(first, LoadOutcome::Migrated);
        assert_eq!(second, LoadOutcome::Current);
    }

    #[test]
    fn test_add_rejects_duplicates_and_reserved_names() {
        let mut file = RepositoryFile::new();
        file.add(entry("stable")).unwrap();

        assert!(matches!(
            file.add(entry("stable")),
            Err(RepoError::Duplicate(_))
        ));
        assert!(matches!(
            file.add(entry(LOCAL_REPOSITORY)),
            Err(RepoError::Invalid { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_traversal_in_cache() {
        let bad = entry("stable").with_cache("../escape.yaml");
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_index_url_appends_to_path() {
        let url = entry("stable").index_url().unwrap();
        assert_eq!(url.as_str(), "https://charts.example.com/stable/index.yaml");
    }

    #[test]
    fn test_remove() {
        let mut file = RepositoryFile::new();
        file.add(entry("stable")).unwrap();
        assert!(file.remove("stable"));
        assert!(!file.remove("stable"));
    }
}
