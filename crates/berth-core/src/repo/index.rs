//! Repository index files.
//!
//! An index maps package names to the versions a repository publishes and
//! where each archive can be downloaded.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use super::error::{RepoError, RepoResult};
use super::file::{API_VERSION, base_url};
use crate::fs::write_atomic;
use crate::version::{VersionConstraint, compare_versions, is_prerelease};

/// One published version of a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub name: String,
    pub version: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    #[serde(
        default,
        rename = "appVersion",
        skip_serializing_if = "Option::is_none"
    )]
    pub app_version: Option<String>,

    /// Archive locations; relative entries resolve against the repository URL
    #[serde(default)]
    pub urls: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
}

impl IndexEntry {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: String::new(),
            app_version: None,
            urls: Vec::new(),
            digest: None,
            created: Some(Utc::now()),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.urls.push(url.into());
        self
    }

    pub fn with_digest(mut self, digest: impl Into<String>) -> Self {
        self.digest = Some(digest.into());
        self
    }

    /// Resolve the first archive URL against the repository base URL.
    pub fn archive_url(&self, repository_url: &Url) -> Option<Result<Url, url::ParseError>> {
        let first = self.urls.first()?;
        Some(match Url::parse(first) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => base_url(repository_url).join(first),
            Err(e) => Err(e),
        })
    }
}

/// Parsed `index.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexFile {
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    pub generated: DateTime<Utc>,

    #[serde(default)]
    pub entries: BTreeMap<String, Vec<IndexEntry>>,
}

impl Default for IndexFile {
    fn default() -> Self {
        Self::empty()
    }
}

impl IndexFile {
    pub fn empty() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            generated: Utc::now(),
            entries: BTreeMap::new(),
        }
    }

    pub fn load(path: &Path) -> RepoResult<Self> {
        let bytes = std::fs::read(path).map_err(|source| RepoError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&bytes, &path.display().to_string())
    }

    /// Parse index bytes and sort every version list newest first.
    pub fn parse(bytes: &[u8], origin: &str) -> RepoResult<Self> {
        let mut index: IndexFile =
            serde_yaml::from_slice(bytes).map_err(|source| RepoError::Parse {
                origin: origin.to_string(),
                source,
            })?;
        index.sort_entries();
        Ok(index)
    }

    pub fn save(&self, path: &Path) -> RepoResult<()> {
        let content = serde_yaml::to_string(self).map_err(|source| RepoError::Serialize {
            what: "index",
            source,
        })?;
        write_atomic(path, content.as_bytes()).map_err(|source| RepoError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Add an entry, replacing an existing entry of the same version.
    pub fn add(&mut self, entry: IndexEntry) {
        let versions = self.entries.entry(entry.name.clone()).or_default();
        versions.retain(|e| e.version != entry.version);
        versions.push(entry);
        versions.sort_by(|a, b| compare_versions(&b.version, &a.version));
        self.generated = Utc::now();
    }

    pub fn sort_entries(&mut self) {
        for versions in self.entries.values_mut() {
            versions.sort_by(|a, b| compare_versions(&b.version, &a.version));
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.get(name).is_some_and(|v| !v.is_empty())
    }

    /// Highest version of `name` satisfying `constraint`.
    ///
    /// `Latest` prefers stable releases and only falls back to a pre-release
    /// when nothing stable is published.
    pub fn find(&self, name: &str, constraint: &VersionConstraint) -> Option<&IndexEntry> {
        let versions = self.entries.get(name)?;
        let mut candidates = versions.iter().filter(|e| constraint.matches(&e.version));

        if constraint.is_latest() {
            let all: Vec<&IndexEntry> = candidates.collect();
            return all
                .iter()
                .copied()
                .find(|e| !is_prerelease(&e.version))
                .or_else(|| all.first().copied());
        }

        // Lists are kept newest first
        candidates.next()
    }

    /// Published versions of `name`, newest first.
    pub fn versions(&self, name: &str) -> Vec<&str> {
        self.entries
            .get(name)
            .map(|v| v.iter().map(|e| e.version.as_str()).collect())
            .unwrap_or_default()
    }

    /// Latest entry of every package whose name or description contains `term`.
    pub fn search(&self, term: &str) -> Vec<&IndexEntry> {
        let term = term.to_lowercase();
        self.entries
            .values()
            .filter_map(|versions| versions.first())
            .filter(|e| {
                term.is_empty()
                    || e.name.to_lowercase().contains(&term)
                    || e.description.to_lowercase().contains(&term)
            })
            .collect()
    }
}
