//! Home directory layout.
//!
//! Every path Berth manages on disk is derived from a single home root:
//!
//! ```text
//! home/
//!   repositories.yaml
//!   repository/
//!     <repo>-index.yaml
//!     local/index.yaml
//!   cache/
//!     <repo>/<name>-<version>.tgz
//!   releases/
//! ```

use std::path::{Path, PathBuf};

use crate::repo::RepositoryEntry;

/// Environment variable overriding the default home root.
pub const HOME_ENV: &str = "BERTH_HOME";

/// Typed accessors for the managed paths below a home root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HomeLayout {
    root: PathBuf,
}

impl HomeLayout {
    /// Layout below `root`, made absolute against the current directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = std::path::absolute(&root).unwrap_or(root);
        Self { root }
    }

    /// Resolve the default home root.
    ///
    /// Uses `$BERTH_HOME` when set, otherwise `~/.berth`.
    pub fn default_root() -> anyhow::Result<PathBuf> {
        if let Some(path) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
            return Ok(PathBuf::from(path));
        }
        let home = dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))?;
        Ok(home.join(".berth"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn repositories_file(&self) -> PathBuf {
        self.root.join("repositories.yaml")
    }

    pub fn repository_dir(&self) -> PathBuf {
        self.root.join("repository")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    pub fn local_repository_dir(&self) -> PathBuf {
        self.repository_dir().join("local")
    }

    pub fn local_index(&self) -> PathBuf {
        self.local_repository_dir().join("index.yaml")
    }

    /// Cached index file for a registered repository.
    pub fn cache_index(&self, entry: &RepositoryEntry) -> PathBuf {
        self.repository_dir().join(&entry.cache)
    }

    /// Directory holding downloaded archives of one repository.
    pub fn archive_dir(&self, repository: &str) -> PathBuf {
        self.cache_dir().join(repository)
    }

    pub fn release_dir(&self) -> PathBuf {
        self.root.join("releases")
    }

    /// Directories that bootstrap creates, in creation order.
    pub fn managed_dirs(&self) -> [PathBuf; 4] {
        [
            self.root.clone(),
            self.repository_dir(),
            self.cache_dir(),
            self.local_repository_dir(),
        ]
    }
}
