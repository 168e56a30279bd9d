//! Home directory bootstrap.
//!
//! Brings a home root into the state every other component assumes: the
//! managed directories exist, `repositories.yaml` is present and current, and
//! the local repository has an index. Safe to run repeatedly; a second run on
//! a bootstrapped home changes nothing on disk.
//!
//! Only one process may bootstrap a given home at a time. There is no
//! cross-process locking.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::fs::{NodeKind, node_kind};
use crate::home::HomeLayout;
use crate::repo::{
    Getters, IndexFile, LoadOutcome, LocalRepository, RepoError, RepositoryEntry, RepositoryFile,
    update_index,
};

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("{} exists but is not a {expected}", path.display())]
    WrongKind { path: PathBuf, expected: NodeKind },

    #[error("failed to prepare {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Repository(#[from] RepoError),
}

/// What a bootstrap run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    pub created_dirs: Vec<PathBuf>,
    pub seeded_repositories: bool,
    pub migrated_repositories: bool,
    pub created_local_index: bool,
    /// Seed index download outcome; `None` when no download was attempted
    pub seed_index_fetched: Option<bool>,
}

impl BootstrapReport {
    /// Whether the run left the home exactly as it found it.
    pub fn is_noop(&self) -> bool {
        self.created_dirs.is_empty()
            && !self.seeded_repositories
            && !self.migrated_repositories
            && !self.created_local_index
    }
}

/// Ensure the home layout exists.
///
/// `seed` is registered when `repositories.yaml` does not exist yet, after
/// which its index is downloaded within `budget`. A failed or timed out
/// download is logged and does not fail the bootstrap.
pub async fn ensure(
    layout: &HomeLayout,
    seed: &RepositoryEntry,
    getters: &Getters,
    budget: Duration,
) -> Result<BootstrapReport, BootstrapError> {
    let mut report = BootstrapReport::default();

    for dir in layout.managed_dirs() {
        if ensure_dir(&dir)? {
            tracing::debug!(path = %dir.display(), "created directory");
            report.created_dirs.push(dir);
        }
    }

    let repositories_path = layout.repositories_file();
    let mut repositories = if expect_kind(&repositories_path, NodeKind::File)? {
        let (file, outcome) = RepositoryFile::load_outcome(&repositories_path)?;
        report.migrated_repositories = outcome == LoadOutcome::Migrated;
        file
    } else {
        let mut file = RepositoryFile::new();
        file.add(seed.clone())?;
        file.save(&repositories_path)?;
        tracing::info!(
            path = %repositories_path.display(),
            repository = %seed.name,
            "created repositories file"
        );
        report.seeded_repositories = true;
        file
    };

    let local_index = layout.local_index();
    if !expect_kind(&local_index, NodeKind::File)? {
        IndexFile::empty().save(&local_index)?;
        tracing::debug!(path = %local_index.display(), "created local index");
        report.created_local_index = true;
    }

    if repositories.ensure_local(LocalRepository::default()) {
        repositories.save(&repositories_path)?;
        tracing::debug!("registered local repository");
    }

    if report.seeded_repositories {
        report.seed_index_fetched = Some(fetch_seed_index(layout, seed, getters, budget).await);
    }

    Ok(report)
}

async fn fetch_seed_index(
    layout: &HomeLayout,
    seed: &RepositoryEntry,
    getters: &Getters,
    budget: Duration,
) -> bool {
    match tokio::time::timeout(budget, update_index(seed, layout, getters)).await {
        Ok(Ok(_)) => true,
        Ok(Err(err)) => {
            tracing::warn!(
                repository = %seed.name,
                error = %err,
                "could not download repository index; continuing without it"
            );
            false
        }
        Err(_) => {
            tracing::warn!(
                repository = %seed.name,
                timeout_secs = budget.as_secs(),
                "repository index download timed out; continuing without it"
            );
            false
        }
    }
}

/// Create `dir` if missing. Returns `true` when it was created.
fn ensure_dir(dir: &Path) -> Result<bool, BootstrapError> {
    if expect_kind(dir, NodeKind::Directory)? {
        return Ok(false);
    }
    std::fs::create_dir_all(dir).map_err(|source| BootstrapError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    Ok(true)
}

/// Returns `true` if `path` exists with the expected kind, `false` if absent.
fn expect_kind(path: &Path, expected: NodeKind) -> Result<bool, BootstrapError> {
    match node_kind(path) {
        Ok(None) => Ok(false),
        Ok(Some(kind)) if kind == expected => Ok(true),
        Ok(Some(_)) => Err(BootstrapError::WrongKind {
            path: path.to_path_buf(),
            expected,
        }),
        Err(source) => Err(BootstrapError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;
    use url::Url;

    use crate::repo::{FileGetter, IndexEntry};

    fn getters() -> Getters {
        Getters::new().with(Arc::new(FileGetter))
    }

    fn unreachable_seed(tmp: &TempDir) -> RepositoryEntry {
        let url = Url::from_directory_path(tmp.path().join("nowhere")).unwrap();
        RepositoryEntry::new("stable", url)
    }

    #[tokio::test]
    async fn test_fresh_home_with_unreachable_seed() {
        let tmp = TempDir::new().unwrap();
        let layout = HomeLayout::new(tmp.path().join("home"));
        let seed = unreachable_seed(&tmp);

        let report = ensure(&layout, &seed, &getters(), Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(report.created_dirs.len(), 4);
        assert!(report.seeded_repositories);
        assert_eq!(report.seed_index_fetched, Some(false));
        for dir in layout.managed_dirs() {
            assert!(dir.is_dir(), "{} should exist", dir.display());
        }

        let repositories = RepositoryFile::load(&layout.repositories_file()).unwrap();
        assert_eq!(repositories.repositories.len(), 1);
        assert_eq!(repositories.repositories[0].name, "stable");
        assert_eq!(repositories.local(), Some(&LocalRepository::default()));

        let local = IndexFile::load(&layout.local_index()).unwrap();
        assert!(local.entries.is_empty());
        assert!(!layout.cache_index(&seed).exists());
    }

    #[tokio::test]
    async fn test_second_run_changes_nothing() {
        let tmp = TempDir::new().unwrap();
        let layout = HomeLayout::new(tmp.path().join("home"));
        let seed = unreachable_seed(&tmp);

        ensure(&layout, &seed, &getters(), Duration::from_secs(5))
            .await
            .unwrap();
        let before = std::fs::read(layout.repositories_file()).unwrap();
        let local_before = std::fs::read(layout.local_index()).unwrap();

        let report = ensure(&layout, &seed, &getters(), Duration::from_secs(5))
            .await
            .unwrap();

        assert!(report.is_noop());
        assert_eq!(report.seed_index_fetched, None);
        assert_eq!(std::fs::read(layout.repositories_file()).unwrap(), before);
        assert_eq!(std::fs::read(layout.local_index()).unwrap(), local_before);
    }

    #[tokio::test]
    async fn test_reachable_seed_index_is_cached() {
        let tmp = TempDir::new().unwrap();
        let remote = tmp.path().join("remote");
        std::fs::create_dir_all(&remote).unwrap();
        let mut index = IndexFile::empty();
        index.add(IndexEntry::new("echo", "0.1.0").with_url("echo-0.1.0.tgz"));
        index.save(&remote.join("index.yaml")).unwrap();

        let layout = HomeLayout::new(tmp.path().join("home"));
        let seed = RepositoryEntry::new("stable", Url::from_directory_path(&remote).unwrap());

        let report = ensure(&layout, &seed, &getters(), Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(report.seed_index_fetched, Some(true));
        assert!(IndexFile::load(&layout.cache_index(&seed)).unwrap().contains("echo"));
    }

    #[tokio::test]
    async fn test_file_in_place_of_directory_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let layout = HomeLayout::new(tmp.path().join("home"));
        std::fs::create_dir_all(layout.root()).unwrap();
        std::fs::write(layout.cache_dir(), "not a directory").unwrap();

        let err = ensure(&layout, &unreachable_seed(&tmp), &getters(), Duration::from_secs(5))
            .await
            .unwrap_err();

        match err {
            BootstrapError::WrongKind { path, expected } => {
                assert_eq!(path, layout.cache_dir());
                assert_eq!(expected, NodeKind::Directory);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_directory_in_place_of_repositories_file_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let layout = HomeLayout::new(tmp.path().join("home"));
        std::fs::create_dir_all(layout.repositories_file()).unwrap();

        let err = ensure(&layout, &unreachable_seed(&tmp), &getters(), Duration::from_secs(5))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            BootstrapError::WrongKind {
                expected: NodeKind::File,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_legacy_repositories_file_is_migrated() {
        let tmp = TempDir::new().unwrap();
        let layout = HomeLayout::new(tmp.path().join("home"));
        std::fs::create_dir_all(layout.root()).unwrap();
        std::fs::write(
            layout.repositories_file(),
            "stable: https://charts.example.com/stable\n",
        )
        .unwrap();

        let report = ensure(&layout, &unreachable_seed(&tmp), &getters(), Duration::from_secs(5))
            .await
            .unwrap();

        assert!(report.migrated_repositories);
        assert!(!report.seeded_repositories);
        let content = std::fs::read_to_string(layout.repositories_file()).unwrap();
        assert!(content.contains("apiVersion: v1"));
        assert!(content.contains("local/index.yaml"));
    }
}
