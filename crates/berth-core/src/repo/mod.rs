//! Repository registration and index synchronisation
//!
//! Keeps `repositories.yaml` and the per-repository index caches in the home
//! directory current.

pub mod error;
pub mod file;
pub mod getter;
pub mod index;

use std::path::PathBuf;

pub use error::{RepoError, RepoResult};
pub use file::{
    LOCAL_REPOSITORY, LoadOutcome, LocalRepository, RepositoryEntry, RepositoryFile,
};
pub use getter::{FetchError, FileGetter, Getter, Getters, HttpGetter};
pub use index::{IndexEntry, IndexFile};

use crate::home::HomeLayout;

/// Download a repository's `index.yaml` into its cache file.
///
/// The downloaded bytes are parsed before anything is written, so a broken
/// remote index never replaces a good cached one.
pub async fn update_index(
    entry: &RepositoryEntry,
    layout: &HomeLayout,
    getters: &Getters,
) -> RepoResult<PathBuf> {
    let url = entry.index_url()?;
    let bytes = getters.get(&url).await.map_err(|source| RepoError::Fetch {
        name: entry.name.clone(),
        source,
    })?;
    let index = IndexFile::parse(&bytes, url.as_str())?;

    let path = layout.cache_index(entry);
    index.save(&path)?;
    tracing::info!(
        repository = %entry.name,
        packages = index.entries.len(),
        path = %path.display(),
        "repository index updated"
    );
    Ok(path)
}
