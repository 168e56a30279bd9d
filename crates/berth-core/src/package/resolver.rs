//! Package resolution against repository indices and the archive cache.

use std::path::{Path, PathBuf};

use url::Url;

use super::archive::{read_archive, write_archive};
use super::error::{ResolveError, ResolveResult};
use super::manifest::{Package, is_safe_segment};
use super::PackageRef;
use crate::fs::{digest_bytes, verify_digest, write_atomic};
use crate::home::HomeLayout;
use crate::repo::{
    Getters, IndexEntry, IndexFile, LOCAL_REPOSITORY, RepoError, RepositoryFile, update_index,
};
use crate::sync::{Deadline, KeyedLocks};
use crate::version::VersionConstraint;

/// Where a resolved package came from and where its archive lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageReference {
    pub repository: String,
    pub name: String,
    pub version: String,
    /// Absolute path of the cached archive
    pub archive_path: PathBuf,
    /// Digest of the cached archive
    pub digest: String,
}

#[derive(Debug, Clone)]
pub struct ResolvedPackage {
    pub reference: PackageReference,
    pub package: Package,
}

/// An index together with the URL its relative archive links resolve against.
struct ResolvedIndex {
    index: IndexFile,
    base_url: Url,
}

/// Resolves `(name, version)` requests to cached, parsed packages.
#[derive(Debug)]
pub struct Resolver {
    layout: HomeLayout,
    getters: Getters,
    default_repository: String,
    inflight: KeyedLocks,
}

impl Resolver {
    pub fn new(layout: HomeLayout, getters: Getters, default_repository: impl Into<String>) -> Self {
        Self {
            layout,
            getters,
            default_repository: default_repository.into(),
            inflight: KeyedLocks::new(),
        }
    }

    pub fn layout(&self) -> &HomeLayout {
        &self.layout
    }

    pub fn default_repository(&self) -> &str {
        &self.default_repository
    }

    /// Parse an addon name into a package reference.
    pub fn reference(&self, name: &str) -> ResolveResult<PackageRef> {
        PackageRef::parse(name, &self.default_repository)
    }

    /// Resolve a package and make sure its archive is cached.
    ///
    /// An empty `version` (or `latest`) selects the highest stable version.
    /// Remote calls made on the way run under `deadline`.
    pub async fn resolve(
        &self,
        name: &str,
        version: &str,
        deadline: &Deadline,
    ) -> ResolveResult<ResolvedPackage> {
        let package_ref = self.reference(name)?;
        let constraint = VersionConstraint::parse(version);
        let not_found = |reason: &'static str| ResolveError::NotFound {
            repository: package_ref.repository.clone(),
            name: package_ref.name.clone(),
            version: constraint.to_string(),
            reason,
        };

        let Some(resolved_index) = self.index_for(&package_ref.repository, deadline).await? else {
            return Err(not_found("repository is not registered"));
        };
        let entry = match resolved_index.index.find(&package_ref.name, &constraint) {
            Some(entry) => entry.clone(),
            None if resolved_index.index.contains(&package_ref.name) => {
                return Err(not_found("no published version matches"));
            }
            None => return Err(not_found("package is not in the repository index")),
        };
        if entry.name != package_ref.name {
            return Err(ResolveError::malformed(
                format!("{}@{}", package_ref, entry.version),
                format!("index entry is named '{}'", entry.name),
            ));
        }
        if !is_safe_segment(&entry.version) {
            return Err(ResolveError::malformed(
                format!("{}@{}", package_ref, entry.version),
                "index version cannot name a cache file",
            ));
        }

        // Only validated segments reach the cache path
        let archive_path = self
            .layout
            .archive_dir(&package_ref.repository)
            .join(format!("{}-{}.tgz", package_ref.name, entry.version));

        let key = format!("{}@{}", package_ref, entry.version);
        let _guard = deadline
            .run(self.inflight.lock(&key))
            .await
            .map_err(|_| ResolveError::Timeout)?;

        let bytes = match cached_archive(&archive_path, &entry) {
            Some(bytes) => {
                tracing::debug!(package = %key, path = %archive_path.display(), "using cached archive");
                bytes
            }
            None => {
                self.download(&entry, &resolved_index.base_url, &archive_path, deadline)
                    .await?
            }
        };

        let origin = archive_path.display().to_string();
        let package = read_archive(&bytes, &origin)?;
        if package.name() != package_ref.name {
            return Err(ResolveError::malformed(
                origin,
                format!("manifest names '{}', expected '{}'", package.name(), package_ref.name),
            ));
        }
        if package.version() != entry.version {
            return Err(ResolveError::malformed(
                origin,
                format!(
                    "manifest version '{}' does not match index version '{}'",
                    package.version(),
                    entry.version
                ),
            ));
        }

        Ok(ResolvedPackage {
            reference: PackageReference {
                repository: package_ref.repository,
                name: package_ref.name,
                version: entry.version,
                archive_path,
                digest: digest_bytes(&bytes),
            },
            package,
        })
    }

    /// Add a package to the local repository and its index.
    pub fn add_local(&self, package: &Package) -> ResolveResult<IndexEntry> {
        package
            .manifest
            .validate()
            .map_err(|reason| ResolveError::malformed(package.name(), reason))?;

        let repositories = RepositoryFile::load(&self.layout.repositories_file())?;
        let local = repositories.local().cloned().unwrap_or_default();
        let index_path = self.layout.repository_dir().join(&local.index);
        let dir = index_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.layout.local_repository_dir());

        let file_name = format!("{}-{}.tgz", package.name(), package.version());
        let archive_path = dir.join(&file_name);
        let bytes = write_archive(package).map_err(|source| ResolveError::Io {
            path: archive_path.clone(),
            source,
        })?;
        write_atomic(&archive_path, &bytes).map_err(|source| ResolveError::Io {
            path: archive_path.clone(),
            source,
        })?;

        let mut index = load_index_or_empty(&index_path)?;
        let mut entry = IndexEntry::new(package.name(), package.version())
            .with_url(file_name)
            .with_digest(digest_bytes(&bytes));
        entry.description = package.manifest.description.clone();
        entry.app_version = package.manifest.app_version.clone();
        index.add(entry.clone());
        index.save(&index_path)?;

        tracing::info!(
            package = %package.name(),
            version = %package.version(),
            path = %archive_path.display(),
            "added package to local repository"
        );
        Ok(entry)
    }

    /// Load the index of `repository`, refreshing a missing remote cache once.
    async fn index_for(
        &self,
        repository: &str,
        deadline: &Deadline,
    ) -> ResolveResult<Option<ResolvedIndex>> {
        let repositories = RepositoryFile::load(&self.layout.repositories_file())?;

        if repository == LOCAL_REPOSITORY {
            let Some(local) = repositories.local() else {
                return Ok(None);
            };
            let index_path = self.layout.repository_dir().join(&local.index);
            let dir = index_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| self.layout.local_repository_dir());
            let base_url = Url::from_directory_path(&dir).map_err(|_| {
                ResolveError::malformed(dir.display().to_string(), "not an absolute path")
            })?;
            return Ok(Some(ResolvedIndex {
                index: load_index_or_empty(&index_path)?,
                base_url,
            }));
        }

        let Some(entry) = repositories.get(repository) else {
            return Ok(None);
        };
        let index_path = self.layout.cache_index(entry);
        if !index_path.exists() {
            tracing::info!(repository, "index cache missing; refreshing");
            match deadline
                .run(update_index(entry, &self.layout, &self.getters))
                .await
            {
                Ok(Ok(_)) => {}
                Ok(Err(RepoError::Fetch { source, .. })) => {
                    return Err(ResolveError::DownloadFailed {
                        url: entry.url.to_string(),
                        reason: source.to_string(),
                    });
                }
                Ok(Err(err)) => return Err(err.into()),
                Err(_) => return Err(ResolveError::Timeout),
            }
        }

        Ok(Some(ResolvedIndex {
            index: IndexFile::load(&index_path)?,
            base_url: entry.url.clone(),
        }))
    }

    async fn download(
        &self,
        entry: &IndexEntry,
        base_url: &Url,
        archive_path: &Path,
        deadline: &Deadline,
    ) -> ResolveResult<Vec<u8>> {
        let url = match entry.archive_url(base_url) {
            Some(Ok(url)) => url,
            Some(Err(e)) => {
                return Err(ResolveError::DownloadFailed {
                    url: entry.urls.first().cloned().unwrap_or_default(),
                    reason: e.to_string(),
                });
            }
            None => {
                return Err(ResolveError::DownloadFailed {
                    url: format!("{}@{}", entry.name, entry.version),
                    reason: "index entry lists no download URL".to_string(),
                });
            }
        };

        let bytes = deadline
            .run(self.getters.get(&url))
            .await
            .map_err(|_| ResolveError::Timeout)?
            .map_err(|e| ResolveError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        if let Some(expected) = &entry.digest {
            if !verify_digest(&bytes, expected) {
                return Err(ResolveError::DownloadFailed {
                    url: url.to_string(),
                    reason: format!("digest mismatch (expected {})", expected),
                });
            }
        }

        write_atomic(archive_path, &bytes).map_err(|source| ResolveError::Io {
            path: archive_path.to_path_buf(),
            source,
        })?;
        tracing::info!(
            %url,
            path = %archive_path.display(),
            bytes = bytes.len(),
            "downloaded package archive"
        );
        Ok(bytes)
    }
}

/// Cached archive bytes, if present and consistent with the index digest.
fn cached_archive(path: &Path, entry: &IndexEntry) -> Option<Vec<u8>> {
    let bytes = std::fs::read(path).ok()?;
    match &entry.digest {
        Some(expected) if !verify_digest(&bytes, expected) => {
            tracing::warn!(path = %path.display(), "cached archive digest mismatch; downloading again");
            None
        }
        _ => Some(bytes),
    }
}

fn load_index_or_empty(path: &Path) -> ResolveResult<IndexFile> {
    if path.exists() {
        Ok(IndexFile::load(path)?)
    } else {
        Ok(IndexFile::empty())
    }
}
