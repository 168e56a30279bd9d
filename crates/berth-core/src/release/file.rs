//! Release store backed by JSON files, one per release.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::store::{ReleaseStore, StoreError, StoreResult};
use super::Release;
use crate::fs::write_atomic;

/// Stores each release as `<dir>/<name>.json`.
#[derive(Debug)]
pub struct FileReleaseStore {
    dir: PathBuf,
    /// Serializes existence checks with the writes that follow them
    write_lock: Mutex<()>,
}

impl FileReleaseStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", name))
    }

    async fn read(&self, path: &Path) -> StoreResult<Option<Release>> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(StoreError::backend(
                    format!("failed to read {}", path.display()),
                    err,
                ));
            }
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::backend(format!("failed to parse {}", path.display()), e))
    }

    /// Atomic write on the blocking pool; the rename keeps readers off partial files.
    async fn write(&self, release: &Release) -> StoreResult<()> {
        let path = self.path_for(&release.name);
        let content = serde_json::to_vec_pretty(release)
            .map_err(|e| StoreError::backend("failed to serialize release", e))?;
        let context = format!("failed to write {}", path.display());
        tokio::task::spawn_blocking(move || write_atomic(&path, &content))
            .await
            .map_err(|e| StoreError::backend(context.clone(), e))?
            .map_err(|e| StoreError::backend(context, e))
    }
}

#[async_trait]
impl ReleaseStore for FileReleaseStore {
    fn backend(&self) -> &'static str {
        "file"
    }

    async fn get(&self, name: &str) -> StoreResult<Release> {
        self.read(&self.path_for(name))
            .await?
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    async fn list(&self) -> StoreResult<Vec<Release>> {
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(StoreError::backend(
                    format!("failed to list {}", self.dir.display()),
                    err,
                ));
            }
        };

        let mut releases = Vec::new();
        loop {
            let entry = dir.next_entry().await.map_err(|e| {
                StoreError::backend(format!("failed to list {}", self.dir.display()), e)
            })?;
            let Some(entry) = entry else {
                break;
            };
            let file_name = entry.file_name().to_string_lossy().to_string();
            // Skip in-flight temporary files
            if file_name.starts_with('.') || !file_name.ends_with(".json") {
                continue;
            }
            if let Some(release) = self.read(&entry.path()).await? {
                releases.push(release);
            }
        }
        Ok(releases)
    }

    async fn create(&self, release: &Release) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        if self.read(&self.path_for(&release.name)).await?.is_some() {
            return Err(StoreError::Conflict(release.name.clone()));
        }
        self.write(release).await
    }

    async fn update(&self, release: &Release) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        if self.read(&self.path_for(&release.name)).await?.is_none() {
            return Err(StoreError::NotFound(release.name.clone()));
        }
        self.write(release).await
    }
}
