//! In-process release store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::store::{ReleaseStore, StoreError, StoreResult};
use super::Release;

/// Releases kept in memory; lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryReleaseStore {
    releases: RwLock<HashMap<String, Release>>,
}

impl MemoryReleaseStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReleaseStore for MemoryReleaseStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, name: &str) -> StoreResult<Release> {
        self.releases
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    async fn list(&self) -> StoreResult<Vec<Release>> {
        Ok(self.releases.read().await.values().cloned().collect())
    }

    async fn create(&self, release: &Release) -> StoreResult<()> {
        let mut releases = self.releases.write().await;
        if releases.contains_key(&release.name) {
            return Err(StoreError::Conflict(release.name.clone()));
        }
        releases.insert(release.name.clone(), release.clone());
        Ok(())
    }

    async fn update(&self, release: &Release) -> StoreResult<()> {
        let mut releases = self.releases.write().await;
        match releases.get_mut(&release.name) {
            Some(existing) => {
                *existing = release.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(release.name.clone())),
        }
    }
}
