//! Release store kept as labelled objects on the target cluster.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::store::{ReleaseStore, StoreError, StoreResult};
use super::Release;
use crate::cluster::{ClusterError, ObjectStore, StoredObject};

pub const RELEASE_OBJECT_PREFIX: &str = "berth.release.";
pub const OWNER_LABEL: &str = "owner";
const OWNER: &str = "berth";
const NAME_LABEL: &str = "name";
const STATUS_LABEL: &str = "status";
const REVISION_LABEL: &str = "revision";
const RELEASE_KEY: &str = "release";

/// One object per release in a fixed namespace, named
/// `berth.release.<name>` and labelled `owner=berth`.
pub struct ClusterReleaseStore {
    objects: Arc<dyn ObjectStore>,
    namespace: String,
}

impl std::fmt::Debug for ClusterReleaseStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterReleaseStore")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl ClusterReleaseStore {
    pub fn new(objects: Arc<dyn ObjectStore>, namespace: impl Into<String>) -> Self {
        Self {
            objects,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn object_name(name: &str) -> String {
        format!("{}{}", RELEASE_OBJECT_PREFIX, name)
    }

    fn encode(release: &Release) -> StoreResult<StoredObject> {
        let data = serde_json::to_string(release)
            .map_err(|e| StoreError::backend("failed to serialize release", e))?;
        Ok(StoredObject::new(Self::object_name(&release.name))
            .with_label(OWNER_LABEL, OWNER)
            .with_label(NAME_LABEL, release.name.clone())
            .with_label(STATUS_LABEL, release.status.to_string())
            .with_label(REVISION_LABEL, release.revision.to_string())
            .with_data(RELEASE_KEY, data))
    }

    fn decode(object: &StoredObject) -> StoreResult<Release> {
        let data = object.data.get(RELEASE_KEY).ok_or_else(|| {
            StoreError::backend(
                format!("object {} is not a release record", object.name),
                "missing release data",
            )
        })?;
        serde_json::from_str(data)
            .map_err(|e| StoreError::backend(format!("failed to parse object {}", object.name), e))
    }

    fn cluster_error(&self, action: &str, err: ClusterError) -> StoreError {
        StoreError::backend(
            format!("failed to {} in namespace {}", action, self.namespace),
            err,
        )
    }
}

#[async_trait]
impl ReleaseStore for ClusterReleaseStore {
    fn backend(&self) -> &'static str {
        "cluster"
    }

    async fn get(&self, name: &str) -> StoreResult<Release> {
        let object = self
            .objects
            .get(&self.namespace, &Self::object_name(name))
            .await
            .map_err(|e| self.cluster_error("get release", e))?
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        Self::decode(&object)
    }

    async fn list(&self) -> StoreResult<Vec<Release>> {
        let selector = BTreeMap::from([(OWNER_LABEL.to_string(), OWNER.to_string())]);
        let objects = self
            .objects
            .list(&self.namespace, &selector)
            .await
            .map_err(|e| self.cluster_error("list releases", e))?;
        objects.iter().map(Self::decode).collect()
    }

    async fn create(&self, release: &Release) -> StoreResult<()> {
        let object = Self::encode(release)?;
        match self.objects.create(&self.namespace, object).await {
            Ok(()) => Ok(()),
            Err(ClusterError::AlreadyExists(_)) => Err(StoreError::Conflict(release.name.clone())),
            Err(e) => Err(self.cluster_error("create release", e)),
        }
    }

    async fn update(&self, release: &Release) -> StoreResult<()> {
        let object = Self::encode(release)?;
        match self.objects.replace(&self.namespace, object).await {
            Ok(()) => Ok(()),
            Err(ClusterError::NotFound(_)) => Err(StoreError::NotFound(release.name.clone())),
            Err(e) => Err(self.cluster_error("update release", e)),
        }
    }
}
