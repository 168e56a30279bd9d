//! Capabilities of the target cluster.
//!
//! The manager never talks to a cluster API directly. Callers supply a
//! [`TargetCluster`] that applies rendered packages, and optionally an
//! [`ObjectStore`] for keeping release records on the cluster itself.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClusterError {
    #[error("rejected by cluster: {0}")]
    Rejected(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("cluster unavailable: {0}")]
    Unavailable(String),
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound(_))
    }

    /// Whether the same call may succeed later.
    pub fn is_transient(&self) -> bool {
        matches!(self, ClusterError::Unavailable(_))
    }
}

/// A rendered package to apply under a release name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployRequest {
    pub release_name: String,
    pub namespace: String,
    pub package: String,
    pub version: String,
    pub values: serde_json::Value,
    /// Rendered resource manifests keyed by template name
    pub manifests: BTreeMap<String, String>,
}

/// A release the cluster reports as present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployedRelease {
    pub name: String,
    pub namespace: String,
    pub version: String,
}

/// Applies and removes releases on a remote cluster.
#[async_trait]
pub trait TargetCluster: Send + Sync {
    /// Create a release. Fails with `AlreadyExists` if the name is taken.
    async fn install(&self, request: &DeployRequest) -> Result<(), ClusterError>;

    /// Replace the resources of an existing release.
    async fn upgrade(&self, request: &DeployRequest) -> Result<(), ClusterError>;

    /// Remove a release. Fails with `NotFound` if it does not exist.
    async fn uninstall(&self, namespace: &str, release: &str) -> Result<(), ClusterError>;

    async fn list(&self) -> Result<Vec<DeployedRelease>, ClusterError>;
}

/// A small labelled key/value object kept on the cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl StoredObject {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Whether every `selector` label is present with the same value.
    pub fn matches(&self, selector: &BTreeMap<String, String>) -> bool {
        selector
            .iter()
            .all(|(key, value)| self.labels.get(key) == Some(value))
    }
}

/// Namespaced object storage on the target cluster.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<StoredObject>, ClusterError>;

    /// Objects whose labels contain every entry of `selector`.
    async fn list(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<StoredObject>, ClusterError>;

    /// Fails with `AlreadyExists` if the name is taken.
    async fn create(&self, namespace: &str, object: StoredObject) -> Result<(), ClusterError>;

    /// Fails with `NotFound` if the object does not exist.
    async fn replace(&self, namespace: &str, object: StoredObject) -> Result<(), ClusterError>;
}
