//! Release records and the stores that persist them.
//!
//! A [`Release`] tracks one named deployment of a package into a target
//! cluster, including the revisions it went through.

pub mod cluster;
pub mod file;
pub mod memory;
pub mod store;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use cluster::{ClusterReleaseStore, OWNER_LABEL, RELEASE_OBJECT_PREFIX};
pub use file::FileReleaseStore;
pub use memory::MemoryReleaseStore;
pub use store::{ReleaseStore, StoreError, StoreResult};

/// Longest release name accepted; leaves room for suffixes on cluster objects.
pub const MAX_RELEASE_NAME_LEN: usize = 53;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseStatus {
    /// An install or upgrade is in flight
    Pending,
    Deployed,
    Failed,
    /// Replaced by a later revision after deploying successfully
    Superseded,
    /// Uninstalled from the cluster
    Removed,
}

impl fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReleaseStatus::Pending => "pending",
            ReleaseStatus::Deployed => "deployed",
            ReleaseStatus::Failed => "failed",
            ReleaseStatus::Superseded => "superseded",
            ReleaseStatus::Removed => "removed",
        };
        f.write_str(s)
    }
}

/// A past revision of a release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    pub revision: u32,
    pub version: String,
    pub status: ReleaseStatus,
    pub deployed_at: DateTime<Utc>,
    #[serde(default)]
    pub values: serde_json::Value,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Release {
    pub name: String,
    pub namespace: String,
    /// Package name without the repository prefix
    pub package: String,
    pub repository: String,
    pub version: String,
    pub revision: u32,
    pub status: ReleaseStatus,
    pub first_deployed: DateTime<Utc>,
    pub last_deployed: DateTime<Utc>,
    /// Effective values of the current revision
    #[serde(default)]
    pub values: serde_json::Value,
    /// Prior revisions, oldest first
    #[serde(default)]
    pub history: Vec<Revision>,
    #[serde(default)]
    pub description: String,
}

impl Release {
    /// A new release at revision 1, not yet deployed.
    pub fn pending(
        name: impl Into<String>,
        namespace: impl Into<String>,
        repository: impl Into<String>,
        package: impl Into<String>,
        version: impl Into<String>,
        values: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            namespace: namespace.into(),
            package: package.into(),
            repository: repository.into(),
            version: version.into(),
            revision: 1,
            status: ReleaseStatus::Pending,
            first_deployed: now,
            last_deployed: now,
            values,
            history: Vec::new(),
            description: "install".to_string(),
        }
    }

    /// `repository/package`
    pub fn package_ref(&self) -> String {
        format!("{}/{}", self.repository, self.package)
    }

    pub fn is_deployed(&self) -> bool {
        self.status == ReleaseStatus::Deployed
    }

    pub fn is_removed(&self) -> bool {
        self.status == ReleaseStatus::Removed
    }

    /// Start a new revision running `version`.
    ///
    /// The current revision moves to history, as `Superseded` if it was
    /// deployed. History beyond `max_history` entries is dropped oldest first;
    /// `0` keeps everything.
    pub fn begin_revision(
        &mut self,
        version: impl Into<String>,
        values: serde_json::Value,
        description: impl Into<String>,
        max_history: usize,
    ) {
        let status = match self.status {
            ReleaseStatus::Deployed => ReleaseStatus::Superseded,
            other => other,
        };
        self.history.push(Revision {
            revision: self.revision,
            version: std::mem::take(&mut self.version),
            status,
            deployed_at: self.last_deployed,
            values: std::mem::take(&mut self.values),
            description: std::mem::take(&mut self.description),
        });
        if max_history > 0 && self.history.len() > max_history {
            let excess = self.history.len() - max_history;
            self.history.drain(..excess);
        }

        if matches!(status, ReleaseStatus::Removed) {
            self.first_deployed = Utc::now();
        }
        self.revision += 1;
        self.version = version.into();
        self.values = values;
        self.description = description.into();
        self.status = ReleaseStatus::Pending;
        self.last_deployed = Utc::now();
    }

    pub fn mark_deployed(&mut self) {
        self.status = ReleaseStatus::Deployed;
        self.last_deployed = Utc::now();
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.status = ReleaseStatus::Failed;
        self.description = reason.into();
    }

    pub fn mark_removed(&mut self) {
        self.status = ReleaseStatus::Removed;
        self.description = "uninstalled".to_string();
    }

    /// Most recent prior revision that deployed successfully.
    pub fn last_good_revision(&self) -> Option<&Revision> {
        self.history
            .iter()
            .rev()
            .find(|r| r.status == ReleaseStatus::Superseded)
    }

    /// Every revision, oldest first, ending with the current one.
    pub fn revisions(&self) -> Vec<Revision> {
        let mut revisions = self.history.clone();
        revisions.push(Revision {
            revision: self.revision,
            version: self.version.clone(),
            status: self.status,
            deployed_at: self.last_deployed,
            values: self.values.clone(),
            description: self.description.clone(),
        });
        revisions
    }
}

/// Check a release name: lowercase alphanumerics and `-`, starting and
/// ending alphanumeric, at most [`MAX_RELEASE_NAME_LEN`] characters.
pub fn validate_release_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("release name must not be empty".to_string());
    }
    if name.len() > MAX_RELEASE_NAME_LEN {
        return Err(format!(
            "release name '{}' is longer than {} characters",
            name, MAX_RELEASE_NAME_LEN
        ));
    }
    let valid_char = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-';
    if !name.chars().all(valid_char) {
        return Err(format!(
            "release name '{}' may only contain lowercase letters, digits and '-'",
            name
        ));
    }
    if name.starts_with('-') || name.ends_with('-') {
        return Err(format!(
            "release name '{}' must start and end with a letter or digit",
            name
        ));
    }
    Ok(())
}
