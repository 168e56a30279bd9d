//! Errors returned by addon lifecycle operations.

use thiserror::Error;

use crate::bootstrap::BootstrapError;
use crate::cluster::ClusterError;
use crate::package::ResolveError;
use crate::release::StoreError;

#[derive(Debug, Error)]
pub enum AddonError {
    #[error("invalid addon: {0}")]
    InvalidAddon(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("bootstrap failed: {0}")]
    Bootstrap(#[from] BootstrapError),

    #[error("package resolution failed: {0}")]
    Resolution(#[from] ResolveError),

    #[error("install of release '{release}' rejected: {source}")]
    InstallRejected {
        release: String,
        #[source]
        source: ClusterError,
    },

    #[error("upgrade of release '{release}' rejected: {source}")]
    UpgradeRejected {
        release: String,
        #[source]
        source: ClusterError,
    },

    #[error("uninstall of release '{release}' rejected: {source}")]
    UninstallRejected {
        release: String,
        #[source]
        source: ClusterError,
    },

    #[error("cluster query failed: {0}")]
    Cluster(#[source] ClusterError),

    #[error("release store: {0}")]
    Store(#[from] StoreError),

    #[error("release '{release}' is already deployed ({detail})")]
    AlreadyDeployed { release: String, detail: String },

    #[error("release '{0}' is not installed")]
    NotInstalled(String),

    #[error("release '{0}' has no earlier deployed revision")]
    NoPriorRevision(String),

    #[error("{operation} timed out")]
    Timeout { operation: &'static str },
}

impl AddonError {
    /// Whether the caller may retry the same request after backing off.
    pub fn is_transient(&self) -> bool {
        match self {
            AddonError::Timeout { .. } => true,
            AddonError::Resolution(err) => err.is_transient(),
            AddonError::InstallRejected { source, .. }
            | AddonError::UpgradeRejected { source, .. }
            | AddonError::UninstallRejected { source, .. }
            | AddonError::Cluster(source) => source.is_transient(),
            AddonError::Store(StoreError::Backend { .. }) => true,
            _ => false,
        }
    }

    /// Whether the request conflicts with what is already deployed.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            AddonError::AlreadyDeployed { .. } | AddonError::Store(StoreError::Conflict(_))
        )
    }
}
