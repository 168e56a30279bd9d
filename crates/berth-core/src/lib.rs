//! Berth Core Library
//!
//! Installs, tracks, updates and removes versioned packages ("addons") on
//! remote clusters, backed by a local package cache and a pluggable release
//! store.

pub mod addon;
pub mod bootstrap;
pub mod cluster;
pub mod config;
pub mod fs;
pub mod home;
pub mod orchestration;
pub mod package;
pub mod release;
pub mod repo;
pub mod sync;
pub mod version;

/// Re-exports of commonly used types
pub mod prelude {
    // Addons
    pub use crate::addon::Addon;
    pub use crate::orchestration::{AddonError, AddonManager, open_store};

    // Configuration
    pub use crate::config::{ConfigStore, ManagerConfig, StoreBackend, Timeouts};
    pub use crate::home::HomeLayout;

    // Cluster capabilities
    pub use crate::cluster::{
        ClusterError, DeployRequest, DeployedRelease, ObjectStore, StoredObject, TargetCluster,
    };

    // Releases
    pub use crate::release::{
        ClusterReleaseStore, FileReleaseStore, MemoryReleaseStore, Release, ReleaseStatus,
        ReleaseStore, Revision, StoreError,
    };

    // Repositories and packages
    pub use crate::package::{Package, PackageManifest, ResolveError, Resolver};
    pub use crate::repo::{Getters, IndexEntry, IndexFile, RepositoryEntry, RepositoryFile};

    // Version
    pub use crate::version::VersionConstraint;
}
