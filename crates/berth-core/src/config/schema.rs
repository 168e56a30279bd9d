//! Configuration schema for berth.toml

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::home::HomeLayout;
use crate::repo::RepositoryEntry;

pub const DEFAULT_REPOSITORY_NAME: &str = "stable";
pub const DEFAULT_REPOSITORY_URL: &str = "https://charts.helm.sh/stable";
pub const DEFAULT_RELEASE_NAMESPACE: &str = "kube-system";
pub const DEFAULT_MAX_HISTORY: usize = 10;

/// Root configuration for an addon manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Home root; `None` uses `$BERTH_HOME` or `~/.berth`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub home: Option<PathBuf>,

    /// Repository used for addon names without a `repo/` prefix
    pub default_repository: String,

    /// Repository seeded into a fresh `repositories.yaml`
    pub stable_repository: SeedRepository,

    pub store: StoreConfig,

    pub timeouts: Timeouts,

    /// Prior revisions kept per release
    pub max_history: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            home: None,
            default_repository: DEFAULT_REPOSITORY_NAME.to_string(),
            stable_repository: SeedRepository::default(),
            store: StoreConfig::default(),
            timeouts: Timeouts::default(),
            max_history: DEFAULT_MAX_HISTORY,
        }
    }
}

impl ManagerConfig {
    /// Configuration rooted at an explicit home directory.
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        Self {
            home: Some(home.into()),
            ..Self::default()
        }
    }

    pub fn layout(&self) -> anyhow::Result<HomeLayout> {
        let root = match &self.home {
            Some(home) => home.clone(),
            None => HomeLayout::default_root()?,
        };
        Ok(HomeLayout::new(root))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.default_repository.is_empty() {
            anyhow::bail!("default_repository must not be empty");
        }
        self.stable_repository.entry().validate()?;
        if self.store.backend == StoreBackend::Cluster && self.store.namespace.is_empty() {
            anyhow::bail!("cluster release store requires a namespace");
        }
        if self.timeouts.operation_secs == 0 || self.timeouts.bootstrap_secs == 0 {
            anyhow::bail!("timeouts must be greater than zero");
        }
        Ok(())
    }
}

/// Well-known repository written on first bootstrap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedRepository {
    pub name: String,
    pub url: Url,
    pub cache: String,
}

impl Default for SeedRepository {
    fn default() -> Self {
        let entry = RepositoryEntry::new(
            DEFAULT_REPOSITORY_NAME,
            Url::parse(DEFAULT_REPOSITORY_URL).expect("default repository URL is valid"),
        );
        Self {
            name: entry.name,
            url: entry.url,
            cache: entry.cache,
        }
    }
}

impl SeedRepository {
    pub fn entry(&self) -> RepositoryEntry {
        RepositoryEntry::new(self.name.clone(), self.url.clone()).with_cache(self.cache.clone())
    }
}

/// Release store backend, chosen at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoreBackend {
    /// Ephemeral, in-process
    Memory,
    /// JSON files under the home `releases/` directory
    File,
    /// Objects on the target cluster in a fixed namespace
    Cluster,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Namespace holding release objects for the cluster backend
    pub namespace: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::File,
            namespace: DEFAULT_RELEASE_NAMESPACE.to_string(),
        }
    }
}

/// Deadlines applied to remote calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Budget for the index download during bootstrap
    pub bootstrap_secs: u64,
    /// Budget for one install/delete/update/rollback, all remote calls included
    pub operation_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            bootstrap_secs: 30,
            operation_secs: 300,
        }
    }
}

impl Timeouts {
    pub fn bootstrap(&self) -> Duration {
        Duration::from_secs(self.bootstrap_secs)
    }

    pub fn operation(&self) -> Duration {
        Duration::from_secs(self.operation_secs)
    }
}
