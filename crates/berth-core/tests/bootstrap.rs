mod support;

use std::time::Duration;

use url::Url;

use berth_core::addon::Addon;
use berth_core::bootstrap::{self, BootstrapError};
use berth_core::config::SeedRepository;
use berth_core::home::HomeLayout;
use berth_core::orchestration::AddonError;
use berth_core::package::ResolveError;
use berth_core::repo::{IndexFile, LocalRepository, RepositoryFile};

use support::{FakeCluster, Fixture, echo_package};

fn snapshot(layout: &HomeLayout) -> Vec<(String, Vec<u8>)> {
    let mut files = Vec::new();
    let mut stack = vec![layout.root().to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                files.push((path.display().to_string(), Vec::new()));
                stack.push(path);
            } else {
                files.push((path.display().to_string(), std::fs::read(&path).unwrap()));
            }
        }
    }
    files.sort();
    files
}

#[tokio::test]
async fn bootstrap_is_idempotent() {
    let fx = Fixture::new();
    fx.publish(&echo_package("0.1.0"));
    let layout = HomeLayout::new(fx.home());
    let seed = fx.config().stable_repository.entry();

    bootstrap::ensure(&layout, &seed, &fx.getters(), Duration::from_secs(5))
        .await
        .unwrap();
    let first = snapshot(&layout);
    let report = bootstrap::ensure(&layout, &seed, &fx.getters(), Duration::from_secs(5))
        .await
        .unwrap();

    assert!(report.is_noop());
    assert_eq!(snapshot(&layout), first);
}

#[tokio::test]
async fn degraded_bootstrap_leaves_usable_skeleton() {
    let fx = Fixture::new();
    let mut config = fx.config();
    config.stable_repository = SeedRepository {
        name: "stable".to_string(),
        url: Url::from_directory_path(fx.tmp.path().join("offline")).unwrap(),
        cache: "stable-index.yaml".to_string(),
    };
    let layout = config.layout().unwrap();

    let manager = fx.manager_with(
        config.clone(),
        FakeCluster::new(),
        std::sync::Arc::new(berth_core::release::MemoryReleaseStore::new()),
    )
    .await;

    for dir in layout.managed_dirs() {
        assert!(dir.is_dir(), "{} should exist", dir.display());
    }
    let repositories = RepositoryFile::load(&layout.repositories_file()).unwrap();
    assert_eq!(repositories.repositories.len(), 1);
    assert_eq!(repositories.local(), Some(&LocalRepository::default()));
    assert!(IndexFile::load(&layout.local_index()).unwrap().entries.is_empty());

    // The missing index is fetched again on first use, and still fails
    let err = manager
        .install(&Addon::new("echo", "default"))
        .await
        .unwrap_err();
    assert!(
        matches!(
            err,
            AddonError::Resolution(ResolveError::DownloadFailed { .. })
        ),
        "{err}"
    );
    assert!(err.is_transient());
}

#[tokio::test]
async fn missing_index_is_refreshed_on_first_resolve() {
    let fx = Fixture::new();
    fx.publish(&echo_package("0.1.0"));
    let cluster = FakeCluster::new();
    let manager = fx.manager(cluster.clone()).await;
    let cache = manager
        .layout()
        .cache_index(&fx.config().stable_repository.entry());

    std::fs::remove_file(&cache).unwrap();
    manager
        .install(&Addon::new("echo", "default"))
        .await
        .unwrap();

    assert!(cache.is_file());
}

#[tokio::test]
async fn file_in_place_of_cache_dir_fails_construction() {
    let fx = Fixture::new();
    let layout = fx.config().layout().unwrap();
    std::fs::create_dir_all(layout.root()).unwrap();
    std::fs::write(layout.cache_dir(), "oops").unwrap();

    let err = berth_core::orchestration::AddonManager::with_getters(
        fx.config(),
        fx.getters(),
        FakeCluster::new(),
        std::sync::Arc::new(berth_core::release::MemoryReleaseStore::new()),
    )
    .await
    .err()
    .expect("bootstrap should fail");

    assert!(
        matches!(
            err,
            AddonError::Bootstrap(BootstrapError::WrongKind { .. })
        ),
        "{err}"
    );
}
