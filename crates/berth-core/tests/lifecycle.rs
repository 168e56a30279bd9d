mod support;

use berth_core::addon::Addon;
use berth_core::cluster::ClusterError;
use berth_core::orchestration::AddonError;
use berth_core::package::ResolveError;
use berth_core::release::ReleaseStatus;
use berth_core::repo::IndexFile;

use support::{FakeCluster, Fixture, echo_package, package};

#[tokio::test]
async fn install_latest_populates_outputs() {
    let fx = Fixture::new();
    fx.publish(&echo_package("0.1.0"));
    fx.publish(&echo_package("0.2.0"));
    let cluster = FakeCluster::new();
    let manager = fx.manager(cluster.clone()).await;

    let installed = manager
        .install(&Addon::new("echo", "kube-system"))
        .await
        .unwrap();

    assert_eq!(installed.version, "0.2.0");
    assert_eq!(installed.release_name, "echo");
    assert!(installed.deployed.is_some());
    assert!(installed.is_deployed());

    let deployed = cluster.deployed("echo").await.unwrap();
    assert_eq!(deployed.namespace, "kube-system");
    assert_eq!(deployed.version, "0.2.0");
}

#[tokio::test]
async fn install_delete_list_round_trip() {
    let fx = Fixture::new();
    fx.publish(&echo_package("0.1.0"));
    let cluster = FakeCluster::new();
    let manager = fx.manager(cluster.clone()).await;

    let installed = manager
        .install(&Addon::new("echo", "default"))
        .await
        .unwrap();
    let names: Vec<String> = manager
        .list_releases()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.name)
        .collect();
    assert_eq!(names, vec!["echo"]);

    manager.delete(&installed).await.unwrap();

    assert!(manager.list_releases().await.unwrap().is_empty());
    assert!(cluster.deployed("echo").await.is_none());
}

#[tokio::test]
async fn install_same_version_twice_is_noop() {
    let fx = Fixture::new();
    fx.publish(&echo_package("0.1.0"));
    let cluster = FakeCluster::new();
    let manager = fx.manager(cluster.clone()).await;
    let addon = Addon::new("echo", "default").with_version("0.1.0");

    let first = manager.install(&addon).await.unwrap();
    let second = manager.install(&addon).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(cluster.calls(&cluster.installs), 1);
    let history = manager.release_history("echo").await.unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn install_different_version_conflicts() {
    let fx = Fixture::new();
    fx.publish(&echo_package("0.1.0"));
    fx.publish(&echo_package("0.2.0"));
    let cluster = FakeCluster::new();
    let manager = fx.manager(cluster.clone()).await;

    manager
        .install(&Addon::new("echo", "default").with_version("0.1.0"))
        .await
        .unwrap();
    let err = manager
        .install(&Addon::new("echo", "default").with_version("0.2.0"))
        .await
        .unwrap_err();

    assert!(matches!(err, AddonError::AlreadyDeployed { .. }), "{err}");
    assert!(err.is_conflict());
    assert_eq!(cluster.deployed("echo").await.unwrap().version, "0.1.0");
}

#[tokio::test]
async fn install_without_version_accepts_existing_release() {
    let fx = Fixture::new();
    fx.publish(&echo_package("0.1.0"));
    let cluster = FakeCluster::new();
    let manager = fx.manager(cluster.clone()).await;

    manager
        .install(&Addon::new("echo", "default").with_version("0.1.0"))
        .await
        .unwrap();
    let again = manager
        .install(&Addon::new("echo", "default"))
        .await
        .unwrap();

    assert_eq!(again.version, "0.1.0");
    assert_eq!(cluster.calls(&cluster.installs), 1);
}

#[tokio::test]
async fn install_refuses_release_unknown_to_store_but_on_cluster() {
    let fx = Fixture::new();
    fx.publish(&echo_package("0.1.0"));
    let cluster = FakeCluster::new();
    cluster.seed("echo", "default", "0.0.9").await;
    let manager = fx.manager(cluster.clone()).await;

    let err = manager
        .install(&Addon::new("echo", "default"))
        .await
        .unwrap_err();

    assert!(matches!(err, AddonError::AlreadyDeployed { .. }), "{err}");
    assert_eq!(cluster.calls(&cluster.installs), 0);
}

#[tokio::test]
async fn repeated_delete_is_safe() {
    let fx = Fixture::new();
    fx.publish(&echo_package("0.1.0"));
    let cluster = FakeCluster::new();
    let manager = fx.manager(cluster.clone()).await;

    let installed = manager
        .install(&Addon::new("echo", "default"))
        .await
        .unwrap();
    manager.delete(&installed).await.unwrap();
    manager.delete(&installed).await.unwrap();

    // Never installed, and no release name at all
    manager
        .delete(&Addon::new("ghost", "default").with_release_name("ghost"))
        .await
        .unwrap();
    manager.delete(&Addon::new("echo", "default")).await.unwrap();

    assert_eq!(cluster.calls(&cluster.uninstalls), 1);
}

#[tokio::test]
async fn delete_treats_missing_cluster_release_as_gone() {
    let fx = Fixture::new();
    fx.publish(&echo_package("0.1.0"));
    let cluster = FakeCluster::new();
    let manager = fx.manager(cluster.clone()).await;
    let installed = manager
        .install(&Addon::new("echo", "default"))
        .await
        .unwrap();

    // Removed behind the manager's back
    cluster.reject_with(ClusterError::NotFound("echo".into()));
    manager.delete(&installed).await.unwrap();

    cluster.accept();
    assert!(manager.list_releases().await.unwrap().is_empty());
}

#[tokio::test]
async fn delete_rejection_is_reported_verbatim() {
    let fx = Fixture::new();
    fx.publish(&echo_package("0.1.0"));
    let cluster = FakeCluster::new();
    let manager = fx.manager(cluster.clone()).await;
    let installed = manager
        .install(&Addon::new("echo", "default"))
        .await
        .unwrap();

    cluster.reject_with(ClusterError::Rejected("finalizer pending".into()));
    let err = manager.delete(&installed).await.unwrap_err();

    match err {
        AddonError::UninstallRejected { release, source } => {
            assert_eq!(release, "echo");
            assert_eq!(source, ClusterError::Rejected("finalizer pending".into()));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn reinstall_after_delete_starts_new_revision() {
    let fx = Fixture::new();
    fx.publish(&echo_package("0.1.0"));
    let cluster = FakeCluster::new();
    let manager = fx.manager(cluster.clone()).await;
    let addon = Addon::new("echo", "default");

    let installed = manager.install(&addon).await.unwrap();
    manager.delete(&installed).await.unwrap();
    manager.install(&addon).await.unwrap();

    let history = manager.release_history("echo").await.unwrap();
    let statuses: Vec<ReleaseStatus> = history.iter().map(|r| r.status).collect();
    assert_eq!(statuses, vec![ReleaseStatus::Removed, ReleaseStatus::Deployed]);
    assert_eq!(history.last().unwrap().revision, 2);
}

#[tokio::test]
async fn rejected_install_is_recorded_and_retryable() {
    let fx = Fixture::new();
    fx.publish(&echo_package("0.1.0"));
    let cluster = FakeCluster::new();
    let manager = fx.manager(cluster.clone()).await;
    let addon = Addon::new("echo", "default");

    cluster.reject_with(ClusterError::Unavailable("apiserver down".into()));
    let err = manager.install(&addon).await.unwrap_err();
    assert!(matches!(err, AddonError::InstallRejected { .. }), "{err}");
    assert!(err.is_transient());

    // Failed releases are not listed as deployed
    let releases = manager.list_releases().await.unwrap();
    assert_eq!(releases[0].status, ReleaseStatus::Failed);

    cluster.accept();
    let installed = manager.install(&addon).await.unwrap();
    assert_eq!(installed.release_name, "echo");
    assert_eq!(
        manager.list_releases().await.unwrap()[0].status,
        ReleaseStatus::Deployed
    );
}

#[tokio::test]
async fn install_errors_for_unknown_packages() {
    let fx = Fixture::new();
    fx.publish(&echo_package("0.1.0"));
    let manager = fx.manager(FakeCluster::new()).await;

    for addon in [
        Addon::new("missing", "default"),
        Addon::new("echo", "default").with_version("7.0.0"),
        Addon::new("elsewhere/echo", "default"),
    ] {
        let err = manager.install(&addon).await.unwrap_err();
        assert!(
            matches!(
                err,
                AddonError::Resolution(ResolveError::NotFound { .. })
            ),
            "{}: {err}",
            addon.name
        );
    }
}

#[tokio::test]
async fn install_validates_addon() {
    let fx = Fixture::new();
    fx.publish(&package("Echo_Server", "0.1.0"));
    let manager = fx.manager(FakeCluster::new()).await;

    for addon in [
        Addon::new("", "default"),
        Addon::new("echo", ""),
        Addon::new("a/b/c", "default"),
        Addon::new("Echo_Server", "default"),
    ] {
        let err = manager.install(&addon).await.unwrap_err();
        assert!(matches!(err, AddonError::InvalidAddon(_)), "{err}");
    }

    // An explicit release name makes the package installable
    let installed = manager
        .install(&Addon::new("Echo_Server", "default").with_release_name("echo-server"))
        .await
        .unwrap();
    assert_eq!(installed.release_name, "echo-server");
}

#[tokio::test]
async fn install_from_local_repository() {
    let fx = Fixture::new();
    let cluster = FakeCluster::new();
    let manager = fx.manager(cluster.clone()).await;
    manager
        .resolver()
        .add_local(&package("internal", "2.0.0"))
        .unwrap();

    let installed = manager
        .install(&Addon::new("local/internal", "tools"))
        .await
        .unwrap();

    assert_eq!(installed.version, "2.0.0");
    assert_eq!(installed.release_name, "internal");
    assert_eq!(cluster.deployed("internal").await.unwrap().namespace, "tools");
}

#[tokio::test]
async fn install_refuses_index_entry_renamed_outside_cache() {
    let fx = Fixture::new();
    fx.publish(&echo_package("0.1.0"));
    let index_path = fx.remote.join("index.yaml");
    let mut index = IndexFile::load(&index_path).unwrap();
    for entry in index.entries.get_mut("echo").unwrap() {
        entry.name = "../../escaped".to_string();
    }
    index.save(&index_path).unwrap();
    let cluster = FakeCluster::new();
    let manager = fx.manager(cluster.clone()).await;

    let err = manager
        .install(&Addon::new("echo", "default"))
        .await
        .unwrap_err();

    assert!(
        matches!(
            err,
            AddonError::Resolution(ResolveError::MalformedPackage { .. })
        ),
        "{err}"
    );
    assert!(!fx.home().join("escaped-0.1.0.tgz").exists());
    assert_eq!(cluster.calls(&cluster.installs), 0);
}
