//! The addon manager: install, delete, update and roll back addons.
//!
//! Every public operation computes one deadline up front and runs all of its
//! remote calls (index and package downloads, cluster calls, release store
//! calls) under it. Operations on the same release name are serialized;
//! different names proceed concurrently.

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;

use super::error::AddonError;
use crate::addon::Addon;
use crate::bootstrap;
use crate::cluster::{ClusterError, DeployRequest, ObjectStore, TargetCluster};
use crate::config::{ManagerConfig, StoreBackend};
use crate::home::HomeLayout;
use crate::package::{PackageRef, RenderedPackage, ResolveError, ResolvedPackage, Resolver, render};
use crate::release::{
    ClusterReleaseStore, FileReleaseStore, MemoryReleaseStore, Release, ReleaseStore, Revision,
    StoreResult, validate_release_name,
};
use crate::repo::Getters;
use crate::sync::{Deadline, KeyedLocks};
use crate::version::VersionConstraint;

type Result<T> = std::result::Result<T, AddonError>;

/// Coordinates package resolution, the target cluster and the release store.
pub struct AddonManager {
    config: ManagerConfig,
    layout: HomeLayout,
    resolver: Resolver,
    cluster: Arc<dyn TargetCluster>,
    store: Arc<dyn ReleaseStore>,
    locks: KeyedLocks,
}

impl std::fmt::Debug for AddonManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddonManager")
            .field("home", &self.layout.root())
            .field("store", &self.store.backend())
            .finish_non_exhaustive()
    }
}

/// Build the release store selected by `config.store.backend`.
///
/// The cluster backend needs `objects`; the other backends ignore it.
pub fn open_store(
    config: &ManagerConfig,
    objects: Option<Arc<dyn ObjectStore>>,
) -> Result<Arc<dyn ReleaseStore>> {
    let store: Arc<dyn ReleaseStore> = match config.store.backend {
        StoreBackend::Memory => Arc::new(MemoryReleaseStore::new()),
        StoreBackend::File => {
            let layout = config
                .layout()
                .map_err(|e| AddonError::Config(format!("{e:#}")))?;
            Arc::new(FileReleaseStore::new(layout.release_dir()))
        }
        StoreBackend::Cluster => {
            let objects = objects.ok_or_else(|| {
                AddonError::Config("cluster release store requires an object store".to_string())
            })?;
            Arc::new(ClusterReleaseStore::new(
                objects,
                config.store.namespace.clone(),
            ))
        }
    };
    Ok(store)
}

impl AddonManager {
    /// Create a manager with the standard HTTP(S) and file getters.
    ///
    /// Bootstraps the home directory before returning.
    pub async fn new(
        config: ManagerConfig,
        cluster: Arc<dyn TargetCluster>,
        store: Arc<dyn ReleaseStore>,
    ) -> Result<Self> {
        let getters = Getters::standard().map_err(|e| AddonError::Config(e.to_string()))?;
        Self::with_getters(config, getters, cluster, store).await
    }

    pub async fn with_getters(
        config: ManagerConfig,
        getters: Getters,
        cluster: Arc<dyn TargetCluster>,
        store: Arc<dyn ReleaseStore>,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| AddonError::Config(format!("{e:#}")))?;
        let layout = config
            .layout()
            .map_err(|e| AddonError::Config(format!("{e:#}")))?;

        let report = bootstrap::ensure(
            &layout,
            &config.stable_repository.entry(),
            &getters,
            config.timeouts.bootstrap(),
        )
        .await?;
        tracing::info!(
            home = %layout.root().display(),
            store = store.backend(),
            created_dirs = report.created_dirs.len(),
            "addon manager ready"
        );

        let resolver = Resolver::new(layout.clone(), getters, config.default_repository.clone());
        Ok(Self {
            config,
            layout,
            resolver,
            cluster,
            store,
            locks: KeyedLocks::new(),
        })
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn layout(&self) -> &HomeLayout {
        &self.layout
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Install an addon, returning it with `version`, `deployed` and
    /// `release_name` filled in.
    ///
    /// Installing an addon whose release is already deployed at a matching
    /// version changes nothing. A deployed release at another version is a
    /// conflict; use [`update`](Self::update) for that.
    pub async fn install(&self, addon: &Addon) -> Result<Addon> {
        const OP: &str = "install";
        let deadline = self.deadline();
        let package_ref = self.validate_addon(addon)?;
        let release_name = release_name_for(addon, &package_ref)?;
        let _guard = deadline
            .run(self.locks.lock(&release_name))
            .await
            .map_err(|_| AddonError::Timeout { operation: OP })?;

        let existing = self
            .store_call(&deadline, OP, self.store.find(&release_name))
            .await?;
        match &existing {
            Some(release) if release.is_deployed() => {
                return already_installed(addon, &package_ref, release);
            }
            Some(_) => {}
            None => {
                let deployed = deadline
                    .run(self.cluster.list())
                    .await
                    .map_err(|_| AddonError::Timeout { operation: OP })?
                    .map_err(AddonError::Cluster)?;
                if deployed.iter().any(|d| d.name == release_name) {
                    return Err(AddonError::AlreadyDeployed {
                        release: release_name,
                        detail: "present on the cluster without a release record".to_string(),
                    });
                }
            }
        }

        let resolved = self
            .resolve(&addon.name, &addon.version, &deadline, OP)
            .await?;
        let rendered = render(
            &resolved.package,
            &release_name,
            &addon.namespace,
            &Value::Null,
        )?;
        let version = resolved.reference.version.clone();

        // A pending or failed record may belong to an attempt that reached the cluster
        let resumed = existing.as_ref().is_some_and(|r| !r.is_removed());
        let release = match existing {
            None => {
                let release = Release::pending(
                    &release_name,
                    &addon.namespace,
                    &package_ref.repository,
                    &package_ref.name,
                    &version,
                    rendered.values.clone(),
                );
                self.store_call(&deadline, OP, self.store.create(&release))
                    .await?;
                release
            }
            Some(mut release) => {
                release.namespace = addon.namespace.clone();
                release.repository = package_ref.repository.clone();
                release.package = package_ref.name.clone();
                release.begin_revision(
                    &version,
                    rendered.values.clone(),
                    "install",
                    self.config.max_history,
                );
                self.store_call(&deadline, OP, self.store.update(&release))
                    .await?;
                release
            }
        };

        tracing::info!(
            release = %release.name,
            package = %package_ref,
            %version,
            namespace = %release.namespace,
            "installing addon"
        );
        let request = deploy_request(&release, rendered);
        let outcome = match deadline.run(self.cluster.install(&request)).await {
            Err(_) => return Err(AddonError::Timeout { operation: OP }),
            Ok(Err(ClusterError::AlreadyExists(_))) if resumed => {
                tracing::debug!(release = %release.name, "release exists on cluster; upgrading instead");
                deadline
                    .run(self.cluster.upgrade(&request))
                    .await
                    .map_err(|_| AddonError::Timeout { operation: OP })?
            }
            Ok(outcome) => outcome,
        };

        let release = self
            .complete(release, outcome, &deadline, OP, |release, source| {
                AddonError::InstallRejected { release, source }
            })
            .await?;
        Ok(with_release(addon, &release))
    }

    /// Uninstall an addon's release.
    ///
    /// Deleting an addon that has no release name, no record, or an already
    /// removed record succeeds without doing anything.
    pub async fn delete(&self, addon: &Addon) -> Result<()> {
        const OP: &str = "delete";
        if addon.release_name.is_empty() {
            tracing::debug!(addon = %addon.name, "addon has no release; nothing to delete");
            return Ok(());
        }
        validate_release_name(&addon.release_name).map_err(AddonError::InvalidAddon)?;

        let deadline = self.deadline();
        let _guard = deadline
            .run(self.locks.lock(&addon.release_name))
            .await
            .map_err(|_| AddonError::Timeout { operation: OP })?;

        let Some(mut release) = self
            .store_call(&deadline, OP, self.store.find(&addon.release_name))
            .await?
        else {
            tracing::debug!(release = %addon.release_name, "no release record; nothing to delete");
            return Ok(());
        };
        if release.is_removed() {
            return Ok(());
        }

        match deadline
            .run(self.cluster.uninstall(&release.namespace, &release.name))
            .await
        {
            Err(_) => return Err(AddonError::Timeout { operation: OP }),
            Ok(Ok(())) => {}
            Ok(Err(err)) if err.is_not_found() => {
                tracing::debug!(release = %release.name, "release already gone from cluster");
            }
            Ok(Err(source)) => {
                release.mark_failed(format!("uninstall failed: {}", source));
                self.record_failure(&release, &deadline, OP).await;
                return Err(AddonError::UninstallRejected {
                    release: release.name,
                    source,
                });
            }
        }

        release.mark_removed();
        self.store_call(&deadline, OP, self.store.update(&release))
            .await?;
        tracing::info!(release = %release.name, "addon deleted");
        Ok(())
    }

    /// Move an installed addon to the version it requests.
    pub async fn update(&self, addon: &Addon) -> Result<Addon> {
        const OP: &str = "update";
        let deadline = self.deadline();
        let package_ref = self.validate_addon(addon)?;
        let release_name = release_name_for(addon, &package_ref)?;
        let _guard = deadline
            .run(self.locks.lock(&release_name))
            .await
            .map_err(|_| AddonError::Timeout { operation: OP })?;

        let mut release = self.installed_release(&release_name, &deadline, OP).await?;
        if release.repository != package_ref.repository || release.package != package_ref.name {
            return Err(AddonError::InvalidAddon(format!(
                "release '{}' runs {}, not {}",
                release.name,
                release.package_ref(),
                package_ref
            )));
        }

        let resolved = self
            .resolve(&addon.name, &addon.version, &deadline, OP)
            .await?;
        if release.is_deployed() && release.version == resolved.reference.version {
            tracing::debug!(release = %release.name, version = %release.version, "already at requested version");
            return Ok(with_release(addon, &release));
        }

        let rendered = render(
            &resolved.package,
            &release.name,
            &release.namespace,
            &Value::Null,
        )?;
        let from = release.version.clone();
        release.begin_revision(
            &resolved.reference.version,
            rendered.values.clone(),
            format!("upgrade from {}", from),
            self.config.max_history,
        );
        let release = self.upgrade(release, rendered, &deadline, OP).await?;
        tracing::info!(
            release = %release.name,
            %from,
            to = %release.version,
            revision = release.revision,
            "addon updated"
        );
        Ok(with_release(addon, &release))
    }

    /// Restore the most recent earlier revision that deployed successfully.
    pub async fn rollback(&self, addon: &Addon) -> Result<Addon> {
        const OP: &str = "rollback";
        let deadline = self.deadline();
        let release_name = if addon.release_name.is_empty() {
            let package_ref = self.validate_addon(addon)?;
            release_name_for(addon, &package_ref)?
        } else {
            validate_release_name(&addon.release_name).map_err(AddonError::InvalidAddon)?;
            addon.release_name.clone()
        };
        let _guard = deadline
            .run(self.locks.lock(&release_name))
            .await
            .map_err(|_| AddonError::Timeout { operation: OP })?;

        let mut release = self.installed_release(&release_name, &deadline, OP).await?;
        let Some(target) = release.last_good_revision().cloned() else {
            return Err(AddonError::NoPriorRevision(release_name));
        };

        let resolved = self
            .resolve(&release.package_ref(), &target.version, &deadline, OP)
            .await?;
        let rendered = render(
            &resolved.package,
            &release.name,
            &release.namespace,
            &target.values,
        )?;
        release.begin_revision(
            &target.version,
            rendered.values.clone(),
            format!("rollback to {}", target.revision),
            self.config.max_history,
        );
        let release = self.upgrade(release, rendered, &deadline, OP).await?;
        tracing::info!(
            release = %release.name,
            to_revision = target.revision,
            version = %release.version,
            revision = release.revision,
            "addon rolled back"
        );
        Ok(with_release(addon, &release))
    }

    /// Releases that are not removed, sorted by name.
    pub async fn list_releases(&self) -> Result<Vec<Release>> {
        let deadline = self.deadline();
        let mut releases = self
            .store_call(&deadline, "list", self.store.list())
            .await?;
        releases.retain(|r| !r.is_removed());
        releases.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(releases)
    }

    /// All revisions of a release, oldest first, ending with the current one.
    pub async fn release_history(&self, release_name: &str) -> Result<Vec<Revision>> {
        let deadline = self.deadline();
        self.store_call(&deadline, "history", self.store.find(release_name))
            .await?
            .map(|r| r.revisions())
            .ok_or_else(|| AddonError::NotInstalled(release_name.to_string()))
    }

    fn deadline(&self) -> Deadline {
        Deadline::after(self.config.timeouts.operation())
    }

    fn validate_addon(&self, addon: &Addon) -> Result<PackageRef> {
        if addon.name.trim().is_empty() {
            return Err(AddonError::InvalidAddon("name must not be empty".to_string()));
        }
        if addon.namespace.trim().is_empty() {
            return Err(AddonError::InvalidAddon(format!(
                "addon '{}' has no namespace",
                addon.name
            )));
        }
        self.resolver
            .reference(&addon.name)
            .map_err(|e| AddonError::InvalidAddon(e.to_string()))
    }

    async fn resolve(
        &self,
        name: &str,
        version: &str,
        deadline: &Deadline,
        operation: &'static str,
    ) -> Result<ResolvedPackage> {
        match self.resolver.resolve(name, version, deadline).await {
            Ok(resolved) => Ok(resolved),
            Err(ResolveError::Timeout) => Err(AddonError::Timeout { operation }),
            Err(err) => Err(err.into()),
        }
    }

    async fn store_call<T>(
        &self,
        deadline: &Deadline,
        operation: &'static str,
        call: impl Future<Output = StoreResult<T>>,
    ) -> Result<T> {
        deadline
            .run(call)
            .await
            .map_err(|_| AddonError::Timeout { operation })?
            .map_err(AddonError::from)
    }

    /// A release record that exists and is not removed.
    async fn installed_release(
        &self,
        name: &str,
        deadline: &Deadline,
        operation: &'static str,
    ) -> Result<Release> {
        match self
            .store_call(deadline, operation, self.store.find(name))
            .await?
        {
            Some(release) if !release.is_removed() => Ok(release),
            _ => Err(AddonError::NotInstalled(name.to_string())),
        }
    }

    /// Record a pending revision and apply it with a cluster upgrade.
    async fn upgrade(
        &self,
        release: Release,
        rendered: RenderedPackage,
        deadline: &Deadline,
        operation: &'static str,
    ) -> Result<Release> {
        self.store_call(deadline, operation, self.store.update(&release))
            .await?;
        let request = deploy_request(&release, rendered);
        let outcome = deadline
            .run(self.cluster.upgrade(&request))
            .await
            .map_err(|_| AddonError::Timeout { operation })?;
        self.complete(release, outcome, deadline, operation, |release, source| {
            AddonError::UpgradeRejected { release, source }
        })
        .await
    }

    /// Settle a pending revision according to the cluster's answer.
    async fn complete(
        &self,
        mut release: Release,
        outcome: std::result::Result<(), ClusterError>,
        deadline: &Deadline,
        operation: &'static str,
        rejected: impl FnOnce(String, ClusterError) -> AddonError,
    ) -> Result<Release> {
        match outcome {
            Ok(()) => {
                release.mark_deployed();
                self.store_call(deadline, operation, self.store.update(&release))
                    .await?;
                Ok(release)
            }
            Err(source) => {
                tracing::warn!(
                    release = %release.name,
                    operation,
                    error = %source,
                    "cluster rejected release"
                );
                release.mark_failed(source.to_string());
                self.record_failure(&release, deadline, operation).await;
                Err(rejected(release.name, source))
            }
        }
    }

    /// Persist a failed status. The caller is already returning an error, so
    /// a store failure here is only logged.
    async fn record_failure(&self, release: &Release, deadline: &Deadline, operation: &'static str) {
        if let Err(err) = self
            .store_call(deadline, operation, self.store.update(release))
            .await
        {
            tracing::warn!(release = %release.name, error = %err, "could not record failed release");
        }
    }
}

fn release_name_for(addon: &Addon, package_ref: &PackageRef) -> Result<String> {
    let name = if addon.release_name.is_empty() {
        package_ref.name.clone()
    } else {
        addon.release_name.clone()
    };
    validate_release_name(&name).map_err(AddonError::InvalidAddon)?;
    Ok(name)
}

/// Answer an install request for a release that is already deployed.
fn already_installed(addon: &Addon, package_ref: &PackageRef, release: &Release) -> Result<Addon> {
    if release.repository != package_ref.repository || release.package != package_ref.name {
        return Err(AddonError::AlreadyDeployed {
            release: release.name.clone(),
            detail: format!("running package {}", release.package_ref()),
        });
    }
    let constraint = VersionConstraint::parse(&addon.version);
    if !constraint.matches(&release.version) {
        return Err(AddonError::AlreadyDeployed {
            release: release.name.clone(),
            detail: format!("running version {}, requested {}", release.version, constraint),
        });
    }
    tracing::debug!(release = %release.name, version = %release.version, "addon already installed");
    Ok(with_release(addon, release))
}

fn with_release(addon: &Addon, release: &Release) -> Addon {
    let mut addon = addon.clone();
    addon.apply_release(release);
    addon
}

fn deploy_request(release: &Release, rendered: RenderedPackage) -> DeployRequest {
    DeployRequest {
        release_name: release.name.clone(),
        namespace: release.namespace.clone(),
        package: release.package_ref(),
        version: release.version.clone(),
        values: rendered.values,
        manifests: rendered.manifests,
    }
}
