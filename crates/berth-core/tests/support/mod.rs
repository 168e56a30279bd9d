#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;
use url::Url;

use berth_core::cluster::{
    ClusterError, DeployRequest, DeployedRelease, ObjectStore, StoredObject, TargetCluster,
};
use berth_core::config::{ManagerConfig, SeedRepository};
use berth_core::fs::digest_bytes;
use berth_core::orchestration::AddonManager;
use berth_core::package::{Package, PackageManifest, write_archive};
use berth_core::release::{MemoryReleaseStore, ReleaseStore};
use berth_core::repo::{FileGetter, Getters, IndexEntry, IndexFile};

/// In-memory target cluster that counts calls.
#[derive(Default)]
pub struct FakeCluster {
    releases: tokio::sync::Mutex<HashMap<String, DeployedRelease>>,
    pub installs: AtomicUsize,
    pub upgrades: AtomicUsize,
    pub uninstalls: AtomicUsize,
    reject_with: std::sync::Mutex<Option<ClusterError>>,
    delay: std::sync::Mutex<Duration>,
}

impl FakeCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail every following install/upgrade/uninstall with `err`.
    pub fn reject_with(&self, err: ClusterError) {
        *self.reject_with.lock().unwrap() = Some(err);
    }

    pub fn accept(&self) {
        *self.reject_with.lock().unwrap() = None;
    }

    /// Sleep this long inside every call.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub async fn deployed(&self, name: &str) -> Option<DeployedRelease> {
        self.releases.lock().await.get(name).cloned()
    }

    /// Pretend something outside the manager deployed `name`.
    pub async fn seed(&self, name: &str, namespace: &str, version: &str) {
        self.releases.lock().await.insert(
            name.to_string(),
            DeployedRelease {
                name: name.to_string(),
                namespace: namespace.to_string(),
                version: version.to_string(),
            },
        );
    }

    pub fn calls(&self, counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    async fn before_call(&self) -> Result<(), ClusterError> {
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match self.reject_with.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl TargetCluster for FakeCluster {
    async fn install(&self, request: &DeployRequest) -> Result<(), ClusterError> {
        self.installs.fetch_add(1, Ordering::SeqCst);
        self.before_call().await?;
        let mut releases = self.releases.lock().await;
        if releases.contains_key(&request.release_name) {
            return Err(ClusterError::AlreadyExists(request.release_name.clone()));
        }
        releases.insert(
            request.release_name.clone(),
            DeployedRelease {
                name: request.release_name.clone(),
                namespace: request.namespace.clone(),
                version: request.version.clone(),
            },
        );
        Ok(())
    }

    async fn upgrade(&self, request: &DeployRequest) -> Result<(), ClusterError> {
        self.upgrades.fetch_add(1, Ordering::SeqCst);
        self.before_call().await?;
        let mut releases = self.releases.lock().await;
        match releases.get_mut(&request.release_name) {
            Some(existing) => {
                existing.version = request.version.clone();
                Ok(())
            }
            None => Err(ClusterError::NotFound(request.release_name.clone())),
        }
    }

    async fn uninstall(&self, _namespace: &str, release: &str) -> Result<(), ClusterError> {
        self.uninstalls.fetch_add(1, Ordering::SeqCst);
        self.before_call().await?;
        match self.releases.lock().await.remove(release) {
            Some(_) => Ok(()),
            None => Err(ClusterError::NotFound(release.to_string())),
        }
    }

    async fn list(&self) -> Result<Vec<DeployedRelease>, ClusterError> {
        Ok(self.releases.lock().await.values().cloned().collect())
    }
}

/// In-memory cluster object storage.
#[derive(Default)]
pub struct FakeObjects {
    objects: tokio::sync::Mutex<HashMap<(String, String), StoredObject>>,
}

#[async_trait]
impl ObjectStore for FakeObjects {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<StoredObject>, ClusterError> {
        let key = (namespace.to_string(), name.to_string());
        Ok(self.objects.lock().await.get(&key).cloned())
    }

    async fn list(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<StoredObject>, ClusterError> {
        Ok(self
            .objects
            .lock()
            .await
            .iter()
            .filter(|((ns, _), object)| ns == namespace && object.matches(selector))
            .map(|(_, object)| object.clone())
            .collect())
    }

    async fn create(&self, namespace: &str, object: StoredObject) -> Result<(), ClusterError> {
        let mut objects = self.objects.lock().await;
        let key = (namespace.to_string(), object.name.clone());
        if objects.contains_key(&key) {
            return Err(ClusterError::AlreadyExists(object.name));
        }
        objects.insert(key, object);
        Ok(())
    }

    async fn replace(&self, namespace: &str, object: StoredObject) -> Result<(), ClusterError> {
        let mut objects = self.objects.lock().await;
        let key = (namespace.to_string(), object.name.clone());
        if !objects.contains_key(&key) {
            return Err(ClusterError::NotFound(object.name));
        }
        objects.insert(key, object);
        Ok(())
    }
}

pub fn echo_package(version: &str) -> Package {
    package("echo", version)
}

pub fn package(name: &str, version: &str) -> Package {
    Package::new(PackageManifest::new(name, version))
        .with_values(json!({"image": {"tag": version}, "replicas": 1}))
        .with_template(
            "deployment.yaml",
            "name: {{ .Release.Name }}\nnamespace: {{ .Release.Namespace }}\ntag: {{ .Values.image.tag }}\n",
        )
}

/// A temporary home plus a `file://` repository to publish packages into.
pub struct Fixture {
    pub tmp: TempDir,
    pub remote: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let tmp = TempDir::new().expect("tempdir should succeed");
        let remote = tmp.path().join("remote");
        std::fs::create_dir_all(&remote).unwrap();
        IndexFile::empty().save(&remote.join("index.yaml")).unwrap();
        Self { tmp, remote }
    }

    pub fn home(&self) -> PathBuf {
        self.tmp.path().join("home")
    }

    pub fn remote_url(&self) -> Url {
        Url::from_directory_path(&self.remote).unwrap()
    }

    /// Write the package archive next to the remote index and list it.
    pub fn publish(&self, package: &Package) {
        let file = format!("{}-{}.tgz", package.name(), package.version());
        let bytes = write_archive(package).unwrap();
        std::fs::write(self.remote.join(&file), &bytes).unwrap();

        let index_path = self.remote.join("index.yaml");
        let mut index = IndexFile::load(&index_path).unwrap();
        index.add(
            IndexEntry::new(package.name(), package.version())
                .with_url(file)
                .with_digest(digest_bytes(&bytes)),
        );
        index.save(&index_path).unwrap();
    }

    pub fn config(&self) -> ManagerConfig {
        let mut config = ManagerConfig::with_home(self.home());
        config.stable_repository = SeedRepository {
            name: "stable".to_string(),
            url: self.remote_url(),
            cache: "stable-index.yaml".to_string(),
        };
        config.timeouts.bootstrap_secs = 5;
        config.timeouts.operation_secs = 10;
        config
    }

    pub fn getters(&self) -> Getters {
        Getters::new().with(Arc::new(FileGetter))
    }

    pub async fn manager(&self, cluster: Arc<FakeCluster>) -> AddonManager {
        self.manager_with(self.config(), cluster, Arc::new(MemoryReleaseStore::new()))
            .await
    }

    pub async fn manager_with(
        &self,
        config: ManagerConfig,
        cluster: Arc<FakeCluster>,
        store: Arc<dyn ReleaseStore>,
    ) -> AddonManager {
        AddonManager::with_getters(config, self.getters(), cluster, store)
            .await
            .expect("manager should bootstrap")
    }
}
