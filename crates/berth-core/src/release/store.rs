//! The release store capability.

use async_trait::async_trait;
use thiserror::Error;

use super::Release;

pub type StoreResult<T> = Result<T, StoreError>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("release '{0}' already exists")]
    Conflict(String),

    #[error("release '{0}' not found")]
    NotFound(String),

    #[error("release store {context}: {source}")]
    Backend {
        context: String,
        #[source]
        source: BoxError,
    },
}

impl StoreError {
    pub fn backend(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        StoreError::Backend {
            context: context.into(),
            source: source.into(),
        }
    }
}

/// Durable record of releases. Implementations must give every backend the
/// same semantics: `create` fails with `Conflict` on an existing name, `get`
/// and `update` fail with `NotFound` on a missing one.
#[async_trait]
pub trait ReleaseStore: Send + Sync {
    /// Short backend name for logs.
    fn backend(&self) -> &'static str;

    async fn get(&self, name: &str) -> StoreResult<Release>;

    async fn list(&self) -> StoreResult<Vec<Release>>;

    async fn create(&self, release: &Release) -> StoreResult<()>;

    async fn update(&self, release: &Release) -> StoreResult<()>;

    /// Like [`get`](Self::get), mapping `NotFound` to `None`.
    async fn find(&self, name: &str) -> StoreResult<Option<Release>> {
        match self.get(name).await {
            Ok(release) => Ok(Some(release)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }
}
