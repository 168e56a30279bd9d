//! Getters fetch raw bytes from repository URLs.
//!
//! A [`Getters`] set dispatches on the URL scheme: `http`/`https` go through
//! reqwest, `file` reads from the local filesystem.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

/// Errors raised while fetching a URL.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("unsupported URL scheme '{scheme}' in {url}")]
    UnsupportedScheme { scheme: String, url: Url },

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request to {url} failed: {source}")]
    Http {
        url: Url,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} from {url}")]
    Status {
        url: Url,
        status: reqwest::StatusCode,
    },

    #[error("file URL does not name a local path: {0}")]
    InvalidFileUrl(Url),

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FetchError {
    /// Whether the remote end reported that the resource does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            FetchError::Status { status, .. } => *status == reqwest::StatusCode::NOT_FOUND,
            FetchError::Io { source, .. } => source.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

/// Fetches the content behind a URL.
#[async_trait]
pub trait Getter: Send + Sync {
    /// URL schemes this getter serves.
    fn schemes(&self) -> &[&'static str];

    async fn get(&self, url: &Url) -> Result<Vec<u8>, FetchError>;
}

/// HTTP(S) getter backed by reqwest.
#[derive(Debug, Clone)]
pub struct HttpGetter {
    client: reqwest::Client,
}

impl HttpGetter {
    pub fn new() -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("berth/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(FetchError::Client)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Getter for HttpGetter {
    fn schemes(&self) -> &[&'static str] {
        &["http", "https"]
    }

    async fn get(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|source| FetchError::Http {
                url: url.clone(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: url.clone(),
                status: response.status(),
            });
        }

        let bytes = response.bytes().await.map_err(|source| FetchError::Http {
            url: url.clone(),
            source,
        })?;
        Ok(bytes.to_vec())
    }
}

/// Getter for `file://` URLs.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileGetter;

#[async_trait]
impl Getter for FileGetter {
    fn schemes(&self) -> &[&'static str] {
        &["file"]
    }

    async fn get(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        let path = url
            .to_file_path()
            .map_err(|_| FetchError::InvalidFileUrl(url.clone()))?;
        tokio::fs::read(&path)
            .await
            .map_err(|source| FetchError::Io { path, source })
    }
}

/// Scheme-dispatching set of getters.
#[derive(Clone, Default)]
pub struct Getters {
    getters: Vec<Arc<dyn Getter>>,
}

impl std::fmt::Debug for Getters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let schemes: Vec<&str> = self
            .getters
            .iter()
            .flat_map(|g| g.schemes().iter().copied())
            .collect();
        f.debug_struct("Getters").field("schemes", &schemes).finish()
    }
}

impl Getters {
    pub fn new() -> Self {
        Self::default()
    }

    /// HTTP(S) and file getters.
    pub fn standard() -> Result<Self, FetchError> {
        Ok(Self::new()
            .with(Arc::new(HttpGetter::new()?))
            .with(Arc::new(FileGetter)))
    }

    /// Register a getter. Later registrations win for a shared scheme.
    pub fn with(mut self, getter: Arc<dyn Getter>) -> Self {
        self.getters.insert(0, getter);
        self
    }

    pub fn for_url(&self, url: &Url) -> Result<&dyn Getter, FetchError> {
        self.getters
            .iter()
            .find(|g| g.schemes().contains(&url.scheme()))
            .map(|g| g.as_ref())
            .ok_or_else(|| FetchError::UnsupportedScheme {
                scheme: url.scheme().to_string(),
                url: url.clone(),
            })
    }

    pub async fn get(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        tracing::debug!(%url, "fetching");
        self.for_url(url)?.get(url).await
    }
}
