//! Error types for package resolution.

use std::path::PathBuf;

use thiserror::Error;

use crate::repo::RepoError;

pub type ResolveResult<T> = Result<T, ResolveError>;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("invalid package reference '{0}'")]
    InvalidReference(String),

    #[error("{repository}/{name} ({version}) not found: {reason}")]
    NotFound {
        repository: String,
        name: String,
        version: String,
        reason: &'static str,
    },

    #[error("failed to download {url}: {reason}")]
    DownloadFailed { url: String, reason: String },

    #[error("malformed package {origin}: {reason}")]
    MalformedPackage { origin: String, reason: String },

    #[error("package resolution timed out")]
    Timeout,

    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Repository(#[from] RepoError),
}

impl ResolveError {
    pub(crate) fn malformed(origin: impl Into<String>, reason: impl ToString) -> Self {
        ResolveError::MalformedPackage {
            origin: origin.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether retrying later may succeed without any change on the caller's side.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ResolveError::DownloadFailed { .. } | ResolveError::Timeout | ResolveError::Io { .. }
        )
    }
}
