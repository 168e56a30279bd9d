//! Error types for repository registration and indices.

use std::path::PathBuf;

use thiserror::Error;

use super::getter::FetchError;

pub type RepoResult<T> = Result<T, RepoError>;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to serialize {what}: {source}")]
    Serialize {
        what: &'static str,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid repository entry '{name}': {reason}")]
    Invalid { name: String, reason: String },

    #[error("repository already registered: {0}")]
    Duplicate(String),

    #[error("repository not registered: {0}")]
    Unknown(String),

    #[error("failed to fetch index for repository '{name}': {source}")]
    Fetch {
        name: String,
        #[source]
        source: FetchError,
    },
}
