//! Manager configuration
//!
//! Loaded from `berth.toml`; every field has a default so a missing or
//! partial file is valid.

pub mod schema;
pub mod store;

pub use schema::{
    DEFAULT_MAX_HISTORY, DEFAULT_RELEASE_NAMESPACE, DEFAULT_REPOSITORY_NAME,
    DEFAULT_REPOSITORY_URL, ManagerConfig, SeedRepository, StoreBackend, StoreConfig, Timeouts,
};
pub use store::{ConfigStore, parse_config_str};
