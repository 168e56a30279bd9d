//! Addon lifecycle orchestration.

pub mod error;
pub mod manager;

pub use error::AddonError;
pub use manager::{AddonManager, open_store};
