//! Addon records exchanged with the surrounding controller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::release::Release;

/// A request to run a package in a target cluster namespace.
///
/// `name` and `namespace` are inputs. `version` is an input (empty means
/// latest) and is overwritten with the deployed version on success.
/// `deployed` and `release_name` are outputs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Addon {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub deployed: Option<DateTime<Utc>>,
    #[serde(default)]
    pub release_name: String,
}

impl Addon {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_release_name(mut self, release_name: impl Into<String>) -> Self {
        self.release_name = release_name.into();
        self
    }

    /// Whether a previous install populated the output fields.
    pub fn is_deployed(&self) -> bool {
        self.deployed.is_some() && !self.release_name.is_empty()
    }

    /// Copy the deployment outputs from a release record.
    pub(crate) fn apply_release(&mut self, release: &Release) {
        self.version = release.version.clone();
        self.deployed = Some(release.first_deployed);
        self.release_name = release.name.clone();
    }
}
