//! Packages: references, archives, rendering and resolution.

pub mod archive;
pub mod error;
pub mod manifest;
pub mod render;
pub mod resolver;

use std::fmt;

pub use archive::{read_archive, write_archive};
pub use error::{ResolveError, ResolveResult};
pub use manifest::{Package, PackageManifest, parse_values};
pub use render::{RenderedPackage, merge_values, render};
pub use resolver::{PackageReference, ResolvedPackage, Resolver};

use manifest::is_safe_segment;

/// A package named by repository and package name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageRef {
    pub repository: String,
    pub name: String,
}

impl PackageRef {
    /// Parse `repo/name`, or a bare `name` in `default_repository`.
    pub fn parse(input: &str, default_repository: &str) -> ResolveResult<Self> {
        let input = input.trim();
        let (repository, name) = match input.split_once('/') {
            Some((repository, name)) => (repository, name),
            None => (default_repository, input),
        };

        if !is_safe_segment(repository) || !is_safe_segment(name) {
            return Err(ResolveError::InvalidReference(input.to_string()));
        }
        Ok(Self {
            repository: repository.to_string(),
            name: name.to_string(),
        })
    }
}

impl fmt::Display for PackageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.repository, self.name)
    }
}
