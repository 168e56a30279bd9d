//! Version constraints for package resolution.
//!
//! An addon's requested version is parsed into a [`VersionConstraint`] and
//! matched against the versions listed in a repository index.

use std::cmp::Ordering;
use std::fmt;

/// Version constraint types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionConstraint {
    /// Highest available version (empty string or `latest`)
    Latest,

    /// Exact semantic version
    Exact(semver::Version),

    /// Semantic version requirement (e.g., "^1.0", "~2.1.0")
    Semver(semver::VersionReq),

    /// Version string that is not semver; matched verbatim
    Literal(String),
}

impl VersionConstraint {
    /// Parse a requested version.
    ///
    /// Never fails: anything that is neither empty, `latest`, a version, nor
    /// a requirement is kept as a literal and matched verbatim.
    pub fn parse(input: &str) -> Self {
        let input = input.trim();

        if input.is_empty() || input == "latest" {
            return VersionConstraint::Latest;
        }

        let unprefixed = input.strip_prefix('v').unwrap_or(input);
        if let Ok(version) = semver::Version::parse(unprefixed) {
            return VersionConstraint::Exact(version);
        }

        if let Ok(req) = semver::VersionReq::parse(input) {
            return VersionConstraint::Semver(req);
        }

        VersionConstraint::Literal(input.to_string())
    }

    /// Check if a version satisfies this constraint
    pub fn matches(&self, version: &str) -> bool {
        match self {
            VersionConstraint::Latest => true,
            VersionConstraint::Exact(expected) => {
                parse_version(version).is_some_and(|v| &v == expected)
            }
            VersionConstraint::Semver(req) => parse_version(version).is_some_and(|v| req.matches(&v)),
            VersionConstraint::Literal(literal) => literal == version,
        }
    }

    pub fn is_latest(&self) -> bool {
        matches!(self, VersionConstraint::Latest)
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionConstraint::Latest => f.write_str("latest"),
            VersionConstraint::Exact(v) => write!(f, "{}", v),
            VersionConstraint::Semver(req) => write!(f, "{}", req),
            VersionConstraint::Literal(s) => f.write_str(s),
        }
    }
}

/// Parse an index version, tolerating a leading `v`.
pub fn parse_version(version: &str) -> Option<semver::Version> {
    let version = version.trim();
    semver::Version::parse(version.strip_prefix('v').unwrap_or(version)).ok()
}

/// Compare two version strings to determine which is newer.
///
/// Semver versions order by precedence and always sort above non-semver
/// strings, which fall back to lexical order.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (parse_version(a), parse_version(b)) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => a.cmp(b),
    }
}

/// Whether a version is a semver pre-release.
pub fn is_prerelease(version: &str) -> bool {
    parse_version(version).is_some_and(|v| !v.pre.is_empty())
}
