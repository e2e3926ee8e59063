//! Stack version identifiers

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned when a version string is not a valid `major.minor.patch`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid stack version '{input}': {reason}")]
pub struct VersionParseError {
    pub input: String,
    pub reason: String,
}

/// An ordered stack version (e.g. `8.15.4`, `9.0.0-SNAPSHOT`)
///
/// Ordering follows semantic versioning precedence, so pre-releases sort
/// before the corresponding release.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StackVersion(semver::Version);

impl StackVersion {
    /// Build a release version from its numeric components
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self(semver::Version::new(major, minor, patch))
    }

    /// True for `-SNAPSHOT` and other pre-release builds
    pub fn is_prerelease(&self) -> bool {
        !self.0.pre.is_empty()
    }
}

impl FromStr for StackVersion {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        semver::Version::parse(s.trim())
            .map(Self)
            .map_err(|e| VersionParseError {
                input: s.to_string(),
                reason: e.to_string(),
            })
    }
}

impl TryFrom<String> for StackVersion {
    type Error = VersionParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StackVersion> for String {
    fn from(value: StackVersion) -> Self {
        value.to_string()
    }
}

impl fmt::Display for StackVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
