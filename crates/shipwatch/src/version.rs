//! Release versions and the release lines (`major.minor`) they belong to.
//!
//! Parsing goes through the `semver` grammar, but only plain
//! `major.minor.patch` versions are accepted: a pre-release or build suffix
//! never names a published release line.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A released version, ordered by `(major, minor, patch)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl Version {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Release line this version belongs to.
    pub fn branch(&self) -> BranchKey {
        BranchKey::new(self.major, self.minor)
    }

    /// Parse a tag name, returning `None` for anything that is not a plain
    /// version (`latest`, `stable`, `1.1`, `1.1.0-rc1`, ...).
    pub fn from_tag(name: &str) -> Option<Self> {
        name.parse().ok()
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parsed = semver::Version::parse(s.trim()).map_err(|e| Error::Parse {
            input: s.to_string(),
            message: e.to_string(),
        })?;
        if !parsed.pre.is_empty() || !parsed.build.is_empty() {
            return Err(Error::Parse {
                input: s.to_string(),
                message: "pre-release and build metadata are not release versions".to_string(),
            });
        }
        Ok(Self::new(parsed.major, parsed.minor, parsed.patch))
    }
}

impl TryFrom<String> for Version {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.to_string()
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// A release line, `(major, minor)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BranchKey {
    pub major: u64,
    pub minor: u64,
}

impl BranchKey {
    pub const fn new(major: u64, minor: u64) -> Self {
        Self { major, minor }
    }
}

impl FromStr for BranchKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = |message: &str| Error::Parse {
            input: s.to_string(),
            message: message.to_string(),
        };
        let (major, minor) = s.trim().split_once('.').ok_or_else(|| bad("expected major.minor"))?;
        let major = major.parse().map_err(|_| bad("major is not a number"))?;
        let minor = minor.parse().map_err(|_| bad("minor is not a number"))?;
        Ok(Self::new(major, minor))
    }
}

impl TryFrom<String> for BranchKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BranchKey> for String {
    fn from(b: BranchKey) -> Self {
        b.to_string()
    }
}

impl fmt::Display for BranchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}
