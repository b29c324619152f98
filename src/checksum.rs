//! Digest functions and the DRUID type

use sha2::{Digest, Sha256, Sha512};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Decomposable recursive unique identifier: the digest of a record's payload
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Druid(String);

impl Druid {
    /// Get the digest string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Druid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Druid {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Druid {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for Druid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for Druid {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Druid {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl From<Druid> for serde_json::Value {
    fn from(druid: Druid) -> Self {
        serde_json::Value::String(druid.0)
    }
}

/// A pure, unsalted function from canonical string to digest string
pub trait DigestFunction: Send + Sync {
    fn digest(&self, canonical: &str) -> String;

    /// Tag stored alongside each record as its digest version
    fn version(&self) -> &str;
}

/// SHA-256, lowercase hex
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Digest;

impl DigestFunction for Sha256Digest {
    fn digest(&self, canonical: &str) -> String {
        format!("{:x}", Sha256::digest(canonical.as_bytes()))
    }

    fn version(&self) -> &str {
        "sha256"
    }
}

/// SHA-512, lowercase hex
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha512Digest;

impl DigestFunction for Sha512Digest {
    fn digest(&self, canonical: &str) -> String {
        format!("{:x}", Sha512::digest(canonical.as_bytes()))
    }

    fn version(&self) -> &str {
        "sha512"
    }
}

/// Any closure, tagged with a version name
pub struct FnDigest<F> {
    version: String,
    f: F,
}

impl<F> FnDigest<F>
where
    F: Fn(&str) -> String + Send + Sync,
{
    pub fn new(version: impl Into<String>, f: F) -> Self {
        Self {
            version: version.into(),
            f,
        }
    }
}

impl<F> DigestFunction for FnDigest<F>
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn digest(&self, canonical: &str) -> String {
        (self.f)(canonical)
    }

    fn version(&self) -> &str {
        &self.version
    }
}
