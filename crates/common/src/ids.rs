//! Type-safe identifier newtypes for certpilot.
//!
//! These types keep domain names and record identities from being mixed
//! up with arbitrary strings (e.g., passing a record name where a domain
//! is expected).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Fully-qualified DNS name a certificate may be issued for.
///
/// Domains are the identity key for both locking and certificate lookup.
/// They are compared, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Domain(String);

impl Domain {
    pub fn new(domain: impl Into<String>) -> Self {
        Self(domain.into())
    }

    /// Wildcard form covering every direct subdomain of `base`.
    ///
    /// A leading dot on `base` is ignored, so `.example.com` and
    /// `example.com` both yield `*.example.com`.
    pub fn wildcard_of(base: &str) -> Self {
        Self(format!("*.{}", base.trim_start_matches('.')))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_wildcard(&self) -> bool {
        self.0.starts_with("*.")
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Domain {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Domain {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for Domain {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identity of a persisted record: `(namespace, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
