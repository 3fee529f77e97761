//! Declarative record store interface
//!
//! Certificates are persisted as secret records identified by
//! `(namespace, name)`. The store itself is an external collaborator; this
//! module defines the record shape, the operations the controller consumes
//! and two implementations:
//!
//! - [`MemoryStore`] - in-process map, used by tests and `--in-memory` runs
//! - [`FileStore`] - one JSON document per record on local disk
//!
//! All writes are whole-record creates or updates. Concurrent writers to
//! the same key resolve as last-writer-wins unless the update carries a
//! resource version.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use certpilot_common::labels::{self, SECRET_TYPE_OPAQUE, SECRET_TYPE_TLS};
use certpilot_common::ObjectKey;

// ============================================================================
// Record Shape
// ============================================================================

/// Identity and metadata of a stored record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub namespace: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Bumped by the store on every write. Updates carrying `Some` must
    /// match the stored value; `None` overwrites unconditionally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<u64>,
}

impl ObjectMeta {
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.name)
    }
}

/// Type marker of a secret record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SecretType {
    /// Certificate chain and private key under `tls.crt` / `tls.key`
    Tls,
    #[default]
    Opaque,
    Other(String),
}

impl From<String> for SecretType {
    fn from(s: String) -> Self {
        match s.as_str() {
            SECRET_TYPE_TLS => SecretType::Tls,
            SECRET_TYPE_OPAQUE | "" => SecretType::Opaque,
            _ => SecretType::Other(s),
        }
    }
}

impl From<SecretType> for String {
    fn from(t: SecretType) -> Self {
        match t {
            SecretType::Tls => SECRET_TYPE_TLS.to_string(),
            SecretType::Opaque => SECRET_TYPE_OPAQUE.to_string(),
            SecretType::Other(s) => s,
        }
    }
}

/// A persisted secret record
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    pub metadata: ObjectMeta,
    #[serde(rename = "type", default)]
    pub type_: SecretType,
    #[serde(default, with = "base64_data")]
    pub data: BTreeMap<String, Vec<u8>>,
}

impl Secret {
    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }

    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata.annotations.get(key).map(String::as_str)
    }

    pub fn is_managed(&self) -> bool {
        self.metadata.labels.get(labels::MANAGED).map(String::as_str) == Some("true")
    }
}

// Data values are key material; only their keys and sizes are printed.
impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data: BTreeMap<&str, usize> = self
            .data
            .iter()
            .map(|(k, v)| (k.as_str(), v.len()))
            .collect();
        f.debug_struct("Secret")
            .field("metadata", &self.metadata)
            .field("type", &self.type_)
            .field("data_sizes", &data)
            .finish()
    }
}

mod base64_data {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S: Serializer>(
        data: &BTreeMap<String, Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let encoded: BTreeMap<&str, String> = data
            .iter()
            .map(|(k, v)| (k.as_str(), STANDARD.encode(v)))
            .collect();
        encoded.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<String, Vec<u8>>, D::Error> {
        let encoded = BTreeMap::<String, String>::deserialize(deserializer)?;
        encoded
            .into_iter()
            .map(|(k, v)| {
                STANDARD
                    .decode(v.as_bytes())
                    .map(|bytes| (k, bytes))
                    .map_err(de::Error::custom)
            })
            .collect()
    }
}

// ============================================================================
// Selection
// ============================================================================

/// Equality-based label selector
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    required: BTreeMap<String, String>,
}

impl LabelSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Selector for records owned by certpilot
    pub fn managed() -> Self {
        Self::new().with(labels::MANAGED, "true")
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.required.insert(key.into(), value.into());
        self
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.required
            .iter()
            .all(|(k, v)| labels.get(k).is_some_and(|actual| actual == v))
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors returned by record stores
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record {key} not found")]
    NotFound { key: ObjectKey },

    #[error("record {key} already exists")]
    AlreadyExists { key: ObjectKey },

    #[error("record {key} was modified concurrently (expected version {expected}, found {actual})")]
    Conflict {
        key: ObjectKey,
        expected: u64,
        actual: u64,
    },

    #[error("invalid record key {key}: {reason}")]
    InvalidKey { key: ObjectKey, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists { .. })
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

// ============================================================================
// Store Interface
// ============================================================================

/// Operations consumed from the declarative resource store
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch the record at `key`, or [`StoreError::NotFound`]
    async fn get(&self, key: &ObjectKey) -> Result<Secret, StoreError>;

    /// All records, in every namespace, whose labels match `selector`
    async fn list(&self, selector: &LabelSelector) -> Result<Vec<Secret>, StoreError>;

    /// Create a record; fails with [`StoreError::AlreadyExists`] if the key is taken
    async fn create(&self, secret: Secret) -> Result<Secret, StoreError>;

    /// Replace an existing record as a whole
    async fn update(&self, secret: Secret) -> Result<Secret, StoreError>;
}
