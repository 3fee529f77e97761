//! Filesystem-backed record store
//!
//! # Directory Structure
//!
//! ```text
//! storage/
//! └── records/
//!     └── <namespace>/
//!         └── <name>.json   # Whole secret record (data base64-encoded)
//! ```
//!
//! Creates are published with a hard link from a fully written temporary
//! file, so a record is either absent or complete and a second create of
//! the same key fails. Updates replace the file with an atomic rename.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tracing::{debug, info, trace, warn};

use certpilot_common::ObjectKey;

use super::{LabelSelector, RecordStore, Secret, StoreError};

const RECORDS_DIR: &str = "records";

/// Record store persisting one JSON document per record
#[derive(Debug)]
pub struct FileStore {
    /// Base storage directory
    base_path: PathBuf,
    /// Distinguishes temporary files of concurrent writers
    tmp_counter: AtomicU64,
}

impl FileStore {
    /// Create a store rooted at `base_path`
    ///
    /// Creates the directory structure if it doesn't exist and sets
    /// restrictive permissions (0700 on Unix).
    pub async fn new(base_path: &Path) -> Result<Self, StoreError> {
        let records_path = base_path.join(RECORDS_DIR);
        fs::create_dir_all(&records_path).await?;
        restrict_dir(base_path).await?;
        restrict_dir(&records_path).await?;

        info!(
            storage_path = %base_path.display(),
            "Initialized record storage"
        );

        Ok(Self {
            base_path: base_path.to_path_buf(),
            tmp_counter: AtomicU64::new(0),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn records_path(&self) -> PathBuf {
        self.base_path.join(RECORDS_DIR)
    }

    fn record_path(&self, key: &ObjectKey) -> Result<PathBuf, StoreError> {
        check_segment(key, &key.namespace)?;
        check_segment(key, &key.name)?;
        Ok(self
            .records_path()
            .join(&key.namespace)
            .join(format!("{}.json", key.name)))
    }

    fn tmp_path(&self, target: &Path) -> PathBuf {
        let n = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        target.with_extension(format!("json.{}.{}.tmp", std::process::id(), n))
    }

    async fn read_record(path: &Path) -> Result<Secret, StoreError> {
        let content = fs::read(path).await?;
        Ok(serde_json::from_slice(&content)?)
    }

    async fn write_tmp(&self, target: &Path, secret: &Secret) -> Result<PathBuf, StoreError> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
            restrict_dir(parent).await?;
        }

        let tmp = self.tmp_path(target);
        let content = serde_json::to_vec_pretty(secret)?;
        fs::write(&tmp, content).await?;
        restrict_file(&tmp).await?;
        Ok(tmp)
    }
}

#[async_trait]
impl RecordStore for FileStore {
    async fn get(&self, key: &ObjectKey) -> Result<Secret, StoreError> {
        let path = self.record_path(key)?;
        match Self::read_record(&path).await {
            Err(StoreError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                trace!(key = %key, "No stored record found");
                Err(StoreError::NotFound { key: key.clone() })
            }
            other => other,
        }
    }

    async fn list(&self, selector: &LabelSelector) -> Result<Vec<Secret>, StoreError> {
        let records_path = self.records_path();
        let mut matched = Vec::new();

        let mut namespaces = match fs::read_dir(&records_path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(matched),
            Err(e) => return Err(e.into()),
        };

        while let Some(namespace) = namespaces.next_entry().await? {
            if !namespace.file_type().await?.is_dir() {
                continue;
            }

            let mut records = fs::read_dir(namespace.path()).await?;
            while let Some(entry) = records.next_entry().await? {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }

                match Self::read_record(&path).await {
                    Ok(secret) if selector.matches(&secret.metadata.labels) => {
                        matched.push(secret)
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Skipping unreadable record");
                    }
                }
            }
        }

        matched.sort_by_key(Secret::key);
        debug!(count = matched.len(), "Listed stored records");
        Ok(matched)
    }

    async fn create(&self, mut secret: Secret) -> Result<Secret, StoreError> {
        let key = secret.key();
        let path = self.record_path(&key)?;
        secret.metadata.resource_version = Some(1);

        let tmp = self.write_tmp(&path, &secret).await?;
        let linked = fs::hard_link(&tmp, &path).await;
        let _ = fs::remove_file(&tmp).await;

        match linked {
            Ok(()) => {
                info!(key = %key, "Created record");
                Ok(secret)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(StoreError::AlreadyExists { key })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update(&self, mut secret: Secret) -> Result<Secret, StoreError> {
        let key = secret.key();
        let existing = self.get(&key).await?;

        let actual = existing.metadata.resource_version.unwrap_or_default();
        if let Some(expected) = secret.metadata.resource_version {
            if expected != actual {
                return Err(StoreError::Conflict {
                    key,
                    expected,
                    actual,
                });
            }
        }
        secret.metadata.resource_version = Some(actual + 1);

        let path = self.record_path(&key)?;
        let tmp = self.write_tmp(&path, &secret).await?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        info!(key = %key, "Updated record");
        Ok(secret)
    }
}

/// Reject key segments that would escape the records directory
fn check_segment(key: &ObjectKey, segment: &str) -> Result<(), StoreError> {
    let reason = if segment.is_empty() {
        "empty segment"
    } else if segment.starts_with('.') {
        "segment starts with '.'"
    } else if segment.contains(['/', '\\']) {
        "segment contains a path separator"
    } else {
        return Ok(());
    };

    Err(StoreError::InvalidKey {
        key: key.clone(),
        reason: reason.to_string(),
    })
}

async fn restrict_dir(path: &Path) -> Result<(), StoreError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, std::fs::Permissions::from_mode(0o700)).await?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

async fn restrict_file(path: &Path) -> Result<(), StoreError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
