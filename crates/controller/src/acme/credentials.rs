//! Persisted ACME account credentials
//!
//! ```text
//! storage/
//! └── acme/
//!     └── credentials.json   # instant_acme::AccountCredentials, 0600
//! ```

use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, trace};

const ACME_DIR: &str = "acme";
const CREDENTIALS_FILE: &str = "credentials.json";

/// Errors reading or writing account credentials
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Opaque account credentials on local disk
#[derive(Debug, Clone)]
pub struct CredentialStore {
    dir: PathBuf,
}

impl CredentialStore {
    /// Credentials kept under `<storage>/acme`
    pub fn new(storage_path: &Path) -> Self {
        Self {
            dir: storage_path.join(ACME_DIR),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(CREDENTIALS_FILE)
    }

    /// Raw credentials JSON, or `None` if no account has been saved
    pub async fn load_credentials_json(&self) -> Result<Option<String>, CredentialError> {
        match fs::read_to_string(self.path()).await {
            Ok(content) => {
                debug!(path = %self.path().display(), "Loaded ACME credentials");
                Ok(Some(content))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                trace!("No stored ACME credentials found");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn save_credentials_json(&self, json: &str) -> Result<(), CredentialError> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.path();
        fs::write(&path, json).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.dir, std::fs::Permissions::from_mode(0o700)).await?;
            fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).await?;
        }

        info!(path = %path.display(), "Saved ACME credentials");
        Ok(())
    }
}
