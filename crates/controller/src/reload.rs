//! Active configuration with reload support
//!
//! Handlers read the configuration fresh on every invocation through
//! [`ConfigManager::current`]. A reload parses and validates the file
//! before swapping it in; a bad file leaves the running configuration
//! untouched.

use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, info};

use certpilot_config::Config;

/// Holds the active [`Config`] behind an atomic pointer swap
#[derive(Debug)]
pub struct ConfigManager {
    current: ArcSwap<Config>,
    path: Option<PathBuf>,
    reloads: AtomicU64,
    failed_reloads: AtomicU64,
}

impl ConfigManager {
    /// Load and validate the file at `path`, or the embedded default
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Config::from_file(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
            None => Config::default_embedded().context("Failed to load embedded configuration")?,
        };
        config.validate().context("Configuration validation failed")?;

        Ok(Self {
            current: ArcSwap::from_pointee(config),
            path: path.map(Path::to_path_buf),
            reloads: AtomicU64::new(0),
            failed_reloads: AtomicU64::new(0),
        })
    }

    /// Manager over a fixed configuration with nothing to reload from
    pub fn from_config(config: Config) -> Self {
        Self {
            current: ArcSwap::from_pointee(config),
            path: None,
            reloads: AtomicU64::new(0),
            failed_reloads: AtomicU64::new(0),
        }
    }

    pub fn current(&self) -> Arc<Config> {
        self.current.load_full()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Re-read the configuration file and apply it if valid
    ///
    /// Without a file this is a no-op.
    pub fn reload(&self) -> Result<()> {
        let Some(path) = self.path.as_deref() else {
            info!("No configuration file to reload, keeping current configuration");
            return Ok(());
        };

        info!(path = %path.display(), "Reloading configuration");

        let loaded = Config::from_file(path).and_then(|config| {
            config.validate()?;
            Ok(config)
        });

        match loaded {
            Ok(config) => {
                self.current.store(Arc::new(config));
                self.reloads.fetch_add(1, Ordering::Relaxed);
                info!(path = %path.display(), "Configuration reloaded");
                Ok(())
            }
            Err(e) => {
                self.failed_reloads.fetch_add(1, Ordering::Relaxed);
                error!(
                    path = %path.display(),
                    error = %e,
                    "Configuration reload rejected, continuing with current configuration"
                );
                Err(e)
            }
        }
    }

    /// Replace the active configuration directly
    pub fn replace(&self, config: Config) -> Result<()> {
        config.validate()?;
        self.current.store(Arc::new(config));
        self.reloads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// (successful, failed) reload counts
    pub fn reload_counts(&self) -> (u64, u64) {
        (
            self.reloads.load(Ordering::Relaxed),
            self.failed_reloads.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use certpilot_config::LetsEncryptMode;
    use tempfile::NamedTempFile;

    fn write_config(file: &mut NamedTempFile, body: &str) {
        std::fs::write(file.path(), body).unwrap();
    }

    #[test]
    fn test_embedded_default() {
        let manager = ConfigManager::load(None).unwrap();
        assert!(manager.current().certificates.lets_encrypt.is_enabled());
        assert!(manager.path().is_none());
        manager.reload().unwrap();
    }

    #[test]
    fn test_reload_applies_valid_file() {
        let mut file = NamedTempFile::new().unwrap();
        write_config(&mut file, "certificates {\n    lets-encrypt \"enabled\"\n}\n");
        let manager = ConfigManager::load(Some(file.path())).unwrap();

        write_config(&mut file, "certificates {\n    lets-encrypt \"Disabled\"\n}\n");
        manager.reload().unwrap();

        assert_eq!(
            manager.current().certificates.lets_encrypt,
            LetsEncryptMode::Disabled
        );
        assert_eq!(manager.reload_counts(), (1, 0));
    }

    #[test]
    fn test_reload_keeps_config_on_invalid_file() {
        let mut file = NamedTempFile::new().unwrap();
        write_config(&mut file, "certificates {\n    renew-before-days 20\n}\n");
        let manager = ConfigManager::load(Some(file.path())).unwrap();

        write_config(&mut file, "certificates {\n    renew-before-days 500\n}\n");
        assert!(manager.reload().is_err());
        assert_eq!(manager.current().certificates.renew_before_days, 20);

        write_config(&mut file, "certificates {");
        assert!(manager.reload().is_err());
        assert_eq!(manager.reload_counts(), (0, 2));
    }

    #[test]
    fn test_replace_validates() {
        let manager = ConfigManager::from_config(Config::default());
        let mut config = Config::default();
        config.certificates.renew_before_days = 0;
        assert!(manager.replace(config).is_err());

        let mut config = Config::default();
        config.certificates.lets_encrypt = LetsEncryptMode::Staging;
        manager.replace(config).unwrap();
        assert!(manager.current().certificates.lets_encrypt.is_staging());
    }
}
