//! Configuration loading and validation for certpilot
//!
//! Configuration is written in KDL. Every section is optional; missing
//! sections and values fall back to defaults.
//!
//! ```kdl
//! certificates {
//!     lets-encrypt "enabled"
//!     email "admin@example.com"
//!     renew-before-days 30
//!     reserved-suffix "on-acorn.io"
//!     system-namespace "certpilot-system"
//!     wildcard-secret-name "certpilot-tls"
//! }
//! storage {
//!     path "/var/lib/certpilot"
//! }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};
use validator::Validate;

pub mod kdl;
pub mod sections;

pub use sections::{
    CertificatesConfig, ChallengeServerConfig, DnsProviderConfig, LetsEncryptMode, ParseModeError,
    SchedulerConfig, StorageConfig,
};

/// Configuration used when no file is given
pub const DEFAULT_CONFIG_KDL: &str = r#"
certificates {
    lets-encrypt "enabled"
    email "admin@example.com"
    renew-before-days 30
    reserved-suffix "on-acorn.io"
    system-namespace "certpilot-system"
    wildcard-secret-name "certpilot-tls"
}

storage {
    path "/var/lib/certpilot"
}

challenge-server {
    enabled #true
    address "0.0.0.0:8089"
}

scheduler {
    resync-interval-secs 3600
}

// Wildcards need a DNS provider for DNS-01:
// dns-provider {
//     url "https://dns.example.com/api"
//     token-env "CERTPILOT_DNS_TOKEN"
// }
"#;

/// Complete controller configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct Config {
    #[validate(nested)]
    pub certificates: CertificatesConfig,

    #[validate(nested)]
    pub storage: StorageConfig,

    #[validate(nested)]
    pub challenge_server: ChallengeServerConfig,

    #[validate(nested)]
    pub scheduler: SchedulerConfig,

    /// DNS-01 provider for wildcard certificates
    #[serde(default)]
    #[validate(nested)]
    pub dns_provider: Option<DnsProviderConfig>,
}

impl Config {
    /// Load configuration from a KDL file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading configuration file");

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;

        let config = Self::from_kdl(&content)
            .with_context(|| format!("Failed to parse configuration file {}", path.display()))?;

        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Parse configuration from KDL text
    pub fn from_kdl(content: &str) -> Result<Self> {
        crate::kdl::parse_kdl(content)
    }

    /// Embedded default configuration
    pub fn default_embedded() -> Result<Self> {
        Self::from_kdl(DEFAULT_CONFIG_KDL).context("Embedded default configuration is invalid")
    }

    /// Validate all sections
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))
    }
}
