//! Configuration sections.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use validator::{Validate, ValidationError};

use certpilot_common::names::is_fqdn;

// ============================================================================
// Certificate Automation
// ============================================================================

/// Whether and against which authority certificates are issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LetsEncryptMode {
    /// Issue against the production directory
    #[default]
    Enabled,
    /// Issue against the staging directory (untrusted certificates)
    Staging,
    /// Certificate automation is off; ProvisionCerts is a no-op
    Disabled,
}

impl LetsEncryptMode {
    pub fn is_enabled(self) -> bool {
        self != LetsEncryptMode::Disabled
    }

    pub fn is_staging(self) -> bool {
        self == LetsEncryptMode::Staging
    }
}

/// Error for an unrecognised `lets-encrypt` value
#[derive(Debug, Error)]
#[error("invalid lets-encrypt mode '{0}', expected one of: enabled, staging, disabled")]
pub struct ParseModeError(String);

impl FromStr for LetsEncryptMode {
    type Err = ParseModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("disabled") {
            Ok(LetsEncryptMode::Disabled)
        } else if s.eq_ignore_ascii_case("staging") {
            Ok(LetsEncryptMode::Staging)
        } else if s.eq_ignore_ascii_case("enabled") {
            Ok(LetsEncryptMode::Enabled)
        } else {
            Err(ParseModeError(s.to_string()))
        }
    }
}

impl fmt::Display for LetsEncryptMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LetsEncryptMode::Enabled => "enabled",
            LetsEncryptMode::Staging => "staging",
            LetsEncryptMode::Disabled => "disabled",
        };
        write!(f, "{s}")
    }
}

/// Certificate automation settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CertificatesConfig {
    /// Automation mode
    #[serde(default)]
    pub lets_encrypt: LetsEncryptMode,

    /// Contact email registered with the ACME account
    #[validate(email)]
    pub email: String,

    /// Custom ACME directory URL, overriding the Let's Encrypt directories
    #[serde(default)]
    #[validate(url)]
    pub directory_url: Option<String>,

    /// Renew certificates this many days before they expire
    #[serde(default = "default_renew_before_days")]
    #[validate(range(min = 1, max = 89))]
    pub renew_before_days: u32,

    /// Domains under this suffix are covered by the platform wildcard
    /// certificate and never provisioned individually
    #[serde(default = "default_reserved_suffix")]
    #[validate(length(min = 1))]
    pub reserved_suffix: String,

    /// Namespace holding the platform wildcard certificate
    #[serde(default = "default_system_namespace")]
    #[validate(length(min = 1, max = 63))]
    pub system_namespace: String,

    /// Record name of the platform wildcard certificate
    #[serde(default = "default_wildcard_secret_name")]
    #[validate(length(min = 1, max = 63))]
    pub wildcard_secret_name: String,

    /// Platform base domain; when set a wildcard certificate is
    /// provisioned for it at startup
    #[serde(default)]
    #[validate(custom(function = "validate_platform_domain"))]
    pub platform_domain: Option<String>,
}

impl Default for CertificatesConfig {
    fn default() -> Self {
        Self {
            lets_encrypt: LetsEncryptMode::default(),
            email: default_email(),
            directory_url: None,
            renew_before_days: default_renew_before_days(),
            reserved_suffix: default_reserved_suffix(),
            system_namespace: default_system_namespace(),
            wildcard_secret_name: default_wildcard_secret_name(),
            platform_domain: None,
        }
    }
}

fn validate_platform_domain(domain: &str) -> Result<(), ValidationError> {
    if is_fqdn(domain.trim_start_matches('.')) {
        Ok(())
    } else {
        Err(ValidationError::new("platform_domain_not_fqdn"))
    }
}

pub(crate) fn default_email() -> String {
    "admin@example.com".to_string()
}

pub(crate) fn default_renew_before_days() -> u32 {
    30
}

pub(crate) fn default_reserved_suffix() -> String {
    "on-acorn.io".to_string()
}

pub(crate) fn default_system_namespace() -> String {
    "certpilot-system".to_string()
}

pub(crate) fn default_wildcard_secret_name() -> String {
    "certpilot-tls".to_string()
}

// ============================================================================
// DNS-01 Provider
// ============================================================================

/// Webhook DNS provider used to publish DNS-01 TXT records.
///
/// Wildcard certificates can only be validated over DNS-01; without this
/// section they are refused.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DnsProviderConfig {
    /// Base URL of the record API
    #[validate(url)]
    pub url: String,

    /// Bearer token sent with every request
    #[serde(default)]
    pub token: Option<String>,

    /// Environment variable holding the token, read at startup
    #[serde(default)]
    pub token_env: Option<String>,

    /// Header carrying the token instead of `Authorization: Bearer`
    #[serde(default)]
    pub auth_header: Option<String>,

    #[serde(default = "default_api_timeout_secs")]
    #[validate(range(min = 1, max = 300))]
    pub api_timeout_secs: u64,

    /// Wait before the first propagation check
    #[serde(default = "default_propagation_delay_secs")]
    pub propagation_delay_secs: u64,

    #[serde(default = "default_propagation_check_interval_secs")]
    #[validate(range(min = 1))]
    pub propagation_check_interval_secs: u64,

    /// Give up waiting for the TXT record after this long
    #[serde(default = "default_propagation_timeout_secs")]
    #[validate(range(min = 1))]
    pub propagation_timeout_secs: u64,

    /// Resolvers queried for propagation; empty uses public resolvers
    #[serde(default)]
    #[validate(custom(function = "validate_nameservers"))]
    pub nameservers: Vec<String>,
}

impl DnsProviderConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: None,
            token_env: None,
            auth_header: None,
            api_timeout_secs: default_api_timeout_secs(),
            propagation_delay_secs: default_propagation_delay_secs(),
            propagation_check_interval_secs: default_propagation_check_interval_secs(),
            propagation_timeout_secs: default_propagation_timeout_secs(),
            nameservers: Vec::new(),
        }
    }
}

fn validate_nameservers(nameservers: &[String]) -> Result<(), ValidationError> {
    match nameservers.iter().find(|ns| ns.parse::<IpAddr>().is_err()) {
        None => Ok(()),
        Some(ns) => {
            let mut err = ValidationError::new("invalid_nameserver");
            err.message = Some(Cow::Owned(format!(
                "Invalid nameserver '{}'. Expected an IP address",
                ns
            )));
            Err(err)
        }
    }
}

pub(crate) fn default_api_timeout_secs() -> u64 {
    30
}

pub(crate) fn default_propagation_delay_secs() -> u64 {
    10
}

pub(crate) fn default_propagation_check_interval_secs() -> u64 {
    5
}

pub(crate) fn default_propagation_timeout_secs() -> u64 {
    120
}

// ============================================================================
// Storage
// ============================================================================

/// Persistent storage for records and ACME account credentials
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

pub(crate) fn default_storage_path() -> PathBuf {
    PathBuf::from("/var/lib/certpilot")
}

// ============================================================================
// HTTP-01 Challenge Responder
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ChallengeServerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_challenge_address")]
    #[validate(custom(function = "validate_socket_addr"))]
    pub address: String,
}

impl Default for ChallengeServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: default_challenge_address(),
        }
    }
}

fn validate_socket_addr(addr: &str) -> Result<(), ValidationError> {
    addr.parse::<SocketAddr>().map(|_| ()).map_err(|_| {
        let mut err = ValidationError::new("invalid_socket_address");
        err.message = Some(Cow::Owned(format!(
            "Invalid socket address '{}'. Expected format: IP:PORT (e.g., '0.0.0.0:8089')",
            addr
        )));
        err
    })
}

fn default_true() -> bool {
    true
}

pub(crate) fn default_challenge_address() -> String {
    "0.0.0.0:8089".to_string()
}

// ============================================================================
// Renewal Resync
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SchedulerConfig {
    /// Interval between full passes over managed TLS records
    #[serde(default = "default_resync_interval_secs")]
    #[validate(range(min = 60))]
    pub resync_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            resync_interval_secs: default_resync_interval_secs(),
        }
    }
}

pub(crate) fn default_resync_interval_secs() -> u64 {
    3600
}
