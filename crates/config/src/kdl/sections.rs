//! Section KDL parsing.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::trace;

use crate::sections::*;

use super::helpers::{get_bool_entry, get_int_entry, get_string_entry, get_string_list_entry};

/// Parse the `certificates` block
pub fn parse_certificates(node: &kdl::KdlNode) -> Result<CertificatesConfig> {
    trace!("Parsing certificates configuration block");

    let lets_encrypt = match get_string_entry(node, "lets-encrypt") {
        Some(mode) => mode.parse().context("Invalid 'lets-encrypt' value")?,
        None => LetsEncryptMode::default(),
    };

    let renew_before_days = match get_int_entry(node, "renew-before-days") {
        Some(days) => u32::try_from(days)
            .map_err(|_| anyhow::anyhow!("'renew-before-days' out of range: {}", days))?,
        None => default_renew_before_days(),
    };

    let config = CertificatesConfig {
        lets_encrypt,
        email: get_string_entry(node, "email").unwrap_or_else(default_email),
        directory_url: get_string_entry(node, "directory-url"),
        renew_before_days,
        reserved_suffix: get_string_entry(node, "reserved-suffix")
            .unwrap_or_else(default_reserved_suffix),
        system_namespace: get_string_entry(node, "system-namespace")
            .unwrap_or_else(default_system_namespace),
        wildcard_secret_name: get_string_entry(node, "wildcard-secret-name")
            .unwrap_or_else(default_wildcard_secret_name),
        platform_domain: get_string_entry(node, "platform-domain"),
    };

    trace!(
        lets_encrypt = %config.lets_encrypt,
        renew_before_days = config.renew_before_days,
        reserved_suffix = %config.reserved_suffix,
        "Parsed certificates configuration"
    );

    Ok(config)
}

/// Parse the `storage` block
pub fn parse_storage(node: &kdl::KdlNode) -> Result<StorageConfig> {
    Ok(StorageConfig {
        path: get_string_entry(node, "path")
            .map(PathBuf::from)
            .unwrap_or_else(default_storage_path),
    })
}

/// Parse the `challenge-server` block
pub fn parse_challenge_server(node: &kdl::KdlNode) -> Result<ChallengeServerConfig> {
    Ok(ChallengeServerConfig {
        enabled: get_bool_entry(node, "enabled").unwrap_or(true),
        address: get_string_entry(node, "address").unwrap_or_else(default_challenge_address),
    })
}

/// Parse the `scheduler` block
pub fn parse_scheduler(node: &kdl::KdlNode) -> Result<SchedulerConfig> {
    let resync_interval_secs = match get_int_entry(node, "resync-interval-secs") {
        Some(secs) => u64::try_from(secs)
            .map_err(|_| anyhow::anyhow!("'resync-interval-secs' out of range: {}", secs))?,
        None => default_resync_interval_secs(),
    };

    Ok(SchedulerConfig {
        resync_interval_secs,
    })
}

/// Parse the `dns-provider` block
pub fn parse_dns_provider(node: &kdl::KdlNode) -> Result<DnsProviderConfig> {
    let url = get_string_entry(node, "url")
        .ok_or_else(|| anyhow::anyhow!("'dns-provider' requires a 'url'"))?;

    let secs = |name: &str, default: u64| -> Result<u64> {
        match get_int_entry(node, name) {
            Some(value) => u64::try_from(value)
                .map_err(|_| anyhow::anyhow!("'{}' out of range: {}", name, value)),
            None => Ok(default),
        }
    };

    let config = DnsProviderConfig {
        url,
        token: get_string_entry(node, "token"),
        token_env: get_string_entry(node, "token-env"),
        auth_header: get_string_entry(node, "auth-header"),
        api_timeout_secs: secs("api-timeout-secs", default_api_timeout_secs())?,
        propagation_delay_secs: secs("propagation-delay-secs", default_propagation_delay_secs())?,
        propagation_check_interval_secs: secs(
            "propagation-check-interval-secs",
            default_propagation_check_interval_secs(),
        )?,
        propagation_timeout_secs: secs(
            "propagation-timeout-secs",
            default_propagation_timeout_secs(),
        )?,
        nameservers: get_string_list_entry(node, "nameservers"),
    };

    trace!(url = %config.url, "Parsed dns-provider configuration");
    Ok(config)
}
