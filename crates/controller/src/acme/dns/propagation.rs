//! TXT record propagation checks
//!
//! The CA is told a DNS-01 challenge is ready only once public resolvers
//! return the expected value.

use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::TokioAsyncResolver;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use certpilot_config::DnsProviderConfig;

use super::provider::{DnsProviderError, DnsResult};

#[derive(Debug, Clone)]
pub struct PropagationConfig {
    pub initial_delay: Duration,
    pub check_interval: Duration,
    pub timeout: Duration,
    /// Resolvers to query; empty means the public defaults
    pub nameservers: Vec<IpAddr>,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(10),
            check_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(120),
            nameservers: Vec::new(),
        }
    }
}

impl PropagationConfig {
    pub fn from_provider_config(config: &DnsProviderConfig) -> DnsResult<Self> {
        let nameservers = config
            .nameservers
            .iter()
            .map(|ns| {
                ns.parse::<IpAddr>().map_err(|_| {
                    DnsProviderError::Configuration(format!("invalid nameserver '{}'", ns))
                })
            })
            .collect::<DnsResult<Vec<_>>>()?;

        Ok(Self {
            initial_delay: Duration::from_secs(config.propagation_delay_secs),
            check_interval: Duration::from_secs(config.propagation_check_interval_secs),
            timeout: Duration::from_secs(config.propagation_timeout_secs),
            nameservers,
        })
    }

    fn resolver_ips(&self) -> Vec<IpAddr> {
        if self.nameservers.is_empty() {
            vec![
                IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)),
                IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1)),
                IpAddr::V4(Ipv4Addr::new(9, 9, 9, 9)),
            ]
        } else {
            self.nameservers.clone()
        }
    }
}

/// Polls resolvers until a TXT record carries an expected value
pub struct PropagationChecker {
    config: PropagationConfig,
    resolver: TokioAsyncResolver,
}

impl PropagationChecker {
    pub fn new(config: PropagationConfig) -> Self {
        let group = NameServerConfigGroup::from_ips_clear(&config.resolver_ips(), 53, true);
        let resolver_config = ResolverConfig::from_parts(None, Vec::new(), group);

        let mut opts = ResolverOpts::default();
        opts.timeout = Duration::from_secs(5);
        opts.attempts = 3;
        opts.cache_size = 0;

        Self {
            resolver: TokioAsyncResolver::tokio(resolver_config, opts),
            config,
        }
    }

    /// Wait until `record_fqdn` resolves to `expected_value`
    pub async fn wait_for(&self, record_fqdn: &str, expected_value: &str) -> DnsResult<()> {
        let start = Instant::now();
        let deadline = start + self.config.timeout;

        debug!(
            record = %record_fqdn,
            timeout_secs = self.config.timeout.as_secs(),
            "Waiting for DNS propagation"
        );
        tokio::time::sleep(self.config.initial_delay).await;

        loop {
            match self.has_value(record_fqdn, expected_value).await {
                Ok(true) => {
                    debug!(
                        record = %record_fqdn,
                        elapsed_secs = start.elapsed().as_secs(),
                        "DNS propagation confirmed"
                    );
                    return Ok(());
                }
                Ok(false) => trace!(record = %record_fqdn, "Record not yet propagated"),
                Err(e) => warn!(record = %record_fqdn, error = %e, "DNS lookup error"),
            }

            if Instant::now() > deadline {
                return Err(DnsProviderError::PropagationTimeout {
                    record_name: record_fqdn.to_string(),
                    elapsed_secs: start.elapsed().as_secs(),
                });
            }
            tokio::time::sleep(self.config.check_interval).await;
        }
    }

    async fn has_value(&self, record_fqdn: &str, expected_value: &str) -> DnsResult<bool> {
        match self.resolver.txt_lookup(record_fqdn).await {
            Ok(records) => Ok(records.iter().any(|txt| {
                let value: String = txt
                    .txt_data()
                    .iter()
                    .map(|chunk| String::from_utf8_lossy(chunk))
                    .collect();
                value == expected_value
            })),
            Err(e) => match e.kind() {
                ResolveErrorKind::NoRecordsFound { .. } => Ok(false),
                _ => Err(DnsProviderError::ApiRequest(format!(
                    "DNS lookup failed for '{}': {}",
                    record_fqdn, e
                ))),
            },
        }
    }
}

impl std::fmt::Debug for PropagationChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropagationChecker")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
