//! DNS-01 validation for wildcard certificates
//!
//! - [`DnsProvider`] - seam for publishing TXT records
//! - [`WebhookProvider`] - record API over HTTP with a bearer token
//! - [`PropagationChecker`] - waits until resolvers see the record
//! - [`Dns01Solver`] - publish, wait and clean up for one order

mod propagation;
mod provider;
mod webhook;

pub use propagation::{PropagationChecker, PropagationConfig};
pub use provider::{
    challenge_record_fqdn, normalize_domain, DnsProvider, DnsProviderError, DnsResult,
    ACME_CHALLENGE_RECORD, CHALLENGE_TTL,
};
pub use webhook::WebhookProvider;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info, warn};

use certpilot_common::Domain;
use certpilot_config::DnsProviderConfig;

/// TXT value for a key authorization: base64url(sha256(key_authorization))
pub fn challenge_value(key_authorization: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(key_authorization.as_bytes()))
}

/// A challenge record that exists at the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedRecord {
    /// Zone-level domain the record was created under
    pub zone_domain: String,
    pub fqdn: String,
    pub value: String,
    pub record_id: String,
}

/// Publishes DNS-01 records through a provider and waits for them
#[derive(Debug)]
pub struct Dns01Solver {
    provider: Arc<dyn DnsProvider>,
    propagation: PropagationChecker,
}

impl Dns01Solver {
    pub fn new(provider: Arc<dyn DnsProvider>, propagation: PropagationChecker) -> Self {
        Self {
            provider,
            propagation,
        }
    }

    /// Webhook provider and propagation settings from the `dns-provider` section
    pub fn from_config(config: &DnsProviderConfig) -> DnsResult<Self> {
        let provider = WebhookProvider::from_config(config)?;
        info!(url = %provider.base_url(), "Configured DNS-01 webhook provider");
        let propagation = PropagationChecker::new(PropagationConfig::from_provider_config(config)?);
        Ok(Self::new(Arc::new(provider), propagation))
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Create the TXT records for every key authorization of `domain`.
    ///
    /// If any creation fails, records created so far are removed before
    /// the error is returned.
    pub async fn publish(
        &self,
        domain: &Domain,
        key_authorizations: &[String],
    ) -> DnsResult<Vec<PublishedRecord>> {
        let zone_domain = normalize_domain(domain.as_str()).to_string();
        let fqdn = challenge_record_fqdn(domain.as_str());
        let mut published = Vec::with_capacity(key_authorizations.len());

        for key_authorization in key_authorizations {
            let value = challenge_value(key_authorization);
            info!(
                domain = %domain,
                record = %fqdn,
                provider = %self.provider.name(),
                "Creating DNS-01 challenge record"
            );

            match self
                .provider
                .create_txt_record(&zone_domain, ACME_CHALLENGE_RECORD, &value)
                .await
            {
                Ok(record_id) => published.push(PublishedRecord {
                    zone_domain: zone_domain.clone(),
                    fqdn: fqdn.clone(),
                    value,
                    record_id,
                }),
                Err(e) => {
                    self.cleanup(&published).await;
                    return Err(e);
                }
            }
        }

        Ok(published)
    }

    /// Wait until every record is visible to resolvers
    pub async fn wait_for_propagation(&self, records: &[PublishedRecord]) -> DnsResult<()> {
        for record in records {
            self.propagation.wait_for(&record.fqdn, &record.value).await?;
        }
        Ok(())
    }

    /// Remove records; failures are logged and otherwise ignored
    pub async fn cleanup(&self, records: &[PublishedRecord]) {
        for record in records {
            debug!(record = %record.fqdn, record_id = %record.record_id, "Removing DNS-01 challenge record");
            if let Err(e) = self
                .provider
                .delete_txt_record(&record.zone_domain, &record.record_id)
                .await
            {
                warn!(
                    record = %record.fqdn,
                    record_id = %record.record_id,
                    error = %e,
                    "Failed to remove DNS-01 challenge record"
                );
            }
        }
    }
}
