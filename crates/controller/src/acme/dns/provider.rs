//! DNS provider seam for DNS-01 challenges

use async_trait::async_trait;
use std::fmt::Debug;
use thiserror::Error;

pub type DnsResult<T> = Result<T, DnsProviderError>;

/// Errors from publishing or removing challenge records
#[derive(Debug, Error)]
pub enum DnsProviderError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Failed to create TXT record '{record_name}': {message}")]
    RecordCreation { record_name: String, message: String },

    #[error("Failed to delete TXT record '{record_id}': {message}")]
    RecordDeletion { record_id: String, message: String },

    #[error("DNS API request failed: {0}")]
    ApiRequest(String),

    #[error("TXT record '{record_name}' not visible after {elapsed_secs}s")]
    PropagationTimeout { record_name: String, elapsed_secs: u64 },

    #[error("Invalid DNS provider configuration: {0}")]
    Configuration(String),
}

/// Publishes TXT records in the zone serving a domain
#[async_trait]
pub trait DnsProvider: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    /// Create `<record_name>.<domain>` with `record_value` and return an
    /// id for [`DnsProvider::delete_txt_record`]
    async fn create_txt_record(
        &self,
        domain: &str,
        record_name: &str,
        record_value: &str,
    ) -> DnsResult<String>;

    /// Remove a record created earlier. Deleting a missing record succeeds.
    async fn delete_txt_record(&self, domain: &str, record_id: &str) -> DnsResult<()>;
}

/// Label under which DNS-01 challenge values are published
pub const ACME_CHALLENGE_RECORD: &str = "_acme-challenge";

/// TTL requested for challenge records
pub const CHALLENGE_TTL: u32 = 60;

/// Domain whose zone carries the challenge; `*.example.com` → `example.com`
pub fn normalize_domain(domain: &str) -> &str {
    domain.strip_prefix("*.").unwrap_or(domain)
}

pub fn challenge_record_fqdn(domain: &str) -> String {
    format!("{}.{}", ACME_CHALLENGE_RECORD, normalize_domain(domain))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_challenge_record_fqdn() {
        assert_eq!(
            challenge_record_fqdn("example.com"),
            "_acme-challenge.example.com"
        );
        assert_eq!(
            challenge_record_fqdn("*.abc123.on-acorn.io"),
            "_acme-challenge.abc123.on-acorn.io"
        );
        assert_eq!(normalize_domain("*.example.com"), "example.com");
        assert_eq!(normalize_domain("sub.example.com"), "sub.example.com");
    }
}
