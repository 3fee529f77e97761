//! Certificate authority session interface
//!
//! The controller talks to a certificate authority through
//! [`CertificateAuthority`]. The production implementation is
//! [`crate::acme::AcmeAuthority`]; tests substitute a recording fake.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;

use certpilot_common::Domain;

use crate::acme::dns::DnsProviderError;
use crate::acme::CredentialError;

/// Certificate material returned by an authority
#[derive(Clone)]
pub struct IssuedCertificate {
    /// PEM-encoded certificate chain, leaf first
    pub cert_pem: String,
    /// PEM-encoded private key matching the leaf
    pub key_pem: String,
    pub not_after: DateTime<Utc>,
}

impl fmt::Debug for IssuedCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedCertificate")
            .field("cert_pem_len", &self.cert_pem.len())
            .field("not_after", &self.not_after)
            .finish_non_exhaustive()
    }
}

/// Errors that can occur while talking to a certificate authority
#[derive(Debug, Error)]
pub enum AuthorityError {
    /// Failed to create or load the authority account
    #[error("Failed to create ACME account: {0}")]
    AccountCreation(String),

    /// Failed to create certificate order
    #[error("Failed to create certificate order for '{domain}': {message}")]
    OrderCreation { domain: Domain, message: String },

    /// Challenge validation failed
    #[error("Challenge validation failed for domain '{domain}': {message}")]
    ChallengeValidation { domain: Domain, message: String },

    /// No HTTP-01 challenge offered for the domain
    #[error("No HTTP-01 challenge available for domain '{0}'")]
    NoHttp01Challenge(Domain),

    /// No DNS-01 challenge offered for the domain
    #[error("No DNS-01 challenge available for domain '{0}'")]
    NoDns01Challenge(Domain),

    /// Wildcard requested without a DNS provider configured
    #[error("Wildcard domain '{domain}' requires DNS-01 challenge type")]
    WildcardRequiresDns01 { domain: Domain },

    /// Publishing or checking a DNS-01 record failed
    #[error("DNS-01 error: {0}")]
    Dns(#[from] DnsProviderError),

    /// Certificate finalization failed
    #[error("Failed to finalize certificate for '{domain}': {message}")]
    Finalization { domain: Domain, message: String },

    /// The issued certificate could not be parsed
    #[error("Failed to parse certificate: {0}")]
    CertificateParse(String),

    /// Operation timed out
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// ACME protocol error from instant-acme
    #[error("ACME protocol error: {0}")]
    Protocol(String),

    /// Account credential persistence failed
    #[error("Credential storage error: {0}")]
    Storage(#[from] CredentialError),

    /// Authority refused or failed the request for another reason
    #[error("Certificate authority error: {0}")]
    Other(String),
}

impl From<instant_acme::Error> for AuthorityError {
    fn from(e: instant_acme::Error) -> Self {
        AuthorityError::Protocol(e.to_string())
    }
}

/// A session with an external certificate authority
#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    /// Ensure an account exists with the authority. Idempotent.
    async fn register_account_if_absent(&self) -> Result<(), AuthorityError>;

    /// Request a certificate covering exactly `domain`
    async fn obtain_certificate(&self, domain: &Domain) -> Result<IssuedCertificate, AuthorityError>;
}
