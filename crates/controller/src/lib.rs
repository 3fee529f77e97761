//! Certpilot Library
//!
//! Certificate lifecycle management for dynamically named application
//! endpoints. Certificates are provisioned, reused across namespaces and
//! renewed without double-issuing under concurrent, repeated triggers.
//!
//! - **Handlers**: `provision_certs`, `renew_cert` and
//!   `provision_wildcard_cert` entry points for the dispatch framework
//! - **Repository**: reuse, copy and background issuance over a record store
//! - **ACME**: certificate authority session, HTTP-01 with a challenge responder and
//!   DNS-01 through a webhook DNS provider for wildcards
//! - **Renewal**: expiry window policy and periodic resync
//! - **Hot Reload**: configuration changes on SIGHUP without restarts
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use certpilot::{CertificateController, CertificateRepository, ConfigManager};
//! use certpilot::locks::DomainLockRegistry;
//! use certpilot::store::MemoryStore;
//!
//! let repository = CertificateRepository::new(
//!     Arc::new(MemoryStore::new()),
//!     authority,
//!     Arc::new(DomainLockRegistry::new()),
//! );
//! let controller = CertificateController::new(
//!     Arc::new(ConfigManager::load(None)?),
//!     Arc::new(repository),
//! );
//! controller.provision_certs(&mut app).await?;
//! ```

// ============================================================================
// Module Declarations
// ============================================================================

pub mod acme;
pub mod authority;
pub mod codec;
pub mod handlers;
pub mod locks;
pub mod model;
pub mod reload;
pub mod renewal;
pub mod repository;
pub mod scheduler;
pub mod signals;
pub mod store;

#[cfg(test)]
mod test_support;

// ============================================================================
// Public API Re-exports
// ============================================================================

pub use authority::{AuthorityError, CertificateAuthority, IssuedCertificate};
pub use codec::{Certificate, CodecError};
pub use handlers::{
    is_tls_secret, CertificateController, HandlerError, ProvisionReport, RenewOutcome,
    RequireTlsSecret, SecretHandler,
};
pub use reload::ConfigManager;
pub use renewal::RenewalPolicy;
pub use repository::{CertificateRepository, ProvisionOutcome, RepositoryError};
pub use scheduler::ResyncScheduler;
