//! Reconciliation handlers
//!
//! Entry points invoked by the surrounding dispatch framework:
//!
//! - [`CertificateController::provision_certs`] - application changed
//! - [`CertificateController::renew_cert`] - managed TLS record changed or resynced
//! - [`CertificateController::provision_wildcard_cert`] - platform domain known
//!
//! Handlers never wait for the certificate authority. Issuance and renewal
//! run on background tasks; the handler returns as soon as the work is
//! either skipped, satisfied from existing records, or launched.

mod provision;
mod renew;
mod wildcard;

pub use provision::{ProvisionReport, ProvisionedDomain, SkipReason};
pub use renew::RenewOutcome;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::trace;

use certpilot_common::Domain;

use crate::authority::AuthorityError;
use crate::reload::ConfigManager;
use crate::repository::{CertificateRepository, RepositoryError};
use crate::store::{Secret, SecretType};

/// Errors returned by handlers
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Account registration with the authority failed
    #[error("certificate authority unavailable: {0}")]
    Authority(#[from] AuthorityError),

    #[error("failed to provision certificate for '{domain}': {source}")]
    Repository {
        domain: Domain,
        #[source]
        source: RepositoryError,
    },

    /// Several best-effort domains failed
    #[error("{}", format_aggregate(.0))]
    Aggregate(Vec<HandlerError>),
}

fn format_aggregate(errors: &[HandlerError]) -> String {
    match errors {
        [single] => single.to_string(),
        _ => {
            let joined: Vec<String> = errors.iter().map(ToString::to_string).collect();
            format!("[{}]", joined.join(", "))
        }
    }
}

/// Certificate lifecycle reconciler
pub struct CertificateController {
    config: Arc<ConfigManager>,
    repository: Arc<CertificateRepository>,
}

impl CertificateController {
    pub fn new(config: Arc<ConfigManager>, repository: Arc<CertificateRepository>) -> Self {
        Self { config, repository }
    }

    pub fn repository(&self) -> &Arc<CertificateRepository> {
        &self.repository
    }

    pub fn config(&self) -> &Arc<ConfigManager> {
        &self.config
    }
}

impl fmt::Debug for CertificateController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateController")
            .field("repository", &self.repository)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Secret handler chain
// ============================================================================

/// Handler for secret change events
#[async_trait]
pub trait SecretHandler: Send + Sync {
    async fn handle(&self, secret: &Secret) -> Result<(), HandlerError>;
}

#[async_trait]
impl<H: SecretHandler + ?Sized> SecretHandler for Arc<H> {
    async fn handle(&self, secret: &Secret) -> Result<(), HandlerError> {
        (**self).handle(secret).await
    }
}

/// Renewal as a secret handler
#[async_trait]
impl SecretHandler for CertificateController {
    async fn handle(&self, secret: &Secret) -> Result<(), HandlerError> {
        self.renew_cert(secret).await.map(|_| ())
    }
}

pub fn is_tls_secret(secret: &Secret) -> bool {
    secret.type_ == SecretType::Tls
}

/// Forwards only TLS-typed secrets to the wrapped handler
#[derive(Debug, Clone)]
pub struct RequireTlsSecret<H> {
    inner: H,
}

impl<H> RequireTlsSecret<H> {
    pub fn new(inner: H) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<H: SecretHandler> SecretHandler for RequireTlsSecret<H> {
    async fn handle(&self, secret: &Secret) -> Result<(), HandlerError> {
        if !is_tls_secret(secret) {
            trace!(key = %secret.key(), "Ignoring non-TLS secret");
            return Ok(());
        }
        self.inner.handle(secret).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ObjectMeta;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting(AtomicUsize);

    #[async_trait]
    impl SecretHandler for Counting {
        async fn handle(&self, _secret: &Secret) -> Result<(), HandlerError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn secret_of(type_: SecretType) -> Secret {
        Secret {
            metadata: ObjectMeta {
                namespace: "ns".to_string(),
                name: "s".to_string(),
                ..Default::default()
            },
            type_,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_require_tls_secret_filters() {
        let counting = Arc::new(Counting::default());
        let handler = RequireTlsSecret::new(Arc::clone(&counting));

        handler.handle(&secret_of(SecretType::Opaque)).await.unwrap();
        handler
            .handle(&secret_of(SecretType::Other("example.io/x".to_string())))
            .await
            .unwrap();
        assert_eq!(counting.0.load(Ordering::SeqCst), 0);

        handler.handle(&secret_of(SecretType::Tls)).await.unwrap();
        assert_eq!(counting.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_aggregate_display() {
        let err = HandlerError::Aggregate(vec![
            HandlerError::Authority(AuthorityError::Other("one".to_string())),
            HandlerError::Authority(AuthorityError::Other("two".to_string())),
        ]);
        let rendered = err.to_string();
        assert!(rendered.contains("one"));
        assert!(rendered.contains("two"));
    }
}
