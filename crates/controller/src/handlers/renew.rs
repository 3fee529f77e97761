use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use certpilot_common::labels::DOMAIN;
use certpilot_common::Domain;

use super::{CertificateController, HandlerError};
use crate::codec;
use crate::renewal::RenewalPolicy;
use crate::store::Secret;

/// Result of [`CertificateController::renew_cert`]
#[derive(Debug)]
pub enum RenewOutcome {
    /// Certificate is outside the renewal window
    NotDue,
    /// Record carries no domain annotation to renew for
    MissingDomain,
    /// Another operation holds the domain's lock
    Busy,
    /// Renewal was started in the background
    Renewing(JoinHandle<()>),
}

impl CertificateController {
    /// Renew the certificate stored in `secret` if it is due.
    ///
    /// The new certificate replaces the record at the same key.
    pub async fn renew_cert(&self, secret: &Secret) -> Result<RenewOutcome, HandlerError> {
        self.repository.authority().register_account_if_absent().await?;

        let policy = RenewalPolicy::from_days(self.config.current().certificates.renew_before_days);
        if !policy.must_renew(secret) {
            debug!(key = %secret.key(), "Certificate is still valid");
            return Ok(RenewOutcome::NotDue);
        }

        let Some(domain) = secret.annotation(DOMAIN).filter(|d| !d.is_empty()) else {
            warn!(key = %secret.key(), "TLS record has no domain annotation, not renewing");
            return Ok(RenewOutcome::MissingDomain);
        };
        let domain = Domain::new(domain);

        let Some(guard) = self.repository.locks().try_acquire(&domain) else {
            debug!(domain = %domain, "Not starting renewal, request already in progress");
            return Ok(RenewOutcome::Busy);
        };

        let repository = Arc::clone(&self.repository);
        let namespace = secret.namespace().to_string();
        let name = secret.name().to_string();

        let handle = self.repository.spawn(async move {
            info!(domain = %domain, namespace = %namespace, name = %name, "Renewing TLS certificate");

            let issued = match repository.authority().obtain_certificate(&domain).await {
                Ok(issued) => issued,
                Err(e) => {
                    error!(domain = %domain, error = %e, "Failed to obtain renewed certificate");
                    return;
                }
            };

            let renewed = codec::encode(&issued, &domain, &namespace, &name);
            match repository.update_record(&namespace, &name, renewed).await {
                Ok(_) => info!(
                    domain = %domain,
                    namespace = %namespace,
                    name = %name,
                    expires = %issued.not_after,
                    "TLS certificate renewed"
                ),
                Err(e) => error!(
                    domain = %domain,
                    namespace = %namespace,
                    name = %name,
                    error = %e,
                    "Failed to update TLS record"
                ),
            }

            drop(guard);
        });

        Ok(RenewOutcome::Renewing(handle))
    }
}
