use tracing::debug;

use certpilot_common::Domain;

use super::{CertificateController, HandlerError};
use crate::repository::ProvisionOutcome;

impl CertificateController {
    /// Provision `*.<base_domain>` into the platform's shared wildcard record.
    ///
    /// A leading dot on `base_domain` is ignored.
    pub async fn provision_wildcard_cert(
        &self,
        base_domain: &str,
    ) -> Result<ProvisionOutcome, HandlerError> {
        debug!(base_domain = %base_domain, "Provisioning wildcard certificate");
        self.repository.authority().register_account_if_absent().await?;

        let config = self.config.current();
        let domain = Domain::wildcard_of(base_domain);

        self.repository
            .provision_if_absent(
                &domain,
                &config.certificates.system_namespace,
                &config.certificates.wildcard_secret_name,
            )
            .await
            .map_err(|source| HandlerError::Repository {
                domain: domain.clone(),
                source,
            })
    }
}
