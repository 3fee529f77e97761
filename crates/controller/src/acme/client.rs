//! ACME session wrapper around instant-acme

use async_trait::async_trait;
use instant_acme::{
    Account, AccountCredentials, AuthorizationStatus, ChallengeType, Identifier, LetsEncrypt,
    NewAccount, NewOrder, Order, OrderStatus,
};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, trace};

use certpilot_common::Domain;
use certpilot_config::{CertificatesConfig, LetsEncryptMode};

use super::challenge::{ChallengeManager, RegisteredChallenge};
use super::credentials::CredentialStore;
use super::dns::{Dns01Solver, PublishedRecord};
use crate::authority::{AuthorityError, CertificateAuthority, IssuedCertificate};
use crate::codec::Certificate;

/// Let's Encrypt production directory URL
pub const LETSENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";
/// Let's Encrypt staging directory URL
pub const LETSENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

/// Deadline for the CA to validate challenges
const CHALLENGE_TIMEOUT: Duration = Duration::from_secs(120);
/// Deadline for the certificate after finalization
const FINALIZE_TIMEOUT: Duration = Duration::from_secs(60);
const CHALLENGE_POLL_INTERVAL: Duration = Duration::from_secs(2);
const FINALIZE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A challenge awaiting validation
struct PendingChallenge {
    token: String,
    key_authorization: String,
    url: String,
}

/// Certificate authority speaking ACME
///
/// Single names are validated over HTTP-01. Wildcards need DNS-01 and so a
/// [`Dns01Solver`]. The directory is fixed at construction. The account is
/// loaded from [`CredentialStore`] or created on first use.
pub struct AcmeAuthority {
    account: Mutex<Option<Account>>,
    directory_url: String,
    email: String,
    credentials: CredentialStore,
    challenges: ChallengeManager,
    dns: Option<Dns01Solver>,
}

impl AcmeAuthority {
    pub fn new(
        config: &CertificatesConfig,
        credentials: CredentialStore,
        challenges: ChallengeManager,
    ) -> Self {
        Self {
            account: Mutex::new(None),
            directory_url: directory_url(config).to_string(),
            email: config.email.clone(),
            credentials,
            challenges,
            dns: None,
        }
    }

    /// Enable DNS-01 validation, and with it wildcard issuance
    pub fn with_dns_solver(mut self, solver: Dns01Solver) -> Self {
        self.dns = Some(solver);
        self
    }

    pub fn directory_url(&self) -> &str {
        &self.directory_url
    }

    async fn account(&self) -> Result<Account, AuthorityError> {
        let mut slot = self.account.lock().await;
        if let Some(account) = slot.as_ref() {
            return Ok(account.clone());
        }

        let account = self.load_or_create_account().await?;
        *slot = Some(account.clone());
        Ok(account)
    }

    async fn load_or_create_account(&self) -> Result<Account, AuthorityError> {
        if let Some(json) = self.credentials.load_credentials_json().await? {
            info!("Loading existing ACME account from storage");
            let credentials: AccountCredentials = serde_json::from_str(&json).map_err(|e| {
                AuthorityError::AccountCreation(format!("Failed to deserialize credentials: {}", e))
            })?;
            let account = Account::from_credentials(credentials)
                .await
                .map_err(|e| AuthorityError::AccountCreation(e.to_string()))?;
            return Ok(account);
        }

        info!(
            email = %self.email,
            directory = %self.directory_url,
            "Creating new ACME account"
        );

        let contact = format!("mailto:{}", self.email);
        let (account, credentials) = Account::create(
            &NewAccount {
                contact: &[&contact],
                terms_of_service_agreed: true,
                only_return_existing: false,
            },
            &self.directory_url,
            None,
        )
        .await
        .map_err(|e| AuthorityError::AccountCreation(e.to_string()))?;

        let json = serde_json::to_string_pretty(&credentials).map_err(|e| {
            AuthorityError::AccountCreation(format!("Failed to serialize credentials: {}", e))
        })?;
        self.credentials.save_credentials_json(&json).await?;

        info!("ACME account created");
        Ok(account)
    }

    /// Challenges of `kind` that still need validation
    async fn pending_challenges(
        domain: &Domain,
        order: &mut Order,
        kind: &ChallengeType,
    ) -> Result<Vec<PendingChallenge>, AuthorityError> {
        let authorizations =
            order
                .authorizations()
                .await
                .map_err(|e| AuthorityError::OrderCreation {
                    domain: domain.clone(),
                    message: format!("Failed to get authorizations: {}", e),
                })?;

        let mut pending = Vec::new();
        for authz in &authorizations {
            debug!(domain = %domain, status = ?authz.status, "Processing authorization");

            match &authz.status {
                AuthorizationStatus::Valid => continue,
                AuthorizationStatus::Pending => {}
                status => {
                    return Err(AuthorityError::ChallengeValidation {
                        domain: domain.clone(),
                        message: format!("authorization is {:?}", status),
                    })
                }
            }

            let challenge = authz
                .challenges
                .iter()
                .find(|c| &c.r#type == kind)
                .ok_or_else(|| match kind {
                    ChallengeType::Dns01 => AuthorityError::NoDns01Challenge(domain.clone()),
                    _ => AuthorityError::NoHttp01Challenge(domain.clone()),
                })?;

            let key_authorization = order.key_authorization(challenge);
            pending.push(PendingChallenge {
                token: challenge.token.clone(),
                key_authorization: key_authorization.as_str().to_string(),
                url: challenge.url.clone(),
            });
        }

        Ok(pending)
    }

    async fn set_ready(
        domain: &Domain,
        order: &mut Order,
        url: &str,
    ) -> Result<(), AuthorityError> {
        order
            .set_challenge_ready(url)
            .await
            .map_err(|e| AuthorityError::ChallengeValidation {
                domain: domain.clone(),
                message: e.to_string(),
            })
    }

    async fn validate_http01(
        &self,
        domain: &Domain,
        order: &mut Order,
        pending: &[PendingChallenge],
    ) -> Result<(), AuthorityError> {
        // Tokens stay registered until validation has finished either way.
        let mut registered = Vec::with_capacity(pending.len());
        for challenge in pending {
            registered.push(RegisteredChallenge::new(
                &self.challenges,
                domain,
                &challenge.token,
                &challenge.key_authorization,
            ));
            Self::set_ready(domain, order, &challenge.url).await?;
        }

        Self::wait_for_order_ready(domain, order).await
    }

    async fn validate_dns01(
        solver: &Dns01Solver,
        domain: &Domain,
        order: &mut Order,
        pending: &[PendingChallenge],
    ) -> Result<(), AuthorityError> {
        let key_authorizations: Vec<String> = pending
            .iter()
            .map(|c| c.key_authorization.clone())
            .collect();
        let records = solver.publish(domain, &key_authorizations).await?;

        let result = Self::complete_dns01(solver, domain, order, pending, &records).await;
        solver.cleanup(&records).await;
        result
    }

    async fn complete_dns01(
        solver: &Dns01Solver,
        domain: &Domain,
        order: &mut Order,
        pending: &[PendingChallenge],
        records: &[PublishedRecord],
    ) -> Result<(), AuthorityError> {
        solver.wait_for_propagation(records).await?;
        for challenge in pending {
            Self::set_ready(domain, order, &challenge.url).await?;
        }
        Self::wait_for_order_ready(domain, order).await
    }

    async fn wait_for_order_ready(domain: &Domain, order: &mut Order) -> Result<(), AuthorityError> {
        let deadline = Instant::now() + CHALLENGE_TIMEOUT;

        loop {
            let state = order.refresh().await?;
            match state.status {
                OrderStatus::Ready | OrderStatus::Valid => {
                    debug!(domain = %domain, "Order is ready for finalization");
                    return Ok(());
                }
                OrderStatus::Invalid => {
                    error!(domain = %domain, "Order became invalid");
                    return Err(AuthorityError::ChallengeValidation {
                        domain: domain.clone(),
                        message: "order became invalid".to_string(),
                    });
                }
                OrderStatus::Pending | OrderStatus::Processing => {
                    if Instant::now() > deadline {
                        return Err(AuthorityError::Timeout(format!(
                            "challenge validation for '{}'",
                            domain
                        )));
                    }
                    trace!(domain = %domain, status = ?state.status, "Order not ready yet");
                    tokio::time::sleep(CHALLENGE_POLL_INTERVAL).await;
                }
            }
        }
    }

    async fn finalize(domain: &Domain, order: &mut Order) -> Result<IssuedCertificate, AuthorityError> {
        let finalization = |message: String| AuthorityError::Finalization {
            domain: domain.clone(),
            message,
        };

        let key = rcgen::KeyPair::generate()
            .map_err(|e| finalization(format!("Failed to generate key: {}", e)))?;
        let params = rcgen::CertificateParams::new(vec![domain.to_string()])
            .map_err(|e| finalization(format!("Failed to create CSR params: {}", e)))?;
        let csr = params
            .serialize_request(&key)
            .map_err(|e| finalization(format!("Failed to serialize CSR: {}", e)))?;

        order
            .finalize(csr.der())
            .await
            .map_err(|e| finalization(format!("Failed to finalize order: {}", e)))?;

        let deadline = Instant::now() + FINALIZE_TIMEOUT;
        let cert_pem = loop {
            let status = order.refresh().await?.status;
            match status {
                OrderStatus::Valid => match order.certificate().await? {
                    Some(chain) => break chain,
                    None => return Err(finalization("No certificate in response".to_string())),
                },
                OrderStatus::Invalid => {
                    return Err(finalization("Order became invalid".to_string()));
                }
                _ => {
                    if Instant::now() > deadline {
                        return Err(AuthorityError::Timeout(format!(
                            "certificate issuance for '{}'",
                            domain
                        )));
                    }
                    tokio::time::sleep(FINALIZE_POLL_INTERVAL).await;
                }
            }
        };

        let not_after = Certificate::from_pem(cert_pem.as_bytes())
            .map_err(AuthorityError::CertificateParse)?
            .not_after;

        Ok(IssuedCertificate {
            cert_pem,
            key_pem: key.serialize_pem(),
            not_after,
        })
    }
}

#[async_trait]
impl CertificateAuthority for AcmeAuthority {
    async fn register_account_if_absent(&self) -> Result<(), AuthorityError> {
        self.account().await.map(|_| ())
    }

    async fn obtain_certificate(&self, domain: &Domain) -> Result<IssuedCertificate, AuthorityError> {
        let kind = challenge_type_for(domain, self.dns.is_some())?;

        let start = Instant::now();
        let account = self.account().await?;

        info!(domain = %domain, challenge = ?kind, "Creating certificate order");
        let identifiers = [Identifier::Dns(domain.to_string())];
        let mut order = account
            .new_order(&NewOrder {
                identifiers: &identifiers,
            })
            .await
            .map_err(|e| AuthorityError::OrderCreation {
                domain: domain.clone(),
                message: e.to_string(),
            })?;

        let pending = Self::pending_challenges(domain, &mut order, &kind).await?;
        match (&kind, &self.dns) {
            (ChallengeType::Dns01, Some(solver)) => {
                Self::validate_dns01(solver, domain, &mut order, &pending).await?
            }
            _ => self.validate_http01(domain, &mut order, &pending).await?,
        }

        let issued = Self::finalize(domain, &mut order).await?;
        info!(
            domain = %domain,
            expires = %issued.not_after,
            elapsed_secs = start.elapsed().as_secs(),
            "Certificate issued"
        );
        Ok(issued)
    }
}

impl std::fmt::Debug for AcmeAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcmeAuthority")
            .field("directory_url", &self.directory_url)
            .field("email", &self.email)
            .field("dns", &self.dns.as_ref().map(|d| d.provider_name()))
            .field(
                "has_account",
                &self.account.try_lock().map(|a| a.is_some()).unwrap_or(false),
            )
            .finish()
    }
}

/// Challenge used to validate `domain`
///
/// Wildcards can only be validated over DNS-01.
fn challenge_type_for(domain: &Domain, has_dns_solver: bool) -> Result<ChallengeType, AuthorityError> {
    match (domain.is_wildcard(), has_dns_solver) {
        (false, _) => Ok(ChallengeType::Http01),
        (true, true) => Ok(ChallengeType::Dns01),
        (true, false) => Err(AuthorityError::WildcardRequiresDns01 {
            domain: domain.clone(),
        }),
    }
}

/// Directory selected by configuration; an explicit URL wins over the mode
pub fn directory_url(config: &CertificatesConfig) -> &str {
    match (&config.directory_url, config.lets_encrypt) {
        (Some(url), _) => url,
        (None, LetsEncryptMode::Staging) => LetsEncrypt::Staging.url(),
        (None, _) => LetsEncrypt::Production.url(),
    }
}
