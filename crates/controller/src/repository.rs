//! Certificate records over the record store
//!
//! Decides whether a domain needs a new certificate, can reuse one that
//! already exists somewhere in the cluster, or is already covered.
//! Issuance runs on detached tasks that own the domain's lock.

use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, trace};

use certpilot_common::labels::DOMAIN;
use certpilot_common::{Domain, ObjectKey};

use crate::authority::CertificateAuthority;
use crate::codec;
use crate::locks::{DomainLockGuard, DomainLockRegistry};
use crate::store::{LabelSelector, ObjectMeta, RecordStore, Secret, SecretType, StoreError};

/// Errors surfaced synchronously by the repository
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Result of [`CertificateRepository::provision_if_absent`]
#[derive(Debug)]
pub enum ProvisionOutcome {
    /// A record already exists at the target key
    AlreadyExists,
    /// A valid certificate for the domain already lives in the target namespace
    ReusedInNamespace,
    /// A valid certificate from another namespace was copied to the target key
    Copied,
    /// Another operation holds the domain's lock
    Busy,
    /// Issuance was started in the background
    Issuing(JoinHandle<()>),
}

impl ProvisionOutcome {
    pub fn is_issuing(&self) -> bool {
        matches!(self, ProvisionOutcome::Issuing(_))
    }
}

/// Certificate persistence, reuse and background issuance
pub struct CertificateRepository {
    store: Arc<dyn RecordStore>,
    authority: Arc<dyn CertificateAuthority>,
    locks: Arc<DomainLockRegistry>,
    tasks: TaskTracker,
}

impl CertificateRepository {
    pub fn new(
        store: Arc<dyn RecordStore>,
        authority: Arc<dyn CertificateAuthority>,
        locks: Arc<DomainLockRegistry>,
    ) -> Self {
        Self {
            store,
            authority,
            locks,
            tasks: TaskTracker::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn authority(&self) -> &Arc<dyn CertificateAuthority> {
        &self.authority
    }

    pub fn locks(&self) -> &Arc<DomainLockRegistry> {
        &self.locks
    }

    /// First managed TLS record annotated for `domain` whose certificate
    /// validates for it.
    ///
    /// A failed listing is logged and treated as no candidates.
    pub async fn find_reusable(&self, domain: &Domain) -> Option<Secret> {
        let candidates = match self.store.list(&LabelSelector::managed()).await {
            Ok(secrets) => secrets,
            Err(e) => {
                error!(domain = %domain, error = %e, "Failed to list existing TLS records");
                return None;
            }
        };

        for secret in candidates {
            trace!(key = %secret.key(), "Considering existing TLS record");
            if secret.type_ != SecretType::Tls {
                continue;
            }
            if secret.annotation(DOMAIN) != Some(domain.as_str()) {
                continue;
            }

            match codec::decode(&secret) {
                Ok(cert) if cert.verify_hostname(domain.as_str()) => {
                    debug!(domain = %domain, key = %secret.key(), "Found reusable TLS record");
                    return Some(secret);
                }
                Ok(_) => {
                    debug!(
                        domain = %domain,
                        key = %secret.key(),
                        "Annotated certificate does not cover domain"
                    );
                }
                Err(e) => {
                    error!(key = %secret.key(), error = %e, "Failed to parse stored certificate");
                }
            }
        }

        None
    }

    /// Make sure a certificate for `domain` exists at `namespace/name`
    pub async fn provision_if_absent(
        &self,
        domain: &Domain,
        namespace: &str,
        name: &str,
    ) -> Result<ProvisionOutcome, RepositoryError> {
        let key = ObjectKey::new(namespace, name);
        match self.store.get(&key).await {
            Ok(_) => {
                trace!(key = %key, "TLS record already exists");
                return Ok(ProvisionOutcome::AlreadyExists);
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                error!(key = %key, error = %e, "Failed to read TLS record");
                return Err(e.into());
            }
        }

        if let Some(existing) = self.find_reusable(domain).await {
            if existing.namespace() == namespace {
                debug!(
                    domain = %domain,
                    existing = %existing.key(),
                    "Valid TLS record already present in namespace"
                );
                return Ok(ProvisionOutcome::ReusedInNamespace);
            }

            self.copy_record(&existing, domain, namespace, name).await?;
            return Ok(ProvisionOutcome::Copied);
        }

        let Some(guard) = self.locks.try_acquire(domain) else {
            debug!(domain = %domain, "Certificate operation already in flight");
            return Ok(ProvisionOutcome::Busy);
        };

        let handle = self.spawn_issue(guard, namespace.to_string(), name.to_string());
        Ok(ProvisionOutcome::Issuing(handle))
    }

    /// Overwrite the record at `namespace/name` with `secret`
    pub async fn update_record(
        &self,
        namespace: &str,
        name: &str,
        mut secret: Secret,
    ) -> Result<Secret, RepositoryError> {
        secret.metadata.namespace = namespace.to_string();
        secret.metadata.name = name.to_string();
        secret.metadata.resource_version = None;
        Ok(self.store.update(secret).await?)
    }

    /// Run `future` as a tracked background task
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tasks.spawn(future)
    }

    /// Number of background tasks still running
    pub fn background_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Wait until every background task spawned so far has finished
    pub async fn wait_for_background_tasks(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    async fn copy_record(
        &self,
        source: &Secret,
        domain: &Domain,
        namespace: &str,
        name: &str,
    ) -> Result<(), RepositoryError> {
        debug!(
            domain = %domain,
            source = %source.key(),
            namespace = %namespace,
            name = %name,
            "Copying existing TLS record"
        );

        let copy = Secret {
            metadata: ObjectMeta {
                namespace: namespace.to_string(),
                name: name.to_string(),
                labels: codec::managed_labels(),
                annotations: codec::domain_annotations(domain),
                resource_version: None,
            },
            type_: source.type_.clone(),
            data: source.data.clone(),
        };

        match self.store.create(copy).await {
            Ok(_) => {
                info!(
                    domain = %domain,
                    source = %source.key(),
                    namespace = %namespace,
                    name = %name,
                    "Copied TLS record"
                );
                Ok(())
            }
            Err(e) if e.is_already_exists() => {
                debug!(namespace = %namespace, name = %name, "TLS record appeared concurrently");
                Ok(())
            }
            Err(e) => {
                error!(namespace = %namespace, name = %name, error = %e, "Failed to copy TLS record");
                Err(e.into())
            }
        }
    }

    fn spawn_issue(&self, guard: DomainLockGuard, namespace: String, name: String) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let authority = Arc::clone(&self.authority);

        self.tasks.spawn(async move {
            let domain = guard.domain().clone();
            info!(domain = %domain, namespace = %namespace, name = %name, "Requesting certificate");

            let issued = match authority.obtain_certificate(&domain).await {
                Ok(issued) => issued,
                Err(e) => {
                    error!(domain = %domain, error = %e, "Failed to obtain certificate");
                    return;
                }
            };

            let secret = codec::encode(&issued, &domain, &namespace, &name);
            match store.create(secret).await {
                Ok(_) => info!(
                    domain = %domain,
                    namespace = %namespace,
                    name = %name,
                    expires = %issued.not_after,
                    "TLS record created"
                ),
                Err(e) => error!(
                    domain = %domain,
                    namespace = %namespace,
                    name = %name,
                    error = %e,
                    "Failed to create TLS record"
                ),
            }

            drop(guard);
        })
    }
}

impl std::fmt::Debug for CertificateRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateRepository")
            .field("in_flight", &self.locks.in_flight())
            .field("background_tasks", &self.tasks.len())
            .finish()
    }
}
