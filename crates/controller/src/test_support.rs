//! Shared fixtures for unit tests.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use certpilot_common::Domain;
use certpilot_config::Config;

use crate::authority::{AuthorityError, CertificateAuthority, IssuedCertificate};
use crate::handlers::CertificateController;
use crate::locks::DomainLockRegistry;
use crate::reload::ConfigManager;
use crate::repository::CertificateRepository;
use crate::store::{MemoryStore, RecordStore};

/// Self-signed certificate for `sans` expiring on the day of `not_after`
pub fn mint_certificate(sans: &[&str], not_after: DateTime<Utc>) -> (String, String) {
    let key = rcgen::KeyPair::generate().unwrap();
    let names: Vec<String> = sans.iter().map(|s| s.to_string()).collect();
    let mut params = rcgen::CertificateParams::new(names).unwrap();
    params.not_after = rcgen::date_time_ymd(
        not_after.year(),
        not_after.month() as u8,
        not_after.day() as u8,
    );
    let cert = params.self_signed(&key).unwrap();
    (cert.pem(), key.serialize_pem())
}

pub fn issued_for(sans: &[&str], not_after: DateTime<Utc>) -> IssuedCertificate {
    let (cert_pem, key_pem) = mint_certificate(sans, not_after);
    IssuedCertificate {
        cert_pem,
        key_pem,
        not_after,
    }
}

/// Authority that mints local certificates and records every request
#[derive(Debug)]
pub struct FakeAuthority {
    requested: Mutex<Vec<Domain>>,
    registrations: AtomicUsize,
    fail: bool,
    delay: Duration,
    validity: chrono::Duration,
}

impl FakeAuthority {
    pub fn new() -> Self {
        Self {
            requested: Mutex::new(Vec::new()),
            registrations: AtomicUsize::new(0),
            fail: false,
            delay: Duration::ZERO,
            validity: chrono::Duration::days(90),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.requested.lock().len()
    }

    pub fn requested(&self) -> Vec<Domain> {
        self.requested.lock().clone()
    }

    pub fn registrations(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CertificateAuthority for FakeAuthority {
    async fn register_account_if_absent(&self) -> Result<(), AuthorityError> {
        self.registrations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn obtain_certificate(&self, domain: &Domain) -> Result<IssuedCertificate, AuthorityError> {
        self.requested.lock().push(domain.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(AuthorityError::Other(format!("refused {}", domain)));
        }
        Ok(issued_for(&[domain.as_str()], Utc::now() + self.validity))
    }
}

/// Controller over a fresh in-memory store with `config` applied
pub fn controller_with(
    config: Config,
    authority: Arc<FakeAuthority>,
) -> (CertificateController, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let controller = controller_over(config, authority, store.clone());
    (controller, store)
}

/// Controller over any record store
pub fn controller_over(
    config: Config,
    authority: Arc<FakeAuthority>,
    store: Arc<dyn RecordStore>,
) -> CertificateController {
    let repository = CertificateRepository::new(store, authority, Arc::new(DomainLockRegistry::new()));
    CertificateController::new(
        Arc::new(ConfigManager::from_config(config)),
        Arc::new(repository),
    )
}
