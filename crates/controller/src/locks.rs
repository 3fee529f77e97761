//! Process-wide mutual exclusion keyed by domain name.
//!
//! The registry guarantees at most one in-flight certificate authority
//! exchange per domain within this process. It never queues: a caller that
//! fails to acquire a domain is expected to skip its work and rely on a
//! later trigger.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

use certpilot_common::Domain;

/// Set of domains with an in-flight authority exchange.
///
/// Created once at controller startup and shared by every handler through
/// an `Arc`. Tests inject a fresh registry per case.
#[derive(Debug, Default)]
pub struct DomainLockRegistry {
    domains: Mutex<HashSet<Domain>>,
}

impl DomainLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `domain` to the set.
    ///
    /// Returns `true` iff the domain was not already present.
    pub fn try_lock(&self, domain: &Domain) -> bool {
        let acquired = self.domains.lock().insert(domain.clone());
        trace!(domain = %domain, acquired, "Domain lock attempt");
        acquired
    }

    /// Remove `domain` from the set unconditionally.
    pub fn unlock(&self, domain: &Domain) {
        self.domains.lock().remove(domain);
        trace!(domain = %domain, "Domain lock released");
    }

    /// Acquire `domain` and tie its release to the returned guard.
    ///
    /// The guard unlocks on drop, including when the owning task panics.
    pub fn try_acquire(self: &Arc<Self>, domain: &Domain) -> Option<DomainLockGuard> {
        self.try_lock(domain).then(|| DomainLockGuard {
            registry: Arc::clone(self),
            domain: domain.clone(),
        })
    }

    pub fn is_locked(&self, domain: &Domain) -> bool {
        self.domains.lock().contains(domain)
    }

    /// Number of domains currently locked
    pub fn in_flight(&self) -> usize {
        self.domains.lock().len()
    }
}

/// Scope guard holding one domain in a [`DomainLockRegistry`].
pub struct DomainLockGuard {
    registry: Arc<DomainLockRegistry>,
    domain: Domain,
}

impl DomainLockGuard {
    pub fn domain(&self) -> &Domain {
        &self.domain
    }
}

impl Drop for DomainLockGuard {
    fn drop(&mut self) {
        self.registry.unlock(&self.domain);
    }
}

impl fmt::Debug for DomainLockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomainLockGuard")
            .field("domain", &self.domain)
            .finish()
    }
}
