//! Pending HTTP-01 challenge tokens

use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, trace};

use certpilot_common::Domain;

/// HTTP-01 challenge path prefix
pub const ACME_CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";

#[derive(Debug, Clone)]
struct PendingChallenge {
    domain: Domain,
    key_authorization: String,
}

/// Token to key-authorization map shared between the ACME session and the
/// challenge responder. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct ChallengeManager {
    challenges: Arc<DashMap<String, PendingChallenge>>,
}

impl ChallengeManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the response for `token` until [`remove`](Self::remove) is called
    pub fn register(&self, domain: &Domain, token: &str, key_authorization: &str) {
        debug!(domain = %domain, token = %token, "Registering HTTP-01 challenge");
        self.challenges.insert(
            token.to_string(),
            PendingChallenge {
                domain: domain.clone(),
                key_authorization: key_authorization.to_string(),
            },
        );
    }

    pub fn remove(&self, token: &str) {
        if let Some((_, pending)) = self.challenges.remove(token) {
            debug!(domain = %pending.domain, token = %token, "Removed HTTP-01 challenge");
        }
    }

    /// Key authorization to serve for `token`
    pub fn response(&self, token: &str) -> Option<String> {
        let found = self
            .challenges
            .get(token)
            .map(|pending| pending.key_authorization.clone());
        trace!(token = %token, found = found.is_some(), "Looked up HTTP-01 challenge");
        found
    }

    /// Token portion of a challenge request path
    pub fn extract_token(path: &str) -> Option<&str> {
        path.strip_prefix(ACME_CHALLENGE_PREFIX)
            .filter(|token| !token.is_empty() && !token.contains('/'))
    }

    pub fn pending_count(&self) -> usize {
        self.challenges.len()
    }

    pub fn clear(&self) {
        let count = self.challenges.len();
        self.challenges.clear();
        if count > 0 {
            debug!(cleared = count, "Cleared pending HTTP-01 challenges");
        }
    }
}

/// Removes a registered token when dropped
pub(crate) struct RegisteredChallenge<'a> {
    manager: &'a ChallengeManager,
    token: String,
}

impl<'a> RegisteredChallenge<'a> {
    pub(crate) fn new(
        manager: &'a ChallengeManager,
        domain: &Domain,
        token: &str,
        key_authorization: &str,
    ) -> Self {
        manager.register(domain, token, key_authorization);
        Self {
            manager,
            token: token.to_string(),
        }
    }
}

impl Drop for RegisteredChallenge<'_> {
    fn drop(&mut self) {
        self.manager.remove(&self.token);
    }
}
