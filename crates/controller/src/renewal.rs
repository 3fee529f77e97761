//! Renewal decision for stored certificates.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::codec;
use crate::store::Secret;

/// Default renewal window in days
pub const DEFAULT_RENEW_BEFORE_DAYS: u32 = 30;

/// Decides whether a stored certificate is due for renewal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenewalPolicy {
    window: Duration,
}

impl RenewalPolicy {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    pub fn from_days(days: u32) -> Self {
        Self::new(Duration::days(i64::from(days)))
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn must_renew(&self, secret: &Secret) -> bool {
        self.must_renew_at(secret, Utc::now())
    }

    /// True when the record cannot be decoded or its certificate expires
    /// within the window measured from `now`.
    pub fn must_renew_at(&self, secret: &Secret, now: DateTime<Utc>) -> bool {
        match codec::decode(secret) {
            Ok(cert) => {
                let due = cert.not_after <= now + self.window;
                debug!(
                    key = %secret.key(),
                    not_after = %cert.not_after,
                    due,
                    "Checked certificate expiry"
                );
                due
            }
            Err(e) => {
                warn!(key = %secret.key(), error = %e, "Unreadable certificate, renewing");
                true
            }
        }
    }
}

impl Default for RenewalPolicy {
    fn default() -> Self {
        Self::from_days(DEFAULT_RENEW_BEFORE_DAYS)
    }
}
