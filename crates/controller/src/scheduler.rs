//! Periodic renewal resync
//!
//! Lists every managed record and feeds it through the secret handler
//! chain, the same way a change event for that record would.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::handlers::SecretHandler;
use crate::store::{LabelSelector, RecordStore, StoreError};

/// Lower bound on the resync interval
const MIN_RESYNC_INTERVAL: Duration = Duration::from_secs(60);

/// Counts from one resync pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResyncSummary {
    pub examined: usize,
    pub failed: usize,
}

/// Background loop resyncing managed records into a handler
pub struct ResyncScheduler<H> {
    store: Arc<dyn RecordStore>,
    handler: H,
    resync_interval: Duration,
}

impl<H: SecretHandler> ResyncScheduler<H> {
    pub fn new(store: Arc<dyn RecordStore>, handler: H) -> Self {
        Self {
            store,
            handler,
            resync_interval: Duration::from_secs(3600),
        }
    }

    /// Set the resync interval, clamped to at least one minute
    pub fn with_interval(mut self, resync_interval: Duration) -> Self {
        self.resync_interval = resync_interval.max(MIN_RESYNC_INTERVAL);
        self
    }

    pub fn resync_interval(&self) -> Duration {
        self.resync_interval
    }

    /// Run passes until `shutdown` is cancelled. The first pass runs
    /// immediately.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            resync_interval_secs = self.resync_interval.as_secs(),
            "Starting renewal resync scheduler"
        );

        let mut ticker = interval(self.resync_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.resync_once().await {
                error!(error = %e, "Renewal resync failed");
            }
        }

        info!("Renewal resync scheduler stopped");
    }

    /// One pass over every managed record
    pub async fn resync_once(&self) -> Result<ResyncSummary, StoreError> {
        let start = Instant::now();
        let records = self.store.list(&LabelSelector::managed()).await?;
        let mut summary = ResyncSummary::default();

        debug!(count = records.len(), "Resyncing managed records");

        for secret in &records {
            summary.examined += 1;
            if let Err(e) = self.handler.handle(secret).await {
                summary.failed += 1;
                warn!(key = %secret.key(), error = %e, "Renewal handler failed");
            }
        }

        info!(
            examined = summary.examined,
            failed = summary.failed,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Renewal resync complete"
        );
        Ok(summary)
    }
}

impl<H> std::fmt::Debug for ResyncScheduler<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResyncScheduler")
            .field("resync_interval", &self.resync_interval)
            .finish_non_exhaustive()
    }
}
