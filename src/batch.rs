//! Batch verification coordinator.
//!
//! Drives the verification engine across many offers on a schedule or an
//! admin command. One offer's failure never aborts the batch.

use crate::metrics::{MetricsLog, MetricsSummary, Trigger};
use crate::offer::{OfferStore, VerifyState};
use crate::verify::{VerificationEngine, VerifyRequest};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default per-run cap when the caller does not provide one.
const DEFAULT_BATCH_LIMIT: usize = 200;

/// Options for one batch run.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Attribution for the run's metrics.
    pub trigger: Trigger,
    /// Bypass verification snapshots.
    pub force: bool,
    /// Maximum offers to process.
    pub limit: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            trigger: Trigger::Batch,
            force: false,
            limit: DEFAULT_BATCH_LIMIT,
        }
    }
}

/// Summary of one batch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Offers the run processed.
    pub attempted: u64,
    /// Offers that verified (fresh or stale).
    pub verified: u64,
    /// Offers whose verification failed.
    pub failed: u64,
    /// Offers skipped (vanished between listing and verification).
    pub skipped: u64,
}

/// Runs the verification engine over the known offer set.
pub struct BatchCoordinator {
    store: Arc<dyn OfferStore>,
    engine: Arc<VerificationEngine>,
    metrics: MetricsLog,
}

impl BatchCoordinator {
    /// Wire up a coordinator.
    #[must_use]
    pub fn new(
        store: Arc<dyn OfferStore>,
        engine: Arc<VerificationEngine>,
        metrics: MetricsLog,
    ) -> Self {
        Self {
            store,
            engine,
            metrics,
        }
    }

    /// Verify up to `options.limit` offers, optionally filtered by
    /// platform. Per-offer failures are counted, never propagated.
    pub async fn verify_all(
        &self,
        platform: Option<&str>,
        options: BatchOptions,
    ) -> BatchSummary {
        let limit = if options.limit == 0 {
            DEFAULT_BATCH_LIMIT
        } else {
            options.limit
        };
        let offers = self.store.list(platform, limit).await;
        info!(
            count = offers.len(),
            platform = platform.unwrap_or("*"),
            force = options.force,
            "batch verification starting"
        );

        let mut summary = BatchSummary::default();
        for offer in offers {
            summary.attempted += 1;
            let request = VerifyRequest::background(options.trigger, options.force);
            match self.engine.verify(&offer.id, request).await {
                Some(result) => match result.outcome {
                    VerifyState::VerifiedFresh | VerifyState::VerifiedStale => {
                        summary.verified += 1;
                    }
                    VerifyState::Failed | VerifyState::Unverified => {
                        debug!(offer_id = %offer.id, code = ?result.code, "batch item failed");
                        summary.failed += 1;
                    }
                },
                None => {
                    // Offer disappeared between listing and verification.
                    warn!(offer_id = %offer.id, "offer vanished mid-batch");
                    summary.skipped += 1;
                }
            }
        }

        info!(
            attempted = summary.attempted,
            verified = summary.verified,
            failed = summary.failed,
            skipped = summary.skipped,
            "batch verification finished"
        );
        summary
    }

    /// Aggregated verification counts for the most recent window.
    #[must_use]
    pub fn metrics(&self, window_hours: u64) -> MetricsSummary {
        self.metrics.window(window_hours)
    }

    /// Periodic batch loop; returns when `shutdown` resolves.
    pub async fn run_scheduled(
        self: Arc<Self>,
        interval: Duration,
        shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        let mut shutdown = shutdown;
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The immediate first tick would race startup; consume it.
        ticker.tick().await;

        info!(interval_secs = interval.as_secs(), "batch scheduler running");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.verify_all(None, BatchOptions::default()).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("batch scheduler stopping");
                        return;
                    }
                }
            }
        }
    }
}
