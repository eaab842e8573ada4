//! Append-only verification metrics.
//!
//! Every verification appends one record; dashboards read windowed counts
//! by outcome and by trigger. Retention is bounded by the largest window
//! the API serves.

use crate::clock::SharedClock;
use crate::offer::VerifyState;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

/// Maximum window served by [`MetricsLog::window`]; older records are
/// dropped on append.
const MAX_WINDOW_HOURS: u64 = 24 * 7;

/// What initiated a verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// Admin-initiated single verification.
    Manual,
    /// Scheduled or admin-initiated batch run.
    Batch,
    /// A user click on a listing.
    Click,
    /// The confirm step after a detected price change.
    Confirm,
}

impl Trigger {
    /// Stable label used in metrics keys and deeplink sub-ids.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Batch => "batch",
            Self::Click => "click",
            Self::Confirm => "confirm",
        }
    }
}

/// One verification outcome record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerificationMetric {
    /// What initiated the verification.
    pub trigger: Trigger,
    /// Resulting offer state.
    pub outcome: VerifyState,
    /// When it happened, unix millis.
    pub at_ms: i64,
}

/// Aggregated counts over a time window.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSummary {
    /// Window size in hours.
    pub window_hours: u64,
    /// Total records in the window.
    pub total: u64,
    /// Counts keyed by outcome label.
    pub by_outcome: BTreeMap<String, u64>,
    /// Counts keyed by trigger label.
    pub by_trigger: BTreeMap<String, u64>,
}

/// Process-local append-only metric log.
///
/// Multi-node deployments must externalize this alongside the cache and
/// breaker state; see DESIGN.md.
#[derive(Clone)]
pub struct MetricsLog {
    records: Arc<Mutex<VecDeque<VerificationMetric>>>,
    clock: SharedClock,
}

impl MetricsLog {
    /// Create an empty log.
    #[must_use]
    pub fn new(clock: SharedClock) -> Self {
        Self {
            records: Arc::new(Mutex::new(VecDeque::new())),
            clock,
        }
    }

    /// Append one record, trimming entries past the retention horizon.
    pub fn record(&self, trigger: Trigger, outcome: VerifyState) {
        let now = self.clock.now_ms();
        let horizon = now - i64::try_from(MAX_WINDOW_HOURS * 3_600_000).unwrap_or(i64::MAX);
        let mut records = self.records.lock();
        records.push_back(VerificationMetric {
            trigger,
            outcome,
            at_ms: now,
        });
        while records.front().is_some_and(|r| r.at_ms < horizon) {
            records.pop_front();
        }
    }

    /// Aggregate counts over the most recent `hours` (capped at retention).
    #[must_use]
    pub fn window(&self, hours: u64) -> MetricsSummary {
        let hours = hours.clamp(1, MAX_WINDOW_HOURS);
        let since = self.clock.now_ms() - i64::try_from(hours * 3_600_000).unwrap_or(i64::MAX);

        let mut summary = MetricsSummary {
            window_hours: hours,
            ..MetricsSummary::default()
        };
        for record in self.records.lock().iter().filter(|r| r.at_ms >= since) {
            summary.total += 1;
            *summary
                .by_outcome
                .entry(outcome_label(record.outcome).to_string())
                .or_insert(0) += 1;
            *summary
                .by_trigger
                .entry(record.trigger.as_str().to_string())
                .or_insert(0) += 1;
        }
        summary
    }

    /// Number of retained records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

fn outcome_label(state: VerifyState) -> &'static str {
    match state {
        VerifyState::Unverified => "unverified",
        VerifyState::VerifiedFresh => "verified_fresh",
        VerifyState::VerifiedStale => "verified_stale",
        VerifyState::Failed => "failed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn window_counts_by_outcome_and_trigger() {
        let clock = ManualClock::at(0);
        let log = MetricsLog::new(Arc::new(clock.clone()));

        log.record(Trigger::Click, VerifyState::VerifiedFresh);
        log.record(Trigger::Click, VerifyState::Failed);
        log.record(Trigger::Batch, VerifyState::VerifiedFresh);

        let summary = log.window(24);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.by_outcome.get("verified_fresh"), Some(&2));
        assert_eq!(summary.by_outcome.get("failed"), Some(&1));
        assert_eq!(summary.by_trigger.get("click"), Some(&2));
        assert_eq!(summary.by_trigger.get("batch"), Some(&1));
    }

    #[test]
    fn window_excludes_older_records() {
        let clock = ManualClock::at(0);
        let log = MetricsLog::new(Arc::new(clock.clone()));

        log.record(Trigger::Click, VerifyState::VerifiedFresh);
        clock.advance(25 * 3_600_000); // 25h later
        log.record(Trigger::Confirm, VerifyState::VerifiedFresh);

        let summary = log.window(24);
        assert_eq!(summary.total, 1);
        assert_eq!(summary.by_trigger.get("confirm"), Some(&1));
        assert!(!summary.by_trigger.contains_key("click"));
    }

    #[test]
    fn retention_trims_on_append() {
        let clock = ManualClock::at(0);
        let log = MetricsLog::new(Arc::new(clock.clone()));

        log.record(Trigger::Batch, VerifyState::Failed);
        clock.advance((MAX_WINDOW_HOURS + 1) as i64 * 3_600_000);
        log.record(Trigger::Batch, VerifyState::VerifiedFresh);

        assert_eq!(log.len(), 1);
    }

    #[test]
    fn window_is_clamped() {
        let clock = ManualClock::at(0);
        let log = MetricsLog::new(Arc::new(clock));
        assert_eq!(log.window(0).window_hours, 1);
        assert_eq!(log.window(10_000).window_hours, MAX_WINDOW_HOURS);
    }
}
