//! Verification engine: policy-driven re-check of an offer's live price
//! against the price shown at listing time.
//!
//! Live fetches are single-flight per offer id and bounded by a hard
//! timeout. The fetch result is snapshotted and written back to the offer
//! inside the shared computation, so it lands even when the requesting
//! caller has gone away.

use crate::cache::TtlCache;
use crate::clock::SharedClock;
use crate::deeplink::DeeplinkConverter;
use crate::error::ErrorCode;
use crate::metrics::{MetricsLog, Trigger};
use crate::offer::{Offer, OfferStore, PriceFetcher, VerificationUpdate, VerifyState};
use crate::singleflight::SingleFlight;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Freshness and timeout policy for the engine.
#[derive(Debug, Clone)]
pub struct VerifyConfig {
    /// How long a verification snapshot may be reused at all.
    pub listing_price_ttl: Duration,
    /// Snapshots younger than this are `verified_fresh`; older ones that
    /// are still inside the listing TTL are `verified_stale`.
    pub display_price_freshness: Duration,
    /// Hard deadline on a live price fetch.
    pub fetch_timeout: Duration,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            listing_price_ttl: Duration::from_secs(30 * 60),
            display_price_freshness: Duration::from_secs(10 * 60),
            fetch_timeout: Duration::from_secs(5),
        }
    }
}

/// Per-call verification request.
#[derive(Debug, Clone)]
pub struct VerifyRequest {
    /// What initiated this verification.
    pub trigger: Trigger,
    /// Skip snapshot reuse and always fetch live.
    pub force: bool,
    /// Whether a price change blocks the redirect pending confirmation.
    pub strict_guard: bool,
    /// Whether an unverifiable or changed price may still redirect.
    pub allow_unverified_redirect: bool,
    /// Price the caller displayed, when the call carries listing context.
    pub listed_price: Option<u64>,
}

impl VerifyRequest {
    /// Background verification without listing context.
    #[must_use]
    pub fn background(trigger: Trigger, force: bool) -> Self {
        Self {
            trigger,
            force,
            strict_guard: false,
            allow_unverified_redirect: false,
            listed_price: None,
        }
    }
}

/// Outcome of one verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    /// Offer the result applies to.
    pub offer_id: String,
    /// Resulting verification state.
    pub outcome: VerifyState,
    /// Whether the live price differs from the listed price.
    pub price_changed: bool,
    /// Price the caller displayed.
    pub listed_price: Option<u64>,
    /// Best known current price.
    pub current_price: Option<u64>,
    /// Affiliate redirect target, when policy allows redirecting.
    pub redirect_url: Option<String>,
    /// Typed failure code when the verification is unusable.
    pub code: Option<ErrorCode>,
    /// Whether a cached snapshot was reused instead of a live fetch.
    pub from_cache: bool,
}

impl VerificationResult {
    /// Whether the caller can act on this result.
    #[must_use]
    pub fn ok(&self) -> bool {
        self.code.is_none()
    }
}

/// Reusable result of a recent live fetch.
#[derive(Debug, Clone, Copy)]
struct Snapshot {
    price: u64,
    verified_at_ms: i64,
}

/// Shared result of one single-flight live fetch.
#[derive(Debug, Clone)]
enum FetchOutcome {
    Price(u64, i64),
    Timeout,
    Failed(String),
}

/// Single-flight, policy-driven price verification.
pub struct VerificationEngine {
    store: Arc<dyn OfferStore>,
    fetcher: Arc<dyn PriceFetcher>,
    converter: Arc<DeeplinkConverter>,
    metrics: MetricsLog,
    snapshots: TtlCache<String, Snapshot>,
    flights: SingleFlight<String, FetchOutcome>,
    config: VerifyConfig,
    clock: SharedClock,
}

impl VerificationEngine {
    /// Wire up an engine over its collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn OfferStore>,
        fetcher: Arc<dyn PriceFetcher>,
        converter: Arc<DeeplinkConverter>,
        metrics: MetricsLog,
        config: VerifyConfig,
        clock: SharedClock,
    ) -> Self {
        Self {
            store,
            fetcher,
            converter,
            metrics,
            snapshots: TtlCache::new(Arc::clone(&clock)),
            flights: SingleFlight::new(),
            config,
            clock,
        }
    }

    /// Verify `offer_id` under the given policy.
    ///
    /// Returns `None` when the offer is unknown; every other condition is
    /// expressed inside the result.
    pub async fn verify(&self, offer_id: &str, request: VerifyRequest) -> Option<VerificationResult> {
        let offer = self.store.get(offer_id).await?;
        let listed_price = request.listed_price.unwrap_or(offer.listed_price);

        // Snapshot reuse path.
        if !request.force {
            if let Some(snapshot) = self.snapshots.get(&offer.id) {
                let age_ms = self.clock.now_ms() - snapshot.verified_at_ms;
                let fresh =
                    age_ms <= i64::try_from(self.config.display_price_freshness.as_millis())
                        .unwrap_or(i64::MAX);
                let outcome = if fresh {
                    VerifyState::VerifiedFresh
                } else {
                    VerifyState::VerifiedStale
                };
                debug!(offer_id = %offer.id, age_ms, "reusing verification snapshot");
                let result = self
                    .resolve(&offer, &request, listed_price, snapshot.price, outcome, true)
                    .await;
                self.metrics.record(request.trigger, result.outcome);
                return Some(result);
            }
        }

        // Live fetch, shared across concurrent callers for this offer.
        let outcome = self.fetch_shared(&offer).await;
        let result = match outcome {
            FetchOutcome::Price(price, _at) => {
                self.resolve(&offer, &request, listed_price, price, VerifyState::VerifiedFresh, false)
                    .await
            }
            FetchOutcome::Timeout => {
                self.degrade(&offer, &request, listed_price, ErrorCode::VerifyTimeout)
                    .await
            }
            FetchOutcome::Failed(reason) => {
                debug!(offer_id = %offer.id, reason, "live price fetch failed");
                self.degrade(&offer, &request, listed_price, ErrorCode::VerifyFailed)
                    .await
            }
        };
        self.metrics.record(request.trigger, result.outcome);
        Some(result)
    }

    /// Run the live fetch under single-flight; snapshot + store writes
    /// happen inside the shared computation so they complete even when the
    /// initiating request is aborted.
    async fn fetch_shared(&self, offer: &Offer) -> FetchOutcome {
        let fetcher = Arc::clone(&self.fetcher);
        let store = Arc::clone(&self.store);
        let snapshots = self.snapshots.clone();
        let clock = Arc::clone(&self.clock);
        let timeout = self.config.fetch_timeout;
        let snapshot_ttl = self.config.listing_price_ttl;
        let offer_id = offer.id.clone();
        let offer = offer.clone();

        let shared = self
            .flights
            .run(offer_id.clone(), move || async move {
                let outcome =
                    match tokio::time::timeout(timeout, fetcher.fetch_current_price(&offer)).await
                    {
                        Ok(Ok(quote)) => FetchOutcome::Price(quote.price, quote.fetched_at),
                        Ok(Err(e)) => FetchOutcome::Failed(e.to_string()),
                        Err(_) => FetchOutcome::Timeout,
                    };

                let now = clock.now_ms();
                match &outcome {
                    FetchOutcome::Price(price, _) => {
                        snapshots.insert(
                            offer.id.clone(),
                            Snapshot {
                                price: *price,
                                verified_at_ms: now,
                            },
                            snapshot_ttl,
                        );
                        store
                            .record_verification(
                                &offer.id,
                                VerificationUpdate {
                                    state: VerifyState::VerifiedFresh,
                                    verified_price: Some(*price),
                                    verified_at: Some(now),
                                    error: None,
                                },
                            )
                            .await;
                    }
                    FetchOutcome::Timeout => {
                        store
                            .record_verification(
                                &offer.id,
                                VerificationUpdate {
                                    state: VerifyState::Failed,
                                    verified_price: None,
                                    verified_at: None,
                                    error: Some(ErrorCode::VerifyTimeout),
                                },
                            )
                            .await;
                    }
                    FetchOutcome::Failed(_) => {
                        store
                            .record_verification(
                                &offer.id,
                                VerificationUpdate {
                                    state: VerifyState::Failed,
                                    verified_price: None,
                                    verified_at: None,
                                    error: Some(ErrorCode::VerifyFailed),
                                },
                            )
                            .await;
                    }
                }
                outcome
            })
            .await;

        match shared {
            Ok(outcome) => outcome,
            Err(lost) => {
                warn!(offer_id = %offer_id, %lost, "verification leader lost");
                FetchOutcome::Failed(lost.to_string())
            }
        }
    }

    /// Apply the comparison policy to a resolved current price.
    async fn resolve(
        &self,
        offer: &Offer,
        request: &VerifyRequest,
        listed_price: u64,
        current_price: u64,
        outcome: VerifyState,
        from_cache: bool,
    ) -> VerificationResult {
        let mut result = VerificationResult {
            offer_id: offer.id.clone(),
            outcome,
            price_changed: current_price != listed_price,
            listed_price: Some(listed_price),
            current_price: Some(current_price),
            redirect_url: None,
            code: None,
            from_cache,
        };

        if !result.price_changed {
            result.redirect_url = Some(self.redirect_url(offer, request.trigger).await);
            return result;
        }

        if request.strict_guard {
            // Caller must obtain user confirmation; no redirect leaves here.
            return result;
        }

        if request.allow_unverified_redirect {
            // Degraded policy: redirect anyway, the change is telemetry.
            result.redirect_url = Some(self.redirect_url(offer, request.trigger).await);
        } else {
            result.outcome = VerifyState::Failed;
            result.code = Some(ErrorCode::VerifyFailed);
        }
        result
    }

    /// Fetch failed: degrade to a previously verified price if policy
    /// allows, otherwise surface the typed failure.
    async fn degrade(
        &self,
        offer: &Offer,
        request: &VerifyRequest,
        listed_price: u64,
        code: ErrorCode,
    ) -> VerificationResult {
        let prior = offer.verified_price;
        let mut result = VerificationResult {
            offer_id: offer.id.clone(),
            outcome: VerifyState::Failed,
            price_changed: false,
            listed_price: Some(listed_price),
            current_price: prior,
            redirect_url: None,
            code: Some(code),
            from_cache: false,
        };

        if request.allow_unverified_redirect {
            if let Some(prior_price) = prior {
                result.price_changed = prior_price != listed_price;
                result.redirect_url = Some(self.redirect_url(offer, request.trigger).await);
                result.code = None;
            }
        }
        result
    }

    async fn redirect_url(&self, offer: &Offer, trigger: Trigger) -> String {
        self.converter
            .convert_one(offer.conversion_url(), trigger.as_str())
            .await
    }
}
