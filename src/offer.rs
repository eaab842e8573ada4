//! Offer data model and collaborator seams.
//!
//! The core never decides what offers exist and never parses retailer
//! pages. It consumes a price-lookup capability and an authorization
//! predicate through the traits below; an in-memory store is provided for
//! single-process deployments and tests.

use crate::error::{ErrorCode, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Verification state of an offer's listed price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyState {
    /// Never verified since ingestion.
    Unverified,
    /// Verified within the display-freshness window.
    VerifiedFresh,
    /// Verified, but older than the display-freshness window.
    VerifiedStale,
    /// Last verification attempt failed.
    Failed,
}

/// One retailer's listing of one product.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offer {
    /// Stable identifier, e.g. `coupang-123`.
    pub id: String,
    /// Source platform, e.g. `coupang`.
    pub platform: String,
    /// Canonical product URL at the retailer.
    pub url: String,
    /// Tracking URL used for affiliate conversion (falls back to `url`).
    pub tracking_url: Option<String>,
    /// Last price shown on a listing page, integer minor units.
    pub listed_price: u64,
    /// Outcome of the most recent verification.
    pub verify_state: VerifyState,
    /// Price observed by the most recent successful verification.
    pub verified_price: Option<u64>,
    /// Unix millis of the most recent successful verification.
    pub verified_at: Option<i64>,
    /// Typed code of the most recent failure, if any.
    pub last_error: Option<ErrorCode>,
}

impl Offer {
    /// URL handed to the deeplink converter.
    #[must_use]
    pub fn conversion_url(&self) -> &str {
        self.tracking_url.as_deref().unwrap_or(&self.url)
    }
}

/// A live price observation from a retailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceQuote {
    /// Observed price, integer minor units.
    pub price: u64,
    /// When the retailer page was read, unix millis.
    pub fetched_at: i64,
}

/// Verification fields written back onto an offer.
#[derive(Debug, Clone)]
pub struct VerificationUpdate {
    /// New verification state.
    pub state: VerifyState,
    /// Verified price, when the fetch succeeded.
    pub verified_price: Option<u64>,
    /// Verification instant, unix millis.
    pub verified_at: Option<i64>,
    /// Failure code, when the fetch failed.
    pub error: Option<ErrorCode>,
}

/// Offer persistence seam. Offers are created by ingestion (external) and
/// mutated here only through verification outcomes; deletion is out of
/// scope.
#[async_trait]
pub trait OfferStore: Send + Sync {
    /// Fetch one offer by id.
    async fn get(&self, offer_id: &str) -> Option<Offer>;

    /// List offers, optionally filtered by platform, capped at `limit`.
    async fn list(&self, platform: Option<&str>, limit: usize) -> Vec<Offer>;

    /// Persist a verification outcome onto an offer. Unknown ids are a
    /// no-op: the offer may have been re-ingested concurrently.
    async fn record_verification(&self, offer_id: &str, update: VerificationUpdate);
}

/// Retailer price lookup seam, implemented per retailer outside this core.
#[async_trait]
pub trait PriceFetcher: Send + Sync {
    /// Fetch the current live price for `offer`.
    async fn fetch_current_price(&self, offer: &Offer) -> Result<PriceQuote>;
}

/// Admin authorization predicate, opaque to this core.
pub trait Authorizer: Send + Sync {
    /// Whether the presented bearer credential may call admin routes.
    fn is_authorized(&self, bearer: Option<&str>) -> bool;
}

/// Shared-secret authorizer.
///
/// Placeholder credential model: production deployments should substitute
/// a session-credential collaborator behind the same trait.
pub struct StaticTokenAuthorizer {
    token: String,
}

impl StaticTokenAuthorizer {
    /// Create an authorizer accepting exactly `token`.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl Authorizer for StaticTokenAuthorizer {
    fn is_authorized(&self, bearer: Option<&str>) -> bool {
        !self.token.is_empty() && bearer == Some(self.token.as_str())
    }
}

/// In-memory offer store for single-process deployments and tests.
///
/// Iteration order is the id order (`BTreeMap`), which keeps batch runs
/// deterministic.
#[derive(Default, Clone)]
pub struct MemoryOfferStore {
    offers: Arc<RwLock<BTreeMap<String, Offer>>>,
}

impl MemoryOfferStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an offer (ingestion path).
    pub fn upsert(&self, offer: Offer) {
        self.offers.write().insert(offer.id.clone(), offer);
    }

    /// Number of known offers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.offers.read().len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.offers.read().is_empty()
    }
}

#[async_trait]
impl OfferStore for MemoryOfferStore {
    async fn get(&self, offer_id: &str) -> Option<Offer> {
        self.offers.read().get(offer_id).cloned()
    }

    async fn list(&self, platform: Option<&str>, limit: usize) -> Vec<Offer> {
        self.offers
            .read()
            .values()
            .filter(|offer| platform.map_or(true, |p| offer.platform == p))
            .take(limit)
            .cloned()
            .collect()
    }

    async fn record_verification(&self, offer_id: &str, update: VerificationUpdate) {
        let mut offers = self.offers.write();
        if let Some(offer) = offers.get_mut(offer_id) {
            offer.verify_state = update.state;
            if let Some(price) = update.verified_price {
                offer.verified_price = Some(price);
            }
            if let Some(at) = update.verified_at {
                offer.verified_at = Some(at);
            }
            offer.last_error = update.error;
        }
    }
}

/// Convenience constructor used by tests and seed loading.
#[must_use]
pub fn offer(id: &str, platform: &str, url: &str, listed_price: u64) -> Offer {
    Offer {
        id: id.to_string(),
        platform: platform.to_string(),
        url: url.to_string(),
        tracking_url: None,
        listed_price,
        verify_state: VerifyState::Unverified,
        verified_price: None,
        verified_at: None,
        last_error: None,
    }
}
