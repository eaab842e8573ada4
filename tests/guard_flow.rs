//! End-to-end protocol tests: listing click -> verification -> redirect or
//! confirmation, over the real router with scripted collaborators.

#![allow(clippy::expect_used, clippy::panic, clippy::unwrap_used)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use parking_lot::Mutex;
use pricegate::batch::BatchCoordinator;
use pricegate::clock::{ManualClock, SharedClock};
use pricegate::deeplink::{
    ConvertedLink, DeeplinkConfig, DeeplinkConverter, DeeplinkUpstream, UpstreamError,
};
use pricegate::guard::GuardPolicy;
use pricegate::http::{router, AppState};
use pricegate::metrics::MetricsLog;
use pricegate::offer::{
    offer, MemoryOfferStore, PriceFetcher, PriceQuote, StaticTokenAuthorizer,
};
use pricegate::token::TokenService;
use pricegate::verify::{VerificationEngine, VerifyConfig};
use pricegate::RedirectGuard;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tower::ServiceExt;

/// Upstream that tags URLs and counts calls; can be switched to reject
/// credentials.
struct ScriptedUpstream {
    calls: AtomicUsize,
    reject_auth: Mutex<bool>,
}

impl ScriptedUpstream {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            reject_auth: Mutex::new(false),
        }
    }
}

#[async_trait]
impl DeeplinkUpstream for ScriptedUpstream {
    async fn convert(
        &self,
        urls: &[String],
        _sub_id: &str,
    ) -> Result<Vec<ConvertedLink>, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if *self.reject_auth.lock() {
            return Err(UpstreamError::Auth("key revoked".to_string()));
        }
        Ok(urls
            .iter()
            .map(|url| ConvertedLink {
                original_url: url.clone(),
                affiliate_url: format!("{url}?aff=gate"),
                shorten_url: url.clone(),
            })
            .collect())
    }
}

/// Per-offer live prices, mutable mid-test.
struct PriceBook {
    prices: Mutex<HashMap<String, u64>>,
}

impl PriceBook {
    fn new() -> Self {
        Self {
            prices: Mutex::new(HashMap::new()),
        }
    }

    fn set(&self, offer_id: &str, price: u64) {
        self.prices.lock().insert(offer_id.to_string(), price);
    }
}

#[async_trait]
impl PriceFetcher for PriceBook {
    async fn fetch_current_price(
        &self,
        offer: &pricegate::Offer,
    ) -> pricegate::Result<PriceQuote> {
        match self.prices.lock().get(&offer.id) {
            Some(price) => Ok(PriceQuote {
                price: *price,
                fetched_at: 0,
            }),
            None => Err(pricegate::Error::PriceFetch("no quote".to_string())),
        }
    }
}

struct Rig {
    app: Router,
    tokens: Arc<TokenService>,
    prices: Arc<PriceBook>,
    upstream: Arc<ScriptedUpstream>,
    clock: ManualClock,
}

fn rig(offers: &[(&str, u64)]) -> Rig {
    let clock = ManualClock::at(0);
    let shared: SharedClock = Arc::new(clock.clone());
    let store = MemoryOfferStore::new();
    for (id, price) in offers {
        store.upsert(offer(id, "coupang", &format!("https://shop.example/{id}"), *price));
    }
    let tokens = Arc::new(
        TokenService::new(b"flow-test-secret", Arc::clone(&shared)).expect("token service"),
    );
    let prices = Arc::new(PriceBook::new());
    let upstream = Arc::new(ScriptedUpstream::new());
    let converter = Arc::new(DeeplinkConverter::new(
        Arc::clone(&upstream) as Arc<dyn DeeplinkUpstream>,
        DeeplinkConfig::default(),
        Arc::clone(&shared),
    ));
    let metrics = MetricsLog::new(Arc::clone(&shared));
    let engine = Arc::new(VerificationEngine::new(
        Arc::new(store.clone()),
        Arc::clone(&prices) as Arc<dyn PriceFetcher>,
        Arc::clone(&converter),
        metrics.clone(),
        VerifyConfig::default(),
        Arc::clone(&shared),
    ));
    let guard = Arc::new(RedirectGuard::new(
        Arc::clone(&tokens),
        Arc::clone(&engine),
        GuardPolicy::default(),
    ));
    let coordinator = Arc::new(BatchCoordinator::new(
        Arc::new(store),
        Arc::clone(&engine),
        metrics,
    ));
    let state = AppState {
        guard,
        engine,
        coordinator,
        authorizer: Arc::new(StaticTokenAuthorizer::new("admin-secret")),
    };
    Rig {
        app: router(state),
        tokens,
        prices,
        upstream,
        clock,
    }
}

async fn get(app: &Router, uri: &str) -> axum::http::Response<Body> {
    app.clone()
        .oneshot(Request::get(uri).body(Body::empty()).expect("request"))
        .await
        .expect("response")
}

async fn post_json(app: &Router, uri: &str, body: &str) -> axum::http::Response<Body> {
    app.clone()
        .oneshot(
            Request::post(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::AUTHORIZATION, "Bearer admin-secret")
                .body(Body::from(body.to_string()))
                .expect("request"),
        )
        .await
        .expect("response")
}

async fn json(response: axum::http::Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

#[tokio::test]
async fn click_with_stable_price_redirects_through_affiliate() {
    let rig = rig(&[("coupang-123", 1_000_000)]);
    rig.prices.set("coupang-123", 1_000_000);
    let token = rig
        .tokens
        .issue_price("coupang-123", 1_000_000, 0, 3_600)
        .expect("token");

    let response = get(&rig.app, &format!("/offer/coupang-123?priceToken={token}")).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok()),
        Some("https://shop.example/coupang-123?aff=gate")
    );
    assert_eq!(
        response
            .headers()
            .get(header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok()),
        Some("no-store")
    );
}

#[tokio::test]
async fn price_drop_walks_the_confirm_chain() {
    let rig = rig(&[("coupang-123", 1_000_000)]);
    rig.prices.set("coupang-123", 950_000);
    let token = rig
        .tokens
        .issue_price("coupang-123", 1_000_000, 0, 3_600)
        .expect("token");

    // Click: price moved, confirmation demanded.
    let response = get(&rig.app, &format!("/offer/coupang-123?priceToken={token}")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json(response).await;
    assert_eq!(body["oldPrice"], 1_000_000);
    assert_eq!(body["newPrice"], 950_000);
    let confirm_token = body["confirmToken"].as_str().expect("token").to_string();

    // Price moves again before the user confirms: a chained confirm token,
    // never a silent redirect.
    rig.prices.set("coupang-123", 900_000);
    let response = post_json(
        &rig.app,
        "/offer/coupang-123/confirm",
        &format!("{{\"confirmToken\":\"{confirm_token}\"}}"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json(response).await;
    assert_eq!(body["oldPrice"], 950_000);
    assert_eq!(body["newPrice"], 900_000);
    let chained = body["confirmToken"].as_str().expect("token").to_string();

    // Stable now: the chained confirmation redirects.
    let response = post_json(
        &rig.app,
        "/offer/coupang-123/confirm",
        &format!("{{\"confirmToken\":\"{chained}\"}}"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FOUND);
}

#[tokio::test]
async fn breaker_trip_keeps_redirects_flowing_on_original_urls() {
    let rig = rig(&[("coupang-123", 1_000_000)]);
    rig.prices.set("coupang-123", 1_000_000);
    *rig.upstream.reject_auth.lock() = true;

    let token = rig
        .tokens
        .issue_price("coupang-123", 1_000_000, 0, 3_600)
        .expect("token");
    let response = get(&rig.app, &format!("/offer/coupang-123?priceToken={token}")).await;

    // Conversion degraded, redirect still served on the original URL.
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok()),
        Some("https://shop.example/coupang-123")
    );
    let tripped_calls = rig.upstream.calls.load(Ordering::SeqCst);
    assert_eq!(tripped_calls, 1);

    // While the breaker cooldown runs, no further upstream traffic.
    for _ in 0..10 {
        rig.clock.advance(60_000);
        let token = rig
            .tokens
            .issue_price("coupang-123", 1_000_000, 0, 3_600)
            .expect("token");
        let response = get(&rig.app, &format!("/offer/coupang-123?priceToken={token}")).await;
        assert_eq!(response.status(), StatusCode::FOUND);
    }
    assert_eq!(rig.upstream.calls.load(Ordering::SeqCst), tripped_calls);
}

#[tokio::test]
async fn expired_price_token_is_rejected_with_conflict() {
    let rig = rig(&[("coupang-123", 1_000_000)]);
    rig.prices.set("coupang-123", 1_000_000);
    let token = rig
        .tokens
        .issue_price("coupang-123", 1_000_000, 0, 60)
        .expect("token");

    rig.clock.advance(61_000);
    let response = get(&rig.app, &format!("/offer/coupang-123?priceToken={token}")).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(json(response).await["error"], "TOKEN_EXPIRED");
}

#[tokio::test]
async fn batch_over_thirty_offers_with_limit_ten() {
    let seeded: Vec<(String, u64)> = (0..30)
        .map(|i| (format!("coupang-{i:02}"), 1_000u64))
        .collect();
    let refs: Vec<(&str, u64)> = seeded.iter().map(|(id, p)| (id.as_str(), *p)).collect();
    let rig = rig(&refs);
    for (id, price) in &seeded {
        rig.prices.set(id, *price);
    }

    let response = post_json(
        &rig.app,
        "/admin/offers/verify-batch",
        "{\"limit\": 10, \"force\": true}",
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json(response).await;
    assert_eq!(body["attempted"], 10);
    let accounted = body["verified"].as_u64().unwrap()
        + body["failed"].as_u64().unwrap()
        + body["skipped"].as_u64().unwrap();
    assert_eq!(accounted, 10);

    let response = get(&rig.app, "/admin/offers/metrics?hours=24").await;
    // Metrics route needs auth; plain GET lacks the bearer header.
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn replayed_price_token_still_works() {
    // The price token is read-only proof of what the user saw, not a
    // one-time credential; replay is harmless.
    let rig = rig(&[("coupang-123", 1_000_000)]);
    rig.prices.set("coupang-123", 1_000_000);
    let token = rig
        .tokens
        .issue_price("coupang-123", 1_000_000, 0, 3_600)
        .expect("token");

    for _ in 0..3 {
        let response = get(&rig.app, &format!("/offer/coupang-123?priceToken={token}")).await;
        assert_eq!(response.status(), StatusCode::FOUND);
    }
}
