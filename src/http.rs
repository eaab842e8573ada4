//! HTTP surface for the redirect guard and admin operations.
//!
//! Maps [`GuardOutcome`](crate::guard::GuardOutcome) onto status codes and
//! content-negotiated bodies. Redirects carry `Cache-Control: no-store` so
//! browsers and proxies never cache a stale redirect target.

use crate::batch::{BatchCoordinator, BatchOptions, BatchSummary};
use crate::config::GuardConfig;
use crate::error::ErrorCode;
use crate::guard::{GuardOutcome, RedirectGuard};
use crate::metrics::{MetricsSummary, Trigger};
use crate::offer::Authorizer;
use crate::verify::{VerificationEngine, VerifyRequest};
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Shared state behind every route.
#[derive(Clone)]
pub struct AppState {
    /// Click/confirm orchestrator.
    pub guard: Arc<RedirectGuard>,
    /// Verification engine, for the admin single-verify route.
    pub engine: Arc<VerificationEngine>,
    /// Batch coordinator and metrics reader.
    pub coordinator: Arc<BatchCoordinator>,
    /// Admin authorization predicate.
    pub authorizer: Arc<dyn Authorizer>,
}

/// Build the service router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/offer/:offer_id", get(offer_click))
        .route("/offer/:offer_id/confirm", post(offer_confirm))
        .route("/admin/offers/:offer_id/verify", post(admin_verify))
        .route("/admin/offers/verify-batch", post(admin_verify_batch))
        .route("/admin/offers/metrics", get(admin_metrics))
        .with_state(state)
}

/// Serve the router until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the listener cannot bind or the server fails.
pub async fn serve(
    config: &GuardConfig,
    state: AppState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> crate::Result<()> {
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .map_err(|e| crate::Error::Http(format!("bind {}: {e}", config.listen_addr)))?;
    info!(addr = %config.listen_addr, "pricegate listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| crate::Error::Http(e.to_string()))
}

#[derive(Deserialize)]
struct ClickQuery {
    #[serde(rename = "priceToken")]
    price_token: Option<String>,
}

#[derive(Deserialize, Default)]
struct ConfirmQuery {
    #[serde(rename = "confirmToken")]
    confirm_token: Option<String>,
}

#[derive(Deserialize, Default)]
struct ConfirmBody {
    #[serde(rename = "confirmToken")]
    confirm_token: Option<String>,
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorCode,
}

#[derive(Serialize)]
struct ConfirmRequiredBody {
    #[serde(rename = "confirmRequired")]
    confirm_required: bool,
    #[serde(rename = "offerId")]
    offer_id: String,
    #[serde(rename = "oldPrice")]
    old_price: u64,
    #[serde(rename = "newPrice")]
    new_price: u64,
    #[serde(rename = "confirmToken")]
    confirm_token: String,
}

#[derive(Deserialize, Default)]
struct BatchBody {
    #[serde(rename = "type")]
    platform: Option<String>,
    limit: Option<usize>,
    force: Option<bool>,
}

#[derive(Deserialize)]
struct MetricsQuery {
    hours: Option<u64>,
}

async fn offer_click(
    State(state): State<AppState>,
    Path(offer_id): Path<String>,
    Query(query): Query<ClickQuery>,
    headers: HeaderMap,
) -> Response {
    let outcome = state
        .guard
        .handle_click(&offer_id, query.price_token.as_deref())
        .await;
    render_outcome(outcome, wants_html(&headers))
}

async fn offer_confirm(
    State(state): State<AppState>,
    Path(offer_id): Path<String>,
    Query(query): Query<ConfirmQuery>,
    headers: HeaderMap,
    body: Option<Json<ConfirmBody>>,
) -> Response {
    // Body token wins; the query form supports plain HTML forms.
    let token = body
        .and_then(|Json(b)| b.confirm_token)
        .or(query.confirm_token);
    let outcome = state
        .guard
        .handle_confirm(&offer_id, token.as_deref())
        .await;
    render_outcome(outcome, wants_html(&headers))
}

async fn admin_verify(
    State(state): State<AppState>,
    Path(offer_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Err(denied) = authorize(&state, &headers) {
        return denied;
    }
    let request = VerifyRequest::background(Trigger::Manual, true);
    match state.engine.verify(&offer_id, request).await {
        Some(result) => (StatusCode::OK, Json(result)).into_response(),
        None => error_response(ErrorCode::OfferNotFound, false),
    }
}

async fn admin_verify_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<BatchBody>>,
) -> Response {
    if let Err(denied) = authorize(&state, &headers) {
        return denied;
    }
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let options = BatchOptions {
        trigger: Trigger::Batch,
        force: body.force.unwrap_or(false),
        limit: body.limit.unwrap_or(0),
    };
    let summary: BatchSummary = state
        .coordinator
        .verify_all(body.platform.as_deref(), options)
        .await;
    (StatusCode::OK, Json(summary)).into_response()
}

async fn admin_metrics(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<MetricsQuery>,
) -> Response {
    if let Err(denied) = authorize(&state, &headers) {
        return denied;
    }
    let summary: MetricsSummary = state.coordinator.metrics(query.hours.unwrap_or(24));
    (StatusCode::OK, Json(summary)).into_response()
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    if state.authorizer.is_authorized(bearer) {
        Ok(())
    } else {
        Err((
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": "UNAUTHORIZED" })),
        )
            .into_response())
    }
}

fn wants_html(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|accept| accept.contains("text/html"))
}

fn render_outcome(outcome: GuardOutcome, html: bool) -> Response {
    match outcome {
        GuardOutcome::Redirect { url } => (
            StatusCode::FOUND,
            [
                (header::LOCATION, url),
                (header::CACHE_CONTROL, "no-store".to_string()),
            ],
        )
            .into_response(),
        GuardOutcome::ConfirmRequired {
            confirm_token,
            offer_id,
            old_price,
            new_price,
        } => {
            if html {
                (
                    StatusCode::OK,
                    [(header::CACHE_CONTROL, "no-store")],
                    Html(confirm_page(&offer_id, old_price, new_price, &confirm_token)),
                )
                    .into_response()
            } else {
                (
                    StatusCode::OK,
                    [(header::CACHE_CONTROL, "no-store")],
                    Json(ConfirmRequiredBody {
                        confirm_required: true,
                        offer_id,
                        old_price,
                        new_price,
                        confirm_token,
                    }),
                )
                    .into_response()
            }
        }
        GuardOutcome::Denied { code } => error_response(code, html),
    }
}

fn error_response(code: ErrorCode, html: bool) -> Response {
    let status = match code {
        ErrorCode::OfferNotFound => StatusCode::NOT_FOUND,
        _ => StatusCode::CONFLICT,
    };
    if html {
        (
            status,
            Html(format!(
                "<!doctype html><html><body><h1>Redirect unavailable</h1>\
                 <p>{code}</p></body></html>"
            )),
        )
            .into_response()
    } else {
        (status, Json(ErrorBody { error: code })).into_response()
    }
}

fn confirm_page(offer_id: &str, old_price: u64, new_price: u64, confirm_token: &str) -> String {
    format!(
        "<!doctype html><html><body>\
         <h1>Price changed</h1>\
         <p>The price for this offer moved from <b>{old_price}</b> to <b>{new_price}</b>.</p>\
         <form method=\"post\" action=\"/offer/{offer_id}/confirm?confirmToken={confirm_token}\">\
         <button type=\"submit\">Continue at the new price</button>\
         </form>\
         </body></html>"
    )
}
