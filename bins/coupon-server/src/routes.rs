//! Axum router and HTTP handlers.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, State};
use axum::http::header::{RETRY_AFTER, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, warn};

use coupon_core::address::resolve_client_address;
use coupon_core::cooldown::remaining;
use coupon_core::{ClaimError, ClientAddress, StoreError, Timestamp};

use crate::admin;
use crate::session;
use crate::AppState;

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/session", get(api_session))
        .route("/api/eligibility", get(api_eligibility))
        .route("/api/claim", post(api_claim))
        .route("/api/claim-status", get(api_claim_status))
        .route("/api/status", get(api_status))
        .merge(admin::router())
        .with_state(state)
        .layer(cors)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /api/session`: return the caller's session key, issuing one if absent.
async fn api_session(headers: HeaderMap) -> Response {
    if let Some(key) = session::from_headers(&headers) {
        return (StatusCode::OK, Json(json!({"session": key, "issued": false}))).into_response();
    }

    let key = session::issue();
    let mut response = (StatusCode::OK, Json(json!({"session": key, "issued": true}))).into_response();
    if let Ok(cookie) = HeaderValue::from_str(&session::set_cookie(&key)) {
        response.headers_mut().insert(SET_COOKIE, cookie);
    }
    response
}

/// `GET /api/eligibility`: whether the caller may claim right now.
async fn api_eligibility(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Response {
    let now = Utc::now();
    let session = session::from_headers(&headers).unwrap_or_default();
    let address = client_address(&state, &headers, connect);

    let engine = state.engine.clone();
    let result = run_blocking(move || engine.check_eligibility(&session, &address, now)).await;

    match result {
        Ok(e) => (
            StatusCode::OK,
            Json(json!({
                "eligible": e.eligible,
                "next_eligible_by_session": e.next_by_session,
                "next_eligible_by_address": e.next_by_address,
                "session_remaining_secs": remaining_secs(e.next_by_session, now),
                "address_remaining_secs": remaining_secs(e.next_by_address, now),
            })),
        )
            .into_response(),
        Err(e) => claim_error_response(&e, now),
    }
}

/// `POST /api/claim`: hand out one coupon if both cooldowns are clear.
async fn api_claim(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Response {
    let now = Utc::now();
    let session = session::from_headers(&headers).unwrap_or_default();
    let address = client_address(&state, &headers, connect);

    let engine = state.engine.clone();
    let claimant = address.clone();
    let result = run_blocking(move || engine.claim(&session, &claimant, now)).await;

    match result {
        Ok(receipt) => {
            debug!(code = %receipt.coupon_code, %address, "Claim response sent");
            (
                StatusCode::OK,
                Json(json!({
                    "code": receipt.coupon_code,
                    "claimed_at": receipt.claimed_at,
                    "next_eligible_by_session": receipt.next_by_session,
                    "next_eligible_by_address": receipt.next_by_address,
                    "session_remaining_secs": remaining_secs(Some(receipt.next_by_session), now),
                    "address_remaining_secs": remaining_secs(Some(receipt.next_by_address), now),
                })),
            )
                .into_response()
        }
        Err(e) => claim_error_response(&e, now),
    }
}

/// `GET /api/claim-status`: the caller's most recent claim, if any.
async fn api_claim_status(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let now = Utc::now();
    let session = session::from_headers(&headers).unwrap_or_default();

    let engine = state.engine.clone();
    let result = run_blocking(move || engine.last_claim(&session)).await;

    match result {
        Ok(Some(record)) => (
            StatusCode::OK,
            Json(json!({
                "claimed": true,
                "code": record.coupon_code,
                "claimed_at": record.claimed_at,
            })),
        )
            .into_response(),
        Ok(None) => (StatusCode::OK, Json(json!({"claimed": false}))).into_response(),
        Err(e) => claim_error_response(&e, now),
    }
}

/// `GET /api/status`: pool counts and configured cooldown windows.
async fn api_status(State(state): State<AppState>) -> Response {
    let engine = state.engine.clone();
    let result = run_blocking(move || engine.pool().stats()).await;

    match result {
        Ok(stats) => (
            StatusCode::OK,
            Json(json!({
                "coupons_total": stats.total,
                "coupons_available": stats.available,
                "coupons_claimed": stats.claimed,
                "coupons_inactive": stats.inactive,
                "session_cooldown_secs": state.config.session_cooldown_secs,
                "address_cooldown_secs": state.config.address_cooldown_secs,
            })),
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "Status lookup failed");
            internal_error().into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Run a store-touching closure off the async worker threads.
pub(crate) async fn run_blocking<T, E, F>(f: F) -> Result<T, E>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: From<StoreError> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result,
        Err(e) => Err(StoreError::Storage(format!("worker task failed: {e}")).into()),
    }
}

pub(crate) fn internal_error() -> (StatusCode, Json<Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "Internal error"})),
    )
}

/// Resolve the claimant address from proxy headers or the socket peer.
fn client_address(
    state: &AppState,
    headers: &HeaderMap,
    connect: Option<ConnectInfo<SocketAddr>>,
) -> ClientAddress {
    resolve_client_address(
        header_str(headers, "x-forwarded-for"),
        header_str(headers, "x-real-ip"),
        connect.map(|ConnectInfo(peer)| peer.ip()),
        state.config.trust_proxy_headers,
    )
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Whole seconds until `next`, rounded up. Zero when already reached.
fn remaining_secs(next: Option<Timestamp>, now: Timestamp) -> i64 {
    let millis = remaining(next, now).num_milliseconds();
    millis.saturating_add(999) / 1000
}

fn claim_error_response(err: &ClaimError, now: Timestamp) -> Response {
    match err {
        ClaimError::MissingSession => (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "No session; call /api/session first"})),
        )
            .into_response(),
        ClaimError::TooSoon {
            blocking,
            retry_at,
            next_by_session,
            next_by_address,
        } => {
            let retry_after = remaining_secs(Some(*retry_at), now);
            let mut response = (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({
                    "error": err.to_string(),
                    "blocking": blocking,
                    "retry_at": retry_at,
                    "retry_after_secs": retry_after,
                    "next_eligible_by_session": next_by_session,
                    "next_eligible_by_address": next_by_address,
                    "session_remaining_secs": remaining_secs(*next_by_session, now),
                    "address_remaining_secs": remaining_secs(*next_by_address, now),
                })),
            )
                .into_response();
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(retry_after.max(0)));
            response
        }
        ClaimError::NoSupply => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "No coupons available"})),
        )
            .into_response(),
        ClaimError::Store(e) => {
            warn!(error = %e, "Claim failed on storage error");
            internal_error().into_response()
        }
    }
}
