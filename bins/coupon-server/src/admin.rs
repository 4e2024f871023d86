//! Admin routes for managing the coupon pool.
//!
//! Every route requires `Authorization: Bearer <COUPON_ADMIN_TOKEN>`. When no
//! token is configured the routes answer 404 as if they did not exist.

use axum::extract::{Path, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, put};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use coupon_core::PoolError;

use crate::routes::{internal_error, run_blocking};
use crate::AppState;

type ApiError = (StatusCode, Json<Value>);

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/admin/coupons", get(list_coupons).post(add_coupon))
        .route("/api/admin/coupons/:code/toggle", put(toggle_coupon))
        .route("/api/admin/claims", get(list_claims))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /api/admin/coupons`: every coupon in creation order.
async fn list_coupons(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    authorize(&state, &headers)?;

    let engine = state.engine.clone();
    let coupons = run_blocking(move || engine.pool().list())
        .await
        .map_err(|e| {
            warn!(error = %e, "Listing coupons failed");
            internal_error()
        })?;

    Ok(Json(json!({ "coupons": coupons })))
}

#[derive(Deserialize)]
struct AddCouponRequest {
    code: String,
}

/// `POST /api/admin/coupons`: add one active, unclaimed coupon.
async fn add_coupon(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<AddCouponRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    authorize(&state, &headers)?;

    let engine = state.engine.clone();
    let now = Utc::now();
    let coupon = run_blocking(move || engine.pool().insert(&req.code, now))
        .await
        .map_err(pool_error)?;

    info!(code = %coupon.code, "Coupon added");
    Ok((StatusCode::CREATED, Json(json!({ "coupon": coupon }))))
}

/// `PUT /api/admin/coupons/:code/toggle`: flip the active flag.
async fn toggle_coupon(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(code): Path<String>,
) -> Result<Json<Value>, ApiError> {
    authorize(&state, &headers)?;

    let engine = state.engine.clone();
    let coupon = run_blocking(move || engine.pool().toggle_active(&code))
        .await
        .map_err(pool_error)?;

    info!(code = %coupon.code, active = coupon.active, "Coupon toggled");
    Ok(Json(json!({ "coupon": coupon })))
}

/// `GET /api/admin/claims`: the full claim history, oldest first.
async fn list_claims(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    authorize(&state, &headers)?;

    let engine = state.engine.clone();
    let claims = run_blocking(move || engine.ledger().list())
        .await
        .map_err(|e| {
            warn!(error = %e, "Listing claims failed");
            internal_error()
        })?;

    Ok(Json(json!({ "claims": claims })))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = state.config.admin_token.as_deref() else {
        return Err((StatusCode::NOT_FOUND, Json(json!({"error": "Not found"}))));
    };

    let presented = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .unwrap_or("");

    if constant_time_eq(presented.as_bytes(), expected.as_bytes()) {
        Ok(())
    } else {
        Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "Invalid admin token"})),
        ))
    }
}

/// Byte comparison whose running time depends only on the lengths.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn pool_error(err: PoolError) -> ApiError {
    match err {
        PoolError::NotFound(code) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("Unknown coupon: {code}")})),
        ),
        PoolError::DuplicateCode(code) => (
            StatusCode::CONFLICT,
            Json(json!({"error": format!("Coupon already exists: {code}")})),
        ),
        PoolError::InvalidCode(reason) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": format!("Invalid coupon code: {reason}")})),
        ),
        PoolError::Conflict(_) | PoolError::Store(_) => {
            warn!(error = %err, "Admin pool operation failed");
            internal_error()
        }
    }
}
