//! Axum REST API for hosts driving the sale.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::db::{self, PurchaseRecord};
use crate::purchase::{PurchasePhase, PurchaseRequest};
use crate::sale_manager::{SaleEvent, SaleManagerHandle};

pub struct ApiState {
    pub pool: SqlitePool,
    pub sale: SaleManagerHandle,
    pub project_id: Option<String>,
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/sale", get(get_sale))
        .route("/sale/purchase", post(initiate_purchase))
        .route("/sale/purchase/reset", post(reset_purchase))
        .route("/purchases", get(get_purchases))
        .with_state(state)
}

// ─────────────────────────────────────────────────────────
// Response shapes
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct PurchasesResponse {
    pub count: usize,
    pub purchases: Vec<PurchaseRecord>,
}

#[derive(Serialize)]
pub struct AcceptedResponse {
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> axum::response::Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `GET /sale`
///
/// Returns the current dehydrated sale snapshot.
pub async fn get_sale(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    Json(state.sale.snapshot())
}

/// `POST /sale/purchase`
///
/// Accepted only while the purchase initiator is ready for a purchase.
pub async fn initiate_purchase(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<PurchaseRequest>,
) -> impl IntoResponse {
    let snapshot = state.sale.snapshot();
    let ready = snapshot
        .purchase
        .as_ref()
        .is_some_and(|purchase| purchase.phase == PurchasePhase::ReadyForPurchase);
    if !ready {
        return error_response(
            StatusCode::CONFLICT,
            format!("Sale is not ready for a purchase (phase: {})", snapshot.phase),
        );
    }
    if !state.sale.send(SaleEvent::InitiatePurchase(request)) {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "Sale manager has stopped");
    }
    (
        StatusCode::ACCEPTED,
        Json(AcceptedResponse { status: "accepted" }),
    )
        .into_response()
}

/// `POST /sale/purchase/reset`
pub async fn reset_purchase(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    if state.sale.snapshot().purchase.is_none() {
        return error_response(StatusCode::CONFLICT, "No purchase in progress");
    }
    if !state.sale.send(SaleEvent::ResetPurchase) {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "Sale manager has stopped");
    }
    (
        StatusCode::ACCEPTED,
        Json(AcceptedResponse { status: "accepted" }),
    )
        .into_response()
}

/// `GET /purchases`
///
/// Returns tracked purchases for the configured project, newest first.
pub async fn get_purchases(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    match db::get_purchases(&state.pool, state.project_id.as_deref()).await {
        Ok(purchases) => {
            let count = purchases.len();
            (
                StatusCode::OK,
                Json(PurchasesResponse { count, purchases }),
            )
                .into_response()
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
