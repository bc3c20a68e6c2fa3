//! Service-to-service endpoints, guarded by the internal token.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use domain::Order;
use saga::services::{
    CheckStockRequest, CheckStockResponse, StockError, UpdateStatusRequest, UpdateStockRequest,
};
use serde::Serialize;
use serde_json::json;
use store::Store;

use crate::auth::InternalCaller;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct UpdateStatusResponse {
    pub message: &'static str,
    pub order: Order,
}

/// POST /internal/update-status: trusted partial status update.
#[tracing::instrument(skip(state, payload))]
pub async fn update_status<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    _caller: InternalCaller,
    payload: Result<Json<UpdateStatusRequest>, JsonRejection>,
) -> Result<Json<UpdateStatusResponse>, ApiError> {
    let Json(request) = payload?;
    let order = state
        .orchestrator
        .update_status(request.order_id, request.status, request.payment_status)
        .await?;
    Ok(Json(UpdateStatusResponse {
        message: "Order status updated",
        order,
    }))
}

/// POST /internal/check-stock: availability and prices from the stock backend.
#[tracing::instrument(skip(state, payload))]
pub async fn check_stock<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    _caller: InternalCaller,
    payload: Result<Json<CheckStockRequest>, JsonRejection>,
) -> Result<Json<CheckStockResponse>, ApiError> {
    let Json(request) = payload?;
    let items = state
        .stock()
        .check_availability(&request.items)
        .await
        .map_err(stock_error)?;
    Ok(Json(CheckStockResponse {
        available: items.iter().all(|item| item.available),
        items,
    }))
}

/// POST /internal/update-stock: conditional batch of signed deltas.
#[tracing::instrument(skip(state, payload))]
pub async fn update_stock<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    _caller: InternalCaller,
    payload: Result<Json<UpdateStockRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(request) = payload?;
    state
        .stock()
        .apply_delta(&request.updates)
        .await
        .map_err(stock_error)?;
    Ok(Json(json!({ "success": true })))
}

/// Refusals go back to the caller as 400; everything else keeps the saga mapping.
fn stock_error(err: StockError) -> ApiError {
    match err {
        StockError::Rejected(reason) => ApiError::BadRequest(reason),
        other => ApiError::Saga(other.into()),
    }
}
