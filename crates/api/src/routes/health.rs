//! Liveness endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use domain::PaymentProvider;
use serde::Serialize;
use store::Store;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Gateways with credentials loaded.
    pub payment_providers: Vec<PaymentProvider>,
}

/// GET /health
pub async fn check<S: Store>(State(state): State<Arc<AppState<S>>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        payment_providers: state.reconciler.providers().providers(),
    })
}
