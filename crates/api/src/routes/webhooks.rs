//! Gateway callbacks. No bearer auth; each gateway's own proof is checked by
//! its adapter.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use domain::PaymentProvider;
use saga::SagaError;
use serde::Deserialize;
use serde_json::json;
use store::Store;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct MpesaCallbackQuery {
    #[serde(default)]
    pub token: Option<String>,
}

/// POST /webhook/mpesa: always acknowledged so the gateway stops retrying.
#[tracing::instrument(skip(state, query, body))]
pub async fn mpesa<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Query(query): Query<MpesaCallbackQuery>,
    body: Bytes,
) -> Json<serde_json::Value> {
    match state
        .reconciler
        .handle_callback(PaymentProvider::Mpesa, &body, query.token.as_deref())
        .await
    {
        Ok(disposition) => tracing::info!(%disposition, "M-Pesa callback handled"),
        Err(err) => tracing::warn!(error = %err, "M-Pesa callback not applied"),
    }
    Json(json!({ "ResultCode": 0, "ResultDesc": "Accepted" }))
}

/// POST /webhook/stripe: 400 only when the signature does not verify.
#[tracing::instrument(skip(state, headers, body))]
pub async fn stripe<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = headers
        .get("stripe-signature")
        .and_then(|value| value.to_str().ok());

    match state
        .reconciler
        .handle_callback(PaymentProvider::Stripe, &body, signature)
        .await
    {
        Ok(disposition) => {
            tracing::info!(%disposition, "Stripe webhook handled");
        }
        Err(SagaError::ProviderRejected(reason)) => {
            tracing::warn!(%reason, "Stripe webhook rejected");
            return ApiError::BadRequest("Invalid signature".to_string()).into_response();
        }
        Err(err) => {
            tracing::error!(error = %err, "Stripe webhook not applied");
        }
    }
    (StatusCode::OK, Json(json!({ "received": true }))).into_response()
}
