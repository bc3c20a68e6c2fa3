//! Customer-facing payment endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use common::{OrderId, PaymentId};
use domain::{Money, Payment, PaymentProvider};
use saga::InitiatePayment;
use serde::{Deserialize, Serialize};
use store::Store;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::routes::orders::parse_order_id;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct MpesaPaymentRequest {
    pub order_id: OrderId,
    pub phone_number: String,
    #[serde(rename = "amount_cents")]
    pub amount: Money,
}

#[derive(Debug, Deserialize)]
pub struct StripePaymentRequest {
    pub order_id: OrderId,
    #[serde(rename = "amount_cents")]
    pub amount: Money,
    #[serde(default = "default_stripe_currency")]
    pub currency: String,
}

fn default_stripe_currency() -> String {
    "USD".to_string()
}

#[derive(Debug, Serialize)]
pub struct MpesaPaymentResponse {
    pub message: &'static str,
    pub payment: Payment,
    pub checkout_request_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StripePaymentResponse {
    pub message: &'static str,
    pub payment: Payment,
    pub client_secret: Option<String>,
}

/// POST /payments/mpesa: start an STK push to the customer's phone.
#[tracing::instrument(skip(state, user, payload), fields(user_id = %user.0.id))]
pub async fn mpesa<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    user: AuthUser,
    payload: Result<Json<MpesaPaymentRequest>, JsonRejection>,
) -> Result<Json<MpesaPaymentResponse>, ApiError> {
    let Json(request) = payload?;
    let result = state
        .reconciler
        .initiate_payment(InitiatePayment {
            order_id: request.order_id,
            user_id: user.0.id,
            provider: PaymentProvider::Mpesa,
            amount: request.amount,
            currency: "KES".to_string(),
            phone_number: Some(request.phone_number),
        })
        .await?;

    Ok(Json(MpesaPaymentResponse {
        message: "M-Pesa payment initiated. Please check your phone.",
        payment: result.payment,
        checkout_request_id: result.client_token,
    }))
}

/// POST /payments/stripe: create a payment intent for the client to confirm.
#[tracing::instrument(skip(state, user, payload), fields(user_id = %user.0.id))]
pub async fn stripe<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    user: AuthUser,
    payload: Result<Json<StripePaymentRequest>, JsonRejection>,
) -> Result<Json<StripePaymentResponse>, ApiError> {
    let Json(request) = payload?;
    let result = state
        .reconciler
        .initiate_payment(InitiatePayment {
            order_id: request.order_id,
            user_id: user.0.id,
            provider: PaymentProvider::Stripe,
            amount: request.amount,
            currency: request.currency,
            phone_number: None,
        })
        .await?;

    Ok(Json(StripePaymentResponse {
        message: "Stripe payment initiated",
        payment: result.payment,
        client_secret: result.client_token,
    }))
}

/// GET /payments/{id}
#[tracing::instrument(skip(state, user), fields(user_id = %user.0.id))]
pub async fn get<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Payment>, ApiError> {
    let payment_id =
        PaymentId::parse(&id).map_err(|_| ApiError::NotFound(format!("payment {id}")))?;
    let payment = state.reconciler.get_payment(payment_id, user.0.id).await?;
    Ok(Json(payment))
}

/// GET /payments/order/{order_id}: every attempt for an order, newest first.
#[tracing::instrument(skip(state, user), fields(user_id = %user.0.id))]
pub async fn list_for_order<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    user: AuthUser,
    Path(order_id): Path<String>,
) -> Result<Json<Vec<Payment>>, ApiError> {
    let order_id = parse_order_id(&order_id)?;
    let payments = state
        .reconciler
        .list_payments_for_order(order_id, user.0.id)
        .await?;
    Ok(Json(payments))
}
