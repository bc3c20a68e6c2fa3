//! The contract the payment side uses to move an order forward.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::OrderId;
use domain::{OrderPaymentStatus, OrderStatus};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SagaError};

/// Wire body of `POST /internal/update-status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateStatusRequest {
    pub order_id: OrderId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<OrderStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_status: Option<OrderPaymentStatus>,
}

/// Trusted partial update of an order's statuses.
#[async_trait]
pub trait OrderStatusUpdater: Send + Sync {
    async fn update_status(
        &self,
        order_id: OrderId,
        status: Option<OrderStatus>,
        payment_status: Option<OrderPaymentStatus>,
    ) -> Result<()>;
}

#[async_trait]
impl<T: OrderStatusUpdater + ?Sized> OrderStatusUpdater for Arc<T> {
    async fn update_status(
        &self,
        order_id: OrderId,
        status: Option<OrderStatus>,
        payment_status: Option<OrderPaymentStatus>,
    ) -> Result<()> {
        (**self)
            .update_status(order_id, status, payment_status)
            .await
    }
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
}

/// Calls the order service's internal status endpoint.
#[derive(Debug, Clone)]
pub struct HttpOrderStatusClient {
    client: reqwest::Client,
    base_url: String,
    internal_token: Option<String>,
}

impl HttpOrderStatusClient {
    pub fn new(base_url: impl Into<String>, internal_token: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| SagaError::Internal(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            internal_token,
        })
    }
}

#[async_trait]
impl OrderStatusUpdater for HttpOrderStatusClient {
    #[tracing::instrument(skip(self))]
    async fn update_status(
        &self,
        order_id: OrderId,
        status: Option<OrderStatus>,
        payment_status: Option<OrderPaymentStatus>,
    ) -> Result<()> {
        let mut request = self
            .client
            .post(format!("{}/internal/update-status", self.base_url))
            .json(&UpdateStatusRequest {
                order_id,
                status,
                payment_status,
            });
        if let Some(token) = &self.internal_token {
            request = request.header(super::INTERNAL_TOKEN_HEADER, token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SagaError::UpstreamUnavailable(format!("order service: {e}")))?;

        let status_code = response.status();
        if status_code.is_success() {
            return Ok(());
        }
        if status_code.is_server_error() {
            return Err(SagaError::UpstreamUnavailable(format!(
                "order service returned {status_code}"
            )));
        }
        let body: ErrorBody = response.json().await.unwrap_or_default();
        let message = body
            .error
            .unwrap_or_else(|| format!("order service returned {status_code}"));
        Err(match status_code {
            reqwest::StatusCode::NOT_FOUND => SagaError::NotFound(message),
            reqwest::StatusCode::BAD_REQUEST => SagaError::InvalidTransition(message),
            _ => SagaError::Internal(message),
        })
    }
}
