//! Payment reconciler: starts payments with a gateway and applies the
//! gateway's callbacks exactly once.

use common::{OrderId, PaymentId, UserId};
use domain::{
    Money, OrderPaymentStatus, OrderStatus, Payment, PaymentProvider, PaymentStatus,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use store::Store;

use crate::error::{Result, SagaError};
use crate::providers::{CallbackOutcome, PaymentRequest, ProviderError, ProviderRegistry};
use crate::retry::RetryPolicy;
use crate::services::OrderStatusUpdater;

/// A request to start paying for an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiatePayment {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub provider: PaymentProvider,
    pub amount: Money,
    pub currency: String,
    #[serde(default)]
    pub phone_number: Option<String>,
}

/// A payment the gateway accepted, with the token the client continues with.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InitiatedPaymentResult {
    pub payment: Payment,
    pub client_token: Option<String>,
}

/// What happened to a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackDisposition {
    /// The payment moved to a terminal status and the order was notified.
    Applied,
    /// The payment already had this outcome.
    Duplicate,
    /// The payment already had a different terminal outcome.
    Stale,
    /// No payment carries the callback's reference.
    UnknownReference,
    /// Authentic, but not an event that settles a payment.
    Ignored,
    /// Authentic, but the body could not be read.
    Malformed,
}

impl CallbackDisposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackDisposition::Applied => "applied",
            CallbackDisposition::Duplicate => "duplicate",
            CallbackDisposition::Stale => "stale",
            CallbackDisposition::UnknownReference => "unknown_reference",
            CallbackDisposition::Ignored => "ignored",
            CallbackDisposition::Malformed => "malformed",
        }
    }
}

impl std::fmt::Display for CallbackDisposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reconciles payment attempts with gateway callbacks.
///
/// Callbacks may be redelivered and may arrive out of order. A payment
/// leaves `processing` through a compare-and-set, so only one delivery of a
/// terminal outcome wins, and only the winner notifies the order side.
#[derive(Debug, Clone)]
pub struct PaymentReconciler<S, U> {
    store: S,
    providers: ProviderRegistry,
    notifier: U,
    retry: RetryPolicy,
}

impl<S, U> PaymentReconciler<S, U>
where
    S: Store,
    U: OrderStatusUpdater,
{
    pub fn new(store: S, providers: ProviderRegistry, notifier: U) -> Self {
        Self {
            store,
            providers,
            notifier,
            retry: RetryPolicy::default(),
        }
    }

    /// Overrides how order notifications are retried.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    /// Creates a payment attempt and asks the gateway to start collecting it.
    ///
    /// Only the caller's own order can be paid, and only for its exact total
    /// while it still awaits payment. A gateway refusal leaves the
    /// attempt `failed` and is returned as [`SagaError::ProviderRejected`].
    #[tracing::instrument(
        skip(self, request),
        fields(order_id = %request.order_id, provider = %request.provider)
    )]
    pub async fn initiate_payment(&self, request: InitiatePayment) -> Result<InitiatedPaymentResult> {
        if !request.amount.is_positive() {
            return Err(SagaError::Validation(format!(
                "payment amount must be positive, got {}",
                request.amount
            )));
        }
        let adapter = self.providers.get(request.provider).ok_or_else(|| {
            SagaError::Validation(format!("provider {} is not configured", request.provider))
        })?;

        let order = self
            .store
            .get_order(request.order_id)
            .await?
            .filter(|order| order.user_id == request.user_id)
            .ok_or_else(|| SagaError::NotFound(format!("order {}", request.order_id)))?;
        if !order.status.accepts_payment() {
            return Err(SagaError::InvalidTransition(format!(
                "order {} is {} and cannot be paid",
                order.id, order.status
            )));
        }
        if request.amount != order.total {
            return Err(SagaError::Validation(format!(
                "payment amount {} does not match order total {}",
                request.amount, order.total
            )));
        }

        let previous = self.store.list_payments_for_order(request.order_id).await?;
        if previous
            .iter()
            .any(|payment| payment.status == PaymentStatus::Completed)
        {
            return Err(SagaError::InvalidTransition(format!(
                "order {} is already paid",
                request.order_id
            )));
        }

        let payment = Payment::new_pending(
            request.order_id,
            request.user_id,
            request.provider,
            request.amount,
            request.currency,
            request.phone_number,
        )?;
        self.store.insert_payment(&payment).await?;

        let gateway_request = PaymentRequest {
            payment_id: payment.id,
            order_id: payment.order_id,
            user_id: payment.user_id,
            amount: payment.amount,
            currency: payment.currency.clone(),
            phone_number: payment.phone_number.clone(),
        };

        let initiated = match adapter.initiate(&gateway_request).await {
            Ok(initiated) => initiated,
            Err(err) => {
                tracing::warn!(payment_id = %payment.id, error = %err, "gateway refused payment");
                let mut failed = payment.clone();
                failed.status = PaymentStatus::Failed;
                failed.error_message = Some(err.to_string());
                failed.updated_at = chrono::Utc::now();
                if let Err(store_err) = self.store.update_payment(&failed, PaymentStatus::Pending).await {
                    tracing::error!(payment_id = %payment.id, error = %store_err, "failed to mark payment failed");
                }
                return Err(err.into());
            }
        };

        let mut processing = payment;
        processing.status = PaymentStatus::Processing;
        processing.external_reference = Some(initiated.external_reference.clone());
        processing.metadata = Some(initiated.metadata);
        processing.updated_at = chrono::Utc::now();
        if !self
            .store
            .update_payment(&processing, PaymentStatus::Pending)
            .await?
        {
            return Err(SagaError::Internal(format!(
                "payment {} changed while it was being initiated",
                processing.id
            )));
        }

        metrics::counter!("payments_initiated_total", "provider" => processing.provider.as_str())
            .increment(1);
        tracing::info!(
            payment_id = %processing.id,
            external_reference = %initiated.external_reference,
            "payment initiated"
        );
        Ok(InitiatedPaymentResult {
            payment: processing,
            client_token: initiated.client_token,
        })
    }

    /// Authenticates a gateway callback and applies its outcome.
    ///
    /// Only an authentication failure is an error; every authentic callback,
    /// including one whose body cannot be read, is acknowledged with its
    /// [`CallbackDisposition`].
    #[tracing::instrument(skip(self, payload, signature), fields(provider = %provider))]
    pub async fn handle_callback(
        &self,
        provider: PaymentProvider,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<CallbackDisposition> {
        let adapter = self.providers.get(provider).ok_or_else(|| {
            SagaError::Validation(format!("provider {provider} is not configured"))
        })?;

        let event = match adapter.verify_callback(payload, signature) {
            Ok(Some(event)) => event,
            Ok(None) => return Ok(record(provider, CallbackDisposition::Ignored)),
            Err(ProviderError::MalformedPayload(reason)) => {
                tracing::warn!(%reason, "authentic callback with unreadable body, acknowledging");
                return Ok(record(provider, CallbackDisposition::Malformed));
            }
            Err(err) => {
                tracing::warn!(error = %err, "callback rejected");
                metrics::counter!(
                    "payment_callbacks_total",
                    "provider" => provider.as_str(),
                    "disposition" => "rejected"
                )
                .increment(1);
                return Err(err.into());
            }
        };

        let Some(payment) = self
            .store
            .find_payment_by_reference(provider, &event.external_reference)
            .await?
        else {
            tracing::warn!(
                external_reference = %event.external_reference,
                "callback for unknown payment reference"
            );
            return Ok(record(provider, CallbackDisposition::UnknownReference));
        };

        let target = event.outcome.payment_status();
        if payment.status.is_terminal() {
            if payment.status == target {
                tracing::debug!(payment_id = %payment.id, "duplicate callback");
                return Ok(record(provider, CallbackDisposition::Duplicate));
            }
            tracing::warn!(
                payment_id = %payment.id,
                current = %payment.status,
                reported = %target,
                "callback contradicts settled payment, ignoring"
            );
            return Ok(record(provider, CallbackDisposition::Stale));
        }
        if let Err(err) = payment.check_transition(target) {
            tracing::warn!(payment_id = %payment.id, error = %err, "callback out of order, ignoring");
            return Ok(record(provider, CallbackDisposition::Stale));
        }

        let mut settled = payment.clone();
        settled.status = target;
        match event.outcome {
            CallbackOutcome::Succeeded { transaction_id } => {
                settled.transaction_id = transaction_id.or(settled.transaction_id);
            }
            CallbackOutcome::Failed { reason } => settled.error_message = Some(reason),
        }
        settled.metadata = Some(merge_callback(settled.metadata.take(), event.payload));
        settled.updated_at = chrono::Utc::now();

        if !self.store.update_payment(&settled, payment.status).await? {
            tracing::debug!(payment_id = %payment.id, "lost race to a concurrent delivery");
            return Ok(record(provider, CallbackDisposition::Duplicate));
        }

        tracing::info!(
            payment_id = %settled.id,
            order_id = %settled.order_id,
            status = %settled.status,
            "payment settled"
        );
        self.notify_order(&settled).await;
        Ok(record(provider, CallbackDisposition::Applied))
    }

    /// Loads a payment owned by `user_id`.
    pub async fn get_payment(&self, payment_id: PaymentId, user_id: UserId) -> Result<Payment> {
        self.store
            .get_payment(payment_id)
            .await?
            .filter(|payment| payment.user_id == user_id)
            .ok_or_else(|| SagaError::NotFound(format!("payment {payment_id}")))
    }

    /// The user's payment attempts for an order, newest first.
    pub async fn list_payments_for_order(
        &self,
        order_id: OrderId,
        user_id: UserId,
    ) -> Result<Vec<Payment>> {
        let payments = self.store.list_payments_for_order(order_id).await?;
        Ok(payments
            .into_iter()
            .filter(|payment| payment.user_id == user_id)
            .collect())
    }

    /// Moves the order forward, retrying under the reconciler's policy.
    /// Exhaustion is logged and counted; the payment stays settled.
    async fn notify_order(&self, payment: &Payment) {
        let (status, payment_status) = match payment.status {
            PaymentStatus::Completed => (Some(OrderStatus::Paid), Some(OrderPaymentStatus::Paid)),
            _ => (None, Some(OrderPaymentStatus::Failed)),
        };
        let outcome = self
            .retry
            .run("order status update", || {
                self.notifier
                    .update_status(payment.order_id, status, payment_status)
            })
            .await;
        if let Err(exhausted) = outcome {
            metrics::counter!("order_notifications_failed_total").increment(1);
            tracing::error!(
                payment_id = %payment.id,
                order_id = %payment.order_id,
                payment_status = %payment.status,
                attempts = exhausted.attempts,
                error = %exhausted.error,
                "order status update after payment failed"
            );
        }
    }
}

fn record(provider: PaymentProvider, disposition: CallbackDisposition) -> CallbackDisposition {
    metrics::counter!(
        "payment_callbacks_total",
        "provider" => provider.as_str(),
        "disposition" => disposition.as_str()
    )
    .increment(1);
    disposition
}

/// Keeps the initiation metadata and adds the raw callback under `callback`.
fn merge_callback(existing: Option<Value>, callback: Value) -> Value {
    let mut merged = match existing {
        Some(Value::Object(map)) => map,
        Some(other) => {
            let mut map = Map::new();
            map.insert("initiation".to_string(), other);
            map
        }
        None => Map::new(),
    };
    merged.insert("callback".to_string(), callback);
    Value::Object(merged)
}
