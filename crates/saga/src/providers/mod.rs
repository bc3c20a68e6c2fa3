//! Payment gateway adapters.
//!
//! Each gateway is a [`ProviderAdapter`]: it can start a payment and it can
//! authenticate and decode the callbacks the gateway later sends. Adapters are
//! looked up by [`PaymentProvider`] in a [`ProviderRegistry`].

pub mod in_memory;
pub mod mpesa;
pub mod stripe;
pub mod token_cache;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{OrderId, PaymentId, UserId};
use domain::{Money, PaymentProvider, PaymentStatus};
use thiserror::Error;

pub use in_memory::InMemoryProvider;
pub use mpesa::{MpesaAdapter, MpesaConfig, MpesaEnvironment};
pub use stripe::{StripeAdapter, StripeConfig};
pub use token_cache::TokenCache;

/// What an adapter needs to start a payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    pub payment_id: PaymentId,
    pub order_id: OrderId,
    pub user_id: UserId,
    pub amount: Money,
    pub currency: String,
    pub phone_number: Option<String>,
}

/// A payment the gateway accepted and will report back on.
#[derive(Debug, Clone, PartialEq)]
pub struct InitiatedPayment {
    /// Gateway id that callbacks will carry.
    pub external_reference: String,
    /// Token the client needs to continue (checkout request id, client secret).
    pub client_token: Option<String>,
    pub metadata: serde_json::Value,
}

/// The terminal result a callback reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    Succeeded { transaction_id: Option<String> },
    Failed { reason: String },
}

impl CallbackOutcome {
    /// The payment status this outcome moves an attempt to.
    pub fn payment_status(&self) -> PaymentStatus {
        match self {
            CallbackOutcome::Succeeded { .. } => PaymentStatus::Completed,
            CallbackOutcome::Failed { .. } => PaymentStatus::Failed,
        }
    }
}

/// An authenticated callback, decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackEvent {
    pub external_reference: String,
    pub outcome: CallbackOutcome,
    /// The raw callback body, kept in the payment's metadata.
    pub payload: serde_json::Value,
}

/// Errors raised by gateway adapters.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// The adapter is missing credentials or settings.
    #[error("provider misconfigured: {0}")]
    Configuration(String),

    /// The request cannot be sent as given (bad phone number, amount too small).
    #[error("invalid payment request: {0}")]
    InvalidRequest(String),

    /// The gateway refused the credentials.
    #[error("gateway authentication failed: {0}")]
    Authentication(String),

    /// The gateway answered with a refusal.
    #[error("gateway rejected the request: {0}")]
    Rejected(String),

    /// The gateway could not be reached or failed internally.
    #[error("gateway unavailable: {0}")]
    Unavailable(String),

    /// The callback could not be authenticated.
    #[error("callback verification failed: {0}")]
    InvalidSignature(String),

    /// The callback is authentic but cannot be understood.
    #[error("malformed callback: {0}")]
    MalformedPayload(String),
}

/// A payment gateway.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// The provider this adapter serves.
    fn provider(&self) -> PaymentProvider;

    /// Asks the gateway to start collecting the payment.
    async fn initiate(&self, request: &PaymentRequest) -> Result<InitiatedPayment, ProviderError>;

    /// Authenticates a callback and decodes it.
    ///
    /// Returns `Ok(None)` for authentic callbacks that carry no payment
    /// outcome (event types the reconciler does not act on).
    fn verify_callback(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<Option<CallbackEvent>, ProviderError>;
}

/// Adapters keyed by provider.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: HashMap<PaymentProvider, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an adapter, replacing any previous one for the same provider.
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.provider(), adapter);
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, provider: PaymentProvider) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&provider).cloned()
    }

    pub fn contains(&self, provider: PaymentProvider) -> bool {
        self.adapters.contains_key(&provider)
    }

    /// Registered providers, in a stable order.
    pub fn providers(&self) -> Vec<PaymentProvider> {
        let mut providers: Vec<_> = self.adapters.keys().copied().collect();
        providers.sort_by_key(|p| p.as_str());
        providers
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.providers())
            .finish()
    }
}

/// Compares two secrets without short-circuiting on the first differing byte.
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
