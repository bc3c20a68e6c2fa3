//! Order fulfillment saga across the stock, order and payment services.
//!
//! The services do not share a database, so consistency is kept with local
//! commits plus compensating actions:
//! 1. Stock is decremented with a conditional compare-and-apply call
//! 2. The order is committed locally
//! 3. If the commit fails, or the order is later cancelled, the stock is
//!    given back; restores that keep failing are persisted and retried
//!
//! Payments are reconciled from gateway callbacks that may arrive more than
//! once and out of order. Each terminal outcome is applied exactly once.

pub mod error;
pub mod orchestrator;
pub mod providers;
pub mod reconciler;
pub mod retry;
pub mod services;

pub use error::{Result, SagaError};
pub use orchestrator::{CreateOrderItem, CreateOrderRequest, OrderOrchestrator, OrderPage};
pub use providers::{
    CallbackEvent, CallbackOutcome, InMemoryProvider, InitiatedPayment, MpesaAdapter,
    MpesaConfig, MpesaEnvironment, PaymentRequest, ProviderAdapter, ProviderError,
    ProviderRegistry, StripeAdapter, StripeConfig,
};
pub use reconciler::{CallbackDisposition, InitiatePayment, InitiatedPaymentResult, PaymentReconciler};
pub use retry::RetryPolicy;
pub use services::{
    HttpOrderStatusClient, HttpStockClient, InMemoryStockService, OrderStatusUpdater,
    StockAvailability, StockError, StockQuery, StockReservation, StockShortfall,
};
