//! Shared application state.

use std::sync::Arc;

use saga::{
    OrderOrchestrator, OrderStatusUpdater, PaymentReconciler, ProviderRegistry, StockReservation,
};
use store::Store;

use crate::auth::AuthVerifier;

/// Order orchestrator as wired into the API.
pub type Orchestrator<S> = OrderOrchestrator<S, Arc<dyn StockReservation>>;

/// Payment reconciler as wired into the API.
pub type Reconciler<S> = PaymentReconciler<S, Arc<dyn OrderStatusUpdater>>;

/// Shared application state accessible from all handlers.
pub struct AppState<S: Store> {
    pub store: S,
    pub orchestrator: Arc<Orchestrator<S>>,
    pub reconciler: Reconciler<S>,
    pub auth: Arc<dyn AuthVerifier>,
    /// Required on `/internal/*` routes when set.
    pub internal_token: Option<String>,
}

impl<S: Store> AppState<S> {
    /// Wires the orchestrator and reconciler over one store.
    ///
    /// Payment outcomes are applied to orders in-process unless
    /// [`with_order_status`](Self::with_order_status) points them elsewhere.
    pub fn new(
        store: S,
        stock: Arc<dyn StockReservation>,
        providers: ProviderRegistry,
        auth: Arc<dyn AuthVerifier>,
    ) -> Self {
        let orchestrator = Arc::new(OrderOrchestrator::new(store.clone(), stock));
        let notifier: Arc<dyn OrderStatusUpdater> = orchestrator.clone();
        let reconciler = PaymentReconciler::new(store.clone(), providers, notifier);
        Self {
            store,
            orchestrator,
            reconciler,
            auth,
            internal_token: None,
        }
    }

    pub fn with_internal_token(mut self, token: Option<String>) -> Self {
        self.internal_token = token;
        self
    }

    /// Sends payment outcomes to `updater` instead of the local orchestrator.
    pub fn with_order_status(mut self, updater: Arc<dyn OrderStatusUpdater>) -> Self {
        let providers = self.reconciler.providers().clone();
        self.reconciler = PaymentReconciler::new(self.store.clone(), providers, updater);
        self
    }

    pub fn stock(&self) -> &Arc<dyn StockReservation> {
        self.orchestrator.stock()
    }
}
