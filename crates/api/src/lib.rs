//! HTTP API for order fulfillment.
//!
//! Serves the customer-facing order and payment endpoints, the gateway
//! webhooks and the internal service-to-service endpoints, with structured
//! logging (tracing) and Prometheus metrics.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod worker;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{
    HttpOrderStatusClient, HttpStockClient, InMemoryStockService, MpesaAdapter, ProviderRegistry,
    StockReservation, StripeAdapter,
};
use store::Store;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use auth::{AuthVerifier, HttpAuthVerifier, StaticTokenVerifier};
use config::Config;
use error::ApiError;
pub use state::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: Store>(state: Arc<AppState<S>>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<S>))
        .route(
            "/orders",
            post(routes::orders::create::<S>).get(routes::orders::list::<S>),
        )
        .route("/orders/{id}", get(routes::orders::get::<S>))
        .route("/orders/{id}/cancel", put(routes::orders::cancel::<S>))
        .route("/payments/mpesa", post(routes::payments::mpesa::<S>))
        .route("/payments/stripe", post(routes::payments::stripe::<S>))
        .route("/payments/{id}", get(routes::payments::get::<S>))
        .route(
            "/payments/order/{order_id}",
            get(routes::payments::list_for_order::<S>),
        )
        .route("/webhook/mpesa", post(routes::webhooks::mpesa::<S>))
        .route("/webhook/stripe", post(routes::webhooks::stripe::<S>))
        .route(
            "/internal/update-status",
            post(routes::internal::update_status::<S>),
        )
        .route(
            "/internal/check-stock",
            post(routes::internal::check_stock::<S>),
        )
        .route(
            "/internal/update-stock",
            post(routes::internal::update_stock::<S>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Builds the application state over `store` from configuration.
///
/// Collaborators without a configured URL fall back to in-process
/// implementations, and gateways without credentials are left out.
///
/// `/internal/*` is left open only in a standalone deployment; once any peer
/// service URL is configured an `INTERNAL_API_TOKEN` is required.
pub fn build_state<S: Store>(config: &Config, store: S) -> Result<AppState<S>, ApiError> {
    if config.internal_api_token.is_none() {
        if !config.is_standalone() {
            return Err(ApiError::Internal(
                "INTERNAL_API_TOKEN must be set when peer services are configured".to_string(),
            ));
        }
        tracing::warn!("INTERNAL_API_TOKEN not set, /internal routes accept any caller");
    }

    let stock: Arc<dyn StockReservation> = match &config.stock_service_url {
        Some(url) => Arc::new(
            HttpStockClient::new(url.clone(), config.internal_api_token.clone())
                .map_err(|e| ApiError::Internal(e.to_string()))?,
        ),
        None => {
            tracing::warn!("STOCK_SERVICE_URL not set, using an empty in-memory catalog");
            Arc::new(InMemoryStockService::new())
        }
    };

    let auth: Arc<dyn AuthVerifier> = match &config.auth_service_url {
        Some(url) => Arc::new(HttpAuthVerifier::new(url.clone())?),
        None => {
            tracing::warn!(
                tokens = config.static_tokens.len(),
                "AUTH_SERVICE_URL not set, accepting static tokens only"
            );
            Arc::new(StaticTokenVerifier::from_tokens(&config.static_tokens))
        }
    };

    let mut providers = ProviderRegistry::new();
    if let Some(mpesa) = &config.mpesa {
        let adapter =
            MpesaAdapter::new(mpesa.clone()).map_err(|e| ApiError::Internal(e.to_string()))?;
        providers.register(Arc::new(adapter));
    }
    if let Some(stripe) = &config.stripe {
        if stripe.webhook_secret.is_none() {
            tracing::warn!("STRIPE_WEBHOOK_SECRET not set, Stripe webhooks will be rejected");
        }
        let adapter =
            StripeAdapter::new(stripe.clone()).map_err(|e| ApiError::Internal(e.to_string()))?;
        providers.register(Arc::new(adapter));
    }
    tracing::info!(providers = ?providers.providers(), "payment providers registered");

    let mut state = AppState::new(store, stock, providers, auth)
        .with_internal_token(config.internal_api_token.clone());
    if let Some(url) = &config.order_service_url {
        let client = HttpOrderStatusClient::new(url.clone(), config.internal_api_token.clone())?;
        state = state.with_order_status(Arc::new(client));
    }
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use store::InMemoryStore;

    #[test]
    fn test_standalone_state_may_run_without_internal_token() {
        let state = build_state(&Config::default(), InMemoryStore::new()).unwrap();
        assert!(state.internal_token.is_none());
    }

    #[test]
    fn test_peer_services_require_internal_token() {
        let config = Config {
            stock_service_url: Some("http://stock:3001".to_string()),
            ..Config::default()
        };
        assert!(matches!(
            build_state(&config, InMemoryStore::new()),
            Err(ApiError::Internal(msg)) if msg.contains("INTERNAL_API_TOKEN")
        ));

        let config = Config {
            internal_api_token: Some("secret".to_string()),
            ..config
        };
        let state = build_state(&config, InMemoryStore::new()).unwrap();
        assert_eq!(state.internal_token.as_deref(), Some("secret"));
    }
}
