//! Stock reservation contract, an HTTP client for it and an in-memory catalog.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use domain::{Money, ProductId, StockDelta};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

/// A product and the quantity an order wants of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockQuery {
    pub product_id: ProductId,
    pub quantity: u32,
}

/// Authoritative availability and pricing for one queried product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAvailability {
    pub product_id: ProductId,
    pub available: bool,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "price_cents", default)]
    pub price: Money,
    #[serde(default)]
    pub stock_remaining: i64,
}

/// Why a product cannot cover a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockShortfall {
    pub product_id: ProductId,
    pub requested: i64,
    pub available: i64,
}

/// Errors from the stock service.
#[derive(Debug, Clone, Error)]
pub enum StockError {
    /// A decrement would take stock below zero. Nothing was applied.
    #[error("insufficient stock for {} product(s)", .0.len())]
    Insufficient(Vec<StockShortfall>),

    /// The service could not be reached or failed internally.
    #[error("stock service unavailable: {0}")]
    Unavailable(String),

    /// The service refused the request for another reason (unknown product, bad input).
    #[error("stock request rejected: {0}")]
    Rejected(String),
}

/// Wire body of `POST /internal/check-stock`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckStockRequest {
    pub items: Vec<StockQuery>,
}

/// Wire response of `POST /internal/check-stock`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckStockResponse {
    pub available: bool,
    pub items: Vec<StockAvailability>,
}

/// Wire body of `POST /internal/update-stock`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateStockRequest {
    pub updates: Vec<StockDelta>,
}

/// Error body returned by the stock service.
#[derive(Debug, Clone, Default, Deserialize)]
struct StockErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    details: Option<Vec<StockShortfall>>,
}

/// The stock operations the order saga depends on.
#[async_trait]
pub trait StockReservation: Send + Sync {
    /// Reports availability and current price for each queried product, in
    /// request order. Unknown products are reported as unavailable.
    async fn check_availability(
        &self,
        items: &[StockQuery],
    ) -> Result<Vec<StockAvailability>, StockError>;

    /// Applies signed deltas as one conditional batch.
    ///
    /// Either every delta is applied or none is. A decrement that would make
    /// any product's stock negative rejects the whole batch with
    /// `StockError::Insufficient`.
    async fn apply_delta(&self, deltas: &[StockDelta]) -> Result<(), StockError>;
}

#[async_trait]
impl<T: StockReservation + ?Sized> StockReservation for Arc<T> {
    async fn check_availability(
        &self,
        items: &[StockQuery],
    ) -> Result<Vec<StockAvailability>, StockError> {
        (**self).check_availability(items).await
    }

    async fn apply_delta(&self, deltas: &[StockDelta]) -> Result<(), StockError> {
        (**self).apply_delta(deltas).await
    }
}

// -- HTTP client --

/// Client for the catalog service's internal stock endpoints.
#[derive(Debug, Clone)]
pub struct HttpStockClient {
    client: reqwest::Client,
    base_url: String,
    internal_token: Option<String>,
}

impl HttpStockClient {
    pub fn new(
        base_url: impl Into<String>,
        internal_token: Option<String>,
    ) -> Result<Self, StockError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| StockError::Unavailable(e.to_string()))?;
        Ok(Self::with_client(client, base_url, internal_token))
    }

    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        internal_token: Option<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            internal_token,
        }
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let request = self.client.post(format!("{}{}", self.base_url, path));
        match &self.internal_token {
            Some(token) => request.header(super::INTERNAL_TOKEN_HEADER, token),
            None => request,
        }
    }
}

fn transport_error(err: reqwest::Error) -> StockError {
    StockError::Unavailable(err.to_string())
}

#[async_trait]
impl StockReservation for HttpStockClient {
    #[tracing::instrument(skip(self, items), fields(items = items.len()))]
    async fn check_availability(
        &self,
        items: &[StockQuery],
    ) -> Result<Vec<StockAvailability>, StockError> {
        let response = self
            .post("/internal/check-stock")
            .json(&CheckStockRequest {
                items: items.to_vec(),
            })
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_server_error() {
            return Err(StockError::Unavailable(format!(
                "check-stock returned {status}"
            )));
        }
        if !status.is_success() {
            let body: StockErrorBody = response.json().await.unwrap_or_default();
            return Err(StockError::Rejected(
                body.error
                    .unwrap_or_else(|| format!("check-stock returned {status}")),
            ));
        }

        let body: CheckStockResponse = response.json().await.map_err(|e| {
            StockError::Unavailable(format!("malformed check-stock response: {e}"))
        })?;
        Ok(body.items)
    }

    #[tracing::instrument(skip(self, deltas), fields(deltas = deltas.len()))]
    async fn apply_delta(&self, deltas: &[StockDelta]) -> Result<(), StockError> {
        let response = self
            .post("/internal/update-stock")
            .json(&UpdateStockRequest {
                updates: deltas.to_vec(),
            })
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status.is_server_error() {
            return Err(StockError::Unavailable(format!(
                "update-stock returned {status}"
            )));
        }

        let body: StockErrorBody = response.json().await.unwrap_or_default();
        if status == reqwest::StatusCode::BAD_REQUEST {
            // Without details, report every decrement as the shortfall.
            let shortfalls = body.details.unwrap_or_else(|| {
                deltas
                    .iter()
                    .filter(|d| d.quantity < 0)
                    .map(|d| StockShortfall {
                        product_id: d.product_id.clone(),
                        requested: -d.quantity,
                        available: 0,
                    })
                    .collect()
            });
            return Err(StockError::Insufficient(shortfalls));
        }
        Err(StockError::Rejected(
            body.error
                .unwrap_or_else(|| format!("update-stock returned {status}")),
        ))
    }
}

// -- In-memory catalog --

#[derive(Debug, Clone)]
struct CatalogEntry {
    name: String,
    price: Money,
    stock: i64,
}

#[derive(Debug, Default)]
struct InMemoryStockState {
    catalog: HashMap<ProductId, CatalogEntry>,
    applied: Vec<Vec<StockDelta>>,
    apply_calls: u32,
    fail_on_check: bool,
    fail_on_apply: bool,
    fail_on_restore: bool,
}

/// In-memory catalog implementing the stock contract, for tests and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStockService {
    state: Arc<RwLock<InMemoryStockState>>,
}

impl InMemoryStockService {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a product.
    pub async fn add_product(
        &self,
        product_id: impl Into<ProductId>,
        name: impl Into<String>,
        price: Money,
        stock: i64,
    ) {
        self.state.write().await.catalog.insert(
            product_id.into(),
            CatalogEntry {
                name: name.into(),
                price,
                stock,
            },
        );
    }

    /// Returns the current stock of a product.
    pub async fn stock_of(&self, product_id: &str) -> Option<i64> {
        self.state
            .read()
            .await
            .catalog
            .get(&ProductId::new(product_id))
            .map(|entry| entry.stock)
    }

    /// Returns every batch that was applied, in order.
    pub async fn applied_deltas(&self) -> Vec<Vec<StockDelta>> {
        self.state.read().await.applied.clone()
    }

    /// Returns how many times `apply_delta` was called, successful or not.
    pub async fn apply_calls(&self) -> u32 {
        self.state.read().await.apply_calls
    }

    /// Makes availability checks fail as if the service were down.
    pub async fn set_fail_on_check(&self, fail: bool) {
        self.state.write().await.fail_on_check = fail;
    }

    /// Makes every delta batch fail as if the service were down.
    pub async fn set_fail_on_apply(&self, fail: bool) {
        self.state.write().await.fail_on_apply = fail;
    }

    /// Makes batches that give stock back fail, while decrements still work.
    pub async fn set_fail_on_restore(&self, fail: bool) {
        self.state.write().await.fail_on_restore = fail;
    }
}

#[async_trait]
impl StockReservation for InMemoryStockService {
    async fn check_availability(
        &self,
        items: &[StockQuery],
    ) -> Result<Vec<StockAvailability>, StockError> {
        let state = self.state.read().await;
        if state.fail_on_check {
            return Err(StockError::Unavailable(
                "stock service unavailable (simulated)".to_string(),
            ));
        }

        Ok(items
            .iter()
            .map(|item| match state.catalog.get(&item.product_id) {
                Some(entry) => StockAvailability {
                    product_id: item.product_id.clone(),
                    available: entry.stock >= i64::from(item.quantity),
                    name: entry.name.clone(),
                    price: entry.price,
                    stock_remaining: entry.stock,
                },
                None => StockAvailability {
                    product_id: item.product_id.clone(),
                    available: false,
                    name: String::new(),
                    price: Money::zero(),
                    stock_remaining: 0,
                },
            })
            .collect())
    }

    async fn apply_delta(&self, deltas: &[StockDelta]) -> Result<(), StockError> {
        let mut state = self.state.write().await;
        state.apply_calls += 1;

        if state.fail_on_apply || (state.fail_on_restore && deltas.iter().any(|d| d.quantity > 0))
        {
            return Err(StockError::Unavailable(
                "stock service unavailable (simulated)".to_string(),
            ));
        }

        let mut net: BTreeMap<&ProductId, i64> = BTreeMap::new();
        for delta in deltas {
            *net.entry(&delta.product_id).or_default() += delta.quantity;
        }

        let mut shortfalls = Vec::new();
        for (product_id, quantity) in &net {
            let Some(entry) = state.catalog.get(*product_id) else {
                return Err(StockError::Rejected(format!(
                    "unknown product {product_id}"
                )));
            };
            if entry.stock + quantity < 0 {
                shortfalls.push(StockShortfall {
                    product_id: (*product_id).clone(),
                    requested: -quantity,
                    available: entry.stock,
                });
            }
        }
        if !shortfalls.is_empty() {
            return Err(StockError::Insufficient(shortfalls));
        }

        for (product_id, quantity) in net {
            if let Some(entry) = state.catalog.get_mut(product_id) {
                entry.stock += quantity;
            }
        }
        state.applied.push(deltas.to_vec());
        Ok(())
    }
}
