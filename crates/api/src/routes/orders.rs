//! Customer-facing order endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use common::OrderId;
use domain::Order;
use saga::{CreateOrderRequest, OrderPage};
use serde::Deserialize;
use store::Store;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_page() -> u32 {
    1
}

fn default_limit() -> u32 {
    10
}

/// POST /orders: place an order priced by the stock service.
#[tracing::instrument(skip(state, user, payload), fields(user_id = %user.0.id))]
pub async fn create<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    user: AuthUser,
    payload: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Order>), ApiError> {
    let Json(request) = payload?;
    let order = state.orchestrator.create_order(user.0.id, request).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// GET /orders: the caller's orders, newest first.
#[tracing::instrument(skip(state, user, query), fields(user_id = %user.0.id))]
pub async fn list<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    user: AuthUser,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<OrderPage>, ApiError> {
    let Query(query) = query?;
    let page = state
        .orchestrator
        .list_orders(user.0.id, query.page, query.limit)
        .await?;
    Ok(Json(page))
}

/// GET /orders/{id}
#[tracing::instrument(skip(state, user), fields(user_id = %user.0.id))]
pub async fn get<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let order = state.orchestrator.get_order(order_id, user.0.id).await?;
    Ok(Json(order))
}

/// PUT /orders/{id}/cancel: cancel and give the stock back.
#[tracing::instrument(skip(state, user), fields(user_id = %user.0.id))]
pub async fn cancel<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let order = state.orchestrator.cancel_order(order_id, user.0.id).await?;
    Ok(Json(order))
}

pub(crate) fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    // Malformed ids cannot name an existing order.
    OrderId::parse(id).map_err(|_| ApiError::NotFound(format!("order {id}")))
}
