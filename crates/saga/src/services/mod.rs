//! Collaborating services the saga talks to, with HTTP and in-memory implementations.

pub mod order_status;
pub mod stock;

pub use order_status::{HttpOrderStatusClient, OrderStatusUpdater, UpdateStatusRequest};
pub use stock::{
    CheckStockRequest, CheckStockResponse, HttpStockClient, InMemoryStockService,
    StockAvailability, StockError, StockQuery, StockReservation, StockShortfall,
    UpdateStockRequest,
};

/// Header carrying the shared secret on service-to-service calls.
pub const INTERNAL_TOKEN_HEADER: &str = "x-internal-token";
