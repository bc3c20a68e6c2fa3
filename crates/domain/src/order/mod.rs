//! Order record, line items and the order state machine.

mod model;
mod status;
mod value_objects;

pub use model::{Order, generate_order_number};
pub use status::{OrderPaymentStatus, OrderStatus};
pub use value_objects::{
    Money, OrderItem, PricedLine, ProductId, ShippingAddress, StockDelta,
};
