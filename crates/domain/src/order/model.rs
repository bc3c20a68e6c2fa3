//! The order record.

use chrono::{DateTime, Utc};
use common::{OrderId, UserId};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};

use super::{
    Money, OrderItem, OrderPaymentStatus, OrderStatus, PricedLine, ShippingAddress, StockDelta,
};
use crate::error::DomainError;

/// An order with its line items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub order_number: String,
    pub status: OrderStatus,
    pub payment_status: OrderPaymentStatus,
    pub total: Money,
    pub shipping_address: ShippingAddress,
    pub notes: Option<String>,
    pub items: Vec<OrderItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Builds a new pending order from lines priced by the stock service.
    ///
    /// The total is always the sum of the item subtotals.
    pub fn place(
        user_id: UserId,
        order_number: String,
        lines: Vec<PricedLine>,
        shipping_address: ShippingAddress,
        notes: Option<String>,
    ) -> Result<Self, DomainError> {
        if lines.is_empty() {
            return Err(DomainError::Validation(
                "order must contain at least one item".to_string(),
            ));
        }
        shipping_address.validate()?;

        let id = OrderId::new();
        let items = lines
            .into_iter()
            .map(|line| {
                OrderItem::new(
                    id,
                    line.product_id,
                    line.product_name,
                    line.quantity,
                    line.unit_price,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        let total = Money::checked_sum(items.iter().map(|item| item.subtotal))?;
        let now = Utc::now();

        Ok(Self {
            id,
            user_id,
            order_number,
            status: OrderStatus::Pending,
            payment_status: OrderPaymentStatus::Pending,
            total,
            shipping_address,
            notes,
            items,
            created_at: now,
            updated_at: now,
        })
    }

    /// Deltas that give every item's stock back to the catalog.
    pub fn restock_deltas(&self) -> Vec<StockDelta> {
        self.items
            .iter()
            .map(|item| StockDelta::new(item.product_id.clone(), i64::from(item.quantity)))
            .collect()
    }

    /// Returns the number of line items.
    pub fn item_count(&self) -> usize {
        self.items.len()
    }
}

/// Generates a human-facing order number: `ORD-<unix millis>-<9 random chars>`.
///
/// Uniqueness is ultimately enforced by the store's unique constraint.
pub fn generate_order_number() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(|b| char::from(b).to_ascii_uppercase())
        .collect();
    format!("ORD-{}-{}", Utc::now().timestamp_millis(), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::ProductId;

    fn address() -> ShippingAddress {
        ShippingAddress {
            line1: "Moi Avenue 12".to_string(),
            line2: None,
            city: "Nairobi".to_string(),
            region: None,
            postal_code: None,
            country: "KE".to_string(),
            phone: None,
        }
    }

    fn line(product: &str, quantity: u32, cents: i64) -> PricedLine {
        PricedLine {
            product_id: ProductId::new(product),
            product_name: format!("{product} name"),
            quantity,
            unit_price: Money::from_cents(cents),
        }
    }

    #[test]
    fn test_place_computes_total_from_items() {
        let order = Order::place(
            UserId::new(),
            generate_order_number(),
            vec![line("P", 2, 1000), line("Q", 1, 2500)],
            address(),
            None,
        )
        .unwrap();

        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.payment_status, OrderPaymentStatus::Pending);
        assert_eq!(order.item_count(), 2);
        assert_eq!(order.total.cents(), 4500);
        let summed = Money::checked_sum(order.items.iter().map(|i| i.subtotal)).unwrap();
        assert_eq!(order.total, summed);
        assert!(order.items.iter().all(|i| i.order_id == order.id));
    }

    #[test]
    fn test_place_rejects_empty_order() {
        let result = Order::place(UserId::new(), "ORD-1".into(), vec![], address(), None);
        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    #[test]
    fn test_place_rejects_invalid_address() {
        let mut bad = address();
        bad.line1.clear();
        let result = Order::place(
            UserId::new(),
            "ORD-1".into(),
            vec![line("P", 1, 100)],
            bad,
            None,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_place_rejects_overflowing_total() {
        let half = i64::MAX / 2 + 1;
        let result = Order::place(
            UserId::new(),
            "ORD-1".into(),
            vec![line("P", 1, half), line("Q", 1, half)],
            address(),
            None,
        );
        assert!(matches!(result, Err(DomainError::Validation(msg)) if msg.contains("too large")));
    }

    #[test]
    fn test_restock_deltas_are_positive_quantities() {
        let order = Order::place(
            UserId::new(),
            "ORD-1".into(),
            vec![line("P", 2, 1000)],
            address(),
            None,
        )
        .unwrap();
        assert_eq!(order.restock_deltas(), vec![StockDelta::new("P", 2)]);
    }

    #[test]
    fn test_order_number_format() {
        let number = generate_order_number();
        let parts: Vec<&str> = number.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "ORD");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 9);
        assert!(
            parts[2]
                .chars()
                .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase())
        );
        assert_ne!(number, generate_order_number());
    }
}
