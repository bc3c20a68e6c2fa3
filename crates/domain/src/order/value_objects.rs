//! Value objects for the order domain.

use common::{OrderId, OrderItemId};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Product identifier as issued by the catalog service.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(String);

impl ProductId {
    /// Creates a new product ID from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the product ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProductId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ProductId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ProductId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for ProductId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Money amount in minor currency units (cents) to avoid floating point issues.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Money {
    cents: i64,
}

impl Money {
    /// Creates a new Money amount from minor units.
    pub fn from_cents(cents: i64) -> Self {
        Self { cents }
    }

    /// Returns zero money.
    pub fn zero() -> Self {
        Self { cents: 0 }
    }

    /// Returns the amount in minor units.
    pub fn cents(&self) -> i64 {
        self.cents
    }

    /// Returns the amount in whole major units, rounding half away from zero.
    pub fn round_to_major(&self) -> i64 {
        let whole = self.cents / 100;
        let rem = self.cents % 100;
        if rem >= 50 {
            whole + 1
        } else if rem <= -50 {
            whole - 1
        } else {
            whole
        }
    }

    /// Returns true if the amount is positive.
    pub fn is_positive(&self) -> bool {
        self.cents > 0
    }

    /// Multiplies by a quantity, or `None` on overflow.
    pub fn checked_mul(&self, quantity: u32) -> Option<Money> {
        self.cents
            .checked_mul(i64::from(quantity))
            .map(Money::from_cents)
    }

    /// Adds two amounts, or `None` on overflow.
    pub fn checked_add(&self, other: Money) -> Option<Money> {
        self.cents.checked_add(other.cents).map(Money::from_cents)
    }

    /// Sums amounts, failing with a validation error on overflow.
    pub fn checked_sum(amounts: impl IntoIterator<Item = Money>) -> Result<Money, DomainError> {
        amounts
            .into_iter()
            .try_fold(Money::zero(), |acc, amount| acc.checked_add(amount))
            .ok_or_else(|| DomainError::Validation("order total is too large".to_string()))
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.cents < 0 { "-" } else { "" };
        let abs = self.cents.abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

/// Structured delivery address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub line1: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line2: Option<String>,
    pub city: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    pub country: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl ShippingAddress {
    /// Rejects addresses missing the fields a carrier needs.
    pub fn validate(&self) -> Result<(), DomainError> {
        let required = [
            ("line1", &self.line1),
            ("city", &self.city),
            ("country", &self.country),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(DomainError::Validation(format!(
                    "shipping address {field} is required"
                )));
            }
        }
        Ok(())
    }
}

/// A signed stock adjustment for one product.
///
/// Negative quantities reserve stock, positive quantities give it back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockDelta {
    pub product_id: ProductId,
    pub quantity: i64,
}

impl StockDelta {
    pub fn new(product_id: impl Into<ProductId>, quantity: i64) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
        }
    }

    /// Returns the delta that undoes this one.
    pub fn inverse(&self) -> Self {
        Self {
            product_id: self.product_id.clone(),
            quantity: -self.quantity,
        }
    }
}

/// A requested line priced by the stock service, before it becomes an [`OrderItem`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedLine {
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Money,
}

/// An immutable line of a persisted order.
///
/// Name and price are snapshots taken at creation so later catalog edits
/// never change what the customer was charged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: OrderItemId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Money,
    pub subtotal: Money,
}

impl OrderItem {
    /// Creates a new order item; the subtotal is derived from price and quantity.
    pub fn new(
        order_id: OrderId,
        product_id: impl Into<ProductId>,
        product_name: impl Into<String>,
        quantity: u32,
        unit_price: Money,
    ) -> Result<Self, DomainError> {
        if quantity == 0 {
            return Err(DomainError::Validation(
                "item quantity must be at least 1".to_string(),
            ));
        }
        let product_id = product_id.into();
        let subtotal = unit_price.checked_mul(quantity).ok_or_else(|| {
            DomainError::Validation(format!(
                "subtotal of {quantity} x {unit_price} for {product_id} is too large"
            ))
        })?;
        Ok(Self {
            id: OrderItemId::new(),
            order_id,
            product_id,
            product_name: product_name.into(),
            quantity,
            unit_price,
            subtotal,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address() -> ShippingAddress {
        ShippingAddress {
            line1: "Moi Avenue 12".to_string(),
            line2: None,
            city: "Nairobi".to_string(),
            region: None,
            postal_code: Some("00100".to_string()),
            country: "KE".to_string(),
            phone: None,
        }
    }

    #[test]
    fn test_money_display() {
        assert_eq!(Money::from_cents(2000).to_string(), "20.00");
        assert_eq!(Money::from_cents(5).to_string(), "0.05");
        assert_eq!(Money::from_cents(-1234).to_string(), "-12.34");
    }

    #[test]
    fn test_money_round_to_major() {
        assert_eq!(Money::from_cents(2000).round_to_major(), 20);
        assert_eq!(Money::from_cents(2049).round_to_major(), 20);
        assert_eq!(Money::from_cents(2050).round_to_major(), 21);
        assert_eq!(Money::from_cents(-150).round_to_major(), -2);
    }

    #[test]
    fn test_money_checked_arithmetic() {
        let line = Money::from_cents(1000).checked_mul(2).unwrap();
        let total = Money::checked_sum([line, Money::from_cents(250)]).unwrap();
        assert_eq!(total.cents(), 2250);

        assert_eq!(Money::from_cents(i64::MAX).checked_mul(2), None);
        assert_eq!(Money::from_cents(i64::MAX).checked_add(Money::from_cents(1)), None);
        assert!(matches!(
            Money::checked_sum([Money::from_cents(i64::MAX), Money::from_cents(1)]),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn test_money_serializes_as_integer() {
        assert_eq!(serde_json::to_string(&Money::from_cents(999)).unwrap(), "999");
    }

    #[test]
    fn test_order_item_subtotal() {
        let item =
            OrderItem::new(OrderId::new(), "P", "Widget", 3, Money::from_cents(1000)).unwrap();
        assert_eq!(item.subtotal.cents(), 3000);
    }

    #[test]
    fn test_order_item_rejects_overflowing_subtotal() {
        let result = OrderItem::new(
            OrderId::new(),
            "P",
            "Widget",
            u32::MAX,
            Money::from_cents(i64::MAX / 2),
        );
        assert!(matches!(result, Err(DomainError::Validation(msg)) if msg.contains("too large")));
    }

    #[test]
    fn test_order_item_rejects_zero_quantity() {
        let result = OrderItem::new(OrderId::new(), "P", "Widget", 0, Money::from_cents(1000));
        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    #[test]
    fn test_stock_delta_inverse() {
        let delta = StockDelta::new("P", -2);
        assert_eq!(delta.inverse(), StockDelta::new("P", 2));
    }

    #[test]
    fn test_address_validation() {
        assert!(address().validate().is_ok());

        let mut missing_city = address();
        missing_city.city = "  ".to_string();
        assert!(missing_city.validate().is_err());
    }
}
