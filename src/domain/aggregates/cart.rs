//! Cart Snapshot
//!
//! Frozen, read-only copy of the shopper's cart taken when checkout starts.
//! The durable cart stays the source of truth; a fresh snapshot is taken per
//! checkout session.

use serde::{Deserialize, Serialize};
use crate::domain::value_objects::{Money, MoneyError, Quantity};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLineItem {
    pub product_id: String,
    pub name: String,
    pub unit_price: Money,
    pub quantity: Quantity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
}

impl CartLineItem {
    pub fn new(product_id: impl Into<String>, name: impl Into<String>, unit_price: Money, quantity: Quantity) -> Result<Self, CartError> {
        if unit_price.is_negative() { return Err(CartError::NegativePrice); }
        Ok(Self { product_id: product_id.into(), name: name.into(), unit_price, quantity, image_ref: None })
    }

    pub fn with_image(mut self, image_ref: impl Into<String>) -> Self {
        self.image_ref = Some(image_ref.into());
        self
    }

    pub fn line_total(&self) -> Result<Money, MoneyError> { self.unit_price.multiply(self.quantity.value()) }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CartSnapshot {
    items: Vec<CartLineItem>,
    currency: String,
}

impl CartSnapshot {
    /// Takes a snapshot of `items`. All lines must share one currency.
    pub fn new(items: Vec<CartLineItem>) -> Result<Self, CartError> {
        let first = items.first().ok_or(CartError::Empty)?;
        let currency = first.unit_price.currency().to_string();
        for item in &items {
            if item.unit_price.is_negative() { return Err(CartError::NegativePrice); }
            if item.unit_price.currency() != currency { return Err(CartError::MixedCurrency); }
        }
        Ok(Self { items, currency })
    }

    pub fn items(&self) -> &[CartLineItem] { &self.items }
    pub fn currency(&self) -> &str { &self.currency }
    pub fn item_count(&self) -> usize { self.items.len() }

    pub fn subtotal(&self) -> Result<Money, MoneyError> {
        self.items.iter().try_fold(Money::zero(&self.currency), |acc, i| acc.add(&i.line_total()?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum CartError { Empty, NegativePrice, MixedCurrency }
impl std::error::Error for CartError {}
impl std::fmt::Display for CartError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "Cart is empty"),
            Self::NegativePrice => write!(f, "Unit price cannot be negative"),
            Self::MixedCurrency => write!(f, "Cart lines use different currencies"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn line(id: &str, price: i64, qty: u32) -> CartLineItem {
        CartLineItem::new(id, "Oud Wood", Money::npr(Decimal::new(price, 0)), Quantity::new(qty).unwrap()).unwrap()
    }

    #[test]
    fn test_snapshot_subtotal() {
        let cart = CartSnapshot::new(vec![line("P1", 1200, 2), line("P2", 850, 1)]).unwrap();
        assert_eq!(cart.item_count(), 2);
        assert_eq!(cart.subtotal().unwrap().amount(), Decimal::new(3250, 0));
    }

    #[test]
    fn test_empty_snapshot_rejected() {
        assert_eq!(CartSnapshot::new(vec![]), Err(CartError::Empty));
    }

    #[test]
    fn test_negative_price_rejected() {
        let result = CartLineItem::new("P1", "Musk", Money::npr(Decimal::new(-1, 0)), Quantity::new(1).unwrap());
        assert_eq!(result, Err(CartError::NegativePrice));
    }

    #[test]
    fn test_mixed_currency_rejected() {
        let usd = CartLineItem::new("P2", "Amber", Money::new(Decimal::ONE, "USD"), Quantity::new(1).unwrap()).unwrap();
        assert_eq!(CartSnapshot::new(vec![line("P1", 10, 1), usd]), Err(CartError::MixedCurrency));
    }
}
