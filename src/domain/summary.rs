//! Order summary projection.
//!
//! Shipping and tax are quoted by a collaborator and a discount only exists
//! once the backend accepted a coupon, so `project` never invents amounts.

use serde::{Deserialize, Serialize};

use crate::domain::aggregates::cart::CartLineItem;
use crate::domain::value_objects::{Money, MoneyError};

/// Shipping and tax amounts supplied by the storefront's pricing policy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeQuote {
    pub shipping: Money,
    pub tax: Money,
}

impl ChargeQuote {
    pub fn flat(shipping: Money, tax: Money) -> Self { Self { shipping, tax } }
    pub fn free(currency: &str) -> Self { Self::flat(Money::zero(currency), Money::zero(currency)) }
}

/// A coupon the backend has accepted, with the discount it granted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptedCoupon {
    pub code: String,
    pub discount: Money,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSummary {
    pub subtotal: Money,
    pub shipping: Money,
    pub tax: Money,
    pub discount: Money,
    pub total: Money,
}

impl OrderSummary {
    /// `total == subtotal + shipping + tax - discount`, no rounding slack.
    pub fn is_consistent(&self) -> bool {
        self.subtotal
            .add(&self.shipping)
            .and_then(|m| m.add(&self.tax))
            .and_then(|m| m.subtract(&self.discount))
            .is_ok_and(|expected| expected == self.total)
    }
}

/// Derives the checkout totals. Pure; identical input gives identical output.
///
/// Each component is rounded to minor units before summing, and the discount
/// is capped at the subtotal.
pub fn project(items: &[CartLineItem], quote: &ChargeQuote, coupon: Option<&AcceptedCoupon>) -> Result<OrderSummary, MoneyError> {
    let currency = items.first().map(|i| i.unit_price.currency()).unwrap_or_else(|| quote.shipping.currency());
    let subtotal = items
        .iter()
        .try_fold(Money::zero(currency), |acc, i| acc.add(&i.line_total()?))?
        .rounded();
    let shipping = quote.shipping.rounded();
    let tax = quote.tax.rounded();
    let discount = match coupon {
        Some(c) => c.discount.rounded().min(&subtotal)?,
        None => Money::zero(currency),
    };
    let total = subtotal.add(&shipping)?.add(&tax)?.subtract(&discount)?;
    Ok(OrderSummary { subtotal, shipping, tax, discount, total })
}
