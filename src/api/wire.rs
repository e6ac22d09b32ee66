//! Request and response bodies exchanged with the storefront backend.
//!
//! Field names are camelCase and amounts are JSON numbers.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::aggregates::order::{CardDetails, GuestDetails, OrderDraft, PaymentMethod, ShippingAddress};
use crate::domain::value_objects::OrderId;
use crate::FieldError;

/// Common `{ success, data, message, errors }` wrapper.
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct Envelope<T> {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub data: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub errors: Vec<FieldError>,
}

// POST /checkout

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub is_guest: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guest_user_details: Option<GuestDetails>,
    pub order_data: OrderData,
    pub payment_data: PaymentData,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderData {
    pub items: Vec<OrderItem>,
    pub shipping_address: ShippingAddress,
    #[serde(with = "rust_decimal::serde::float")]
    pub subtotal: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub tax: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub shipping_cost: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub discount: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_amount: Decimal,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon_code: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: String,
    pub name: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    pub quantity: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentData {
    pub method: PaymentMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<CardDetails>,
}

impl From<&OrderDraft> for CreateOrderRequest {
    fn from(draft: &OrderDraft) -> Self {
        let summary = draft.summary();
        let items = draft
            .items()
            .iter()
            .map(|i| OrderItem {
                product_id: i.product_id.clone(),
                name: i.name.clone(),
                price: i.unit_price.amount(),
                quantity: i.quantity.value(),
                image: i.image_ref.clone(),
            })
            .collect();
        Self {
            is_guest: draft.is_guest(),
            guest_user_details: draft.guest().cloned(),
            order_data: OrderData {
                items,
                shipping_address: draft.shipping_address().clone(),
                subtotal: summary.subtotal.amount(),
                tax: summary.tax.amount(),
                shipping_cost: summary.shipping.amount(),
                discount: summary.discount.amount(),
                total_amount: summary.total.amount(),
                currency: summary.total.currency().to_string(),
                coupon_code: draft.coupon_code().map(str::to_string),
            },
            payment_data: PaymentData { method: draft.method(), details: draft.payment().card().cloned() },
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedOrder {
    #[serde(alias = "_id")]
    pub order_id: OrderId,
    #[serde(default)]
    pub payment_status: Option<PaymentStatus>,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

// POST /payments/initiate

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiatePaymentRequest {
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
    pub order_data: InitiateOrderData,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateOrderData {
    pub order_id: OrderId,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,
}

impl InitiatePaymentRequest {
    pub fn for_order(order_id: &OrderId, draft: &OrderDraft) -> Self {
        let address = draft.shipping_address();
        Self {
            amount: draft.summary().total.amount(),
            payment_method: draft.method(),
            order_data: InitiateOrderData {
                order_id: order_id.clone(),
                customer_name: address.full_name(),
                customer_email: address.email.clone(),
                customer_phone: address.phone.clone(),
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInitiation {
    pub payment_url: String,
    #[serde(default)]
    pub form_data: BTreeMap<String, serde_json::Value>,
}

// POST /payments/verify

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentRequest {
    pub method: PaymentMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<OrderId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pidx: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedPayment {
    pub order_id: OrderId,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub transaction_id: Option<String>,
}

// POST /payments/:orderId/retry

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPaymentRequest {
    pub payment_method: PaymentMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<CardDetails>,
}

// POST /coupons/apply

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyCouponRequest {
    pub code: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub subtotal: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponGrant {
    pub code: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub discount: Decimal,
}
