//! Order Draft
//!
//! Shipping form state, payment selection, and the fully assembled draft that
//! is turned into an order-creation request. A draft is built fresh for every
//! submission attempt and never mutated afterwards.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use validator::Validate;
use zeroize::Zeroize;

use crate::domain::aggregates::cart::{CartLineItem, CartSnapshot};
use crate::domain::summary::OrderSummary;
use crate::FieldError;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ShippingAddress {
    #[validate(length(min = 1, message = "First name is required"))]
    pub first_name: String,
    #[validate(length(min = 1, message = "Last name is required"))]
    pub last_name: String,
    #[validate(email(message = "Enter a valid email address"))]
    pub email: String,
    #[validate(length(min = 1, message = "Phone number is required"))]
    pub phone: String,
    #[validate(length(min = 1, message = "Street address is required"))]
    pub street: String,
    #[validate(length(min = 1, message = "City is required"))]
    pub city: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[validate(length(min = 1, message = "Country is required"))]
    pub country: String,
    #[validate(length(min = 1, message = "Postal code is required"))]
    pub postal_code: String,
}

const ADDRESS_FIELDS: [&str; 9] = ["first_name", "last_name", "email", "phone", "street", "city", "state", "country", "postal_code"];

impl ShippingAddress {
    /// Returns every offending field, in form order. Empty when the address is complete.
    pub fn field_errors(&self) -> Vec<FieldError> {
        let Err(errors) = self.validate() else { return Vec::new() };
        let mut fields: Vec<FieldError> = errors
            .field_errors()
            .into_iter()
            .filter_map(|(field, errs)| {
                let message = errs.first()?.message.as_ref().map(|m| m.to_string()).unwrap_or_else(|| format!("{field} is invalid"));
                Some(FieldError::new(camel_case(field), message))
            })
            .collect();
        fields.sort_by_key(|f| ADDRESS_FIELDS.iter().position(|name| camel_case(name) == f.field).unwrap_or(usize::MAX));
        fields
    }

    /// Merges the provided fields. Values are trimmed; an empty `state` clears it.
    pub fn merge(&mut self, update: ShippingUpdate) {
        fn set(slot: &mut String, value: Option<String>) {
            if let Some(v) = value { *slot = v.trim().to_string(); }
        }
        set(&mut self.first_name, update.first_name);
        set(&mut self.last_name, update.last_name);
        set(&mut self.email, update.email);
        set(&mut self.phone, update.phone);
        set(&mut self.street, update.street);
        set(&mut self.city, update.city);
        set(&mut self.country, update.country);
        set(&mut self.postal_code, update.postal_code);
        if let Some(state) = update.state {
            let state = state.trim();
            self.state = (!state.is_empty()).then(|| state.to_string());
        }
    }

    pub fn full_name(&self) -> String { format!("{} {}", self.first_name, self.last_name) }
}

/// Partial shipping form input. Absent fields are left untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub postal_code: Option<String>,
}

fn camel_case(snake: &str) -> String {
    let mut out = String::with_capacity(snake.len());
    let mut upper = false;
    for c in snake.chars() {
        if c == '_' { upper = true; continue; }
        if upper { out.extend(c.to_uppercase()); upper = false; } else { out.push(c); }
    }
    out
}

/// Raw card form fields. Wiped from memory on drop.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardDetails {
    pub card_number: String,
    pub expiry_month: String,
    pub expiry_year: String,
    pub cvv: String,
}

impl CardDetails {
    pub fn is_blank(&self) -> bool {
        self.card_number.is_empty() && self.expiry_month.is_empty() && self.expiry_year.is_empty() && self.cvv.is_empty()
    }

    pub fn last4(&self) -> &str {
        let n = self.card_number.len();
        self.card_number.get(n.saturating_sub(4)..).unwrap_or_default()
    }

    pub fn field_errors(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        let digits = |s: &str, min: usize, max: usize| (min..=max).contains(&s.len()) && s.chars().all(|c| c.is_ascii_digit());
        if !digits(&self.card_number, 12, 19) {
            errors.push(FieldError::new("cardNumber", "Enter a valid card number"));
        }
        if !self.expiry_month.parse::<u8>().is_ok_and(|m| (1..=12).contains(&m)) {
            errors.push(FieldError::new("expiryMonth", "Enter a valid expiry month"));
        }
        if !digits(&self.expiry_year, 2, 4) {
            errors.push(FieldError::new("expiryYear", "Enter a valid expiry year"));
        }
        if !digits(&self.cvv, 3, 4) {
            errors.push(FieldError::new("cvv", "Enter a valid CVV"));
        }
        errors
    }
}

impl fmt::Debug for CardDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CardDetails(**** {})", self.last4())
    }
}

impl Drop for CardDetails {
    fn drop(&mut self) {
        self.card_number.zeroize();
        self.expiry_month.zeroize();
        self.expiry_year.zeroize();
        self.cvv.zeroize();
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod { CreditCard, Esewa, Khalti, CashOnDelivery }

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreditCard => "credit_card",
            Self::Esewa => "esewa",
            Self::Khalti => "khalti",
            Self::CashOnDelivery => "cash_on_delivery",
        }
    }

    /// Gateways that take the shopper to an external payment page.
    pub fn is_redirect(&self) -> bool { matches!(self, Self::Esewa | Self::Khalti) }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for PaymentMethod {
    type Err = UnknownPaymentMethod;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "credit_card" | "card" => Ok(Self::CreditCard),
            "esewa" => Ok(Self::Esewa),
            "khalti" => Ok(Self::Khalti),
            "cash_on_delivery" | "cod" => Ok(Self::CashOnDelivery),
            other => Err(UnknownPaymentMethod(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub struct UnknownPaymentMethod(pub String);
impl std::error::Error for UnknownPaymentMethod {}
impl fmt::Display for UnknownPaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "Unknown payment method: {}", self.0) }
}

/// The active payment choice. Only `CreditCard` carries data.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "method", content = "details", rename_all = "snake_case")]
pub enum PaymentSelection { CreditCard(CardDetails), Esewa, Khalti, CashOnDelivery }

impl PaymentSelection {
    pub fn for_method(method: PaymentMethod) -> Self {
        match method {
            PaymentMethod::CreditCard => Self::CreditCard(CardDetails::default()),
            PaymentMethod::Esewa => Self::Esewa,
            PaymentMethod::Khalti => Self::Khalti,
            PaymentMethod::CashOnDelivery => Self::CashOnDelivery,
        }
    }

    pub fn method(&self) -> PaymentMethod {
        match self {
            Self::CreditCard(_) => PaymentMethod::CreditCard,
            Self::Esewa => PaymentMethod::Esewa,
            Self::Khalti => PaymentMethod::Khalti,
            Self::CashOnDelivery => PaymentMethod::CashOnDelivery,
        }
    }

    pub fn card(&self) -> Option<&CardDetails> {
        match self { Self::CreditCard(card) => Some(card), _ => None }
    }

    pub fn field_errors(&self) -> Vec<FieldError> {
        self.card().map(CardDetails::field_errors).unwrap_or_default()
    }
}

impl Default for PaymentSelection { fn default() -> Self { Self::CashOnDelivery } }

/// Contact details sent for shoppers without an account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestDetails {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
}

impl From<&ShippingAddress> for GuestDetails {
    fn from(a: &ShippingAddress) -> Self {
        Self { first_name: a.first_name.clone(), last_name: a.last_name.clone(), email: a.email.clone(), phone: a.phone.clone() }
    }
}

#[derive(Debug)]
pub struct OrderDraft {
    items: Vec<CartLineItem>,
    shipping_address: ShippingAddress,
    summary: OrderSummary,
    payment: PaymentSelection,
    coupon_code: Option<String>,
    guest: Option<GuestDetails>,
}

impl OrderDraft {
    /// Lists everything that blocks submission. Nothing here touches the network.
    pub fn check(cart: &CartSnapshot, shipping_address: &ShippingAddress, summary: &OrderSummary, payment: &PaymentSelection) -> Vec<FieldError> {
        let mut errors = Vec::new();
        if cart.items().is_empty() {
            errors.push(FieldError::new("items", "Your cart is empty"));
        }
        errors.extend(shipping_address.field_errors());
        errors.extend(payment.field_errors());
        if !cart.subtotal().is_ok_and(|subtotal| subtotal.rounded() == summary.subtotal) {
            errors.push(FieldError::new("subtotal", "Order subtotal does not match the cart"));
        }
        if !summary.is_consistent() {
            errors.push(FieldError::new("totalAmount", "Order total does not add up"));
        }
        errors
    }

    /// Assembles a draft, failing with the same fields [`OrderDraft::check`] reports.
    pub fn assemble(
        cart: &CartSnapshot,
        shipping_address: ShippingAddress,
        summary: OrderSummary,
        payment: PaymentSelection,
        coupon_code: Option<String>,
        is_guest: bool,
    ) -> Result<Self, Vec<FieldError>> {
        let errors = Self::check(cart, &shipping_address, &summary, &payment);
        if !errors.is_empty() { return Err(errors); }

        let guest = is_guest.then(|| GuestDetails::from(&shipping_address));
        Ok(Self { items: cart.items().to_vec(), shipping_address, summary, payment, coupon_code, guest })
    }

    pub fn items(&self) -> &[CartLineItem] { &self.items }
    pub fn shipping_address(&self) -> &ShippingAddress { &self.shipping_address }
    pub fn summary(&self) -> &OrderSummary { &self.summary }
    pub fn payment(&self) -> &PaymentSelection { &self.payment }
    pub fn method(&self) -> PaymentMethod { self.payment.method() }
    pub fn coupon_code(&self) -> Option<&str> { self.coupon_code.as_deref() }
    pub fn is_guest(&self) -> bool { self.guest.is_some() }
    pub fn guest(&self) -> Option<&GuestDetails> { self.guest.as_ref() }
}
