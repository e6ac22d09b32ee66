//! Storefront backend API.
//!
//! [`CheckoutApi`] is the seam the orchestrator and verifier talk through;
//! [`HttpCheckoutApi`] is the reqwest implementation.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::domain::value_objects::{IdempotencyKey, OrderId};

mod errors;
mod http;
pub mod wire;

pub use errors::ApiError;
pub use http::HttpCheckoutApi;
use wire::{
    ApplyCouponRequest, CouponGrant, CreateOrderRequest, CreatedOrder, InitiatePaymentRequest, PaymentInitiation,
    RetryPaymentRequest, VerifiedPayment, VerifyPaymentRequest,
};

/// Who is checking out. Injected per session; nothing reads a global auth store.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum CustomerContext {
    #[default]
    Guest,
    Authenticated { token: String },
}

impl CustomerContext {
    pub fn from_bearer(token: Option<String>) -> Self {
        match token {
            Some(token) if !token.is_empty() => Self::Authenticated { token },
            _ => Self::Guest,
        }
    }

    pub fn is_guest(&self) -> bool { matches!(self, Self::Guest) }

    pub fn bearer(&self) -> Option<&str> {
        match self { Self::Authenticated { token } => Some(token), Self::Guest => None }
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait CheckoutApi: Send + Sync {
    /// `POST /checkout`
    async fn create_order(&self, customer: &CustomerContext, key: IdempotencyKey, request: &CreateOrderRequest) -> Result<CreatedOrder, ApiError>;

    /// `POST /payments/initiate`
    async fn initiate_payment(&self, customer: &CustomerContext, request: &InitiatePaymentRequest) -> Result<PaymentInitiation, ApiError>;

    /// `POST /payments/verify`
    async fn verify_payment(&self, request: &VerifyPaymentRequest) -> Result<VerifiedPayment, ApiError>;

    /// `POST /payments/:orderId/retry`
    async fn retry_payment(&self, customer: &CustomerContext, order_id: &OrderId, request: &RetryPaymentRequest) -> Result<CreatedOrder, ApiError>;

    /// `POST /coupons/apply`
    async fn apply_coupon(&self, customer: &CustomerContext, request: &ApplyCouponRequest) -> Result<CouponGrant, ApiError>;
}
