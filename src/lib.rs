//! OpenSASE Checkout
//!
//! Storefront checkout orchestration: turns a cart snapshot into a confirmed,
//! paid order across card, cash-on-delivery and redirect-based wallet
//! payments (eSewa, Khalti).
//!
//! ## Features
//! - Multi-step checkout session (cart review, shipping, payment, confirmation)
//! - Order summary projection from backend-quoted charges
//! - Order submission with idempotency keys and in-flight guarding
//! - Redirect hand-off to external payment pages and return verification
//! - Checkout events for notification subscribers

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod api;
pub mod checkout;
pub mod config;
pub mod domain;
pub mod notify;
pub mod pages;
pub mod server;

pub use api::CustomerContext;
pub use checkout::{CheckoutOrchestrator, PaymentVerifier, SubmitOutcome};
pub use domain::aggregates::Step;

// =============================================================================
// Error Types
// =============================================================================

/// A form field that blocked a step or a submission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self { field: field.into(), message: message.into() }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CheckoutError {
    #[error("Validation failed for {}", field_list(.fields))]
    Validation { fields: Vec<FieldError> },

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Order creation failed: {cause}")]
    OrderCreation { cause: String },

    #[error("Payment failed: {cause}")]
    Payment { cause: String },

    #[error("Payment could not be verified: {cause}")]
    VerificationFailure { cause: String },

    #[error("Network error: {0}")]
    Transport(String),

    #[error("An order submission is already in progress")]
    SubmissionInFlight,

    #[error("Cannot {action} from {from:?}")]
    InvalidTransition { from: Step, action: &'static str },

    #[error("No checkout session")]
    NoSession,

    #[error("Checkout session is complete")]
    SessionClosed,

    #[error("Checkout session was replaced before the result arrived")]
    Superseded,
}

fn field_list(fields: &[FieldError]) -> String {
    fields.iter().map(|f| f.field.as_str()).collect::<Vec<_>>().join(", ")
}

impl CheckoutError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation { fields: vec![FieldError::new(field, message)] }
    }

    /// Text suitable for a toast or inline banner. Raw backend shapes never leak through.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation { fields } => match fields.as_slice() {
                [only] => only.message.clone(),
                _ => "Please correct the highlighted fields".to_string(),
            },
            Self::EmptyCart => "Your cart is empty".to_string(),
            Self::OrderCreation { cause } => format!("We couldn't place your order. {cause}"),
            Self::Payment { cause } => format!("Payment failed. {cause}"),
            Self::VerificationFailure { .. } => "We couldn't confirm your payment. Please return to your cart and try again.".to_string(),
            Self::Transport(_) => "Network error. Please check your connection and try again.".to_string(),
            Self::SubmissionInFlight => "Your order is being placed, please wait".to_string(),
            Self::InvalidTransition { .. } => "That step isn't available right now".to_string(),
            Self::NoSession | Self::SessionClosed | Self::Superseded => "Your checkout session has ended. Please start again from your cart.".to_string(),
        }
    }

    /// Field-level messages, when the failure has any.
    pub fn fields(&self) -> &[FieldError] {
        match self { Self::Validation { fields } => fields, _ => &[] }
    }

    /// Whether the same session can try again without re-entering shipping details.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Validation { .. } | Self::OrderCreation { .. } | Self::Payment { .. } | Self::Transport(_) | Self::SubmissionInFlight)
    }
}

pub type Result<T> = std::result::Result<T, CheckoutError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_field_message_preferred() {
        let err = CheckoutError::validation("email", "Enter a valid email address");
        assert_eq!(err.user_message(), "Enter a valid email address");
        assert_eq!(err.to_string(), "Validation failed for email");
    }

    #[test]
    fn test_transport_cause_hidden_from_user() {
        let err = CheckoutError::Transport("error sending request for url (http://10.0.0.4/checkout)".into());
        assert!(!err.user_message().contains("10.0.0.4"));
        assert!(err.is_retryable());
        assert!(!CheckoutError::SessionClosed.is_retryable());
    }
}
