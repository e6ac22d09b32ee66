//! Checkout events
//!
//! Raised by the checkout session and published to subscribers (log sink,
//! NATS forwarder). Nothing in here carries card data.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::aggregates::Step;
use crate::domain::aggregates::order::PaymentMethod;
use crate::domain::value_objects::OrderId;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CheckoutEvent {
    /// Absent for events raised after the session is gone, e.g. on the gateway return route.
    pub session_id: Option<Uuid>,
    pub occurred_at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: CheckoutEventKind,
}

impl CheckoutEvent {
    pub fn for_session(session_id: Uuid, kind: CheckoutEventKind) -> Self {
        Self { session_id: Some(session_id), occurred_at: Utc::now(), kind }
    }

    pub fn detached(kind: CheckoutEventKind) -> Self {
        Self { session_id: None, occurred_at: Utc::now(), kind }
    }

    pub fn subject_suffix(&self) -> &'static str {
        match self.kind {
            CheckoutEventKind::Started { .. } => "started",
            CheckoutEventKind::StepChanged { .. } => "step_changed",
            CheckoutEventKind::CouponApplied { .. } => "coupon_applied",
            CheckoutEventKind::OrderCreated { .. } => "order_created",
            CheckoutEventKind::OrderConfirmed { .. } => "order_confirmed",
            CheckoutEventKind::PaymentHandedOff { .. } => "payment_handed_off",
            CheckoutEventKind::PaymentFailed { .. } => "payment_failed",
            CheckoutEventKind::SubmissionFailed { .. } => "submission_failed",
            CheckoutEventKind::PaymentVerified { .. } => "payment_verified",
            CheckoutEventKind::VerificationFailed { .. } => "verification_failed",
            CheckoutEventKind::Cancelled => "cancelled",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckoutEventKind {
    Started { items: usize },
    StepChanged { from: Step, to: Step },
    CouponApplied { code: String },
    OrderCreated { order_id: OrderId, method: PaymentMethod },
    OrderConfirmed { order_id: OrderId, method: PaymentMethod },
    PaymentHandedOff { order_id: OrderId, method: PaymentMethod, payment_url: String },
    PaymentFailed { order_id: Option<OrderId>, message: String },
    SubmissionFailed { message: String },
    PaymentVerified { order_id: OrderId, transaction_id: Option<String> },
    VerificationFailed { order_id: Option<OrderId>, message: String },
    Cancelled,
}
