//! Notification subscribers.
//!
//! The checkout core only publishes [`CheckoutEvent`]s. What the shopper
//! sees as a toast, what lands in the logs and what goes out on NATS is
//! decided here.

use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::events::{CheckoutEvent, CheckoutEventKind};

pub const NATS_SUBJECT: &str = "checkout.events";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel { Success, Info, Error }

/// A toast-sized message for the shopper.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
}

impl Notice {
    fn new(level: NoticeLevel, text: impl Into<String>) -> Self { Self { level, text: text.into() } }
}

/// Events that warrant a toast. Navigation and bookkeeping events do not.
pub fn notice_for(event: &CheckoutEvent) -> Option<Notice> {
    match &event.kind {
        CheckoutEventKind::OrderConfirmed { .. } => Some(Notice::new(NoticeLevel::Success, "Order placed successfully!")),
        CheckoutEventKind::CouponApplied { code } => Some(Notice::new(NoticeLevel::Success, format!("Coupon {code} applied"))),
        CheckoutEventKind::PaymentHandedOff { .. } => Some(Notice::new(NoticeLevel::Info, "Redirecting to payment gateway...")),
        CheckoutEventKind::PaymentVerified { .. } => Some(Notice::new(NoticeLevel::Success, "Payment verified successfully!")),
        CheckoutEventKind::PaymentFailed { message, .. }
        | CheckoutEventKind::SubmissionFailed { message }
        | CheckoutEventKind::VerificationFailed { message, .. } => Some(Notice::new(NoticeLevel::Error, message.clone())),
        CheckoutEventKind::Started { .. }
        | CheckoutEventKind::StepChanged { .. }
        | CheckoutEventKind::OrderCreated { .. }
        | CheckoutEventKind::Cancelled => None,
    }
}

/// Writes every event to the log, with the shopper-facing notice when there is one.
pub fn spawn_log_subscriber(mut events: broadcast::Receiver<CheckoutEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "log subscriber fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn log_event(event: &CheckoutEvent) {
    let session_id = event.session_id.map(|id| id.to_string()).unwrap_or_default();
    match notice_for(event) {
        Some(Notice { level: NoticeLevel::Error, text }) => warn!(%session_id, kind = event.subject_suffix(), notice = %text, "checkout event"),
        Some(Notice { text, .. }) => info!(%session_id, kind = event.subject_suffix(), notice = %text, "checkout event"),
        None => debug!(%session_id, kind = event.subject_suffix(), "checkout event"),
    }
}

/// Forwards events to `checkout.events.<kind>`. Publish failures are logged and skipped.
pub fn spawn_nats_forwarder(client: async_nats::Client, mut events: broadcast::Receiver<CheckoutEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "nats forwarder fell behind");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            let payload = match serde_json::to_vec(&event) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(error = %e, "failed to encode checkout event");
                    continue;
                }
            };
            let subject = format!("{}.{}", NATS_SUBJECT, event.subject_suffix());
            if let Err(e) = client.publish(subject, payload.into()).await {
                warn!(error = %e, "failed to publish checkout event");
            }
        }
    })
}
