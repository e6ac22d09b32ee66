//! Payment verification on return from a redirect-based gateway.
//!
//! One backend call per return, never retried: asking a gateway twice can
//! have side effects. Failures come back as a result with `success: false`
//! and the shopper is pointed back to the cart.

use parking_lot::Mutex;
use reqwest::Url;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};

use crate::api::wire::VerifyPaymentRequest;
use crate::api::{ApiError, CheckoutApi};
use crate::domain::aggregates::order::PaymentMethod;
use crate::domain::events::{CheckoutEvent, CheckoutEventKind};
use crate::domain::value_objects::OrderId;
use crate::pages::{self, PageError};
use crate::CheckoutError;

/// Backend payment statuses that count as settled. Compared case-insensitively.
const SETTLED_STATUSES: [&str; 4] = ["paid", "completed", "complete", "success"];

/// Query parameters the gateway (or our own return url) carried back.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReturnParams {
    pub method: Option<PaymentMethod>,
    pub order_id: Option<OrderId>,
    /// Khalti payment identifier.
    pub pidx: Option<String>,
    /// eSewa's base64 response payload.
    pub data: Option<String>,
    pub status: Option<String>,
}

impl ReturnParams {
    pub fn new(method: PaymentMethod) -> Self {
        Self { method: Some(method), ..Default::default() }
    }

    pub fn from_url(method: PaymentMethod, url: &Url) -> Self {
        Self::from_pairs(method, url.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())))
    }

    pub fn from_pairs(method: PaymentMethod, pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut params = Self::new(method);
        let mut purchase_order_id = None;
        for (key, value) in pairs {
            if value.is_empty() { continue; }
            match key.as_str() {
                "orderId" => params.order_id = Some(OrderId::new(value)),
                "purchase_order_id" => purchase_order_id = Some(OrderId::new(value)),
                "pidx" => params.pidx = Some(value),
                "data" => params.data = Some(value),
                "status" => params.status = Some(value),
                _ => {}
            }
        }
        params.order_id = params.order_id.or(purchase_order_id);
        params
    }

    /// The gateway's proof of payment, if the return carried one.
    pub fn provider_token(&self) -> Option<&str> {
        match self.method? {
            PaymentMethod::Khalti => self.pidx.as_deref(),
            PaymentMethod::Esewa => self.data.as_deref(),
            PaymentMethod::CreditCard | PaymentMethod::CashOnDelivery => None,
        }
    }

    fn request(&self, method: PaymentMethod) -> VerifyPaymentRequest {
        VerifyPaymentRequest {
            method,
            order_id: self.order_id.clone(),
            pidx: self.pidx.clone(),
            data: self.data.clone(),
            status: self.status.clone(),
        }
    }
}

/// Outcome of one verification. Produced per return, never stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentVerificationResult {
    pub success: bool,
    pub order_id: Option<OrderId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl PaymentVerificationResult {
    fn failed(order_id: Option<OrderId>, error: &CheckoutError) -> Self {
        Self { success: false, order_id, transaction_id: None, message: Some(error.user_message()) }
    }
}

/// Where to send the shopper after a successful verification, and how long to show the success view first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfirmationRedirect {
    pub location: String,
    pub delay: Duration,
}

impl ConfirmationRedirect {
    pub fn for_order(order_id: &OrderId, delay: Duration) -> Self {
        Self { location: format!("/orders/{order_id}"), delay }
    }

    /// Whole seconds for the refresh header, rounded up so a sub-second delay still shows the page.
    pub fn delay_secs(&self) -> u64 {
        let millis = self.delay.as_millis();
        u64::try_from(millis.div_ceil(1000)).unwrap_or(u64::MAX)
    }

    /// Success page that moves on by itself; the delay lives in the browser, not in a task.
    pub fn refresh_page(&self) -> Result<String, PageError> {
        pages::render(
            pages::PAYMENT_CONFIRMED,
            minijinja::context! { location => &self.location, delay_secs => self.delay_secs() },
        )
    }
}

type VerificationKey = (PaymentMethod, String);

// Held for the duration of one backend verification call.
struct Verifying<'a> {
    set: &'a Mutex<HashSet<VerificationKey>>,
    key: VerificationKey,
}

impl<'a> Verifying<'a> {
    fn acquire(set: &'a Mutex<HashSet<VerificationKey>>, key: VerificationKey) -> Option<Self> {
        if !set.lock().insert(key.clone()) { return None; }
        Some(Self { set, key })
    }
}

impl Drop for Verifying<'_> {
    fn drop(&mut self) { self.set.lock().remove(&self.key); }
}

pub struct PaymentVerifier {
    api: Arc<dyn CheckoutApi>,
    events: Option<broadcast::Sender<CheckoutEvent>>,
    confirmation_delay: Duration,
    in_flight: Mutex<HashSet<VerificationKey>>,
}

impl PaymentVerifier {
    pub fn new(api: Arc<dyn CheckoutApi>, confirmation_delay: Duration) -> Self {
        Self { api, events: None, confirmation_delay, in_flight: Mutex::default() }
    }

    pub fn with_events(mut self, events: broadcast::Sender<CheckoutEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Confirms a redirect payment with exactly one backend call.
    ///
    /// A return without a provider token fails without calling the backend, as
    /// does a second return for a token whose verification is still running.
    /// Success needs a settled status and, when the return named an order, the
    /// same order back from the backend.
    #[instrument(skip_all, fields(method = ?params.method, order_id = ?params.order_id))]
    pub async fn verify(&self, params: &ReturnParams) -> PaymentVerificationResult {
        let method = match params.method {
            Some(method) if method.is_redirect() => method,
            _ => {
                let error = CheckoutError::VerificationFailure { cause: "not a redirect payment".to_string() };
                return self.fail(params.order_id.clone(), error);
            }
        };
        let Some(token) = params.provider_token() else {
            let error = CheckoutError::VerificationFailure { cause: "payment reference missing from return".to_string() };
            return self.fail(params.order_id.clone(), error);
        };
        let Some(_verifying) = Verifying::acquire(&self.in_flight, (method, token.to_string())) else {
            let error = CheckoutError::VerificationFailure { cause: "verification already in progress for this payment".to_string() };
            return self.fail(params.order_id.clone(), error);
        };

        match self.api.verify_payment(&params.request(method)).await {
            Ok(verified) if !is_settled(verified.status.as_deref()) => {
                let status = verified.status.unwrap_or_default();
                warn!(order_id = %verified.order_id, %status, "backend reported an unsettled payment");
                let error = CheckoutError::VerificationFailure { cause: format!("payment status is {status}") };
                self.fail(Some(verified.order_id), error)
            }
            Ok(verified) if params.order_id.as_ref().is_some_and(|expected| *expected != verified.order_id) => {
                warn!(returned = ?params.order_id, verified = %verified.order_id, "verified payment belongs to another order");
                let error = CheckoutError::VerificationFailure { cause: "payment does not match this order".to_string() };
                self.fail(params.order_id.clone(), error)
            }
            Ok(verified) => {
                info!(order_id = %verified.order_id, "payment verified");
                self.publish(CheckoutEventKind::PaymentVerified { order_id: verified.order_id.clone(), transaction_id: verified.transaction_id.clone() });
                PaymentVerificationResult { success: true, order_id: Some(verified.order_id), transaction_id: verified.transaction_id, message: None }
            }
            Err(e) => {
                let cause = match &e {
                    ApiError::Transport(_) => "gateway unreachable".to_string(),
                    other => other.public_message().unwrap_or("payment not confirmed").to_string(),
                };
                warn!(error = %e, "payment verification failed");
                self.fail(params.order_id.clone(), CheckoutError::VerificationFailure { cause })
            }
        }
    }

    pub fn confirmation_redirect(&self, result: &PaymentVerificationResult) -> Option<ConfirmationRedirect> {
        match (result.success, &result.order_id) {
            (true, Some(order_id)) => Some(ConfirmationRedirect::for_order(order_id, self.confirmation_delay)),
            _ => None,
        }
    }

    fn fail(&self, order_id: Option<OrderId>, error: CheckoutError) -> PaymentVerificationResult {
        warn!(%error, "verification did not succeed");
        self.publish(CheckoutEventKind::VerificationFailed { order_id: order_id.clone(), message: error.to_string() });
        PaymentVerificationResult::failed(order_id, &error)
    }

    fn publish(&self, kind: CheckoutEventKind) {
        if let Some(events) = &self.events {
            let _ = events.send(CheckoutEvent::detached(kind));
        }
    }
}

fn is_settled(status: Option<&str>) -> bool {
    status.map_or(true, |status| SETTLED_STATUSES.iter().any(|settled| status.eq_ignore_ascii_case(settled)))
}
