//! Checkout Orchestrator
//!
//! Owns one tab-local [`CheckoutSession`] and sequences order submission:
//! draft validation, order creation, then the payment branch for the selected
//! method. Results come back as [`SubmitOutcome`] or [`CheckoutError`];
//! notification is left to whoever subscribes to the event channel.
//!
//! The session lock is never held across a backend call. A submission takes
//! the in-flight flag for its whole duration, so a second submission while the
//! first is pending is refused without touching the network.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::api::wire::{ApplyCouponRequest, CreateOrderRequest, CreatedOrder, InitiatePaymentRequest, PaymentInitiation, PaymentStatus, RetryPaymentRequest};
use crate::api::{ApiError, CheckoutApi, CustomerContext};
use crate::checkout::handoff::PaymentHandoff;
use crate::domain::aggregates::order::{CardDetails, OrderDraft, PaymentMethod, PaymentSelection, ShippingAddress, ShippingUpdate};
use crate::domain::aggregates::{CartLineItem, CartSnapshot, CheckoutSession, Step};
use crate::domain::events::{CheckoutEvent, CheckoutEventKind};
use crate::domain::summary::{AcceptedCoupon, ChargeQuote, OrderSummary};
use crate::domain::value_objects::{IdempotencyKey, Money, OrderId};
use crate::{CheckoutError, Result};

/// How a successful submission ended.
#[derive(Debug)]
pub enum SubmitOutcome {
    /// Order placed and paid (or cash on delivery); the session is at `Confirmation`.
    Confirmed { order_id: OrderId },
    /// Control leaves the storefront. The session is gone once this is returned.
    Redirect(PaymentHandoff),
}

/// Read-only projection of the session for rendering.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub id: Uuid,
    pub step: Step,
    pub items: Vec<CartLineItem>,
    pub summary: OrderSummary,
    pub coupon_code: Option<String>,
    pub shipping: ShippingAddress,
    pub payment_method: PaymentMethod,
    pub order_id: Option<OrderId>,
    pub last_error: Option<String>,
    pub submitting: bool,
}

struct State {
    session: Option<CheckoutSession>,
    generation: u64,
}

pub struct CheckoutOrchestrator {
    api: Arc<dyn CheckoutApi>,
    customer: CustomerContext,
    events: broadcast::Sender<CheckoutEvent>,
    state: Mutex<State>,
    in_flight: AtomicBool,
}

impl std::fmt::Debug for CheckoutOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckoutOrchestrator")
            .field("customer_is_guest", &self.customer.is_guest())
            .field("submitting", &self.is_submitting())
            .finish_non_exhaustive()
    }
}

struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        if flag.swap(true, Ordering::AcqRel) { return Err(CheckoutError::SubmissionInFlight); }
        Ok(Self(flag))
    }
}

// Released on every exit path, including when the caller drops the future.
impl Drop for InFlight<'_> {
    fn drop(&mut self) { self.0.store(false, Ordering::Release); }
}

enum Settlement {
    Confirmed,
    Redirect(PaymentInitiation),
}

struct Attempt {
    order_id: Option<OrderId>,
    result: Result<Settlement>,
}

impl CheckoutOrchestrator {
    pub fn new(api: Arc<dyn CheckoutApi>, customer: CustomerContext, events: broadcast::Sender<CheckoutEvent>) -> Self {
        Self { api, customer, events, state: Mutex::new(State { session: None, generation: 0 }), in_flight: AtomicBool::new(false) }
    }

    pub fn customer(&self) -> &CustomerContext { &self.customer }
    pub fn is_submitting(&self) -> bool { self.in_flight.load(Ordering::Acquire) }
    pub fn subscribe(&self) -> broadcast::Receiver<CheckoutEvent> { self.events.subscribe() }

    /// Starts a fresh session at `CartReview`, replacing any previous one.
    #[instrument(skip_all, fields(items = items.len()))]
    pub fn initialize(&self, items: Vec<CartLineItem>, quote: ChargeQuote) -> Result<Uuid> {
        let cart = CartSnapshot::new(items).map_err(|e| match e {
            crate::domain::aggregates::CartError::Empty => CheckoutError::EmptyCart,
            other => CheckoutError::validation("items", other.to_string()),
        })?;
        let mut session = CheckoutSession::start(cart, quote)?;
        let id = session.id();
        let events = session.take_events();
        {
            let mut state = self.state.lock();
            state.generation += 1;
            state.session = Some(session);
        }
        self.publish(events);
        info!(session_id = %id, "checkout session started");
        Ok(id)
    }

    pub fn view(&self) -> Option<SessionView> {
        let state = self.state.lock();
        let s = state.session.as_ref()?;
        Some(SessionView {
            id: s.id(),
            step: s.step(),
            items: s.cart().items().to_vec(),
            summary: s.summary().clone(),
            coupon_code: s.coupon().map(|c| c.code.clone()),
            shipping: s.shipping().clone(),
            payment_method: s.payment().method(),
            order_id: s.order_id().cloned(),
            last_error: s.last_error().map(str::to_string),
            submitting: self.is_submitting(),
        })
    }

    pub fn update_shipping(&self, update: ShippingUpdate) -> Result<()> {
        self.with_session(|s| s.update_shipping(update))
    }

    /// Switching away from `CreditCard` discards the entered card.
    pub fn select_payment(&self, selection: PaymentSelection) -> Result<()> {
        self.with_session(|s| s.select_payment(selection))
    }

    pub fn select_method(&self, method: PaymentMethod) -> Result<()> {
        self.with_session(|s| s.select_method(method))
    }

    pub fn enter_card_details(&self, card: CardDetails) -> Result<()> {
        self.with_session(|s| s.enter_card_details(card))
    }

    pub fn advance(&self) -> Result<Step> {
        self.with_session(CheckoutSession::advance)
    }

    pub fn retreat(&self) -> Result<Step> {
        self.with_session(CheckoutSession::retreat)
    }

    /// Asks the backend to accept `code`; only an accepted coupon changes the totals.
    #[instrument(skip(self))]
    pub async fn apply_coupon(&self, code: &str) -> Result<OrderSummary> {
        let code = code.trim();
        if code.is_empty() { return Err(CheckoutError::validation("couponCode", "Enter a coupon code")); }
        let (generation, editable) = self.read_session(|s| s.check_draft_editable("apply coupon").map(|()| s.summary().subtotal.clone()))?;
        let subtotal = editable?;
        let request = ApplyCouponRequest { code: code.to_string(), subtotal: subtotal.amount() };

        let grant = self.api.apply_coupon(&self.customer, &request).await.map_err(|e| match e {
            ApiError::Rejected { fields, .. } if !fields.is_empty() => CheckoutError::Validation { fields },
            ApiError::Rejected { message, .. } => CheckoutError::validation("couponCode", if message.is_empty() { "This coupon is not valid".to_string() } else { message }),
            other => transport(other),
        })?;

        let coupon = AcceptedCoupon { code: grant.code, discount: Money::new(grant.discount, subtotal.currency()) };
        self.with_current_session(generation, |s| {
            s.apply_coupon(coupon)?;
            Ok(s.summary().clone())
        })
    }

    /// Submits the order for the current session.
    ///
    /// Fails locally with `Validation` before any network call. Order creation
    /// failures leave the session at `PaymentMethod`; if the backend already
    /// holds the order, a retry pays for that order instead of creating another.
    #[instrument(skip(self))]
    pub async fn submit_order(&self) -> Result<SubmitOutcome> {
        let _in_flight = InFlight::acquire(&self.in_flight)?;
        let is_guest = self.customer.is_guest();

        let prepared = {
            let mut state = self.state.lock();
            let generation = state.generation;
            let session = state.session.as_mut().ok_or(CheckoutError::NoSession)?;
            match session.prepare_submission(is_guest) {
                Ok(draft) => Ok((generation, draft, session.idempotency_key(), session.order_id().cloned())),
                Err(e) => Err(e),
            }
        };
        let (generation, draft, key, existing) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                debug!(error = %e, "submission blocked locally");
                return Err(e);
            }
        };

        let method = draft.method();
        info!(%method, retry = existing.is_some(), "submitting order");
        let attempt = self.attempt(&draft, key, existing).await;
        drop(draft);

        self.settle(generation, method, attempt)
    }

    /// Pays again for an order the backend already created.
    pub async fn retry_payment(&self) -> Result<SubmitOutcome> {
        let (_, (step, order_id)) = self.read_session(|s| (s.step(), s.order_id().cloned()))?;
        if order_id.is_none() {
            return Err(CheckoutError::InvalidTransition { from: step, action: "retry payment" });
        }
        self.submit_order().await
    }

    /// Drops the session. A submission still in flight will find it gone and discard its result.
    pub fn cancel(&self) -> Result<()> {
        let session = {
            let mut state = self.state.lock();
            state.generation += 1;
            state.session.take()
        };
        let mut session = session.ok_or(CheckoutError::NoSession)?;
        session.raise_event(CheckoutEventKind::Cancelled);
        self.publish(session.take_events());
        info!(session_id = %session.id(), "checkout session cancelled");
        Ok(())
    }

    async fn attempt(&self, draft: &OrderDraft, key: IdempotencyKey, existing: Option<OrderId>) -> Attempt {
        let method = draft.method();
        let (order_id, created) = match existing {
            Some(order_id) => (order_id, None),
            None => match self.api.create_order(&self.customer, key, &CreateOrderRequest::from(draft)).await {
                Ok(created) => (created.order_id.clone(), Some(created)),
                Err(e) => {
                    warn!(error = %e, "order creation failed");
                    return Attempt { order_id: None, result: Err(order_creation_error(e)) };
                }
            },
        };

        let result = match method {
            PaymentMethod::CashOnDelivery => match created {
                Some(_) => Ok(Settlement::Confirmed),
                None => self.repay(&order_id, draft).await.map(|_| Settlement::Confirmed),
            },
            PaymentMethod::CreditCard => {
                let outcome = match created {
                    Some(created) => Ok(created),
                    None => self.repay(&order_id, draft).await,
                };
                outcome.and_then(card_settlement)
            }
            PaymentMethod::Esewa | PaymentMethod::Khalti => self
                .api
                .initiate_payment(&self.customer, &InitiatePaymentRequest::for_order(&order_id, draft))
                .await
                .map(Settlement::Redirect)
                .map_err(payment_error),
        };
        if let Err(e) = &result { warn!(order_id = %order_id, error = %e, "payment step failed"); }
        Attempt { order_id: Some(order_id), result }
    }

    async fn repay(&self, order_id: &OrderId, draft: &OrderDraft) -> Result<CreatedOrder> {
        let request = RetryPaymentRequest { payment_method: draft.method(), details: draft.payment().card().cloned() };
        self.api.retry_payment(&self.customer, order_id, &request).await.map_err(payment_error)
    }

    fn settle(&self, generation: u64, method: PaymentMethod, attempt: Attempt) -> Result<SubmitOutcome> {
        let mut state = self.state.lock();
        if state.generation != generation {
            debug!("discarding result for a replaced session");
            return Err(CheckoutError::Superseded);
        }
        let session = state.session.as_mut().ok_or(CheckoutError::Superseded)?;
        if let Some(order_id) = attempt.order_id.clone() {
            session.record_order(order_id, method);
        }

        let outcome = match attempt.result.and_then(|settlement| handoff_for(settlement, attempt.order_id, method)) {
            Ok(None) => session.confirm(method).map(|order_id| SubmitOutcome::Confirmed { order_id }),
            Ok(Some(handoff)) => {
                session.raise_event(CheckoutEventKind::PaymentHandedOff {
                    order_id: handoff.order_id.clone(),
                    method,
                    payment_url: handoff.payment_url.to_string(),
                });
                Ok(SubmitOutcome::Redirect(handoff))
            }
            Err(e) => {
                session.record_failure(&e);
                Err(e)
            }
        };

        let events = session.take_events();
        if matches!(outcome, Ok(SubmitOutcome::Redirect(_))) {
            state.session = None;
            state.generation += 1;
        }
        drop(state);
        self.publish(events);
        outcome
    }

    fn with_session<R>(&self, f: impl FnOnce(&mut CheckoutSession) -> Result<R>) -> Result<R> {
        let (result, events) = {
            let mut state = self.state.lock();
            let session = state.session.as_mut().ok_or(CheckoutError::NoSession)?;
            let result = f(session);
            (result, session.take_events())
        };
        self.publish(events);
        result
    }

    fn with_current_session<R>(&self, generation: u64, f: impl FnOnce(&mut CheckoutSession) -> Result<R>) -> Result<R> {
        let (result, events) = {
            let mut state = self.state.lock();
            if state.generation != generation { return Err(CheckoutError::Superseded); }
            let session = state.session.as_mut().ok_or(CheckoutError::Superseded)?;
            let result = f(session);
            (result, session.take_events())
        };
        self.publish(events);
        result
    }

    fn read_session<R>(&self, f: impl FnOnce(&CheckoutSession) -> R) -> Result<(u64, R)> {
        let state = self.state.lock();
        let session = state.session.as_ref().ok_or(CheckoutError::NoSession)?;
        Ok((state.generation, f(session)))
    }

    fn publish(&self, events: Vec<CheckoutEvent>) {
        for event in events {
            // No subscribers is fine; events are advisory.
            let _ = self.events.send(event);
        }
    }
}

fn handoff_for(settlement: Settlement, order_id: Option<OrderId>, method: PaymentMethod) -> Result<Option<PaymentHandoff>> {
    match settlement {
        Settlement::Confirmed => Ok(None),
        Settlement::Redirect(initiation) => {
            let order_id = order_id.ok_or_else(|| CheckoutError::Payment { cause: "Order reference missing".to_string() })?;
            PaymentHandoff::new(order_id, method, initiation).map(Some)
        }
    }
}

fn card_settlement(created: CreatedOrder) -> Result<Settlement> {
    match created.payment_status {
        Some(PaymentStatus::Paid) => Ok(Settlement::Confirmed),
        _ => Err(CheckoutError::Payment { cause: created.message.unwrap_or_else(|| "Your card was declined".to_string()) }),
    }
}

fn order_creation_error(error: ApiError) -> CheckoutError {
    match error {
        ApiError::Rejected { fields, .. } if !fields.is_empty() => CheckoutError::Validation { fields },
        ApiError::Rejected { message, .. } if !message.is_empty() => CheckoutError::OrderCreation { cause: message },
        ApiError::Transport(_) => CheckoutError::OrderCreation { cause: "Please check your connection and try again.".to_string() },
        _ => CheckoutError::OrderCreation { cause: "Please try again.".to_string() },
    }
}

fn payment_error(error: ApiError) -> CheckoutError {
    match error {
        ApiError::Transport(cause) => CheckoutError::Transport(cause),
        other => CheckoutError::Payment { cause: other.public_message().unwrap_or("Please try again or choose another payment method.").to_string() },
    }
}

fn transport(error: ApiError) -> CheckoutError {
    CheckoutError::Transport(error.to_string())
}
