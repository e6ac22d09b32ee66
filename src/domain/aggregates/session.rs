//! Checkout Session Aggregate
//!
//! Tab-local checkout state: cart snapshot, form inputs, and the step
//! navigator. Sessions are never persisted; a reload starts over from the
//! durable cart.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::aggregates::cart::CartSnapshot;
use crate::domain::aggregates::order::{CardDetails, OrderDraft, PaymentMethod, PaymentSelection, ShippingAddress, ShippingUpdate};
use crate::domain::events::{CheckoutEvent, CheckoutEventKind};
use crate::domain::summary::{project, AcceptedCoupon, ChargeQuote, OrderSummary};
use crate::domain::value_objects::{IdempotencyKey, OrderId};
use crate::{CheckoutError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step { CartReview, ShippingInfo, PaymentMethod, Confirmation }

impl Step {
    pub fn number(&self) -> u8 {
        match self { Self::CartReview => 1, Self::ShippingInfo => 2, Self::PaymentMethod => 3, Self::Confirmation => 4 }
    }
}

#[derive(Debug)]
pub struct CheckoutSession {
    id: Uuid,
    cart: CartSnapshot,
    quote: ChargeQuote,
    coupon: Option<AcceptedCoupon>,
    summary: OrderSummary,
    shipping: ShippingAddress,
    payment: PaymentSelection,
    step: Step,
    order_id: Option<OrderId>,
    idempotency_key: IdempotencyKey,
    last_error: Option<String>,
    events: Vec<CheckoutEvent>,
}

impl CheckoutSession {
    pub fn start(cart: CartSnapshot, quote: ChargeQuote) -> Result<Self> {
        if cart.items().is_empty() { return Err(CheckoutError::EmptyCart); }
        let summary = project(cart.items(), &quote, None).map_err(|e| CheckoutError::validation("totals", e.to_string()))?;
        let id = Uuid::now_v7();
        let items = cart.item_count();
        let mut session = Self {
            id, cart, quote, coupon: None, summary, shipping: ShippingAddress::default(),
            payment: PaymentSelection::default(), step: Step::CartReview, order_id: None,
            idempotency_key: IdempotencyKey::generate(), last_error: None, events: vec![],
        };
        session.raise_event(CheckoutEventKind::Started { items });
        Ok(session)
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn step(&self) -> Step { self.step }
    pub fn cart(&self) -> &CartSnapshot { &self.cart }
    pub fn summary(&self) -> &OrderSummary { &self.summary }
    pub fn coupon(&self) -> Option<&AcceptedCoupon> { self.coupon.as_ref() }
    pub fn shipping(&self) -> &ShippingAddress { &self.shipping }
    pub fn payment(&self) -> &PaymentSelection { &self.payment }
    pub fn order_id(&self) -> Option<&OrderId> { self.order_id.as_ref() }
    pub fn idempotency_key(&self) -> IdempotencyKey { self.idempotency_key }
    pub fn last_error(&self) -> Option<&str> { self.last_error.as_deref() }
    pub fn is_complete(&self) -> bool { self.step == Step::Confirmation }

    /// Merges shipping form input. Field validation waits for [`CheckoutSession::advance`].
    pub fn update_shipping(&mut self, update: ShippingUpdate) -> Result<()> {
        self.check_draft_editable("edit shipping")?;
        self.shipping.merge(update);
        self.draft_changed();
        Ok(())
    }

    /// Replaces the payment selection. Any previously entered card is dropped.
    pub fn select_payment(&mut self, selection: PaymentSelection) -> Result<()> {
        self.ensure_open()?;
        self.payment = selection;
        self.draft_changed();
        Ok(())
    }

    /// Switches method; staying on card keeps what was typed, anything else starts blank.
    pub fn select_method(&mut self, method: PaymentMethod) -> Result<()> {
        self.ensure_open()?;
        if self.payment.method() != method {
            self.payment = PaymentSelection::for_method(method);
            self.draft_changed();
        }
        Ok(())
    }

    pub fn enter_card_details(&mut self, card: CardDetails) -> Result<()> {
        self.ensure_open()?;
        if self.payment.method() != PaymentMethod::CreditCard {
            return Err(CheckoutError::validation("paymentMethod", "Select card payment before entering card details"));
        }
        self.payment = PaymentSelection::CreditCard(card);
        Ok(())
    }

    /// Stores a coupon the backend accepted and re-projects the totals.
    pub fn apply_coupon(&mut self, coupon: AcceptedCoupon) -> Result<()> {
        self.check_draft_editable("apply coupon")?;
        let summary = project(self.cart.items(), &self.quote, Some(&coupon)).map_err(|e| CheckoutError::validation("couponCode", e.to_string()))?;
        let code = coupon.code.clone();
        self.summary = summary;
        self.coupon = Some(coupon);
        self.draft_changed();
        self.raise_event(CheckoutEventKind::CouponApplied { code });
        Ok(())
    }

    /// Shipping and totals are frozen once the backend holds an order; a retry
    /// pays for that order as created. Switching payment method stays allowed.
    pub fn check_draft_editable(&self, action: &'static str) -> Result<()> {
        self.ensure_open()?;
        if self.order_id.is_some() { return Err(CheckoutError::InvalidTransition { from: self.step, action }); }
        Ok(())
    }

    pub fn advance(&mut self) -> Result<Step> {
        let next = match self.step {
            Step::CartReview if self.cart.items().is_empty() => return Err(CheckoutError::EmptyCart),
            Step::CartReview => Step::ShippingInfo,
            Step::ShippingInfo => {
                let fields = self.shipping.field_errors();
                if !fields.is_empty() { return Err(CheckoutError::Validation { fields }); }
                Step::PaymentMethod
            }
            Step::PaymentMethod => return Err(CheckoutError::InvalidTransition { from: Step::PaymentMethod, action: "advance" }),
            Step::Confirmation => return Err(CheckoutError::SessionClosed),
        };
        self.move_to(next);
        Ok(next)
    }

    pub fn retreat(&mut self) -> Result<Step> {
        let previous = match self.step {
            Step::CartReview => Step::CartReview,
            Step::ShippingInfo => Step::CartReview,
            Step::PaymentMethod => Step::ShippingInfo,
            Step::Confirmation => return Err(CheckoutError::SessionClosed),
        };
        self.move_to(previous);
        Ok(previous)
    }

    /// Builds the draft for one submission attempt.
    ///
    /// On success the card fields leave the session with the draft; a retry
    /// needs them entered again. On a validation failure nothing is taken.
    pub fn prepare_submission(&mut self, is_guest: bool) -> Result<OrderDraft> {
        self.ensure_open()?;
        if self.step != Step::PaymentMethod {
            return Err(CheckoutError::InvalidTransition { from: self.step, action: "submit" });
        }
        let fields = OrderDraft::check(&self.cart, &self.shipping, &self.summary, &self.payment);
        if !fields.is_empty() { return Err(CheckoutError::Validation { fields }); }

        let method = self.payment.method();
        let payment = std::mem::replace(&mut self.payment, PaymentSelection::for_method(method));
        let coupon_code = self.coupon.as_ref().map(|c| c.code.clone());
        OrderDraft::assemble(&self.cart, self.shipping.clone(), self.summary.clone(), payment, coupon_code, is_guest)
            .map_err(|fields| CheckoutError::Validation { fields })
    }

    pub fn record_order(&mut self, order_id: OrderId, method: PaymentMethod) {
        if self.order_id.as_ref() != Some(&order_id) {
            self.raise_event(CheckoutEventKind::OrderCreated { order_id: order_id.clone(), method });
        }
        self.order_id = Some(order_id);
    }

    /// Terminal transition; only reachable after order and payment succeeded.
    pub fn confirm(&mut self, method: PaymentMethod) -> Result<OrderId> {
        let order_id = self.order_id.clone().ok_or(CheckoutError::InvalidTransition { from: self.step, action: "confirm" })?;
        self.last_error = None;
        self.move_to(Step::Confirmation);
        self.raise_event(CheckoutEventKind::OrderConfirmed { order_id: order_id.clone(), method });
        Ok(order_id)
    }

    pub fn record_failure(&mut self, error: &CheckoutError) {
        let message = error.user_message();
        let kind = match error {
            CheckoutError::Payment { .. } => CheckoutEventKind::PaymentFailed { order_id: self.order_id.clone(), message: message.clone() },
            _ => CheckoutEventKind::SubmissionFailed { message: message.clone() },
        };
        self.last_error = Some(message);
        self.raise_event(kind);
    }

    pub fn raise_event(&mut self, kind: CheckoutEventKind) { self.events.push(CheckoutEvent::for_session(self.id, kind)); }
    pub fn take_events(&mut self) -> Vec<CheckoutEvent> { std::mem::take(&mut self.events) }

    fn move_to(&mut self, to: Step) {
        let from = self.step;
        self.step = to;
        if from != to { self.raise_event(CheckoutEventKind::StepChanged { from, to }); }
    }

    // A changed draft is a different request, so it gets a fresh key. Once the
    // backend holds an order, retries go against that order instead.
    fn draft_changed(&mut self) {
        if self.order_id.is_none() { self.idempotency_key = IdempotencyKey::generate(); }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_complete() { return Err(CheckoutError::SessionClosed); }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::cart::CartLineItem;
    use crate::domain::aggregates::order::tests::{address, card};
    use crate::domain::value_objects::{Money, Quantity};
    use rust_decimal::Decimal;

    fn session() -> CheckoutSession {
        let item = CartLineItem::new("P1", "Sandalwood", Money::npr(Decimal::new(4200, 0)), Quantity::new(1).unwrap()).unwrap();
        CheckoutSession::start(CartSnapshot::new(vec![item]).unwrap(), ChargeQuote::free("NPR")).unwrap()
    }

    fn fill_shipping(s: &mut CheckoutSession) {
        let a = address();
        s.update_shipping(ShippingUpdate {
            first_name: Some(a.first_name), last_name: Some(a.last_name), email: Some(a.email), phone: Some(a.phone),
            street: Some(a.street), city: Some(a.city), state: None, country: Some(a.country), postal_code: Some(a.postal_code),
        }).unwrap();
    }

    #[test]
    fn test_new_session_starts_at_cart_review() {
        let mut s = session();
        assert_eq!(s.step(), Step::CartReview);
        assert!(matches!(s.take_events()[0].kind, CheckoutEventKind::Started { items: 1 }));
    }

    #[test]
    fn test_shipping_step_blocks_until_valid() {
        let mut s = session();
        s.advance().unwrap();
        let err = s.advance().unwrap_err();
        assert!(matches!(err, CheckoutError::Validation { ref fields } if fields.len() == 8));
        assert_eq!(s.step(), Step::ShippingInfo);

        fill_shipping(&mut s);
        s.update_shipping(ShippingUpdate { email: Some("sita-at-example.com".into()), ..Default::default() }).unwrap();
        assert!(matches!(s.advance(), Err(CheckoutError::Validation { ref fields }) if fields[0].field == "email"));

        s.update_shipping(ShippingUpdate { email: Some("sita@example.com".into()), ..Default::default() }).unwrap();
        assert_eq!(s.advance().unwrap(), Step::PaymentMethod);
    }

    #[test]
    fn test_retreat_walks_back() {
        let mut s = session();
        assert_eq!(s.retreat().unwrap(), Step::CartReview);
        s.advance().unwrap();
        fill_shipping(&mut s);
        s.advance().unwrap();
        assert_eq!(s.retreat().unwrap(), Step::ShippingInfo);
        assert_eq!(s.retreat().unwrap(), Step::CartReview);
    }

    #[test]
    fn test_payment_step_cannot_advance_manually() {
        let mut s = session();
        s.advance().unwrap();
        fill_shipping(&mut s);
        s.advance().unwrap();
        assert!(matches!(s.advance(), Err(CheckoutError::InvalidTransition { from: Step::PaymentMethod, .. })));
    }

    #[test]
    fn test_switching_away_from_card_discards_details() {
        let mut s = session();
        s.select_method(PaymentMethod::CreditCard).unwrap();
        s.enter_card_details(card()).unwrap();
        s.select_method(PaymentMethod::CreditCard).unwrap();
        assert_eq!(s.payment().card().unwrap().card_number, "4242424242424242");

        s.select_method(PaymentMethod::Esewa).unwrap();
        s.select_method(PaymentMethod::CreditCard).unwrap();
        assert!(s.payment().card().unwrap().card_number.is_empty());
    }

    #[test]
    fn test_card_details_require_card_method() {
        let mut s = session();
        s.select_method(PaymentMethod::Khalti).unwrap();
        assert!(matches!(s.enter_card_details(card()), Err(CheckoutError::Validation { .. })));
    }

    #[test]
    fn test_confirmation_is_terminal() {
        let mut s = session();
        s.advance().unwrap();
        fill_shipping(&mut s);
        s.advance().unwrap();
        s.record_order(OrderId::new("ord_1"), PaymentMethod::CashOnDelivery);
        assert_eq!(s.confirm(PaymentMethod::CashOnDelivery).unwrap(), OrderId::new("ord_1"));
        assert_eq!(s.retreat(), Err(CheckoutError::SessionClosed));
        assert_eq!(s.advance(), Err(CheckoutError::SessionClosed));
        assert_eq!(s.select_method(PaymentMethod::Esewa), Err(CheckoutError::SessionClosed));
        assert_eq!(s.step(), Step::Confirmation);
    }

    #[test]
    fn test_prepare_submission_takes_card_only_when_valid() {
        let mut s = session();
        s.advance().unwrap();
        fill_shipping(&mut s);
        s.advance().unwrap();
        s.select_method(PaymentMethod::CreditCard).unwrap();
        let mut partial = CardDetails::default();
        partial.card_number = "4242424242424242".into();
        s.enter_card_details(partial).unwrap();
        assert!(s.prepare_submission(false).is_err());
        assert_eq!(s.payment().card().unwrap().card_number, "4242424242424242");

        s.enter_card_details(card()).unwrap();
        let draft = s.prepare_submission(false).unwrap();
        assert_eq!(draft.payment().card().unwrap().last4(), "4242");
        assert!(s.payment().card().unwrap().is_blank());
    }

    #[test]
    fn test_idempotency_key_rotates_only_before_order_exists() {
        let mut s = session();
        let first = s.idempotency_key();
        s.update_shipping(ShippingUpdate { city: Some("Lalitpur".into()), ..Default::default() }).unwrap();
        let second = s.idempotency_key();
        assert_ne!(first, second);

        s.record_order(OrderId::new("ord_9"), PaymentMethod::CreditCard);
        s.select_method(PaymentMethod::Khalti).unwrap();
        assert_eq!(s.idempotency_key(), second);
    }

    #[test]
    fn test_created_order_freezes_shipping_and_totals() {
        let mut s = session();
        s.advance().unwrap();
        fill_shipping(&mut s);
        s.advance().unwrap();
        s.record_order(OrderId::new("ord_3"), PaymentMethod::Khalti);

        let err = s.update_shipping(ShippingUpdate { city: Some("Pokhara".into()), ..Default::default() }).unwrap_err();
        assert_eq!(err, CheckoutError::InvalidTransition { from: Step::PaymentMethod, action: "edit shipping" });
        let coupon = AcceptedCoupon { code: "LATE".into(), discount: Money::npr(Decimal::new(500, 0)) };
        assert!(matches!(s.apply_coupon(coupon), Err(CheckoutError::InvalidTransition { action: "apply coupon", .. })));

        assert_eq!(s.shipping().city, "Kathmandu");
        assert_eq!(s.summary().total.amount(), Decimal::new(4200, 0));
        assert!(s.select_method(PaymentMethod::CashOnDelivery).is_ok());
    }

    #[test]
    fn test_coupon_reprojects_summary() {
        let mut s = session();
        s.apply_coupon(AcceptedCoupon { code: "SPRING".into(), discount: Money::npr(Decimal::new(200, 0)) }).unwrap();
        assert_eq!(s.summary().total.amount(), Decimal::new(4000, 0));
        assert!(s.summary().is_consistent());
    }
}
