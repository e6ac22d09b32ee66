//! Aggregates module
pub mod cart;
pub mod order;
pub mod session;

pub use cart::{CartError, CartLineItem, CartSnapshot};
pub use order::{CardDetails, GuestDetails, OrderDraft, PaymentMethod, PaymentSelection, ShippingAddress, ShippingUpdate};
pub use session::{CheckoutSession, Step};
