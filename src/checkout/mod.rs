//! Checkout flow: submission, redirect hand-off and return verification.

pub mod handoff;
pub mod orchestrator;
pub mod verification;

pub use handoff::PaymentHandoff;
pub use orchestrator::{CheckoutOrchestrator, SessionView, SubmitOutcome};
pub use verification::{ConfirmationRedirect, PaymentVerificationResult, PaymentVerifier, ReturnParams};
