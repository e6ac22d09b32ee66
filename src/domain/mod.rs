//! Checkout domain: value objects, aggregates, events and the summary projector.
pub mod aggregates;
pub mod events;
pub mod summary;
pub mod value_objects;
