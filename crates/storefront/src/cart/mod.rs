//! Client-side cart.
//!
//! [`CartStore`] mirrors the server cart for one session. It applies removals
//! optimistically, reconciles against the server without losing in-flight
//! removals, and publishes a [`CartSnapshot`] to subscribers whenever the
//! visible state changes. [`CartView`] turns a snapshot into display data.

mod state;
mod store;
mod timer;
mod view;

#[cfg(test)]
mod tests;

pub use state::CartSnapshot;
pub use store::{CartCollaborators, CartStore, CheckoutSummary, ReconcileOutcome};
pub use timer::BackgroundTask;
pub use view::{CartItemView, CartView};
