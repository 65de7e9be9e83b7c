//! Marketplace Core - Shared types library.
//!
//! This crate provides common types used across the marketplace components:
//! - `storefront` - Cart store engine and its collaborator seams
//! - `integration-tests` - End-to-end tests against a mock cart API
//!
//! # Architecture
//!
//! The core crate contains only types and pure helpers - no I/O, no HTTP
//! clients, no async runtime. This keeps it lightweight and allows it to be
//! used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype IDs, cart items, roles, and price helpers

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
