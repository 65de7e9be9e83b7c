//! Core types for the marketplace.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod id;
pub mod item;
pub mod price;
pub mod role;

pub use id::*;
pub use item::{CartItem, PRICE_FIELD};
pub use role::{ParseRoleError, Role};
