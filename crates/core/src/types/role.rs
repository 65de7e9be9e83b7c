//! Marketplace account roles.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Role attached to a marketplace session.
///
/// Only buyers hold a cart; creators and admins browse the storefront but
/// their sessions never own cart contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Purchases content. The only role that owns a cart.
    Buyer,
    /// Publishes content for sale.
    Creator,
    /// Operates the marketplace.
    Admin,
}

impl Role {
    /// Whether sessions with this role own a shopping cart.
    #[must_use]
    pub const fn owns_cart(self) -> bool {
        matches!(self, Self::Buyer)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buyer => write!(f, "buyer"),
            Self::Creator => write!(f, "creator"),
            Self::Admin => write!(f, "admin"),
        }
    }
}

/// A role string that names no known role.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid role: {0}")]
pub struct ParseRoleError(String);

impl std::str::FromStr for Role {
    type Err = ParseRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buyer" => Ok(Self::Buyer),
            "creator" => Ok(Self::Creator),
            "admin" => Ok(Self::Admin),
            _ => Err(ParseRoleError(s.to_string())),
        }
    }
}
