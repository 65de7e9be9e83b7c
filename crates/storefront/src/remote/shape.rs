//! Normalization of the cart endpoint's response shapes.
//!
//! The endpoint has answered, over time, with:
//! - an array of per-user carts: `[{"userId": "u1", "products": [...]}, ...]`
//! - a bare item list: `{"items": [...]}`
//! - a bare product list: `{"products": [...]}`
//!
//! Shapes are tried in that order and the first match wins. A document that
//! matches none of them is an empty cart, not an error.

use serde_json::Value;
use tracing::debug;

use marketplace_core::{CartItem, UserId};

/// Keys a per-user cart entry may carry its owner under.
const OWNER_KEYS: &[&str] = &["userId", "user_id", "owner"];

/// Keys a per-user cart entry may carry its lines under.
const CART_LINE_KEYS: &[&str] = &["products", "items"];

/// A cart document after shape detection.
#[derive(Debug, Clone, PartialEq)]
pub enum CartShape {
    /// The document was an array of carts; holds the session user's cart lines.
    CartsArray(Vec<CartItem>),
    /// The document was `{ "items": [...] }`.
    ItemsList(Vec<CartItem>),
    /// The document was `{ "products": [...] }`.
    ProductsList(Vec<CartItem>),
    /// No recognized shape, or no cart owned by the session user.
    Empty,
}

impl CartShape {
    /// Short name for logging.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::CartsArray(_) => "carts_array",
            Self::ItemsList(_) => "items_list",
            Self::ProductsList(_) => "products_list",
            Self::Empty => "empty",
        }
    }

    /// The normalized item list, in server order.
    #[must_use]
    pub fn into_items(self) -> Vec<CartItem> {
        match self {
            Self::CartsArray(items) | Self::ItemsList(items) | Self::ProductsList(items) => items,
            Self::Empty => Vec::new(),
        }
    }
}

/// Detect the shape of a cart document and decode its items.
#[must_use]
pub fn normalize(document: &Value, user: &UserId) -> CartShape {
    if let Value::Array(carts) = document {
        return carts
            .iter()
            .find(|cart| owned_by(cart, user))
            .and_then(|cart| CART_LINE_KEYS.iter().find_map(|key| cart.get(*key)?.as_array()))
            .map_or(CartShape::Empty, |lines| CartShape::CartsArray(decode_items(lines)));
    }

    if let Some(items) = document.get("items").and_then(Value::as_array) {
        return CartShape::ItemsList(decode_items(items));
    }

    if let Some(products) = document.get("products").and_then(Value::as_array) {
        return CartShape::ProductsList(decode_items(products));
    }

    CartShape::Empty
}

fn owned_by(cart: &Value, user: &UserId) -> bool {
    OWNER_KEYS
        .iter()
        .filter_map(|key| cart.get(*key))
        .any(|owner| match owner {
            Value::String(s) => s == user.as_str(),
            Value::Number(n) => n.to_string() == user.as_str(),
            _ => false,
        })
}

fn decode_items(values: &[Value]) -> Vec<CartItem> {
    values
        .iter()
        .filter_map(|value| match serde_json::from_value::<CartItem>(value.clone()) {
            Ok(item) => Some(item),
            Err(e) => {
                debug!(error = %e, "Skipping undecodable cart line");
                None
            }
        })
        .collect()
}
