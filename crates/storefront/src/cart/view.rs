//! Display data for cart drawers and badges.

use serde::Serialize;

use marketplace_core::CartItem;
use marketplace_core::price::format_amount;

use super::state::CartSnapshot;

/// Fields tried, in order, for an item's display title.
const TITLE_FIELDS: [&str; 2] = ["title", "name"];

/// Fields tried, in order, for an item's image.
const IMAGE_FIELDS: [&str; 2] = ["image", "thumbnail"];

/// Cart item display data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CartItemView {
    pub id: String,
    pub title: String,
    pub price: Option<String>,
    pub image: Option<String>,
}

/// Cart display data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CartView {
    pub items: Vec<CartItemView>,
    pub subtotal: String,
    pub item_count: usize,
    pub loading: bool,
    pub is_open: bool,
}

impl CartView {
    /// Create an empty cart.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            subtotal: "$0.00".to_string(),
            item_count: 0,
            loading: false,
            is_open: false,
        }
    }
}

impl From<&CartSnapshot> for CartView {
    fn from(snapshot: &CartSnapshot) -> Self {
        Self {
            items: snapshot.items.iter().map(CartItemView::from).collect(),
            subtotal: format_amount(snapshot.total_amount),
            item_count: snapshot.count,
            loading: snapshot.loading,
            is_open: snapshot.is_open,
        }
    }
}

impl From<&CartItem> for CartItemView {
    fn from(item: &CartItem) -> Self {
        let first_of = |keys: &[&str]| {
            keys.iter()
                .find_map(|key| item.str_field(key))
                .map(str::to_string)
        };

        Self {
            id: item.id.to_string(),
            title: first_of(&TITLE_FIELDS).unwrap_or_else(|| item.id.to_string()),
            price: item.price().map(format_amount),
            image: first_of(&IMAGE_FIELDS),
        }
    }
}
