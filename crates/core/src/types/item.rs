//! Cart line items.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::types::price::parse_amount;
use crate::types::id::ItemId;

/// Field read for cart total computation.
pub const PRICE_FIELD: &str = "price";

/// A product placed in a cart.
///
/// Only `id` is interpreted. Every other field the server sends (title,
/// thumbnail, creator, price, ...) is kept verbatim in `fields` and written
/// back out unchanged on serialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    /// Product identifier, unique within a cart.
    #[serde(deserialize_with = "deserialize_item_id")]
    pub id: ItemId,
    /// Pass-through fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl CartItem {
    /// Create an item with no extra fields.
    #[must_use]
    pub fn new(id: impl Into<ItemId>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    /// Builder-style helper to attach a pass-through field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Price used for cart totals, if the item carries a parseable one.
    #[must_use]
    pub fn price(&self) -> Option<Decimal> {
        self.fields.get(PRICE_FIELD).and_then(parse_amount)
    }

    /// Read a pass-through field as a string.
    #[must_use]
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }
}

/// Accept string or numeric ids; the API is not consistent about which.
fn deserialize_item_id<'de, D>(deserializer: D) -> Result<ItemId, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) if !s.is_empty() => Ok(ItemId::new(s)),
        Value::Number(n) => Ok(ItemId::new(n.to_string())),
        other => Err(serde::de::Error::custom(format!(
            "expected a non-empty string or number for item id, got {other}"
        ))),
    }
}
