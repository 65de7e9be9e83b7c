//! Price parsing and arithmetic using decimal amounts.
//!
//! The marketplace API is loose about how it encodes prices: some endpoints
//! send JSON numbers (`10`, `9.99`), others send strings (`"9.99"`). Amounts
//! are always read into [`Decimal`] so cart totals never accumulate float
//! rounding error.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::Value;

/// Parse a JSON price value into a decimal amount.
///
/// Accepts numbers (including exponent notation) and numeric strings.
/// Anything else, including `null`, yields `None`.
///
/// ```
/// use marketplace_core::price::parse_amount;
/// use rust_decimal::Decimal;
/// use serde_json::json;
///
/// assert_eq!(parse_amount(&json!(10)), Some(Decimal::from(10)));
/// assert_eq!(parse_amount(&json!("2.50")), Some(Decimal::new(250, 2)));
/// assert_eq!(parse_amount(&json!(null)), None);
/// ```
#[must_use]
pub fn parse_amount(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => parse_str(&n.to_string()),
        Value::String(s) => parse_str(s.trim()),
        _ => None,
    }
}

fn parse_str(s: &str) -> Option<Decimal> {
    if s.is_empty() {
        return None;
    }
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .ok()
}

/// Sum a sequence of optional amounts, treating missing amounts as zero.
///
/// Returns `None` if the total leaves the range of [`Decimal`].
#[must_use]
pub fn checked_sum_amounts<I>(amounts: I) -> Option<Decimal>
where
    I: IntoIterator<Item = Option<Decimal>>,
{
    amounts
        .into_iter()
        .flatten()
        .try_fold(Decimal::ZERO, Decimal::checked_add)
}

/// Sum a sequence of optional amounts, treating missing amounts as zero.
///
/// Saturates at [`Decimal::MAX`] / [`Decimal::MIN`] instead of overflowing.
#[must_use]
pub fn sum_amounts<I>(amounts: I) -> Decimal
where
    I: IntoIterator<Item = Option<Decimal>>,
{
    amounts
        .into_iter()
        .flatten()
        .fold(Decimal::ZERO, |total, amount| {
            total.checked_add(amount).unwrap_or(if amount.is_sign_negative() {
                Decimal::MIN
            } else {
                Decimal::MAX
            })
        })
}

/// Format an amount for display (e.g., `$19.99`).
#[must_use]
pub fn format_amount(amount: Decimal) -> String {
    format!("${:.2}", amount.round_dp(2))
}
