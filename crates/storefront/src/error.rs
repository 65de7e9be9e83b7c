//! Cart store error types and Sentry breadcrumbs.
//!
//! Store operations never panic or leak raw transport errors to the UI.
//! Failures come back as [`CartError`], whose [`CartError::user_message`] is
//! safe to show in a toast.

use thiserror::Error;

use crate::remote::RemoteError;

/// Errors returned across the cart store boundary.
#[derive(Debug, Error)]
pub enum CartError {
    /// The session may not own a cart; nothing was mutated.
    #[error("Session is not eligible to own a cart")]
    RoleIneligible,

    /// The API rejected the session's token.
    #[error("Session expired")]
    SessionExpired,

    /// Removing an item failed and the cart was restored from the server.
    #[error("Failed to remove item: {0}")]
    RemoveFailed(#[source] RemoteError),

    /// Checkout was requested on an empty cart.
    #[error("Cart is empty")]
    EmptyCart,
}

impl CartError {
    /// Message suitable for showing to the shopper.
    ///
    /// Transport details are logged, not shown.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::RoleIneligible => "Only buyer accounts can use the cart".to_string(),
            Self::SessionExpired => "Your session has expired, please sign in again".to_string(),
            Self::RemoveFailed(RemoteError::RateLimited(_)) => {
                "Too many requests, please try again in a moment".to_string()
            }
            Self::RemoveFailed(_) => "Could not remove the item, please try again".to_string(),
            Self::EmptyCart => "Your cart is empty".to_string(),
        }
    }
}

/// Result type alias for `CartError`.
pub type Result<T> = std::result::Result<T, CartError>;

/// Add a breadcrumb for cart activity.
///
/// Breadcrumbs appear in Sentry error reports to show the trail of cart
/// operations leading up to an error. Without an initialized Sentry client
/// this does nothing.
///
/// # Example
///
/// ```rust,ignore
/// add_breadcrumb("cart", "Removal rolled back", Some(&[("item_id", "123")]));
/// ```
pub fn add_breadcrumb(category: &str, message: &str, data: Option<&[(&str, &str)]>) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    if let Some(pairs) = data {
        for (key, value) in pairs {
            breadcrumb.data.insert(
                (*key).to_string(),
                serde_json::Value::String((*value).to_string()),
            );
        }
    }

    sentry::add_breadcrumb(breadcrumb);
}
