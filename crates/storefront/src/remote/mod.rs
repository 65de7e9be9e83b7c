//! Remote cart source: the authoritative, network-side cart.
//!
//! # Architecture
//!
//! - The server is the source of truth; the cart store only mirrors it
//! - [`RemoteCartSource`] is the seam the store talks to, so tests and hosts
//!   can swap the transport
//! - [`HttpCartSource`] is the production implementation over `reqwest`
//! - The fetch endpoint answers in several shapes; [`normalize`] folds them
//!   into a single [`CartShape`]

mod http;
mod shape;

pub use http::HttpCartSource;
pub use shape::{CartShape, normalize};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use marketplace_core::ItemId;

use crate::session::Identity;

/// Errors that can occur when talking to the remote cart API.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// API returned a non-success status.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Rate limited by the API.
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// Auth token is missing, invalid, or expired.
    #[error("Session expired")]
    SessionExpired,

    /// The API answered but refused the operation.
    #[error("Rejected: {0}")]
    Rejected(String),

    /// A request could not be built from the configuration.
    #[error("Invalid request configuration: {0}")]
    Config(String),
}

/// Authoritative cart storage reachable over the network.
#[async_trait]
pub trait RemoteCartSource: Send + Sync {
    /// Fetch the raw cart document for the session's user.
    ///
    /// The document is returned as-is; callers run it through [`normalize`].
    async fn fetch_cart(&self, identity: &Identity) -> Result<Value, RemoteError>;

    /// Delete one item from the session's cart.
    async fn delete_item(&self, item_id: &ItemId, identity: &Identity) -> Result<(), RemoteError>;
}
