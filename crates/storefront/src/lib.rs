//! Marketplace storefront cart.
//!
//! A client-side cart store that mirrors the marketplace cart API for the
//! signed-in buyer. It removes items optimistically, reconciles with the
//! server without resurrecting in-flight removals, and publishes snapshots
//! for the presentation layer.
//!
//! Hosts wire it up roughly like this:
//!
//! ```rust,ignore
//! let config = CartConfig::from_env()?;
//! let _sentry = telemetry::init_sentry(&config);
//! telemetry::init_tracing()?;
//!
//! let source = Arc::new(HttpCartSource::new(&config.api)?);
//! let cookies = SessionCookies::new();
//! let store = CartStore::new(
//!     CartCollaborators::new(source, Arc::new(cookies.clone())),
//!     config.timings,
//! );
//! store.reconcile().await;
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod analytics;
pub mod cart;
pub mod config;
pub mod error;
pub mod remote;
pub mod session;
pub mod telemetry;

pub use cart::{CartCollaborators, CartSnapshot, CartStore, CartView, ReconcileOutcome};
pub use config::CartConfig;
pub use error::{CartError, Result};
pub use remote::{HttpCartSource, RemoteCartSource, RemoteError};
pub use session::{Identity, SessionCookies};
