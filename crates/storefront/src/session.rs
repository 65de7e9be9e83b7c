//! Session collaborators: who is shopping, and what they may do.
//!
//! The cart store never reaches into ambient cookie state. Hosts hand it an
//! [`IdentityProvider`], a [`RoleChecker`], and a [`SessionExpiryHandler`]
//! at construction time. [`SessionCookies`] is a cookie-jar style provider
//! for hosts that keep identity as string key/value pairs.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use secrecy::SecretString;
use tracing::warn;
use url::Url;

use marketplace_core::{Role, UserId};

/// Keys the session identity is stored under.
pub mod keys {
    /// Key for the logged-in user's ID.
    pub const USER_ID: &str = "userId";

    /// Key for the API auth token.
    pub const AUTH_TOKEN: &str = "token";

    /// Key for the account role.
    pub const ROLE: &str = "role";
}

/// The caller a cart belongs to.
#[derive(Debug, Clone)]
pub struct Identity {
    /// Marketplace user ID; the cart owner key.
    pub user_id: UserId,
    /// API auth token, when the session carries one.
    pub token: Option<SecretString>,
    /// Account role, when known.
    pub role: Option<Role>,
}

impl Identity {
    /// Create an identity with no token or role.
    #[must_use]
    pub fn new(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            token: None,
            role: None,
        }
    }

    /// Attach an auth token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(SecretString::from(token.into()));
        self
    }

    /// Attach a role.
    #[must_use]
    pub const fn with_role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }
}

/// Read-only access to the current session's identity.
pub trait IdentityProvider: Send + Sync {
    /// The current identity, or `None` for an anonymous session.
    fn identity(&self) -> Option<Identity>;
}

/// Decides whether a session may own a cart.
pub trait RoleChecker: Send + Sync {
    /// Whether `identity` is an eligible cart owner.
    fn is_cart_owner(&self, identity: &Identity) -> bool;
}

/// Only buyer sessions own carts.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuyerRoleChecker;

impl RoleChecker for BuyerRoleChecker {
    fn is_cart_owner(&self, identity: &Identity) -> bool {
        identity.role.is_some_and(Role::owns_cart)
    }
}

/// Reacts to the API reporting that the session's token is no longer valid.
pub trait SessionExpiryHandler: Send + Sync {
    /// Called once per expired-session signal, after the configured delay.
    fn session_expired(&self);
}

impl<F> SessionExpiryHandler for F
where
    F: Fn() + Send + Sync,
{
    fn session_expired(&self) {
        self();
    }
}

/// Logs the redirect a browser host would perform.
#[derive(Debug, Clone, Default)]
pub struct LoggingExpiryHandler {
    login_url: Option<Url>,
}

impl LoggingExpiryHandler {
    /// Log redirects towards `login_url`.
    #[must_use]
    pub const fn new(login_url: Url) -> Self {
        Self {
            login_url: Some(login_url),
        }
    }
}

impl SessionExpiryHandler for LoggingExpiryHandler {
    fn session_expired(&self) {
        match &self.login_url {
            Some(url) => warn!(login_url = %url, "Session expired, redirecting to login"),
            None => warn!("Session expired"),
        }
    }
}

/// Cookie-jar style session store.
///
/// The host writes the keys in [`keys`]; the cart store only reads them.
/// Clones share one jar.
#[derive(Clone, Default)]
pub struct SessionCookies {
    jar: Arc<RwLock<HashMap<String, String>>>,
}

impl SessionCookies {
    /// Create an empty jar.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a cookie.
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.jar
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value.into());
    }

    /// Remove a cookie.
    pub fn remove(&self, key: &str) {
        self.jar
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    /// Read a cookie.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        self.jar
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Remove every cookie (logout).
    pub fn clear(&self) {
        self.jar
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn non_empty(&self, key: &str) -> Option<String> {
        self.get(key).filter(|v| !v.trim().is_empty())
    }
}

impl std::fmt::Debug for SessionCookies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let jar = self.jar.read().unwrap_or_else(PoisonError::into_inner);
        let mut keys: Vec<&String> = jar.keys().collect();
        keys.sort();
        f.debug_struct("SessionCookies").field("keys", &keys).finish()
    }
}

impl IdentityProvider for SessionCookies {
    fn identity(&self) -> Option<Identity> {
        let user_id = self.non_empty(keys::USER_ID)?;
        Some(Identity {
            user_id: UserId::new(user_id),
            token: self.non_empty(keys::AUTH_TOKEN).map(SecretString::from),
            role: self
                .non_empty(keys::ROLE)
                .and_then(|role| role.parse::<Role>().ok()),
        })
    }
}
