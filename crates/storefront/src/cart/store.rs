//! The cart store: a local mirror of the server cart with optimistic removals.
//!
//! # Ordering
//!
//! Local mutations happen under a mutex that is never held across an await,
//! so they are atomic with respect to each other. Remote calls are the only
//! suspension points; reconciliations and removals interleave there.
//!
//! - Every reconciliation takes a sequence number. A result older than the
//!   latest applied one is dropped, so a slow fetch never overwrites a newer one.
//! - A removal registers its id as pending *before* touching `items`. Any
//!   reconciliation finishing after that filters the id out, even if its
//!   fetch started before the delete reached the server.
//! - Each reconciliation arms a safety timer that forces `loading` off. The
//!   timer is cancelled on every exit path and by the next reconciliation.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};
use url::Url;

use marketplace_core::ItemId;

use super::state::{CartSnapshot, CartState, Merge};
use super::timer::{BackgroundTask, SafetyTimer};

use crate::analytics::{Analytics, AnalyticsEvent, CollectorAnalytics, TracingAnalytics};
use crate::config::{CartConfig, CartTimings};
use crate::error::{CartError, Result, add_breadcrumb};
use crate::remote::{RemoteCartSource, RemoteError, normalize};
use crate::session::{
    BuyerRoleChecker, Identity, IdentityProvider, LoggingExpiryHandler, RoleChecker,
    SessionExpiryHandler,
};

/// How a reconciliation ended.
#[derive(Debug)]
pub enum ReconcileOutcome {
    /// Server contents differed and replaced the local items.
    Applied,
    /// Server contents matched the local id set; nothing changed.
    Unchanged,
    /// Anonymous session; the cart is empty and no request was made.
    NoIdentity,
    /// A newer reconciliation had already been applied; this result was dropped.
    Superseded,
    /// The fetch failed; local items were kept.
    Failed(RemoteError),
}

impl ReconcileOutcome {
    /// Short name for logging.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Unchanged => "unchanged",
            Self::NoIdentity => "no_identity",
            Self::Superseded => "superseded",
            Self::Failed(_) => "failed",
        }
    }
}

impl From<Merge> for ReconcileOutcome {
    fn from(merge: Merge) -> Self {
        match merge {
            Merge::Applied => Self::Applied,
            Merge::Unchanged => Self::Unchanged,
            Merge::Superseded => Self::Superseded,
        }
    }
}

/// What the shopper is about to pay for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSummary {
    /// Items in cart order.
    pub item_ids: Vec<ItemId>,
    /// Cart total.
    pub total: Decimal,
    /// Checkout page to send the shopper to, when configured.
    pub checkout_url: Option<Url>,
}

/// External collaborators the store depends on.
#[derive(Clone)]
pub struct CartCollaborators {
    /// Authoritative cart storage.
    pub source: Arc<dyn RemoteCartSource>,
    /// Current session identity.
    pub identity: Arc<dyn IdentityProvider>,
    /// Cart-owner eligibility.
    pub roles: Arc<dyn RoleChecker>,
    /// Analytics sink.
    pub analytics: Arc<dyn Analytics>,
    /// Expired-session reaction.
    pub session_expiry: Arc<dyn SessionExpiryHandler>,
}

impl CartCollaborators {
    /// Collaborators with buyer-only eligibility, tracing analytics, and a
    /// logging expiry handler.
    #[must_use]
    pub fn new(source: Arc<dyn RemoteCartSource>, identity: Arc<dyn IdentityProvider>) -> Self {
        Self {
            source,
            identity,
            roles: Arc::new(BuyerRoleChecker),
            analytics: Arc::new(TracingAnalytics),
            session_expiry: Arc::new(LoggingExpiryHandler::default()),
        }
    }

    /// Collaborators wired from configuration.
    ///
    /// Events go to the collector at `analytics_url` when one is set, and
    /// expired sessions are pointed at the configured login page.
    ///
    /// # Errors
    ///
    /// Returns an error if the analytics HTTP client fails to build.
    pub fn from_config(
        config: &CartConfig,
        source: Arc<dyn RemoteCartSource>,
        identity: Arc<dyn IdentityProvider>,
    ) -> std::result::Result<Self, RemoteError> {
        let mut deps = Self::new(source, identity);

        if let Some(endpoint) = &config.analytics_url {
            let client = reqwest::Client::builder()
                .timeout(config.api.request_timeout)
                .build()?;
            deps.analytics = Arc::new(CollectorAnalytics::new(client, endpoint.clone()));
        }

        match config.login_url() {
            Ok(login_url) => {
                deps.session_expiry = Arc::new(LoggingExpiryHandler::new(login_url));
            }
            Err(e) => warn!(error = %e, path = %config.login_path, "Invalid login path, ignoring"),
        }

        Ok(deps)
    }

    /// Replace the role checker.
    #[must_use]
    pub fn with_roles(mut self, roles: Arc<dyn RoleChecker>) -> Self {
        self.roles = roles;
        self
    }

    /// Replace the analytics sink.
    #[must_use]
    pub fn with_analytics(mut self, analytics: Arc<dyn Analytics>) -> Self {
        self.analytics = analytics;
        self
    }

    /// Replace the expired-session handler.
    #[must_use]
    pub fn with_session_expiry(mut self, handler: Arc<dyn SessionExpiryHandler>) -> Self {
        self.session_expiry = handler;
        self
    }
}

/// Client-side cart store.
///
/// Cheap to clone; clones share one cart. Consumers read [`snapshot`] or
/// [`subscribe`] and act through [`reconcile`], [`remove`], [`open`],
/// [`close`], [`checkout`], and [`clear`].
///
/// [`snapshot`]: Self::snapshot
/// [`subscribe`]: Self::subscribe
/// [`reconcile`]: Self::reconcile
/// [`remove`]: Self::remove
/// [`open`]: Self::open
/// [`close`]: Self::close
/// [`checkout`]: Self::checkout
/// [`clear`]: Self::clear
#[derive(Clone)]
pub struct CartStore {
    inner: Arc<CartStoreInner>,
}

struct CartStoreInner {
    state: Mutex<CartState>,
    checkout_url: Option<Url>,
    safety_timer: Mutex<Option<SafetyTimer>>,
    snapshots: watch::Sender<CartSnapshot>,
    deps: CartCollaborators,
    timings: CartTimings,
}

impl CartStore {
    /// Create an empty store. Nothing is fetched until [`Self::reconcile`].
    #[must_use]
    pub fn new(deps: CartCollaborators, timings: CartTimings) -> Self {
        Self::build(deps, timings, None)
    }

    /// Create an empty store wired from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the collaborators cannot be built; see
    /// [`CartCollaborators::from_config`].
    pub fn from_config(
        config: &CartConfig,
        source: Arc<dyn RemoteCartSource>,
        identity: Arc<dyn IdentityProvider>,
    ) -> std::result::Result<Self, RemoteError> {
        let deps = CartCollaborators::from_config(config, source, identity)?;
        let checkout_url = config
            .checkout_url()
            .inspect_err(|e| {
                warn!(error = %e, path = %config.checkout_path, "Invalid checkout path, ignoring");
            })
            .ok();
        Ok(Self::build(deps, config.timings, checkout_url))
    }

    fn build(deps: CartCollaborators, timings: CartTimings, checkout_url: Option<Url>) -> Self {
        let state = CartState::default();
        let (snapshots, _) = watch::channel(state.snapshot(0));
        Self {
            inner: Arc::new(CartStoreInner {
                state: Mutex::new(state),
                checkout_url,
                safety_timer: Mutex::new(None),
                snapshots,
                deps,
                timings,
            }),
        }
    }

    /// Current cart contents and flags.
    #[must_use]
    pub fn snapshot(&self) -> CartSnapshot {
        self.inner.snapshots.borrow().clone()
    }

    /// Receive a new snapshot every time the visible state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<CartSnapshot> {
        self.inner.snapshots.subscribe()
    }

    /// Whether the current session may own a cart.
    #[must_use]
    pub fn is_eligible(&self) -> bool {
        self.inner.eligible_identity().is_some()
    }

    /// Fetch the server cart and merge it into local state.
    ///
    /// Safe to call concurrently. Never fails: a fetch error keeps the
    /// current items and is reported through the outcome and the snapshot's
    /// `last_error`.
    #[instrument(skip(self), fields(seq))]
    pub async fn reconcile(&self) -> ReconcileOutcome {
        let seq = self.inner.begin_reconcile();
        tracing::Span::current().record("seq", seq);

        let mut guard = ReconcileGuard {
            inner: &self.inner,
            seq,
            completed: false,
        };
        let outcome = self.inner.run_reconcile(seq).await;
        guard.completed = true;
        drop(guard);

        debug!(outcome = outcome.kind(), "Reconciliation finished");
        outcome
    }

    /// Remove an item, optimistically.
    ///
    /// The item disappears from the snapshot before the delete request is
    /// sent. If the server rejects the delete, the cart is reconciled back to
    /// the server's contents before this returns.
    ///
    /// # Errors
    ///
    /// - [`CartError::RoleIneligible`] if the session may not own a cart; nothing is mutated
    /// - [`CartError::SessionExpired`] if the token was rejected; the removal stays local
    ///   and the expiry handler runs after the configured delay
    /// - [`CartError::RemoveFailed`] for any other failure, after the rollback
    #[instrument(skip(self), fields(item_id = %item_id))]
    pub async fn remove(&self, item_id: &ItemId) -> Result<()> {
        let Some(identity) = self.inner.eligible_identity() else {
            debug!("Removal refused: session is not an eligible cart owner");
            return Err(CartError::RoleIneligible);
        };

        let removal = self.inner.begin_removal(item_id);

        match self.inner.deps.source.delete_item(item_id, &identity).await {
            Ok(()) => {
                removal.confirm();
                info!("Item removed from cart");
                self.schedule_refresh();
                Ok(())
            }
            Err(RemoteError::SessionExpired) => {
                drop(removal);
                warn!("Session expired while removing item");
                add_breadcrumb("cart", "Session expired during removal", None);
                self.schedule_session_expiry();
                Err(CartError::SessionExpired)
            }
            Err(error) => {
                drop(removal);
                warn!(error = %error, "Removal failed, restoring cart from server");
                let message = error.to_string();
                add_breadcrumb(
                    "cart",
                    "Removal rolled back",
                    Some(&[("item_id", item_id.as_str()), ("error", message.as_str())]),
                );
                let outcome = self.reconcile().await;
                debug!(outcome = outcome.kind(), "Rollback reconciliation finished");
                Err(CartError::RemoveFailed(error))
            }
        }
    }

    /// Open the cart drawer.
    ///
    /// On a closed-to-open transition, emits `cart_opened` (and `cart_viewed`
    /// when the cart is non-empty), then reconciles if the session is an
    /// eligible cart owner. Opening an open drawer does nothing.
    #[instrument(skip(self))]
    pub async fn open(&self) -> Option<ReconcileOutcome> {
        let opened = self.inner.update(|state| {
            if state.is_open {
                return None;
            }
            state.is_open = true;
            let item_ids: Vec<ItemId> = state.items().iter().map(|item| item.id.clone()).collect();
            Some((item_ids, state.total_amount()))
        });

        let (item_ids, total) = opened?;

        self.inner.emit(AnalyticsEvent::CartOpened {
            item_count: item_ids.len(),
        });
        if !item_ids.is_empty() {
            self.inner.emit(AnalyticsEvent::CartViewed { item_ids, total });
        }

        if self.is_eligible() {
            Some(self.reconcile().await)
        } else {
            None
        }
    }

    /// Close the cart drawer.
    pub fn close(&self) {
        self.inner.update(|state| state.is_open = false);
    }

    /// Hand the cart to checkout.
    ///
    /// Closes the drawer and emits `checkout_started`.
    ///
    /// # Errors
    ///
    /// Returns [`CartError::EmptyCart`] if there is nothing to buy.
    pub fn checkout(&self) -> Result<CheckoutSummary> {
        let summary = self.inner.update(|state| {
            if state.items().is_empty() {
                return None;
            }
            state.is_open = false;
            Some(CheckoutSummary {
                item_ids: state.items().iter().map(|item| item.id.clone()).collect(),
                total: state.total_amount(),
                checkout_url: self.inner.checkout_url.clone(),
            })
        });

        let summary = summary.ok_or(CartError::EmptyCart)?;
        self.inner.emit(AnalyticsEvent::CheckoutStarted {
            item_count: summary.item_ids.len(),
            total: summary.total,
        });
        Ok(summary)
    }

    /// Drop all local cart state (logout).
    ///
    /// Reconciliations already in flight are discarded when they finish.
    pub fn clear(&self) {
        self.inner.update(CartState::clear);
        drop(self.inner.take_timer(None));
        info!("Cart cleared");
    }

    /// Reconcile every `interval` until the returned handle is dropped.
    ///
    /// The loop holds only a weak reference and exits once every store
    /// clone is gone.
    pub fn spawn_polling(&self, interval: Duration) -> BackgroundTask {
        let weak = Arc::downgrade(&self.inner);
        let period = interval.max(Duration::from_millis(1));

        BackgroundTask::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; the caller already loaded.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(store) = Self::upgrade(&weak) else {
                    break;
                };
                store.reconcile().await;
            }
        })
    }

    fn upgrade(weak: &Weak<CartStoreInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    /// Refresh in the background after a confirmed removal. Best effort.
    fn schedule_refresh(&self) {
        let weak = Arc::downgrade(&self.inner);
        let delay = self.inner.timings.refresh_delay;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(store) = Self::upgrade(&weak) {
                let outcome = store.reconcile().await;
                debug!(outcome = outcome.kind(), "Post-removal refresh finished");
            }
        });
    }

    fn schedule_session_expiry(&self) {
        let handler = Arc::clone(&self.inner.deps.session_expiry);
        let delay = self.inner.timings.session_expired_redirect_delay;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            handler.session_expired();
        });
    }
}

impl CartStoreInner {
    fn lock_state(&self) -> MutexGuard<'_, CartState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mutate state and publish the snapshot if anything visible changed.
    fn update<R>(&self, f: impl FnOnce(&mut CartState) -> R) -> R {
        let mut state = self.lock_state();
        let result = f(&mut state);
        let mut next = state.snapshot(0);

        self.snapshots.send_if_modified(|current| {
            next.revision = current.revision;
            if *current == next {
                return false;
            }
            next.revision += 1;
            *current = next;
            true
        });

        result
    }

    fn eligible_identity(&self) -> Option<Identity> {
        self.deps
            .identity
            .identity()
            .filter(|identity| self.deps.roles.is_cart_owner(identity))
    }

    fn begin_reconcile(self: &Arc<Self>) -> u64 {
        let seq = self.update(CartState::begin_reconcile);

        let weak = Arc::downgrade(self);
        let timer = SafetyTimer::start(seq, self.timings.safety_timeout, move || {
            if let Some(inner) = weak.upgrade() {
                warn!(seq, "Cart load exceeded safety timeout, clearing loading flag");
                inner.update(|state| state.loading = false);
            }
        });

        let replaced = self
            .safety_timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(timer);
        drop(replaced);
        seq
    }

    /// Take the safety timer, only if it belongs to `seq` when one is given.
    fn take_timer(&self, seq: Option<u64>) -> Option<SafetyTimer> {
        let mut slot = self
            .safety_timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let owned_by_other =
            matches!((seq, slot.as_ref()), (Some(seq), Some(timer)) if timer.seq() != seq);
        if owned_by_other { None } else { slot.take() }
    }

    async fn run_reconcile(&self, seq: u64) -> ReconcileOutcome {
        let Some(identity) = self.deps.identity.identity() else {
            debug!("No session identity, cart is empty");
            return match self.update(|state| {
                let merge = state.apply_anonymous(seq);
                state.finish_reconcile();
                merge
            }) {
                Merge::Superseded => ReconcileOutcome::Superseded,
                Merge::Applied | Merge::Unchanged => ReconcileOutcome::NoIdentity,
            };
        };

        match self.deps.source.fetch_cart(&identity).await {
            Ok(document) => {
                let shape = normalize(&document, &identity.user_id);
                debug!(shape = shape.kind(), "Normalized cart response");
                let items = shape.into_items();

                self.update(|state| {
                    let merge = state.apply_fetched(seq, items);
                    state.finish_reconcile();
                    merge
                })
                .into()
            }
            Err(error) => {
                warn!(error = %error, "Cart fetch failed, keeping current items");
                let message = error.to_string();
                add_breadcrumb("cart", "Cart refresh failed", Some(&[("error", message.as_str())]));
                self.update(|state| {
                    state.record_failure(seq, message);
                    state.finish_reconcile();
                });
                ReconcileOutcome::Failed(error)
            }
        }
    }

    fn begin_removal<'a>(&'a self, item_id: &ItemId) -> RemovalGuard<'a> {
        self.update(|state| {
            state.pending.register(item_id.clone());
            if state.remove_local(item_id).is_none() {
                debug!("Item not in local cart, removing remotely only");
            }
        });
        RemovalGuard {
            inner: self,
            item_id: item_id.clone(),
            armed: true,
        }
    }

    fn emit(&self, event: AnalyticsEvent) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!(event = event.name(), "No async runtime, analytics event dropped");
            return;
        };
        let analytics = Arc::clone(&self.deps.analytics);
        runtime.spawn(async move {
            let name = event.name();
            if let Err(e) = analytics.track(event).await {
                debug!(event = name, error = %e, "Analytics event dropped");
            }
        });
    }
}

/// Runs the end of a reconciliation, including when its future is dropped.
struct ReconcileGuard<'a> {
    inner: &'a CartStoreInner,
    seq: u64,
    completed: bool,
}

impl Drop for ReconcileGuard<'_> {
    fn drop(&mut self) {
        drop(self.inner.take_timer(Some(self.seq)));
        if !self.completed {
            debug!(seq = self.seq, "Reconciliation dropped before completing");
            self.inner.update(|state| state.abandon_reconcile(self.seq));
        }
    }
}

/// Unregisters a pending removal unless the delete was confirmed.
struct RemovalGuard<'a> {
    inner: &'a CartStoreInner,
    item_id: ItemId,
    armed: bool,
}

impl RemovalGuard<'_> {
    /// The server confirmed the delete. The id keeps filtering fetches that
    /// started before now and settles with the next fresh reconciliation.
    fn confirm(mut self) {
        self.armed = false;
        self.inner.update(|state| {
            let settles_at = state.next_seq();
            state.pending.confirm(&self.item_id, settles_at);
        });
    }
}

impl Drop for RemovalGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.update(|state| state.pending.release(&self.item_id));
        }
    }
}
