//! Canonical in-memory cart state and its merge rules.
//!
//! Everything here is synchronous. The store wraps [`CartState`] in a mutex
//! and never holds the lock across an await, so each method below is atomic
//! with respect to other store operations.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::warn;

use marketplace_core::price::{checked_sum_amounts, sum_amounts};
use marketplace_core::{CartItem, ItemId};

/// What presentation consumers see.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CartSnapshot {
    /// Cart lines in server order.
    pub items: Vec<CartItem>,
    /// Always `items.len()`.
    pub count: usize,
    /// Always the sum of the items' prices.
    pub total_amount: Decimal,
    /// True only while the first load is outstanding.
    pub loading: bool,
    /// Set once the first fetch completes; never reset.
    pub has_loaded_once: bool,
    /// Drawer visibility.
    pub is_open: bool,
    /// Last refresh failure, cleared by the next applied refresh.
    pub last_error: Option<String>,
    /// When `items` was last replaced from the server.
    pub last_applied_at: Option<DateTime<Utc>>,
    /// Bumped on every published change; the re-render counter.
    pub revision: u64,
}

/// Result of merging a fetched item list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Merge {
    /// `items` was replaced.
    Applied,
    /// Same id set as before; nothing replaced.
    Unchanged,
    /// A newer fetch was already applied; the result was dropped.
    Superseded,
}

/// Removal bookkeeping for one item id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct PendingRemoval {
    /// Delete requests for this id not yet answered.
    in_flight: usize,
    /// Set once a delete is confirmed. Fetches that started before
    /// `settles_at` may still report the item and keep being filtered.
    settles_at: Option<u64>,
}

/// Item ids removed locally but not yet known to be gone from the server.
///
/// Overlapping removals of one id are counted, so a failing one never
/// unblocks an id another removal still holds.
#[derive(Debug, Default)]
pub(crate) struct PendingRemovals {
    entries: HashMap<ItemId, PendingRemoval>,
}

impl PendingRemovals {
    pub(crate) fn register(&mut self, id: ItemId) {
        self.entries.entry(id).or_default().in_flight += 1;
    }

    pub(crate) fn confirm(&mut self, id: &ItemId, settles_at: u64) {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.in_flight = entry.in_flight.saturating_sub(1);
            entry.settles_at = Some(entry.settles_at.map_or(settles_at, |s| s.max(settles_at)));
        }
    }

    /// Drop one unconfirmed removal. Returns whether the id stopped being pending.
    pub(crate) fn release(&mut self, id: &ItemId) -> bool {
        let Some(entry) = self.entries.get_mut(id) else {
            return false;
        };
        entry.in_flight = entry.in_flight.saturating_sub(1);
        if entry.in_flight == 0 && entry.settles_at.is_none() {
            self.entries.remove(id);
            return true;
        }
        false
    }

    /// Drop confirmed removals that a fetch started at `seq` already reflects.
    fn settle(&mut self, seq: u64) {
        self.entries.retain(|_, entry| {
            entry.in_flight > 0 || entry.settles_at.is_some_and(|settles_at| settles_at > seq)
        });
    }

    pub(crate) fn contains(&self, id: &ItemId) -> bool {
        self.entries.contains_key(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

/// The cart store's private state.
#[derive(Debug)]
pub(crate) struct CartState {
    items: Vec<CartItem>,
    total_amount: Decimal,
    pub(crate) loading: bool,
    has_loaded_once: bool,
    pub(crate) is_open: bool,
    pub(crate) pending: PendingRemovals,
    last_error: Option<String>,
    last_applied_at: Option<DateTime<Utc>>,
    /// Sequence number the next reconciliation will take.
    next_seq: u64,
    /// Results from reconciliations below this are stale.
    applied_seq: u64,
}

impl Default for CartState {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            total_amount: Decimal::ZERO,
            loading: false,
            has_loaded_once: false,
            is_open: false,
            pending: PendingRemovals::default(),
            last_error: None,
            last_applied_at: None,
            next_seq: 1,
            applied_seq: 0,
        }
    }
}

impl CartState {
    pub(crate) fn items(&self) -> &[CartItem] {
        &self.items
    }

    pub(crate) const fn total_amount(&self) -> Decimal {
        self.total_amount
    }

    pub(crate) const fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Take a sequence number for a new reconciliation.
    ///
    /// Raises `loading` only for the very first load of an empty cart, so
    /// background refreshes never flicker a spinner.
    pub(crate) fn begin_reconcile(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        if !self.has_loaded_once && self.items.is_empty() {
            self.loading = true;
        }
        seq
    }

    /// A reconciliation was dropped before completing.
    ///
    /// Lowers `loading` only if no newer reconciliation has started since;
    /// a newer one owns the flag and its own safety timer.
    pub(crate) const fn abandon_reconcile(&mut self, seq: u64) {
        if seq + 1 == self.next_seq {
            self.loading = false;
        }
    }

    /// Mark a reconciliation as completed (success or handled failure).
    pub(crate) const fn finish_reconcile(&mut self) {
        self.loading = false;
        self.has_loaded_once = true;
    }

    /// Merge a fetched item list.
    pub(crate) fn apply_fetched(&mut self, seq: u64, fetched: Vec<CartItem>) -> Merge {
        if seq < self.applied_seq {
            return Merge::Superseded;
        }
        self.applied_seq = seq;
        self.last_error = None;
        self.pending.settle(seq);

        let mut seen = HashSet::with_capacity(fetched.len());
        let merged: Vec<CartItem> = fetched
            .into_iter()
            .filter(|item| !self.pending.contains(&item.id))
            .filter(|item| seen.insert(item.id.clone()))
            .collect();

        if seen == self.id_set() {
            return Merge::Unchanged;
        }

        self.set_items(merged);
        self.last_applied_at = Some(Utc::now());
        Merge::Applied
    }

    /// Anonymous session: the cart is empty by definition.
    pub(crate) fn apply_anonymous(&mut self, seq: u64) -> Merge {
        if seq < self.applied_seq {
            return Merge::Superseded;
        }
        self.applied_seq = seq;
        self.last_error = None;
        self.pending.clear();

        if self.items.is_empty() {
            return Merge::Unchanged;
        }
        self.set_items(Vec::new());
        Merge::Applied
    }

    /// Record a failed fetch without touching `items`.
    pub(crate) fn record_failure(&mut self, seq: u64, message: String) {
        if seq >= self.applied_seq {
            self.last_error = Some(message);
        }
    }

    /// Optimistically drop an item from the local list.
    pub(crate) fn remove_local(&mut self, id: &ItemId) -> Option<CartItem> {
        let position = self.items.iter().position(|item| &item.id == id)?;
        let mut items = std::mem::take(&mut self.items);
        let removed = items.remove(position);
        self.set_items(items);
        Some(removed)
    }

    /// Logout-equivalent reset. Every reconciliation already started is
    /// invalidated; `has_loaded_once` survives.
    pub(crate) fn clear(&mut self) {
        self.set_items(Vec::new());
        self.pending.clear();
        self.loading = false;
        self.is_open = false;
        self.last_error = None;
        self.applied_seq = self.next_seq;
    }

    /// The only way `items` changes; keeps the total derived.
    fn set_items(&mut self, items: Vec<CartItem>) {
        let prices = || items.iter().map(CartItem::price);
        self.total_amount = checked_sum_amounts(prices()).unwrap_or_else(|| {
            warn!(count = items.len(), "Cart total out of range, saturating");
            sum_amounts(prices())
        });
        self.items = items;
    }

    fn id_set(&self) -> HashSet<ItemId> {
        self.items.iter().map(|item| item.id.clone()).collect()
    }

    pub(crate) fn snapshot(&self, revision: u64) -> CartSnapshot {
        CartSnapshot {
            items: self.items.clone(),
            count: self.items.len(),
            total_amount: self.total_amount,
            loading: self.loading,
            has_loaded_once: self.has_loaded_once,
            is_open: self.is_open,
            last_error: self.last_error.clone(),
            last_applied_at: self.last_applied_at,
            revision,
        }
    }
}
