//! Store behavior against an in-memory remote cart.

#![allow(clippy::unwrap_used)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{Value, json};
use tokio::sync::oneshot;
use url::Url;

use marketplace_core::{CartItem, ItemId};

use super::*;
use crate::analytics::{Analytics, AnalyticsError, AnalyticsEvent};
use crate::config::{CartApiConfig, CartConfig, CartTimings};
use crate::error::CartError;
use crate::remote::{RemoteCartSource, RemoteError};
use crate::session::{Identity, SessionCookies, keys};

#[derive(Clone)]
enum FetchMode {
    /// Answer `{"items": <server cart>}`.
    Items,
    /// Answer this document verbatim.
    Raw(Value),
    Fail,
    Hang,
}

#[derive(Clone, Copy)]
enum DeleteMode {
    Succeed,
    Expired,
    Fail,
}

struct FakeSource {
    server: Mutex<Vec<CartItem>>,
    fetch_mode: Mutex<FetchMode>,
    delete_mode: Mutex<DeleteMode>,
    fetch_gates: Mutex<VecDeque<oneshot::Receiver<()>>>,
    delete_gate: Mutex<Option<oneshot::Receiver<()>>>,
    fetches: AtomicUsize,
    deletes: AtomicUsize,
}

impl FakeSource {
    fn new(items: Vec<CartItem>) -> Arc<Self> {
        Arc::new(Self {
            server: Mutex::new(items),
            fetch_mode: Mutex::new(FetchMode::Items),
            delete_mode: Mutex::new(DeleteMode::Succeed),
            fetch_gates: Mutex::new(VecDeque::new()),
            delete_gate: Mutex::new(None),
            fetches: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
        })
    }

    fn set_server(&self, items: Vec<CartItem>) {
        *self.server.lock().unwrap() = items;
    }

    fn set_fetch_mode(&self, mode: FetchMode) {
        *self.fetch_mode.lock().unwrap() = mode;
    }

    fn set_delete_mode(&self, mode: DeleteMode) {
        *self.delete_mode.lock().unwrap() = mode;
    }

    /// Hold the next fetch after it has read the server cart.
    fn gate_next_fetch(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.fetch_gates.lock().unwrap().push_back(rx);
        tx
    }

    /// Hold the next delete before it reaches the server cart.
    fn gate_next_delete(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.delete_gate.lock().unwrap() = Some(rx);
        tx
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteCartSource for FakeSource {
    async fn fetch_cart(&self, _identity: &Identity) -> Result<Value, RemoteError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let mode = self.fetch_mode.lock().unwrap().clone();
        let items = self.server.lock().unwrap().clone();
        let document = json!({ "items": items });

        let gate = self.fetch_gates.lock().unwrap().pop_front();
        if let Some(gate) = gate {
            let _ = gate.await;
        }

        match mode {
            FetchMode::Items => Ok(document),
            FetchMode::Raw(value) => Ok(value),
            FetchMode::Fail => Err(RemoteError::Api {
                status: 503,
                message: "unavailable".to_string(),
            }),
            FetchMode::Hang => std::future::pending().await,
        }
    }

    async fn delete_item(&self, item_id: &ItemId, _identity: &Identity) -> Result<(), RemoteError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);

        let gate = self.delete_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }

        let mode = *self.delete_mode.lock().unwrap();
        match mode {
            DeleteMode::Succeed => {
                self.server.lock().unwrap().retain(|item| &item.id != item_id);
                Ok(())
            }
            DeleteMode::Expired => Err(RemoteError::SessionExpired),
            DeleteMode::Fail => Err(RemoteError::Api {
                status: 500,
                message: "network down".to_string(),
            }),
        }
    }
}

#[derive(Default)]
struct RecordingAnalytics {
    events: Mutex<Vec<AnalyticsEvent>>,
}

impl RecordingAnalytics {
    fn count(&self, name: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| event.name() == name)
            .count()
    }
}

#[async_trait]
impl Analytics for RecordingAnalytics {
    async fn track(&self, event: AnalyticsEvent) -> Result<(), AnalyticsError> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

struct Harness {
    store: CartStore,
    source: Arc<FakeSource>,
    cookies: SessionCookies,
    analytics: Arc<RecordingAnalytics>,
    expired: Arc<AtomicUsize>,
}

fn item(id: &str, price: i64) -> CartItem {
    CartItem::new(id).with_field("price", price)
}

fn buyer_cookies() -> SessionCookies {
    let cookies = SessionCookies::new();
    cookies.set(keys::USER_ID, "u1");
    cookies.set(keys::AUTH_TOKEN, "token-u1");
    cookies.set(keys::ROLE, "buyer");
    cookies
}

fn harness(server: Vec<CartItem>, cookies: SessionCookies) -> Harness {
    let source = FakeSource::new(server);
    let analytics = Arc::new(RecordingAnalytics::default());
    let expired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&expired);

    let deps = CartCollaborators::new(source.clone(), Arc::new(cookies.clone()))
        .with_analytics(analytics.clone())
        .with_session_expiry(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

    Harness {
        store: CartStore::new(deps, CartTimings::default()),
        source,
        cookies,
        analytics,
        expired,
    }
}

fn ids(store: &CartStore) -> Vec<String> {
    store
        .snapshot()
        .items
        .iter()
        .map(|item| item.id.to_string())
        .collect()
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_repeated_reconcile_with_same_data_does_not_republish() {
    let h = harness(vec![item("a", 10), item("b", 5)], buyer_cookies());
    assert!(matches!(h.store.reconcile().await, ReconcileOutcome::Applied));

    let mut rx = h.store.subscribe();
    let revision = rx.borrow_and_update().revision;

    for _ in 0..3 {
        assert!(matches!(h.store.reconcile().await, ReconcileOutcome::Unchanged));
    }

    assert!(!rx.has_changed().unwrap());
    assert_eq!(h.store.snapshot().revision, revision);
    assert_eq!(h.source.fetches(), 4);
}

#[tokio::test]
async fn test_removal_is_visible_before_delete_resolves() {
    let h = harness(vec![item("a", 10), item("b", 5)], buyer_cookies());
    h.store.reconcile().await;

    let release = h.source.gate_next_delete();
    let store = h.store.clone();
    let removal = tokio::spawn(async move { store.remove(&ItemId::new("a")).await });
    settle().await;

    let snapshot = h.store.snapshot();
    assert_eq!(ids(&h.store), ["b"]);
    assert_eq!(snapshot.count, 1);
    assert_eq!(snapshot.total_amount, Decimal::from(5));
    assert_eq!(h.source.deletes(), 1);

    release.send(()).unwrap();
    removal.await.unwrap().unwrap();
    assert_eq!(ids(&h.store), ["b"]);
}

#[tokio::test(start_paused = true)]
async fn test_in_flight_reconcile_does_not_resurrect_removed_item() {
    let h = harness(vec![item("a", 10), item("b", 5)], buyer_cookies());
    h.store.reconcile().await;

    // This fetch reads the server cart while "a" is still in it.
    let release = h.source.gate_next_fetch();
    let store = h.store.clone();
    let racing = tokio::spawn(async move { store.reconcile().await });
    settle().await;

    h.store.remove(&ItemId::new("a")).await.unwrap();
    release.send(()).unwrap();

    racing.await.unwrap();
    assert_eq!(ids(&h.store), ["b"]);

    // Background refresh after the removal agrees with the server.
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(ids(&h.store), ["b"]);
    assert_eq!(h.source.fetches(), 3);
}

#[tokio::test]
async fn test_failed_removal_rolls_back_to_server_contents() {
    let h = harness(vec![item("a", 10)], buyer_cookies());
    h.store.reconcile().await;
    h.source.set_delete_mode(DeleteMode::Fail);

    let err = h.store.remove(&ItemId::new("a")).await.unwrap_err();
    assert!(matches!(err, CartError::RemoveFailed(RemoteError::Api { status: 500, .. })));

    let snapshot = h.store.snapshot();
    assert_eq!(ids(&h.store), ["a"]);
    assert_eq!(snapshot.total_amount, Decimal::from(10));
    assert_eq!(h.source.fetches(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_safety_timer_clears_loading_when_fetch_hangs() {
    let h = harness(vec![item("a", 10)], buyer_cookies());
    h.source.set_fetch_mode(FetchMode::Hang);

    let store = h.store.clone();
    let hanging = tokio::spawn(async move { store.reconcile().await });
    settle().await;
    assert!(h.store.snapshot().loading);

    tokio::time::sleep(CartTimings::default().safety_timeout + Duration::from_millis(1)).await;
    let snapshot = h.store.snapshot();
    assert!(!snapshot.loading);
    assert!(!snapshot.has_loaded_once);

    hanging.abort();
}

#[tokio::test(start_paused = true)]
async fn test_dropped_reconcile_clears_loading() {
    let h = harness(vec![item("a", 10)], buyer_cookies());
    h.source.set_fetch_mode(FetchMode::Hang);

    let store = h.store.clone();
    let hanging = tokio::spawn(async move { store.reconcile().await });
    settle().await;
    assert!(h.store.snapshot().loading);

    hanging.abort();
    assert!(hanging.await.unwrap_err().is_cancelled());
    assert!(!h.store.snapshot().loading);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_older_reconcile_leaves_newer_loading() {
    let h = harness(vec![item("a", 10)], buyer_cookies());
    h.source.set_fetch_mode(FetchMode::Hang);

    let store = h.store.clone();
    let older = tokio::spawn(async move { store.reconcile().await });
    settle().await;
    let store = h.store.clone();
    let newer = tokio::spawn(async move { store.reconcile().await });
    settle().await;

    older.abort();
    assert!(older.await.unwrap_err().is_cancelled());
    assert!(h.store.snapshot().loading);

    // The newer reconciliation's safety timer still bounds the flag.
    tokio::time::sleep(CartTimings::default().safety_timeout + Duration::from_millis(1)).await;
    assert!(!h.store.snapshot().loading);
    newer.abort();
}

#[tokio::test]
async fn test_anonymous_reconcile_is_empty_without_network() {
    let h = harness(vec![item("a", 10)], SessionCookies::new());

    let outcome = h.store.reconcile().await;
    assert!(matches!(outcome, ReconcileOutcome::NoIdentity));

    let snapshot = h.store.snapshot();
    assert!(snapshot.items.is_empty());
    assert_eq!(snapshot.count, 0);
    assert!(!snapshot.loading);
    assert!(snapshot.has_loaded_once);
    assert_eq!(h.source.fetches(), 0);
}

#[tokio::test]
async fn test_products_response_shape() {
    let h = harness(Vec::new(), buyer_cookies());
    h.source
        .set_fetch_mode(FetchMode::Raw(json!({"products": [{"id": "a", "price": 10}]})));

    h.store.reconcile().await;

    let snapshot = h.store.snapshot();
    assert_eq!(snapshot.items, vec![item("a", 10)]);
    assert_eq!(snapshot.total_amount, Decimal::from(10));
}

#[tokio::test(start_paused = true)]
async fn test_remove_last_item_stays_empty_after_refresh() {
    let h = harness(vec![item("a", 10)], buyer_cookies());
    h.store.reconcile().await;

    h.store.remove(&ItemId::new("a")).await.unwrap();
    let snapshot = h.store.snapshot();
    assert!(snapshot.items.is_empty());
    assert_eq!(snapshot.total_amount, Decimal::ZERO);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(h.store.snapshot().items.is_empty());
    assert_eq!(h.source.fetches(), 2);
}

#[tokio::test]
async fn test_out_of_range_prices_do_not_panic() {
    let h = harness(Vec::new(), buyer_cookies());
    h.source.set_fetch_mode(FetchMode::Raw(json!({"products": [
        {"id": "a", "price": "79228162514264337593543950335"},
        {"id": "b", "price": "1"}
    ]})));

    let store = h.store.clone();
    let outcome = tokio::spawn(async move { store.reconcile().await }).await.unwrap();
    assert!(matches!(outcome, ReconcileOutcome::Applied));

    let snapshot = h.store.snapshot();
    assert_eq!(snapshot.count, 2);
    assert_eq!(snapshot.total_amount, Decimal::MAX);
}

#[tokio::test(start_paused = true)]
async fn test_failed_duplicate_removal_keeps_item_hidden() {
    let h = harness(vec![item("a", 10), item("b", 5)], buyer_cookies());
    h.store.reconcile().await;

    let release = h.source.gate_next_delete();
    let store = h.store.clone();
    let first = tokio::spawn(async move { store.remove(&ItemId::new("a")).await });
    settle().await;

    // A second removal of the same item fails and rolls back while the
    // first delete is still outstanding.
    h.source.set_delete_mode(DeleteMode::Fail);
    let err = h.store.remove(&ItemId::new("a")).await.unwrap_err();
    assert!(matches!(err, CartError::RemoveFailed(_)));
    assert_eq!(ids(&h.store), ["b"]);

    h.source.set_delete_mode(DeleteMode::Succeed);
    release.send(()).unwrap();
    first.await.unwrap().unwrap();
    assert_eq!(ids(&h.store), ["b"]);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(ids(&h.store), ["b"]);
}

#[tokio::test]
async fn test_ineligible_role_cannot_remove() {
    let cookies = buyer_cookies();
    cookies.set(keys::ROLE, "creator");
    let h = harness(vec![item("a", 10)], cookies);
    h.store.reconcile().await;
    let before = h.store.snapshot();

    assert!(!h.store.is_eligible());
    let err = h.store.remove(&ItemId::new("a")).await.unwrap_err();
    assert!(matches!(err, CartError::RoleIneligible));
    assert_eq!(h.store.snapshot(), before);
    assert_eq!(h.source.deletes(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_expired_session_keeps_removal_and_runs_handler_later() {
    let h = harness(vec![item("a", 10), item("b", 5)], buyer_cookies());
    h.store.reconcile().await;
    h.source.set_delete_mode(DeleteMode::Expired);

    let err = h.store.remove(&ItemId::new("a")).await.unwrap_err();
    assert!(matches!(err, CartError::SessionExpired));
    assert_eq!(ids(&h.store), ["b"]);
    assert_eq!(h.expired.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(h.expired.load(Ordering::SeqCst), 1);
    assert_eq!(h.source.fetches(), 1);
}

#[tokio::test]
async fn test_stale_reconcile_is_superseded() {
    let h = harness(vec![item("a", 10)], buyer_cookies());

    let release = h.source.gate_next_fetch();
    let store = h.store.clone();
    let slow = tokio::spawn(async move { store.reconcile().await });
    settle().await;

    h.source.set_server(vec![item("a", 10), item("b", 5)]);
    assert!(matches!(h.store.reconcile().await, ReconcileOutcome::Applied));

    release.send(()).unwrap();
    assert!(matches!(slow.await.unwrap(), ReconcileOutcome::Superseded));
    assert_eq!(ids(&h.store), ["a", "b"]);
}

#[tokio::test]
async fn test_fetch_failure_keeps_items() {
    let h = harness(vec![item("a", 10)], buyer_cookies());
    h.store.reconcile().await;
    h.source.set_fetch_mode(FetchMode::Fail);

    let outcome = h.store.reconcile().await;
    assert!(matches!(outcome, ReconcileOutcome::Failed(_)));

    let snapshot = h.store.snapshot();
    assert_eq!(ids(&h.store), ["a"]);
    assert!(!snapshot.loading);
    assert!(snapshot.last_error.unwrap().contains("503"));

    h.source.set_fetch_mode(FetchMode::Items);
    h.store.reconcile().await;
    assert_eq!(h.store.snapshot().last_error, None);
}

#[tokio::test]
async fn test_open_emits_events_once_per_transition() {
    let h = harness(vec![item("a", 10)], buyer_cookies());
    h.store.reconcile().await;

    assert!(h.store.open().await.is_some());
    assert!(h.store.open().await.is_none());
    assert!(h.store.snapshot().is_open);
    settle().await;
    assert_eq!(h.analytics.count("cart_opened"), 1);
    assert_eq!(h.analytics.count("cart_viewed"), 1);

    h.store.close();
    assert!(!h.store.snapshot().is_open);
    h.store.open().await;
    settle().await;
    assert_eq!(h.analytics.count("cart_opened"), 2);
}

#[tokio::test]
async fn test_open_anonymous_skips_reconcile() {
    let h = harness(vec![item("a", 10)], SessionCookies::new());

    assert!(h.store.open().await.is_none());
    settle().await;
    assert_eq!(h.analytics.count("cart_opened"), 1);
    assert_eq!(h.analytics.count("cart_viewed"), 0);
    assert_eq!(h.source.fetches(), 0);
}

#[tokio::test]
async fn test_clear_discards_in_flight_reconcile() {
    let h = harness(vec![item("a", 10)], buyer_cookies());
    h.store.reconcile().await;

    let release = h.source.gate_next_fetch();
    let store = h.store.clone();
    let in_flight = tokio::spawn(async move { store.reconcile().await });
    settle().await;

    h.cookies.clear();
    h.store.clear();
    release.send(()).unwrap();

    assert!(matches!(in_flight.await.unwrap(), ReconcileOutcome::Superseded));
    let snapshot = h.store.snapshot();
    assert!(snapshot.items.is_empty());
    assert!(snapshot.has_loaded_once);
}

#[tokio::test]
async fn test_checkout() {
    let h = harness(vec![item("a", 10), item("b", 5)], buyer_cookies());
    assert!(matches!(h.store.checkout(), Err(CartError::EmptyCart)));

    h.store.reconcile().await;
    h.store.open().await;
    let summary = h.store.checkout().unwrap();

    assert_eq!(summary.item_ids, [ItemId::new("a"), ItemId::new("b")]);
    assert_eq!(summary.total, Decimal::from(15));
    assert_eq!(summary.checkout_url, None);
    assert!(!h.store.snapshot().is_open);
    settle().await;
    assert_eq!(h.analytics.count("checkout_started"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_polling_reconciles_until_dropped() {
    let h = harness(vec![item("a", 10)], buyer_cookies());
    h.store.reconcile().await;

    let polling = h.store.spawn_polling(Duration::from_secs(10));
    h.source.set_server(vec![item("a", 10), item("b", 5)]);

    tokio::time::sleep(Duration::from_secs(25)).await;
    assert_eq!(h.source.fetches(), 3);
    assert_eq!(ids(&h.store), ["a", "b"]);

    drop(polling);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.source.fetches(), 3);
}

#[test]
fn test_sync_operations_need_no_runtime() {
    let h = harness(Vec::new(), buyer_cookies());
    assert!(matches!(h.store.checkout(), Err(CartError::EmptyCart)));
    h.store.close();
    assert!(!h.store.snapshot().is_open);
}

#[tokio::test]
async fn test_store_from_config_carries_checkout_url() {
    let config = CartConfig {
        api: CartApiConfig::new(Url::parse("https://shop.example.com/api/").unwrap()),
        timings: CartTimings::default(),
        login_path: "/login".to_string(),
        checkout_path: "/checkout".to_string(),
        analytics_url: None,
        sentry_dsn: None,
        sentry_environment: None,
    };
    let source = FakeSource::new(vec![item("a", 10)]);
    let store = CartStore::from_config(&config, source, Arc::new(buyer_cookies())).unwrap();

    store.reconcile().await;
    let summary = store.checkout().unwrap();
    assert_eq!(
        summary.checkout_url.unwrap().as_str(),
        "https://shop.example.com/checkout"
    );
}
