//! Generic cached stores over remote entity collections.
//!
//! A `Store<T>` turns an async "fetch the whole collection" operation into a
//! shareable state container:
//!
//! - The first `read()` lazily issues the initial fetch
//! - At most one fetch is in flight per store; concurrent callers coalesce
//! - Failed fetches keep the last good items (stale-while-revalidate)
//! - Results of superseded fetches are discarded by sequence number
//! - Quote-backed stores schedule one deferred refresh from their TTL policy
//!
//! Every state transition happens under a short, non-async lock and is
//! published to watchers through a `tokio::sync::watch` channel.

pub mod fetcher;
pub mod registry;
pub mod snapshot;

pub use fetcher::Fetcher;
pub use registry::StoreRegistry;
pub use snapshot::{CachedCollection, FetchTicket, Status, StoreView};

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::FetchError;
use crate::ttl::TtlPolicy;

/// Shortest wait before a scheduled refresh, so a policy reporting zero
/// seconds left (end of day at 23:59:59) refetches at most once per second.
const MIN_REFRESH_DELAY: Duration = Duration::from_secs(1);

/// Cached, shareable state container for one entity collection.
///
/// Clone is cheap and every clone refers to the same store.
pub struct Store<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Store<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("name", &self.inner.name)
            .field("refresh_policy", &self.inner.refresh_policy)
            .finish_non_exhaustive()
    }
}

struct Inner<T> {
    name: String,
    fetcher: Arc<dyn Fetcher<T>>,
    refresh_policy: Option<TtlPolicy>,
    state: Mutex<State<T>>,
    tx: watch::Sender<CachedCollection<T>>,
}

struct State<T> {
    snapshot: CachedCollection<T>,
    /// Highest sequence number handed out. Only a completion carrying this
    /// number may be applied.
    issued_seq: u64,
    in_flight: Option<InFlight>,
    session: Option<String>,
    /// Floor for `fetched_at` so it never moves backwards, even across resets.
    last_fetched_at: Option<DateTime<Utc>>,
    refresh: Option<ScheduledRefresh>,
    refresh_generation: u64,
}

struct InFlight {
    seq: u64,
    /// A forced retrieve arrived while this fetch was outstanding.
    reissue: bool,
    session: Option<String>,
}

struct ScheduledRefresh {
    due_at: DateTime<Utc>,
    handle: JoinHandle<()>,
}

/// A fetch that was registered under the lock and still has to be started.
struct PendingFetch {
    seq: u64,
}

pub struct StoreBuilder<T> {
    name: String,
    fetcher: Arc<dyn Fetcher<T>>,
    refresh_policy: Option<TtlPolicy>,
    session: Option<String>,
}

impl<T: Send + Sync + 'static> StoreBuilder<T> {
    /// Schedule a refresh at `fetched_at + ttl(fetched_at)` after each
    /// successful fetch, and use the policy for `ensure_fresh`.
    pub fn refresh_policy(mut self, policy: TtlPolicy) -> Self {
        self.refresh_policy = Some(policy);
        self
    }

    pub fn session(mut self, session: Option<String>) -> Self {
        self.session = session;
        self
    }

    pub fn build(self) -> Store<T> {
        let (tx, _rx) = watch::channel(CachedCollection::empty());
        Store {
            inner: Arc::new(Inner {
                name: self.name,
                fetcher: self.fetcher,
                refresh_policy: self.refresh_policy,
                state: Mutex::new(State {
                    snapshot: CachedCollection::empty(),
                    issued_seq: 0,
                    in_flight: None,
                    session: self.session,
                    last_fetched_at: None,
                    refresh: None,
                    refresh_generation: 0,
                }),
                tx,
            }),
        }
    }
}

impl<T: Send + Sync + 'static> Store<T> {
    pub fn new(name: impl Into<String>, fetcher: impl Fetcher<T>) -> Self {
        Self::builder(name, fetcher).build()
    }

    pub fn builder(name: impl Into<String>, fetcher: impl Fetcher<T>) -> StoreBuilder<T> {
        StoreBuilder {
            name: name.into(),
            fetcher: Arc::new(fetcher),
            refresh_policy: None,
            session: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn refresh_policy(&self) -> Option<TtlPolicy> {
        self.inner.refresh_policy
    }

    // ===== Reads =====

    /// Current snapshot. Never blocks on the network.
    ///
    /// On an empty store (or one populated by a different session) this
    /// issues the initial fetch and returns the `Loading` snapshot.
    pub fn read(&self) -> CachedCollection<T> {
        let (snapshot, pending) = {
            let mut state = self.lock();
            let mut pending = None;

            if self.is_foreign_session(&state) {
                debug!(
                    store = %self.inner.name,
                    fetched_by = ?state.snapshot.fetched_by,
                    session = ?state.session,
                    "Cached data belongs to another session, refetching"
                );
                self.clear_locked(&mut state);
            }

            if state.snapshot.status == Status::Empty {
                pending = Some(self.register_fetch(&mut state));
            }
            (state.snapshot.clone(), pending)
        };

        if let Some(pending) = pending {
            self.launch(pending);
        }
        snapshot
    }

    /// UI-facing projection of `read()`.
    pub fn view(&self) -> StoreView<T> {
        StoreView::from(&self.read())
    }

    /// Current snapshot without triggering the lazy initial fetch.
    pub fn peek(&self) -> CachedCollection<T> {
        self.lock().snapshot.clone()
    }

    /// Receiver notified after every state transition.
    pub fn subscribe(&self) -> watch::Receiver<CachedCollection<T>> {
        self.inner.tx.subscribe()
    }

    /// Wait until no fetch is outstanding and return that snapshot.
    ///
    /// Returns immediately for an empty store; combine with `read()` or
    /// `retrieve()` to wait for a specific fetch.
    pub async fn settled(&self) -> CachedCollection<T> {
        let mut rx = self.subscribe();
        let result = rx.wait_for(|snapshot| snapshot.status != Status::Loading).await;
        match result {
            Ok(snapshot) => snapshot.clone(),
            // Unreachable while `self` holds the sender; fall back to the latest state
            Err(_) => self.peek(),
        }
    }

    // ===== Mutations =====

    /// Issue a fetch.
    ///
    /// Without `force`, an outstanding fetch is reused. With `force`, an
    /// outstanding fetch is re-issued once it completes rather than running a
    /// second request concurrently. Cancels any pending scheduled refresh.
    pub fn retrieve(&self, force: bool) {
        let pending = {
            let mut state = self.lock();
            self.cancel_scheduled_refresh(&mut state);

            match state.in_flight.as_mut() {
                Some(in_flight) => {
                    if force {
                        in_flight.reissue = true;
                        debug!(store = %self.inner.name, seq = in_flight.seq, "Forced retrieve queued behind in-flight fetch");
                    } else {
                        debug!(store = %self.inner.name, seq = in_flight.seq, "Retrieve coalesced with in-flight fetch");
                    }
                    None
                }
                None => Some(self.register_fetch(&mut state)),
            }
        };

        if let Some(pending) = pending {
            self.launch(pending);
        }
    }

    /// Refresh only if the cached items are missing, failed, or expired
    /// under the store's TTL policy.
    pub fn ensure_fresh(&self) {
        let fresh = {
            let state = self.lock();
            let snapshot = &state.snapshot;
            match (snapshot.status, snapshot.fetched_at) {
                (Status::Loading, _) => true,
                (Status::Ready, Some(fetched_at)) => match self.inner.refresh_policy {
                    Some(policy) => policy.is_fresh(fetched_at, Utc::now()),
                    None => true,
                },
                _ => false,
            }
        };

        if fresh {
            debug!(store = %self.inner.name, "Cached items still fresh, skipping fetch");
        } else {
            self.retrieve(false);
        }
    }

    /// Replace the items locally without a network call.
    ///
    /// Supersedes any outstanding fetch; its result will be discarded.
    pub fn set_data(&self, items: Vec<T>) {
        let mut state = self.lock();
        self.supersede_in_flight(&mut state);

        let fetched_at = Self::next_fetched_at(&mut state);
        state.snapshot = CachedCollection {
            items: Arc::new(items),
            status: Status::Ready,
            error: None,
            fetched_at: Some(fetched_at),
            fetched_by: state.session.clone(),
            in_flight: None,
        };
        debug!(store = %self.inner.name, count = state.snapshot.items.len(), "Items set locally");
        self.publish(&state);
    }

    /// Derive new items from the current ones, e.g. to push an entity that
    /// was just created through its service.
    pub fn update_data<F>(&self, f: F)
    where
        F: FnOnce(&[T]) -> Vec<T>,
    {
        let current = Arc::clone(&self.lock().snapshot.items);
        self.set_data(f(&current));
    }

    /// Drop cached items. The next `read()` fetches again.
    pub fn reset(&self) {
        let mut state = self.lock();
        self.clear_locked(&mut state);
        debug!(store = %self.inner.name, "Store reset");
        self.publish(&state);
    }

    /// Bind the store to a signed-in session (or none). Items fetched by a
    /// different session are refetched on the next `read()`.
    pub fn bind_session(&self, session: Option<String>) {
        let mut state = self.lock();
        if state.session != session {
            debug!(store = %self.inner.name, ?session, "Session bound");
            state.session = session;
        }
    }

    /// When the pending scheduled refresh will fire, if any.
    pub fn next_refresh_at(&self) -> Option<DateTime<Utc>> {
        self.lock().refresh.as_ref().map(|r| r.due_at)
    }

    // ===== Internals =====

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        // Transitions never leave partial state behind, so a poisoned lock is still usable
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &State<T>) {
        self.inner.tx.send_replace(state.snapshot.clone());
    }

    fn is_foreign_session(&self, state: &State<T>) -> bool {
        matches!(state.snapshot.status, Status::Ready | Status::Error)
            && state.snapshot.fetched_at.is_some()
            && state.session.is_some()
            && state.snapshot.fetched_by != state.session
    }

    fn next_fetched_at(state: &mut State<T>) -> DateTime<Utc> {
        let now = Utc::now();
        let fetched_at = match state.last_fetched_at {
            Some(prev) if prev > now => prev,
            _ => now,
        };
        state.last_fetched_at = Some(fetched_at);
        fetched_at
    }

    fn supersede_in_flight(&self, state: &mut State<T>) {
        if let Some(in_flight) = state.in_flight.take() {
            debug!(store = %self.inner.name, seq = in_flight.seq, "In-flight fetch superseded");
        }
        // Any completion carrying an older number is now stale
        state.issued_seq += 1;
        state.snapshot.in_flight = None;
    }

    fn clear_locked(&self, state: &mut State<T>) {
        self.cancel_scheduled_refresh(state);
        self.supersede_in_flight(state);
        state.snapshot = CachedCollection::empty();
    }

    /// Reserve a sequence number and move to `Loading`. The caller starts the
    /// fetch with `launch` once the lock is released.
    fn register_fetch(&self, state: &mut State<T>) -> PendingFetch {
        state.issued_seq += 1;
        let seq = state.issued_seq;
        state.in_flight = Some(InFlight {
            seq,
            reissue: false,
            session: state.session.clone(),
        });
        state.snapshot.status = Status::Loading;
        state.snapshot.in_flight = Some(FetchTicket(seq));
        debug!(store = %self.inner.name, seq, "Fetch issued");
        self.publish(state);
        PendingFetch { seq }
    }

    fn launch(&self, pending: PendingFetch) {
        let seq = pending.seq;
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(store = %self.inner.name, seq, "No Tokio runtime, fetch cannot run");
                self.complete(seq, Err(FetchError::NoRuntime));
                return;
            }
        };

        // A fetcher may panic while building its future as well as while running it
        let fut = match panic::catch_unwind(AssertUnwindSafe(|| self.inner.fetcher.fetch())) {
            Ok(fut) => AssertUnwindSafe(fut).catch_unwind(),
            Err(payload) => {
                let err = FetchError::from_panic(payload);
                warn!(store = %self.inner.name, seq, error = %err, "Fetcher panicked before starting");
                self.complete(seq, Err(err));
                return;
            }
        };

        let store = self.clone();
        handle.spawn(async move {
            let result = match fut.await {
                Ok(Ok(items)) => Ok(items),
                Ok(Err(err)) => Err(FetchError::from(err)),
                Err(payload) => Err(FetchError::from_panic(payload)),
            };
            store.complete(seq, result);
        });
    }

    fn complete(&self, seq: u64, result: Result<Vec<T>, FetchError>) {
        let pending = {
            let mut state = self.lock();

            if seq != state.issued_seq {
                debug!(store = %self.inner.name, seq, latest = state.issued_seq, "Discarding result of superseded fetch");
                return;
            }

            let in_flight = state.in_flight.take();
            let reissue = in_flight.as_ref().map(|f| f.reissue).unwrap_or(false);
            let session = in_flight.and_then(|f| f.session);
            state.snapshot.in_flight = None;

            match result {
                Ok(items) => {
                    let fetched_at = Self::next_fetched_at(&mut state);
                    info!(store = %self.inner.name, seq, count = items.len(), "Fetch applied");
                    state.snapshot.items = Arc::new(items);
                    state.snapshot.status = Status::Ready;
                    state.snapshot.error = None;
                    state.snapshot.fetched_at = Some(fetched_at);
                    state.snapshot.fetched_by = session;
                    if !reissue {
                        self.schedule_refresh(&mut state, fetched_at);
                    }
                }
                Err(err) => {
                    warn!(store = %self.inner.name, seq, error = %err, "Fetch failed, keeping cached items");
                    state.snapshot.status = Status::Error;
                    state.snapshot.error = Some(err);
                }
            }
            self.publish(&state);

            if reissue {
                Some(self.register_fetch(&mut state))
            } else {
                None
            }
        };

        if let Some(pending) = pending {
            self.launch(pending);
        }
    }

    fn cancel_scheduled_refresh(&self, state: &mut State<T>) {
        // Bumping the generation also neutralises a timer that already woke up
        state.refresh_generation += 1;
        if let Some(refresh) = state.refresh.take() {
            refresh.handle.abort();
            debug!(store = %self.inner.name, due_at = %refresh.due_at, "Scheduled refresh cancelled");
        }
    }

    fn schedule_refresh(&self, state: &mut State<T>, fetched_at: DateTime<Utc>) {
        let Some(policy) = self.inner.refresh_policy else {
            return;
        };
        let Ok(handle) = Handle::try_current() else {
            return;
        };

        self.cancel_scheduled_refresh(state);
        let generation = state.refresh_generation;

        // The timer and `next_refresh_at` share one deadline, never closer than the minimum delay
        let now = Utc::now();
        let earliest = now + chrono::Duration::seconds(MIN_REFRESH_DELAY.as_secs() as i64);
        let due_at = policy.expires_at(fetched_at).max(earliest);
        let delay = (due_at - now).to_std().unwrap_or(MIN_REFRESH_DELAY);
        let weak: Weak<Inner<T>> = Arc::downgrade(&self.inner);

        let task = handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                Store { inner }.run_scheduled_refresh(generation);
            }
        });

        info!(store = %self.inner.name, delay_secs = delay.as_secs(), %due_at, "Refresh scheduled");
        state.refresh = Some(ScheduledRefresh { due_at, handle: task });
    }

    fn run_scheduled_refresh(&self, generation: u64) {
        let pending = {
            let mut state = self.lock();
            if state.refresh_generation != generation {
                return;
            }
            state.refresh = None;
            if state.in_flight.is_some() {
                return;
            }
            debug!(store = %self.inner.name, "Scheduled refresh firing");
            self.register_fetch(&mut state)
        };
        self.launch(pending);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use anyhow::anyhow;
    use tokio::sync::oneshot;

    #[derive(Debug, Clone, PartialEq)]
    struct Category {
        id: u32,
        name: String,
    }

    fn groceries() -> Category {
        Category {
            id: 1,
            name: "Groceries".to_string(),
        }
    }

    /// Fetcher whose responses are released by the test through oneshot senders.
    #[derive(Clone, Default)]
    struct ControlledFetcher {
        calls: Arc<AtomicUsize>,
        responses: Arc<Mutex<VecDeque<oneshot::Receiver<anyhow::Result<Vec<Category>>>>>>,
    }

    impl ControlledFetcher {
        fn expect(&self) -> oneshot::Sender<anyhow::Result<Vec<Category>>> {
            let (tx, rx) = oneshot::channel();
            self.responses.lock().unwrap().push_back(rx);
            tx
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Fetcher<Category> for ControlledFetcher {
        fn fetch(&self) -> futures::future::BoxFuture<'static, anyhow::Result<Vec<Category>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let rx = self.responses.lock().unwrap().pop_front();
            Box::pin(async move {
                match rx {
                    Some(rx) => rx.await.unwrap_or_else(|_| Err(anyhow!("response dropped"))),
                    None => Err(anyhow!("unexpected fetch")),
                }
            })
        }
    }

    /// Let spawned fetch tasks run to completion on the current-thread runtime.
    async fn drain() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_store_is_lazy() {
        let fetcher = ControlledFetcher::default();
        let store = Store::new("categories", fetcher.clone());

        let snapshot = store.peek();
        assert_eq!(snapshot.status, Status::Empty);
        drain().await;
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_first_read_issues_exactly_one_fetch() {
        let fetcher = ControlledFetcher::default();
        let _tx = fetcher.expect();
        let store = Store::new("categories", fetcher.clone());

        let snapshot = store.read();
        assert_eq!(snapshot.status, Status::Loading);
        assert_eq!(snapshot.in_flight, Some(FetchTicket(1)));
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_reads_coalesce() {
        let fetcher = ControlledFetcher::default();
        let tx = fetcher.expect();
        let store = Store::new("categories", fetcher.clone());

        let first = store.read();
        let second = store.read();
        store.retrieve(false);
        assert_eq!(first.status, Status::Loading);
        assert_eq!(second.status, Status::Loading);
        assert_eq!(fetcher.calls(), 1);

        tx.send(Ok(vec![groceries()])).unwrap();
        let settled = store.settled().await;
        assert_eq!(settled.status, Status::Ready);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_success_populates_items() {
        let fetcher = ControlledFetcher::default();
        let tx = fetcher.expect();
        let store = Store::new("categories", fetcher.clone());

        store.read();
        tx.send(Ok(vec![groceries()])).unwrap();
        store.settled().await;

        let snapshot = store.read();
        assert_eq!(snapshot.status, Status::Ready);
        assert_eq!(*snapshot.items, vec![groceries()]);
        assert!(snapshot.error.is_none());
        assert!(snapshot.fetched_at.is_some());
        assert!(snapshot.in_flight.is_none());
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_failure_keeps_previous_items() {
        let fetcher = ControlledFetcher::default();
        let ok = fetcher.expect();
        let fail = fetcher.expect();
        let store = Store::new("categories", fetcher.clone());

        store.read();
        ok.send(Ok(vec![groceries()])).unwrap();
        let first = store.settled().await;

        store.retrieve(true);
        fail.send(Err(anyhow!("network"))).unwrap();
        let snapshot = store.settled().await;

        assert_eq!(snapshot.status, Status::Error);
        assert_eq!(*snapshot.items, vec![groceries()]);
        assert_eq!(snapshot.error.as_ref().map(|e| e.to_string()), Some("network".to_string()));
        assert_eq!(snapshot.fetched_at, first.fetched_at);
        assert!(snapshot.in_flight.is_none());
    }

    #[tokio::test]
    async fn test_failure_without_previous_items_is_empty() {
        let fetcher = ControlledFetcher::default();
        let fail = fetcher.expect();
        let store = Store::new("categories", fetcher.clone());

        store.read();
        fail.send(Err(anyhow!("offline"))).unwrap();
        let snapshot = store.settled().await;

        assert_eq!(snapshot.status, Status::Error);
        assert!(snapshot.items.is_empty());
        assert!(!snapshot.is_fetched());

        // Error state does not refetch on read; retries are caller-driven
        store.read();
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_retry_after_failure_clears_error() {
        let fetcher = ControlledFetcher::default();
        let fail = fetcher.expect();
        let ok = fetcher.expect();
        let store = Store::new("categories", fetcher.clone());

        store.read();
        fail.send(Err(anyhow!("offline"))).unwrap();
        store.settled().await;

        store.retrieve(false);
        ok.send(Ok(vec![groceries()])).unwrap();
        let snapshot = store.settled().await;
        assert_eq!(snapshot.status, Status::Ready);
        assert!(snapshot.error.is_none());
    }

    #[tokio::test]
    async fn test_panicking_fetcher_is_captured() {
        let store: Store<Category> = Store::new("categories", || async {
            if true {
                panic!("fetcher exploded");
            }
            anyhow::Ok(Vec::new())
        });

        store.read();
        let snapshot = store.settled().await;
        assert_eq!(snapshot.status, Status::Error);
        assert!(matches!(snapshot.error, Some(FetchError::Panicked(ref msg)) if msg == "fetcher exploded"));
    }

    /// Fails while building the request, before any future exists.
    #[derive(Clone, Default)]
    struct EagerPanicFetcher {
        calls: Arc<AtomicUsize>,
    }

    impl Fetcher<Category> for EagerPanicFetcher {
        fn fetch(&self) -> futures::future::BoxFuture<'static, anyhow::Result<Vec<Category>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            panic!("no connection pool");
        }
    }

    #[tokio::test]
    async fn test_fetcher_panicking_before_its_future_is_captured() {
        let fetcher = EagerPanicFetcher::default();
        let store = Store::new("categories", fetcher.clone());

        let snapshot = store.read();
        assert_eq!(snapshot.status, Status::Loading);

        let snapshot = store.peek();
        assert_eq!(snapshot.status, Status::Error);
        assert!(matches!(snapshot.error, Some(FetchError::Panicked(ref msg)) if msg == "no connection pool"));
        assert!(snapshot.in_flight.is_none());

        // The store is not wedged; a retry reaches the fetcher again
        store.retrieve(false);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.peek().status, Status::Error);
    }

    #[test]
    fn test_debug_shows_store_name() {
        let store: Store<Category> = Store::new("categories", || async { anyhow::Ok(Vec::new()) });
        let debug = format!("{:?}", store);
        assert!(debug.contains("categories"));
    }

    #[tokio::test]
    async fn test_superseded_fetch_result_is_discarded() {
        let fetcher = ControlledFetcher::default();
        let fetch_a = fetcher.expect();
        let fetch_b = fetcher.expect();
        let store = Store::new("categories", fetcher.clone());

        store.read();
        store.reset();
        store.read();
        assert_eq!(fetcher.calls(), 2);

        let b_items = vec![Category { id: 2, name: "Rent".to_string() }];
        fetch_b.send(Ok(b_items.clone())).unwrap();
        store.settled().await;

        fetch_a.send(Ok(vec![groceries()])).unwrap();
        drain().await;

        let snapshot = store.peek();
        assert_eq!(snapshot.status, Status::Ready);
        assert_eq!(*snapshot.items, b_items);
    }

    #[tokio::test]
    async fn test_older_fetch_resolving_first_does_not_settle_store() {
        let fetcher = ControlledFetcher::default();
        let fetch_a = fetcher.expect();
        let fetch_b = fetcher.expect();
        let store = Store::new("categories", fetcher.clone());

        store.read();
        store.reset();
        store.read();

        fetch_a.send(Ok(vec![groceries()])).unwrap();
        drain().await;
        let snapshot = store.peek();
        assert_eq!(snapshot.status, Status::Loading);
        assert!(snapshot.items.is_empty());

        fetch_b.send(Err(anyhow!("boom"))).unwrap();
        let snapshot = store.settled().await;
        assert_eq!(snapshot.status, Status::Error);
        assert!(snapshot.items.is_empty());
    }

    #[tokio::test]
    async fn test_forced_retrieve_reissues_after_in_flight_completes() {
        let fetcher = ControlledFetcher::default();
        let first = fetcher.expect();
        let second = fetcher.expect();
        let store = Store::new("categories", fetcher.clone());

        store.read();
        store.retrieve(true);
        store.retrieve(true);
        assert_eq!(fetcher.calls(), 1);

        first.send(Ok(vec![groceries()])).unwrap();
        drain().await;
        assert_eq!(fetcher.calls(), 2);
        assert_eq!(store.peek().status, Status::Loading);
        assert_eq!(*store.peek().items, vec![groceries()]);

        let updated = vec![groceries(), Category { id: 3, name: "Fuel".to_string() }];
        second.send(Ok(updated.clone())).unwrap();
        let snapshot = store.settled().await;
        assert_eq!(*snapshot.items, updated);
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_set_data_skips_network() {
        let fetcher = ControlledFetcher::default();
        let store = Store::new("categories", fetcher.clone());

        store.set_data(vec![groceries()]);
        let snapshot = store.read();
        assert_eq!(snapshot.status, Status::Ready);
        assert_eq!(*snapshot.items, vec![groceries()]);
        assert!(snapshot.fetched_at.is_some());
        drain().await;
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_set_data_supersedes_in_flight_fetch() {
        let fetcher = ControlledFetcher::default();
        let tx = fetcher.expect();
        let store = Store::new("categories", fetcher.clone());

        store.read();
        let local = vec![Category { id: 9, name: "Local".to_string() }];
        store.set_data(local.clone());
        assert!(store.peek().in_flight.is_none());

        tx.send(Ok(vec![groceries()])).unwrap();
        drain().await;
        assert_eq!(*store.peek().items, local);
        assert_eq!(store.peek().status, Status::Ready);
    }

    #[tokio::test]
    async fn test_update_data_appends_created_entity() {
        let store: Store<Category> = Store::new("categories", || async { anyhow::Ok(Vec::new()) });
        store.set_data(vec![groceries()]);

        let created = Category { id: 5, name: "Travel".to_string() };
        store.update_data(|items| {
            let mut next = items.to_vec();
            next.push(created.clone());
            next
        });

        assert_eq!(*store.peek().items, vec![groceries(), created]);
    }

    #[tokio::test]
    async fn test_reset_then_read_refetches() {
        let fetcher = ControlledFetcher::default();
        let first = fetcher.expect();
        let _second = fetcher.expect();
        let store = Store::new("categories", fetcher.clone());

        store.read();
        first.send(Ok(vec![groceries()])).unwrap();
        store.settled().await;

        store.reset();
        assert_eq!(store.peek().status, Status::Empty);
        assert!(store.peek().items.is_empty());

        let snapshot = store.read();
        assert_eq!(snapshot.status, Status::Loading);
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_fetched_at_is_monotonic() {
        let store: Store<Category> = Store::new("categories", || async { anyhow::Ok(vec![groceries()]) });

        store.read();
        let first = store.settled().await.fetched_at.unwrap();
        store.set_data(Vec::new());
        let second = store.peek().fetched_at.unwrap();
        store.reset();
        store.read();
        let third = store.settled().await.fetched_at.unwrap();

        assert!(second >= first);
        assert!(third >= second);
    }

    #[tokio::test]
    async fn test_foreign_session_data_is_refetched() {
        let fetcher = ControlledFetcher::default();
        let first = fetcher.expect();
        let _second = fetcher.expect();
        let store = Store::builder("categories", fetcher.clone())
            .session(Some("alice".to_string()))
            .build();

        store.read();
        first.send(Ok(vec![groceries()])).unwrap();
        let snapshot = store.settled().await;
        assert_eq!(snapshot.fetched_by.as_deref(), Some("alice"));

        store.bind_session(Some("bob".to_string()));
        let snapshot = store.read();
        assert_eq!(snapshot.status, Status::Loading);
        assert!(snapshot.items.is_empty());
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_subscribers_see_transitions() {
        let fetcher = ControlledFetcher::default();
        let tx = fetcher.expect();
        let store = Store::new("categories", fetcher.clone());
        let mut rx = store.subscribe();

        store.read();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().status, Status::Loading);

        tx.send(Ok(vec![groceries()])).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().status, Status::Ready);
    }

    #[tokio::test]
    async fn test_view_matches_ui_contract() {
        let store: Store<Category> = Store::new("categories", || async { anyhow::Ok(vec![groceries()]) });

        let view = store.view();
        assert!(view.is_loading);
        assert!(view.data.is_empty());
        assert!(view.error.is_none());

        store.settled().await;
        let view = store.view();
        assert!(!view.is_loading);
        assert_eq!(*view.data, vec![groceries()]);
    }

    #[test]
    fn test_read_without_runtime_records_error() {
        let store: Store<Category> = Store::new("categories", || async { anyhow::Ok(vec![groceries()]) });

        let snapshot = store.read();
        assert_eq!(snapshot.status, Status::Loading);

        let snapshot = store.peek();
        assert_eq!(snapshot.status, Status::Error);
        assert!(matches!(snapshot.error, Some(FetchError::NoRuntime)));
        assert!(snapshot.in_flight.is_none());
    }

    // -------------------------------------------------------------------------
    // Scheduled refresh
    // -------------------------------------------------------------------------

    fn counting_store(policy: TtlPolicy) -> (Store<Category>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let store = Store::builder("metal_quotes", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { anyhow::Ok(vec![groceries()]) }
        })
        .refresh_policy(policy)
        .build();
        (store, calls)
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_fetch_schedules_one_refresh() {
        let (store, calls) = counting_store(TtlPolicy::FixedInterval { seconds: 60 });

        store.read();
        store.settled().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(store.next_refresh_at().is_some());

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        drain().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.peek().status, Status::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_retrieve_reschedules_refresh() {
        let (store, calls) = counting_store(TtlPolicy::FixedInterval { seconds: 60 });

        store.read();
        store.settled().await;

        tokio::time::sleep(Duration::from_secs(30)).await;
        store.retrieve(false);
        store.settled().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // The original deadline (t=60s) must not fire a duplicate refresh
        tokio::time::sleep(Duration::from_secs(45)).await;
        drain().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // The rescheduled deadline (t=90s) does
        tokio::time::sleep(Duration::from_secs(20)).await;
        drain().await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_cancels_scheduled_refresh() {
        let (store, calls) = counting_store(TtlPolicy::FixedInterval { seconds: 10 });

        store.read();
        store.settled().await;
        store.reset();
        assert!(store.next_refresh_at().is_none());

        tokio::time::sleep(Duration::from_secs(30)).await;
        drain().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_fetch_schedules_nothing() {
        let store: Store<Category> = Store::builder("metal_quotes", || async {
            Err::<Vec<Category>, _>(anyhow!("provider down"))
        })
        .refresh_policy(TtlPolicy::FixedInterval { seconds: 10 })
        .build();

        store.read();
        store.settled().await;
        assert!(store.next_refresh_at().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_ttl_refreshes_at_most_once_per_second() {
        let (store, calls) = counting_store(TtlPolicy::FixedInterval { seconds: 0 });

        store.read();
        store.settled().await;
        for _ in 0..200 {
            tokio::task::yield_now().await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(store.next_refresh_at().is_some_and(|due| due > Utc::now()));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        drain().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_fires_at_reported_deadline() {
        let policy = TtlPolicy::FixedInterval { seconds: 60 };
        let (store, calls) = counting_store(policy);

        store.read();
        let snapshot = store.settled().await;
        let due_at = store.next_refresh_at().unwrap();
        assert_eq!(Some(due_at), snapshot.fetched_at.map(|at| policy.expires_at(at)));

        let remaining = (due_at - Utc::now()).to_std().unwrap();
        tokio::time::sleep(remaining - Duration::from_millis(50)).await;
        drain().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        drain().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_ensure_fresh_skips_fetch_while_fresh() {
        let (store, calls) = counting_store(TtlPolicy::FixedInterval { seconds: 3600 });

        store.ensure_fresh();
        store.settled().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        store.ensure_fresh();
        drain().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_ensure_fresh_refetches_after_failure() {
        let fetcher = ControlledFetcher::default();
        let fail = fetcher.expect();
        let ok = fetcher.expect();
        let store = Store::new("categories", fetcher.clone());

        store.ensure_fresh();
        fail.send(Err(anyhow!("offline"))).unwrap();
        store.settled().await;

        store.ensure_fresh();
        ok.send(Ok(vec![groceries()])).unwrap();
        let snapshot = store.settled().await;
        assert_eq!(snapshot.status, Status::Ready);
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_ensure_fresh_refetches_expired_items() {
        let (store, calls) = counting_store(TtlPolicy::FixedInterval { seconds: 3600 });

        store.read();
        store.settled().await;

        // Pretend the items were fetched two hours ago
        {
            let mut state = store.lock();
            state.snapshot.fetched_at = Some(Utc::now() - chrono::Duration::hours(2));
        }
        store.ensure_fresh();
        store.settled().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
