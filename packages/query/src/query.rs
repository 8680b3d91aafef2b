//! One cached fetch per key.
//!
//! A [`Query`] owns the signals describing a fetch's lifecycle. Observers
//! ref-count it; when the last observer leaves, a GC timer is armed and
//! the query disposes itself when it elapses. The active fetch function is
//! always the most recently added observer's.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

use futures_util::future::LocalBoxFuture;
use tether_signals::{batch, Signal};

use crate::store::QueryKey;

/// A fetch failure, carried through retry bookkeeping and surfaced on the
/// query's error signal.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{0}")]
pub struct QueryError(pub String);

impl QueryError {
    pub fn new(message: impl Into<String>) -> Self {
        QueryError(message.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    Loading,
    Success,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    Idle,
    Fetching,
    Paused,
}

pub type Fetcher<T> = Rc<dyn Fn() -> LocalBoxFuture<'static, Result<T, QueryError>>>;

/// Retry and GC configuration for one query.
#[derive(Clone)]
pub struct QueryConfig {
    pub retries: u32,
    pub retry_delay: Duration,
    pub gc_time: Duration,
}

impl Default for QueryConfig {
    fn default() -> Self {
        QueryConfig {
            retries: 3,
            retry_delay: Duration::from_secs(2),
            gc_time: Duration::from_secs(300),
        }
    }
}

struct ObserverEntry<T> {
    id: u64,
    fetcher: Fetcher<T>,
}

pub(crate) struct QueryInner<T: Clone + PartialEq + 'static> {
    key: QueryKey,
    pub(crate) data: Signal<Option<T>>,
    pub(crate) error: Signal<Option<QueryError>>,
    pub(crate) last_updated: Signal<Option<Instant>>,
    pub(crate) status: Signal<QueryStatus>,
    pub(crate) fetch_status: Signal<FetchStatus>,
    pub(crate) retries: Signal<u32>,
    pub(crate) retry_reason: Signal<Option<QueryError>>,
    config: RefCell<QueryConfig>,
    observers: RefCell<Vec<ObserverEntry<T>>>,
    next_observer_id: Cell<u64>,
    inflight: RefCell<Option<tokio::task::JoinHandle<()>>>,
    waiters: RefCell<Vec<tokio::sync::oneshot::Sender<()>>>,
    gc_task: RefCell<Option<tokio::task::JoinHandle<()>>>,
    on_dispose: RefCell<Option<Box<dyn Fn(&QueryKey)>>>,
    disposed: Cell<bool>,
}

/// A cached async fetch keyed in a session's [`crate::QueryStore`].
///
/// Cheap handle; clones share the cache entry.
pub struct Query<T: Clone + PartialEq + 'static> {
    pub(crate) inner: Rc<QueryInner<T>>,
}

impl<T: Clone + PartialEq + 'static> Clone for Query<T> {
    fn clone(&self) -> Self {
        Query {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + PartialEq + 'static> Query<T> {
    pub fn new(key: QueryKey, config: QueryConfig) -> Self {
        Query {
            inner: Rc::new(QueryInner {
                key,
                data: Signal::new(None),
                error: Signal::new(None),
                last_updated: Signal::new(None),
                status: Signal::new(QueryStatus::Loading),
                fetch_status: Signal::new(FetchStatus::Idle),
                retries: Signal::new(0),
                retry_reason: Signal::new(None),
                config: RefCell::new(config),
                observers: RefCell::new(Vec::new()),
                next_observer_id: Cell::new(1),
                inflight: RefCell::new(None),
                waiters: RefCell::new(Vec::new()),
                gc_task: RefCell::new(None),
                on_dispose: RefCell::new(None),
                disposed: Cell::new(false),
            }),
        }
    }

    pub fn key(&self) -> &QueryKey {
        &self.inner.key
    }

    pub(crate) fn set_on_dispose(&self, f: impl Fn(&QueryKey) + 'static) {
        *self.inner.on_dispose.borrow_mut() = Some(Box::new(f));
    }

    // ------------------------------------------------------------------
    // Signals
    // ------------------------------------------------------------------

    /// Tracked read of the cached data.
    pub fn data(&self) -> Option<T> {
        self.inner.data.get()
    }

    pub fn error(&self) -> Option<QueryError> {
        self.inner.error.get()
    }

    pub fn status(&self) -> QueryStatus {
        self.inner.status.get()
    }

    pub fn fetch_status(&self) -> FetchStatus {
        self.inner.fetch_status.get()
    }

    pub fn retries(&self) -> u32 {
        self.inner.retries.get()
    }

    pub fn retry_reason(&self) -> Option<QueryError> {
        self.inner.retry_reason.get()
    }

    pub fn last_updated(&self) -> Option<Instant> {
        self.inner.last_updated.get()
    }

    /// Whether the cached value is older than `stale_time` (or missing).
    pub fn is_stale(&self, stale_time: Duration) -> bool {
        match self.inner.last_updated.peek() {
            None => true,
            Some(at) => at.elapsed() > stale_time,
        }
    }

    // ------------------------------------------------------------------
    // Observation + GC
    // ------------------------------------------------------------------

    /// Register an observer. The newest observer's fetch function becomes
    /// the active one; a pending GC timer is cancelled.
    pub fn observe(&self, fetcher: Fetcher<T>) -> u64 {
        let id = self.inner.next_observer_id.get();
        self.inner.next_observer_id.set(id + 1);
        self.inner
            .observers
            .borrow_mut()
            .push(ObserverEntry { id, fetcher });
        if let Some(gc) = self.inner.gc_task.borrow_mut().take() {
            gc.abort();
        }
        id
    }

    /// Replace one observer's fetch function in place. The active fetcher
    /// is re-selected on every observe/unobserve/update.
    pub fn update_observer(&self, observer_id: u64, fetcher: Fetcher<T>) {
        let mut observers = self.inner.observers.borrow_mut();
        if let Some(entry) = observers.iter_mut().find(|entry| entry.id == observer_id) {
            entry.fetcher = fetcher;
        }
    }

    /// Drop an observer; arriving at zero arms the GC timer.
    pub fn unobserve(&self, observer_id: u64) {
        self.inner
            .observers
            .borrow_mut()
            .retain(|entry| entry.id != observer_id);
        if self.inner.observers.borrow().is_empty() {
            self.schedule_gc();
        }
    }

    pub fn observer_count(&self) -> usize {
        self.inner.observers.borrow().len()
    }

    pub fn has_gc_scheduled(&self) -> bool {
        self.inner.gc_task.borrow().is_some()
    }

    fn schedule_gc(&self) {
        if self.inner.disposed.get() {
            return;
        }
        if tokio::runtime::Handle::try_current().is_err() {
            return;
        }
        let gc_time = self.inner.config.borrow().gc_time;
        let this = self.clone();
        let task = tokio::task::spawn_local(async move {
            tokio::time::sleep(gc_time).await;
            if this.observer_count() == 0 {
                tracing::debug!(key = ?this.inner.key, "query garbage collected");
                this.dispose();
            }
        });
        *self.inner.gc_task.borrow_mut() = Some(task);
    }

    /// Cancel everything and remove the query from its store.
    pub fn dispose(&self) {
        if self.inner.disposed.replace(true) {
            return;
        }
        if let Some(task) = self.inner.inflight.borrow_mut().take() {
            task.abort();
        }
        if let Some(task) = self.inner.gc_task.borrow_mut().take() {
            task.abort();
        }
        self.inner.observers.borrow_mut().clear();
        for waiter in self.inner.waiters.borrow_mut().drain(..) {
            let _ = waiter.send(());
        }
        if let Some(on_dispose) = self.inner.on_dispose.borrow_mut().take() {
            on_dispose(&self.inner.key);
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    // ------------------------------------------------------------------
    // Fetching
    // ------------------------------------------------------------------

    fn active_fetcher(&self) -> Option<Fetcher<T>> {
        self.inner
            .observers
            .borrow()
            .last()
            .map(|entry| entry.fetcher.clone())
    }

    /// Start a run with the active observer's fetcher unless one is
    /// already in flight.
    pub fn fetch(&self) {
        if self.is_running() {
            return;
        }
        if let Some(fetcher) = self.active_fetcher() {
            self.start_run(fetcher);
        }
    }

    /// Re-run if anyone is still observing. Cancels the in-flight run.
    pub fn invalidate(&self) {
        if self.observer_count() == 0 {
            return;
        }
        if let Some(fetcher) = self.active_fetcher() {
            self.cancel_inflight();
            self.start_run(fetcher);
        }
    }

    /// Refetch with `fetcher`. With `cancel_refetch` the in-flight run is
    /// aborted and a new one starts; without it, an in-flight run is
    /// reused and awaited.
    pub async fn refetch(&self, fetcher: Fetcher<T>, cancel_refetch: bool) {
        if self.is_running() {
            if cancel_refetch {
                self.cancel_inflight();
            } else {
                self.wait().await;
                return;
            }
        }
        self.start_run(fetcher);
        self.wait().await;
    }

    /// Await the current run, if any.
    pub async fn wait(&self) {
        if !self.is_running() {
            return;
        }
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.inner.waiters.borrow_mut().push(tx);
        let _ = rx.await;
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .inflight
            .borrow()
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    fn cancel_inflight(&self) {
        if let Some(task) = self.inner.inflight.borrow_mut().take() {
            task.abort();
        }
    }

    fn start_run(&self, fetcher: Fetcher<T>) {
        if self.inner.disposed.get() {
            return;
        }
        // Observers see the transition before the first await.
        self.inner.fetch_status.set(FetchStatus::Fetching);
        self.inner.retries.set(0);

        let inner = self.inner.clone();
        let task = tokio::task::spawn_local(async move {
            let (max_retries, retry_delay) = {
                let config = inner.config.borrow();
                (config.retries, config.retry_delay)
            };
            loop {
                match fetcher().await {
                    Ok(value) => {
                        batch(|| {
                            inner.data.set(Some(value));
                            inner.error.set(None);
                            inner.status.set(QueryStatus::Success);
                            inner.fetch_status.set(FetchStatus::Idle);
                            inner.last_updated.set(Some(Instant::now()));
                        });
                        break;
                    }
                    Err(err) => {
                        let attempts = inner.retries.peek();
                        if attempts < max_retries {
                            batch(|| {
                                inner.retries.set(attempts + 1);
                                inner.retry_reason.set(Some(err));
                            });
                            tokio::time::sleep(retry_delay).await;
                        } else {
                            tracing::warn!(
                                key = ?inner.key,
                                retries = attempts,
                                error = %err,
                                "query failed after exhausting retries"
                            );
                            batch(|| {
                                inner.retry_reason.set(Some(err.clone()));
                                inner.error.set(Some(err));
                                inner.status.set(QueryStatus::Error);
                                inner.fetch_status.set(FetchStatus::Idle);
                            });
                            break;
                        }
                    }
                }
            }
            for waiter in inner.waiters.borrow_mut().drain(..) {
                let _ = waiter.send(());
            }
        });
        *self.inner.inflight.borrow_mut() = Some(task);
    }

    // ------------------------------------------------------------------
    // Manual writes
    // ------------------------------------------------------------------

    /// Write data directly. Retry counters and fetch status are left
    /// untouched.
    pub fn set_data(&self, value: T) {
        batch(|| {
            self.inner.data.set(Some(value));
            self.inner.error.set(None);
            self.inner.status.set(QueryStatus::Success);
            self.inner.last_updated.set(Some(Instant::now()));
        });
    }

    /// Write data derived from the previous value.
    pub fn set_data_with(&self, f: impl FnOnce(Option<T>) -> T) {
        let next = f(self.inner.data.peek());
        self.set_data(next);
    }

    /// Write an error directly, without touching retry bookkeeping.
    pub fn set_error(&self, error: QueryError) {
        batch(|| {
            self.inner.error.set(Some(error));
            self.inner.status.set(QueryStatus::Error);
        });
    }
}
