//! Query observers: the component-facing side of the cache.
//!
//! A [`QueryHandle`] subscribes a component to one query at a time,
//! re-deriving the target when the key changes between renders. Handlers
//! run untracked so incidental reads inside them never become render
//! dependencies.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use tether_core::hooks::{use_hook, HookState};
use tether_core::runtime::use_env;
use tether_signals::{untrack, Effect, RepeatHandle};

use crate::query::{Fetcher, FetchStatus, Query, QueryConfig, QueryError, QueryStatus};
use crate::store::{QueryKey, QueryStore};

/// Observer behavior knobs.
#[derive(Clone)]
pub struct QueryOptions {
    /// Age after which cached data triggers a refetch on mount.
    pub stale_time: Duration,
    /// How long an unobserved query lingers before GC.
    pub gc_time: Duration,
    /// Keep showing the previous key's data while the new key loads.
    pub keep_previous_data: bool,
    /// When false, the observer subscribes but never fetches.
    pub enabled: bool,
    /// Fetch on mount when the cache is stale.
    pub fetch_on_mount: bool,
    /// Periodic refetch.
    pub refetch_interval: Option<Duration>,
    pub retries: u32,
    pub retry_delay: Duration,
}

impl Default for QueryOptions {
    fn default() -> Self {
        QueryOptions {
            stale_time: Duration::ZERO,
            gc_time: Duration::from_secs(300),
            keep_previous_data: false,
            enabled: true,
            fetch_on_mount: true,
            refetch_interval: None,
            retries: 3,
            retry_delay: Duration::from_secs(2),
        }
    }
}

impl QueryOptions {
    fn config(&self) -> QueryConfig {
        QueryConfig {
            retries: self.retries,
            retry_delay: self.retry_delay,
            gc_time: self.gc_time,
        }
    }
}

type SuccessHandler<T> = Rc<dyn Fn(&T)>;
type ErrorHandler = Rc<dyn Fn(&QueryError)>;

/// A live subscription to a [`Query`].
pub struct QueryHandle<T: Clone + PartialEq + 'static> {
    store: Rc<QueryStore>,
    self_weak: std::rc::Weak<QueryHandle<T>>,
    query: RefCell<Query<T>>,
    key: RefCell<QueryKey>,
    observer_id: Cell<u64>,
    options: QueryOptions,
    fetcher: RefCell<Fetcher<T>>,
    previous_data: RefCell<Option<T>>,
    handler_effect: RefCell<Option<Effect>>,
    interval: RefCell<Option<RepeatHandle>>,
    on_success: RefCell<Option<SuccessHandler<T>>>,
    on_error: RefCell<Option<ErrorHandler>>,
}

impl<T: Clone + PartialEq + 'static> QueryHandle<T> {
    pub fn new(
        store: Rc<QueryStore>,
        key: QueryKey,
        fetcher: Fetcher<T>,
        options: QueryOptions,
    ) -> Rc<Self> {
        let query = store.ensure::<T>(key.clone(), options.config());
        let handle = Rc::new_cyclic(|weak| QueryHandle {
            store,
            self_weak: weak.clone(),
            query: RefCell::new(query),
            key: RefCell::new(key),
            observer_id: Cell::new(0),
            options,
            fetcher: RefCell::new(fetcher),
            previous_data: RefCell::new(None),
            handler_effect: RefCell::new(None),
            interval: RefCell::new(None),
            on_success: RefCell::new(None),
            on_error: RefCell::new(None),
        });
        handle.attach();
        handle
    }

    pub fn on_success(&self, f: impl Fn(&T) + 'static) {
        *self.on_success.borrow_mut() = Some(Rc::new(f));
    }

    pub fn on_error(&self, f: impl Fn(&QueryError) + 'static) {
        *self.on_error.borrow_mut() = Some(Rc::new(f));
    }

    /// Subscribe to the current query: observe, fetch if stale, install
    /// the handler effect and the refetch interval.
    fn attach(&self) {
        let query = self.query.borrow().clone();
        let id = query.observe(self.fetcher.borrow().clone());
        self.observer_id.set(id);

        if self.options.enabled
            && self.options.fetch_on_mount
            && query.is_stale(self.options.stale_time)
        {
            query.fetch();
        }

        self.install_handler_effect();
        self.install_interval();
    }

    fn install_handler_effect(&self) {
        if let Some(effect) = self.handler_effect.borrow_mut().take() {
            effect.dispose();
        }
        let this = self.self_weak.clone();
        let query = self.query.borrow().clone();
        let baseline = Cell::new(true);
        // Detached from any enclosing effect so re-renders don't kill it.
        let effect = untrack(|| {
            Effect::new(move || {
                let status = query.status();
                let _ = query.data();
                if baseline.replace(false) {
                    return;
                }
                let Some(this) = this.upgrade() else { return };
                match status {
                    QueryStatus::Success => {
                        if let Some(on_success) = this.on_success.borrow().clone() {
                            if let Some(data) = query.inner.data.peek() {
                                untrack(|| on_success(&data));
                            }
                        }
                    }
                    QueryStatus::Error => {
                        if let Some(on_error) = this.on_error.borrow().clone() {
                            if let Some(err) = query.inner.error.peek() {
                                untrack(|| on_error(&err));
                            }
                        }
                    }
                    QueryStatus::Loading => {}
                }
            })
        });
        *self.handler_effect.borrow_mut() = Some(effect);
    }

    fn install_interval(&self) {
        if let Some(handle) = self.interval.borrow_mut().take() {
            handle.cancel();
        }
        if let Some(interval) = self.options.refetch_interval {
            if tokio::runtime::Handle::try_current().is_ok() {
                let this = self.self_weak.clone();
                let handle = tether_signals::repeat(interval, move || {
                    if let Some(this) = this.upgrade() {
                        this.query.borrow().invalidate();
                    }
                });
                *self.interval.borrow_mut() = Some(handle);
            }
        }
    }

    /// Point the observer at a different key: the old query loses this
    /// observer (scheduling GC if it was the last), the new one gains it
    /// and fetches if stale.
    pub fn set_key(&self, key: QueryKey, fetcher: Fetcher<T>) {
        if *self.key.borrow() == key {
            self.query
                .borrow()
                .update_observer(self.observer_id.get(), fetcher.clone());
            *self.fetcher.borrow_mut() = fetcher;
            return;
        }
        let old = self.query.borrow().clone();
        if self.options.keep_previous_data {
            *self.previous_data.borrow_mut() = old.inner.data.peek();
        }
        old.unobserve(self.observer_id.get());

        let query = self.store.ensure::<T>(key.clone(), self.options.config());
        *self.query.borrow_mut() = query;
        *self.key.borrow_mut() = key;
        *self.fetcher.borrow_mut() = fetcher;
        self.attach();
    }

    pub fn query(&self) -> Query<T> {
        self.query.borrow().clone()
    }

    pub fn key(&self) -> QueryKey {
        self.key.borrow().clone()
    }

    /// Tracked data projection. With `keep_previous_data`, the previous
    /// key's value shows until the new key succeeds.
    pub fn data(&self) -> Option<T> {
        let query = self.query.borrow().clone();
        let data = query.data();
        if self.options.keep_previous_data && query.status() != QueryStatus::Success {
            if let Some(previous) = self.previous_data.borrow().clone() {
                return Some(previous);
            }
        }
        data
    }

    pub fn error(&self) -> Option<QueryError> {
        self.query.borrow().error()
    }

    pub fn status(&self) -> QueryStatus {
        self.query.borrow().status()
    }

    pub fn is_loading(&self) -> bool {
        let query = self.query.borrow().clone();
        query.status() == QueryStatus::Loading && query.fetch_status() == FetchStatus::Fetching
    }

    pub fn is_error(&self) -> bool {
        self.status() == QueryStatus::Error
    }

    /// Refetch through this observer's fetcher.
    pub async fn refetch(&self, cancel_refetch: bool) {
        let query = self.query.borrow().clone();
        let fetcher = self.fetcher.borrow().clone();
        query.refetch(fetcher, cancel_refetch).await;
    }

    /// Await the in-flight run, if any.
    pub async fn wait(&self) {
        let query = self.query.borrow().clone();
        query.wait().await;
    }

    /// Unsubscribe and tear down the handler effect and interval.
    pub fn detach(&self) {
        let query = self.query.borrow().clone();
        query.unobserve(self.observer_id.get());
        if let Some(effect) = self.handler_effect.borrow_mut().take() {
            effect.dispose();
        }
        if let Some(interval) = self.interval.borrow_mut().take() {
            interval.cancel();
        }
    }
}

/// Hook storage for [`use_query`].
pub struct QueryHook<T: Clone + PartialEq + 'static> {
    handle: RefCell<Option<Rc<QueryHandle<T>>>>,
}

impl<T: Clone + PartialEq + 'static> HookState for QueryHook<T> {
    fn dispose(&self) {
        if let Some(handle) = self.handle.borrow_mut().take() {
            handle.detach();
        }
    }
}

/// Observe a query from a component. The session provides the
/// [`QueryStore`] through the render environment; a key change between
/// renders moves the observer to the new query.
#[track_caller]
pub fn use_query<T: Clone + PartialEq + 'static>(
    key: impl Into<QueryKey>,
    fetcher: Fetcher<T>,
    options: QueryOptions,
) -> Rc<QueryHandle<T>> {
    let key = key.into();
    let hook = use_hook("query", None, || QueryHook::<T> {
        handle: RefCell::new(None),
    });

    let existing = hook.handle.borrow().clone();
    match existing {
        Some(handle) => {
            handle.set_key(key, fetcher);
            handle
        }
        None => {
            let store = use_env::<Rc<QueryStore>>()
                .map(|s| (*s).clone())
                .unwrap_or_else(|| {
                    panic!(
                        "\nquery error: no QueryStore in scope.\n\
                         `use_query` only works while a session is rendering a mount.\n"
                    )
                });
            let handle = QueryHandle::new(store, key, fetcher, options);
            *hook.handle.borrow_mut() = Some(handle.clone());
            handle
        }
    }
}
