//! The reactive route context.
//!
//! One [`RouteContext`] exists per mount. Its fields are signals, so a
//! component that reads `pathname` or one query parameter re-renders when
//! the client navigates; updates are applied in one batch so dependent
//! renders coalesce. Navigation requested during a render is recorded as
//! an intent and drained by the session after the render completes.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tether_core::runtime::use_env;
use tether_core::state::QueryParamField;
use tether_signals::{batch, Signal};

/// The client's view of the current location.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RouteInfo {
    pub pathname: String,
    #[serde(rename = "queryParams", default)]
    pub query_params: HashMap<String, String>,
    #[serde(rename = "pathParams", default)]
    pub path_params: HashMap<String, String>,
    #[serde(default)]
    pub catchall: Vec<String>,
    #[serde(default)]
    pub hash: String,
}

/// Navigation requested from inside a render or callback.
#[derive(Debug, Clone, PartialEq)]
pub enum NavigationIntent {
    Navigate {
        path: String,
        replace: bool,
        hard: bool,
    },
    NotFound,
}

/// Reactive location state for one mount.
pub struct RouteContext {
    pathname: Signal<String>,
    query_params: Signal<HashMap<String, String>>,
    path_params: Signal<HashMap<String, String>>,
    catchall: Signal<Vec<String>>,
    hash: Signal<String>,
    pending: RefCell<Option<NavigationIntent>>,
    bindings: RefCell<Vec<QueryParamField>>,
}

impl RouteContext {
    pub fn new(info: RouteInfo) -> Rc<Self> {
        Rc::new(RouteContext {
            pathname: Signal::named(info.pathname, "route.pathname"),
            query_params: Signal::named(info.query_params, "route.queryParams"),
            path_params: Signal::named(info.path_params, "route.pathParams"),
            catchall: Signal::named(info.catchall, "route.catchall"),
            hash: Signal::named(info.hash, "route.hash"),
            pending: RefCell::new(None),
            bindings: RefCell::new(Vec::new()),
        })
    }

    /// Apply a new location. All signal writes happen in one batch, and
    /// bound query-param state fields are synced from the URL.
    pub fn update(&self, info: RouteInfo) {
        batch(|| {
            self.pathname.set(info.pathname);
            self.path_params.set(info.path_params);
            self.catchall.set(info.catchall);
            self.hash.set(info.hash);

            {
                let bindings = self.bindings.borrow();
                for binding in bindings.iter() {
                    match info.query_params.get(&binding.name) {
                        Some(value) => {
                            if let Err(err) = (binding.write)(value) {
                                tracing::warn!(
                                    param = %binding.name,
                                    %err,
                                    "query param failed to decode; field unchanged"
                                );
                            }
                        }
                        None => (binding.clear)(),
                    }
                }
            }
            self.query_params.set(info.query_params);
        });
    }

    /// Tracked read of the full location.
    pub fn info(&self) -> RouteInfo {
        RouteInfo {
            pathname: self.pathname.get(),
            query_params: self.query_params.get(),
            path_params: self.path_params.get(),
            catchall: self.catchall.get(),
            hash: self.hash.get(),
        }
    }

    pub fn pathname(&self) -> String {
        self.pathname.get()
    }

    /// Tracked read of one query parameter.
    pub fn query_param(&self, name: &str) -> Option<String> {
        self.query_params.with(|params| params.get(name).cloned())
    }

    /// Tracked read of one path parameter.
    pub fn path_param(&self, name: &str) -> Option<String> {
        self.path_params.with(|params| params.get(name).cloned())
    }

    pub fn catchall(&self) -> Vec<String> {
        self.catchall.get()
    }

    pub fn hash(&self) -> String {
        self.hash.get()
    }

    /// Request client-side navigation. The session translates the intent
    /// into a `navigate_to` message after the current phase finishes.
    pub fn navigate(&self, path: impl Into<String>, replace: bool, hard: bool) {
        *self.pending.borrow_mut() = Some(NavigationIntent::Navigate {
            path: path.into(),
            replace,
            hard,
        });
    }

    /// Request a redirect (replacing the current history entry).
    pub fn redirect(&self, path: impl Into<String>) {
        self.navigate(path, true, false);
    }

    /// Mark the current location as not found.
    pub fn not_found(&self) {
        *self.pending.borrow_mut() = Some(NavigationIntent::NotFound);
    }

    /// Take the pending navigation intent, if any.
    pub fn take_intent(&self) -> Option<NavigationIntent> {
        self.pending.borrow_mut().take()
    }

    /// Register state fields to sync bidirectionally with the query
    /// string. Incoming values apply immediately.
    pub fn bind_query_params(&self, fields: Vec<QueryParamField>) {
        let current = self.query_params.peek();
        for binding in &fields {
            if let Some(value) = current.get(&binding.name) {
                if let Err(err) = (binding.write)(value) {
                    tracing::warn!(param = %binding.name, %err, "query param failed to decode");
                }
            }
        }
        self.bindings.borrow_mut().extend(fields);
    }

    /// Encode the bound fields into query parameters. Tracked: an effect
    /// reading this re-runs when any bound field changes.
    pub fn bound_query_params(&self) -> HashMap<String, String> {
        let mut out = HashMap::new();
        for binding in self.bindings.borrow().iter() {
            if let Some(value) = (binding.read)() {
                out.insert(binding.name.clone(), value);
            }
        }
        out
    }
}

impl tether_core::state::QueryParamSink for RouteContext {
    fn bind(&self, fields: Vec<QueryParamField>) {
        self.bind_query_params(fields);
    }
}

/// The route context of the mount currently rendering.
pub fn use_route() -> Rc<RouteContext> {
    use_env::<Rc<RouteContext>>()
        .map(|ctx| (*ctx).clone())
        .unwrap_or_else(|| {
            panic!(
                "\nroute error: no RouteContext in scope.\n\
                 `use_route` only works while a session is rendering a mount.\n"
            )
        })
}
