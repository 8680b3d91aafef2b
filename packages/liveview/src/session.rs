//! One render session per connected client.
//!
//! The session owns route mounts (each a [`RenderTree`] plus the reactive
//! effect that re-renders it), dispatches incoming messages, buffers
//! outbound messages while disconnected, and routes per-mount failures as
//! `server_error` without tearing anything else down.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

use rustc_hash::FxHashMap;
use serde_json::Value;
use tether_core::{
    clone_spec, CallbackResult, ComponentDef, EnvGuard, Node, RefTransport, RenderTree, State,
};
use tether_query::QueryStore;
use tether_router::{
    encode_query, NavigationIntent, OutletProps, RouteContext, RouteInfo, RouteMatch, RouteTree,
};
use tether_signals::{batch, untrack, Effect};

use crate::channels::{ChannelsManager, RefChannel};
use crate::protocol::{ClientMessage, Credentials, ErrorPayload, ServerMessage};

/// Session-level configuration.
#[derive(Default, Clone)]
pub struct SessionConfig {
    /// Where `not_found` interrupts navigate to. Without one, a not-found
    /// becomes a render error for the mount.
    pub not_found_path: Option<String>,
}

/// The response the client produced for an `api_call`.
#[derive(Debug, Clone)]
pub struct ApiResult {
    pub ok: bool,
    pub status: u16,
    pub headers: std::collections::HashMap<String, String>,
    pub body: Option<Value>,
}

struct RouteMount {
    route_ctx: Rc<RouteContext>,
    tree: Rc<RefCell<RenderTree>>,
    render_effect: Effect,
    url_sync_effect: Effect,
}

struct GlobalEntry {
    value: Rc<dyn Any>,
    dispose: Box<dyn Fn()>,
}

pub(crate) struct SessionInner {
    id: String,
    routes: Rc<RouteTree>,
    config: SessionConfig,
    mounts: RefCell<FxHashMap<String, RouteMount>>,
    connected: Cell<bool>,
    sender: RefCell<Option<Box<dyn Fn(ServerMessage)>>>,
    buffer: RefCell<VecDeque<ServerMessage>>,
    channels: Rc<ChannelsManager>,
    ref_transport: Rc<Rc<dyn RefTransport>>,
    query_store: Rc<QueryStore>,
    pending_api: RefCell<FxHashMap<u64, tokio::sync::oneshot::Sender<ApiResult>>>,
    next_api_id: Cell<u64>,
    globals: RefCell<FxHashMap<String, GlobalEntry>>,
    client_address: RefCell<Option<String>>,
    paused: Cell<bool>,
    closed: Cell<bool>,
}

/// A connected client's server-side state.
///
/// Cheap handle; clones share the session.
pub struct RenderSession {
    inner: Rc<SessionInner>,
}

impl Clone for RenderSession {
    fn clone(&self) -> Self {
        RenderSession {
            inner: self.inner.clone(),
        }
    }
}

impl RenderSession {
    pub fn new(id: impl Into<String>, routes: Rc<RouteTree>, config: SessionConfig) -> Self {
        let inner = Rc::new_cyclic(|weak: &std::rc::Weak<SessionInner>| {
            let channel_sender: Rc<dyn Fn(ServerMessage)> = {
                let weak = weak.clone();
                Rc::new(move |message| {
                    if let Some(inner) = weak.upgrade() {
                        SessionInner::send(&inner, message);
                    }
                })
            };
            let channels = ChannelsManager::new(channel_sender);
            let ref_channel = channels.open("ref");
            let ref_transport: Rc<dyn RefTransport> = RefChannel::new(ref_channel);

            SessionInner {
                id: id.into(),
                routes,
                config,
                mounts: RefCell::new(FxHashMap::default()),
                connected: Cell::new(false),
                sender: RefCell::new(None),
                buffer: RefCell::new(VecDeque::new()),
                channels,
                ref_transport: Rc::new(ref_transport),
                query_store: QueryStore::new(),
                pending_api: RefCell::new(FxHashMap::default()),
                next_api_id: Cell::new(1),
                globals: RefCell::new(FxHashMap::default()),
                client_address: RefCell::new(None),
                paused: Cell::new(false),
                closed: Cell::new(false),
            }
        });
        RenderSession { inner }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.get()
    }

    pub fn client_address(&self) -> Option<String> {
        self.inner.client_address.borrow().clone()
    }

    pub fn set_client_address(&self, address: Option<String>) {
        *self.inner.client_address.borrow_mut() = address;
    }

    pub fn query_store(&self) -> Rc<QueryStore> {
        self.inner.query_store.clone()
    }

    pub fn channels(&self) -> Rc<ChannelsManager> {
        self.inner.channels.clone()
    }

    pub fn mount_paths(&self) -> Vec<String> {
        self.inner.mounts.borrow().keys().cloned().collect()
    }

    // ------------------------------------------------------------------
    // Transport
    // ------------------------------------------------------------------

    /// Attach the transport. Buffered messages flush in order.
    pub fn connect(&self, send: impl Fn(ServerMessage) + 'static) {
        *self.inner.sender.borrow_mut() = Some(Box::new(send));
        self.inner.connected.set(true);
        let buffered: Vec<ServerMessage> = self.inner.buffer.borrow_mut().drain(..).collect();
        for message in buffered {
            SessionInner::send(&self.inner, message);
        }
    }

    /// Detach the transport; messages buffer until reconnect.
    pub fn disconnect(&self) {
        self.inner.connected.set(false);
        *self.inner.sender.borrow_mut() = None;
    }

    pub fn send(&self, message: ServerMessage) {
        SessionInner::send(&self.inner, message);
    }

    // ------------------------------------------------------------------
    // Message dispatch
    // ------------------------------------------------------------------

    /// Handle one client message. Signal writes made while handling are
    /// batched so dependent renders coalesce into one update per mount.
    pub fn receive(&self, message: ClientMessage) {
        if self.inner.closed.get() {
            tracing::warn!(session = %self.inner.id, "message for a closed session dropped");
            return;
        }
        batch(|| match message {
            ClientMessage::Mount { path, route_info } => self.handle_mount(path, route_info),
            ClientMessage::Navigate { path, route_info } => {
                self.handle_navigate(&path, route_info)
            }
            ClientMessage::Callback {
                path,
                callback,
                args,
            } => self.handle_callback(&path, &callback, args),
            ClientMessage::Unmount { path } => self.handle_unmount(&path),
            ClientMessage::ApiResult {
                id,
                ok,
                status,
                headers,
                body,
            } => self.handle_api_result(id, ok, status, headers, body),
            ClientMessage::Channel {
                channel,
                event,
                payload,
                request_id,
            } => self
                .inner
                .channels
                .dispatch(&channel, &event, payload, request_id),
        });
    }

    fn handle_mount(&self, path: String, route_info: RouteInfo) {
        if self.inner.mounts.borrow().contains_key(&path) {
            tracing::debug!(session = %self.inner.id, %path, "mount already exists");
            return;
        }

        let Some(matched) = self.inner.routes.find(&route_info.pathname) else {
            self.report_error(
                &path,
                "mount",
                format!("no route matches `{}`", route_info.pathname),
                None,
            );
            return;
        };

        let info = enrich_route_info(route_info, &matched);
        let route_ctx = RouteContext::new(info);
        let tree = Rc::new(RefCell::new(RenderTree::new(compose_chain(&matched.chain))));

        let render_effect = self.install_render_effect(&path, &route_ctx, &tree);
        let url_sync_effect = self.install_url_sync_effect(&path, &route_ctx);

        self.inner.mounts.borrow_mut().insert(
            path,
            RouteMount {
                route_ctx,
                tree,
                render_effect,
                url_sync_effect,
            },
        );
    }

    fn handle_navigate(&self, path: &str, route_info: RouteInfo) {
        let route_ctx = {
            let mounts = self.inner.mounts.borrow();
            let Some(mount) = mounts.get(path) else {
                self.report_error(path, "navigate", "navigate for unknown mount", None);
                return;
            };
            mount.route_ctx.clone()
        };
        let info = match self.inner.routes.find(&route_info.pathname) {
            Some(matched) => enrich_route_info(route_info, &matched),
            None => route_info,
        };
        route_ctx.update(info);
        self.drain_navigation(path, &route_ctx);
    }

    fn handle_callback(&self, path: &str, callback_key: &str, args: Vec<Value>) {
        let (callback, route_ctx) = {
            let mounts = self.inner.mounts.borrow();
            let Some(mount) = mounts.get(path) else {
                self.report_error(path, "callback", "callback for unknown mount", None);
                return;
            };
            let result = (
                mount.tree.borrow().callback(callback_key),
                mount.route_ctx.clone(),
            );
            result
        };
        let Some(callback) = callback else {
            self.report_error(
                path,
                "callback",
                format!("unknown callback `{callback_key}`"),
                None,
            );
            return;
        };

        let result = catch_unwind(AssertUnwindSafe(|| callback.invoke(&args)));
        match result {
            Ok(CallbackResult::Done) => {}
            Ok(CallbackResult::Async(future)) => {
                let session = self.clone();
                let path = path.to_string();
                let key = callback_key.to_string();
                tokio::task::spawn_local(async move {
                    if let Err(message) = future.await {
                        session.report_error(
                            &path,
                            "callback",
                            format!("callback `{key}` failed: {message}"),
                            None,
                        );
                    }
                });
            }
            Err(payload) => {
                self.report_error(path, "callback", panic_text(&payload), None);
            }
        }
        self.drain_navigation(path, &route_ctx);
    }

    fn handle_unmount(&self, path: &str) {
        let mount = self.inner.mounts.borrow_mut().remove(path);
        if let Some(mount) = mount {
            mount.render_effect.dispose();
            mount.url_sync_effect.dispose();
            mount.tree.borrow_mut().unmount();
            tracing::debug!(session = %self.inner.id, %path, "mount removed");
        }
    }

    fn handle_api_result(
        &self,
        id: u64,
        ok: bool,
        status: u16,
        headers: std::collections::HashMap<String, String>,
        body: Option<Value>,
    ) {
        let waiter = self.inner.pending_api.borrow_mut().remove(&id);
        match waiter {
            Some(waiter) => {
                let _ = waiter.send(ApiResult {
                    ok,
                    status,
                    headers,
                    body,
                });
            }
            None => {
                tracing::warn!(session = %self.inner.id, id, "api result with no pending call");
            }
        }
    }

    // ------------------------------------------------------------------
    // Rendering
    // ------------------------------------------------------------------

    fn install_render_effect(
        &self,
        path: &str,
        route_ctx: &Rc<RouteContext>,
        tree: &Rc<RefCell<RenderTree>>,
    ) -> Effect {
        let session = self.clone();
        let path = path.to_string();
        let route_ctx = route_ctx.clone();
        let tree = tree.clone();
        let first_render = Cell::new(true);

        // Detached so a surrounding effect (hot reload, tests) never
        // adopts and disposes it.
        untrack(|| {
            Effect::new(move || {
                if session.inner.paused.get() {
                    return;
                }
                let _env = session.mount_env(&route_ctx);

                let is_first = first_render.replace(false);
                let result = catch_unwind(AssertUnwindSafe(|| {
                    let mut tree = tree.borrow_mut();
                    if is_first {
                        let vdom = tree.render();
                        ServerMessage::VdomInit {
                            path: path.clone(),
                            vdom,
                            callbacks: tree.callback_paths(),
                            render_props: tree.render_prop_paths().to_vec(),
                            css_refs: tree.css_refs().to_vec(),
                        }
                    } else {
                        ServerMessage::VdomUpdate {
                            path: path.clone(),
                            ops: tree.rerender(None),
                        }
                    }
                }));

                match result {
                    Ok(ServerMessage::VdomUpdate { ops, .. }) if ops.is_empty() => {}
                    Ok(message) => SessionInner::send(&session.inner, message),
                    Err(payload) => {
                        session.report_error(&path, "render", panic_text(&payload), None);
                    }
                }
                session.drain_navigation(&path, &route_ctx);
            })
        })
    }

    /// Bound query-param state fields push back into the URL with a
    /// replace navigation.
    fn install_url_sync_effect(&self, path: &str, route_ctx: &Rc<RouteContext>) -> Effect {
        let session = self.clone();
        let path = path.to_string();
        let route_ctx = route_ctx.clone();
        let baseline = Cell::new(true);

        untrack(|| {
            Effect::new(move || {
                let bound = route_ctx.bound_query_params();
                if baseline.replace(false) {
                    return;
                }
                let info = untrack(|| route_ctx.info());
                let mut params = info.query_params.clone();
                for (key, value) in &bound {
                    params.insert(key.clone(), value.clone());
                }
                if params == info.query_params {
                    return;
                }
                let mut fx = rustc_hash::FxHashMap::default();
                fx.extend(params.clone());
                let query = encode_query(&fx);
                let target = if query.is_empty() {
                    info.pathname.clone()
                } else {
                    format!("{}?{}", info.pathname, query)
                };
                SessionInner::send(
                    &session.inner,
                    ServerMessage::NavigateTo {
                        path: target,
                        replace: true,
                        hard: false,
                    },
                );
            })
        })
    }

    /// Force a fresh render of one mount through its render effect, so the
    /// effect's dependency set follows the new render output. Swapped
    /// component definitions are picked up because mounted trees share
    /// them. Used by hot reload after a code swap.
    pub fn rerender_mount(&self, path: &str) {
        let effect = {
            let mounts = self.inner.mounts.borrow();
            mounts.get(path).map(|m| m.render_effect.clone())
        };
        if let Some(effect) = effect {
            effect.schedule();
        }
    }

    /// Translate navigation intents recorded during a phase into
    /// `navigate_to` messages.
    fn drain_navigation(&self, path: &str, route_ctx: &Rc<RouteContext>) {
        match route_ctx.take_intent() {
            None => {}
            Some(NavigationIntent::Navigate {
                path: target,
                replace,
                hard,
            }) => {
                SessionInner::send(
                    &self.inner,
                    ServerMessage::NavigateTo {
                        path: target,
                        replace,
                        hard,
                    },
                );
            }
            Some(NavigationIntent::NotFound) => match &self.inner.config.not_found_path {
                Some(target) => SessionInner::send(
                    &self.inner,
                    ServerMessage::NavigateTo {
                        path: target.clone(),
                        replace: true,
                        hard: false,
                    },
                ),
                None => self.report_error(path, "render", "not found", None),
            },
        }
    }

    /// The services every render of this mount sees: query store, route
    /// context (also as the query-param sink) and the ref transport.
    fn mount_env(&self, route_ctx: &Rc<RouteContext>) -> EnvGuard {
        let sink: Rc<dyn tether_core::QueryParamSink> = route_ctx.clone();
        EnvGuard::new(vec![
            Rc::new(self.inner.query_store.clone()) as Rc<dyn Any>,
            Rc::new(route_ctx.clone()) as Rc<dyn Any>,
            self.inner.ref_transport.clone() as Rc<dyn Any>,
            Rc::new(sink) as Rc<dyn Any>,
        ])
    }

    // ------------------------------------------------------------------
    // Client-proxied HTTP
    // ------------------------------------------------------------------

    /// Ask the client to perform an HTTP request and await its result.
    pub async fn call_api(
        &self,
        url: impl Into<String>,
        method: impl Into<String>,
        headers: std::collections::HashMap<String, String>,
        body: Option<Value>,
        credentials: Credentials,
    ) -> Result<ApiResult, SessionClosed> {
        let id = self.inner.next_api_id.get();
        self.inner.next_api_id.set(id + 1);
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.inner.pending_api.borrow_mut().insert(id, tx);
        SessionInner::send(
            &self.inner,
            ServerMessage::ApiCall {
                id,
                url: url.into(),
                method: method.into(),
                headers,
                body,
                credentials,
            },
        );
        rx.await.map_err(|_| SessionClosed)
    }

    // ------------------------------------------------------------------
    // Session-global state
    // ------------------------------------------------------------------

    /// A state instance shared by every mount of this session, created on
    /// first use and disposed when the session closes.
    pub fn global_state<S: State + 'static>(
        &self,
        key: impl Into<String>,
        factory: impl FnOnce() -> S,
    ) -> Rc<S> {
        let key = key.into();
        if let Some(entry) = self.inner.globals.borrow().get(&key) {
            if let Ok(value) = entry.value.clone().downcast::<S>() {
                return value;
            }
            panic!("global state `{key}` already exists with a different type");
        }
        let value = Rc::new(untrack(factory));
        value.post_init();
        let dispose = {
            let value = value.clone();
            Box::new(move || value.dispose())
        };
        self.inner.globals.borrow_mut().insert(
            key,
            GlobalEntry {
                value: value.clone(),
                dispose,
            },
        );
        value
    }

    // ------------------------------------------------------------------
    // Errors + lifecycle
    // ------------------------------------------------------------------

    pub fn report_error(
        &self,
        path: &str,
        phase: &str,
        message: impl Into<String>,
        details: Option<Value>,
    ) {
        let message = message.into();
        tracing::error!(session = %self.inner.id, %path, phase, %message, "session error");
        SessionInner::send(
            &self.inner,
            ServerMessage::ServerError {
                path: path.to_string(),
                error: ErrorPayload {
                    message,
                    stack: None,
                    phase: phase.to_string(),
                    details,
                },
            },
        );
    }

    /// Stop delivering reactive updates; used inside the hot-reload
    /// critical section. `resume_updates` re-renders every mount.
    pub fn pause_updates(&self) {
        self.inner.paused.set(true);
    }

    pub fn resume_updates(&self) {
        self.inner.paused.set(false);
        let paths = self.mount_paths();
        for path in paths {
            self.rerender_mount(&path);
        }
    }

    /// Tear the session down: every mount, channel, pending call and
    /// global state goes away. Buffered messages are discarded.
    pub fn close(&self) {
        if self.inner.closed.replace(true) {
            return;
        }
        let mounts: Vec<RouteMount> = {
            let mut map = self.inner.mounts.borrow_mut();
            map.drain().map(|(_, mount)| mount).collect()
        };
        for mount in mounts {
            mount.render_effect.dispose();
            mount.url_sync_effect.dispose();
            mount.tree.borrow_mut().unmount();
        }
        self.inner.channels.close_all();
        self.inner.pending_api.borrow_mut().clear();
        for (_, entry) in self.inner.globals.borrow_mut().drain() {
            (entry.dispose)();
        }
        self.inner.query_store.clear();
        self.inner.buffer.borrow_mut().clear();
        self.inner.connected.set(false);
        *self.inner.sender.borrow_mut() = None;
        tracing::info!(session = %self.inner.id, "session closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.get()
    }
}

/// The session closed before the client answered.
#[derive(Debug, thiserror::Error)]
#[error("session closed")]
pub struct SessionClosed;

impl SessionInner {
    fn send(inner: &Rc<SessionInner>, message: ServerMessage) {
        if inner.closed.get() {
            return;
        }
        if inner.connected.get() {
            let sender = inner.sender.borrow();
            if let Some(sender) = sender.as_ref() {
                sender(message);
                return;
            }
        }
        inner.buffer.borrow_mut().push_back(message);
    }
}

/// Fold a route chain into a tree: the leaf wrapped by its layouts.
fn compose_chain(chain: &[Rc<ComponentDef>]) -> Node {
    let mut defs = chain.iter().rev();
    let leaf = defs
        .next()
        .expect("route chain has at least the leaf");
    let mut node = leaf.node(());
    for def in defs {
        node = def.node(OutletProps {
            child: Rc::new(node),
        });
    }
    node
}

/// Merge matcher results into the client-provided location.
fn enrich_route_info(mut info: RouteInfo, matched: &RouteMatch) -> RouteInfo {
    info.path_params = matched
        .path_params
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    info.catchall = matched.catchall.clone();
    info
}

fn panic_text(payload: &Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}

/// Layout components read their child through [`OutletProps`]; this
/// renders it.
pub fn outlet(props: &OutletProps) -> Node {
    clone_spec(&props.child)
}
