//! Multiplexed channels between the session and its client.
//!
//! A channel pairs `emit` (fire and forget) with `request` (correlated
//! response). The ref hook rides a shared session channel; user plugins
//! can open their own.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use futures_util::future::LocalBoxFuture;
use futures_util::FutureExt;
use rustc_hash::FxHashMap;
use serde_json::Value;
use slab::Slab;
use tether_core::RefTransport;

use crate::protocol::ServerMessage;

type Sender = Rc<dyn Fn(ServerMessage)>;
type EventHandler = Box<dyn Fn(Value) -> Option<Value>>;

/// One logical channel.
pub struct Channel {
    id: String,
    sender: Sender,
    next_request: Cell<u64>,
    pending: RefCell<FxHashMap<u64, tokio::sync::oneshot::Sender<Value>>>,
    handlers: RefCell<FxHashMap<String, EventHandler>>,
}

impl Channel {
    /// Fire an event at the client side of this channel.
    pub fn emit(&self, event: impl Into<String>, payload: Value) {
        (self.sender)(ServerMessage::Channel {
            channel: self.id.clone(),
            event: event.into(),
            payload,
            request_id: None,
        });
    }

    /// Fire an event and await the client's correlated response.
    pub fn request(
        &self,
        event: impl Into<String>,
        payload: Value,
    ) -> LocalBoxFuture<'static, Result<Value, String>> {
        let request_id = self.next_request.get();
        self.next_request.set(request_id + 1);
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.pending.borrow_mut().insert(request_id, tx);
        (self.sender)(ServerMessage::Channel {
            channel: self.id.clone(),
            event: event.into(),
            payload,
            request_id: Some(request_id),
        });
        async move {
            rx.await
                .map_err(|_| "channel closed before the response arrived".to_string())
        }
        .boxed_local()
    }

    /// Handle an event coming from the client. Returning `Some` answers a
    /// correlated request.
    pub fn on(&self, event: impl Into<String>, handler: impl Fn(Value) -> Option<Value> + 'static) {
        self.handlers
            .borrow_mut()
            .insert(event.into(), Box::new(handler));
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn handle_incoming(
        &self,
        event: &str,
        payload: Value,
        request_id: Option<u64>,
    ) {
        // A "response" event resolves one of our pending requests.
        if event == "response" {
            if let Some(request_id) = request_id {
                if let Some(waiter) = self.pending.borrow_mut().remove(&request_id) {
                    let _ = waiter.send(payload);
                    return;
                }
            }
            tracing::warn!(channel = %self.id, "response with no pending request");
            return;
        }

        let result = {
            let handlers = self.handlers.borrow();
            handlers.get(event).map(|handler| handler(payload))
        };
        match result {
            Some(Some(reply)) => {
                if let Some(request_id) = request_id {
                    (self.sender)(ServerMessage::Channel {
                        channel: self.id.clone(),
                        event: "response".into(),
                        payload: reply,
                        request_id: Some(request_id),
                    });
                }
            }
            Some(None) => {}
            None => {
                tracing::debug!(channel = %self.id, event, "unhandled channel event");
            }
        }
    }

    fn close(&self) {
        self.pending.borrow_mut().clear();
        self.handlers.borrow_mut().clear();
    }
}

/// Owns every channel of one session.
pub struct ChannelsManager {
    sender: Sender,
    ids: RefCell<Slab<()>>,
    channels: RefCell<FxHashMap<String, Rc<Channel>>>,
}

impl ChannelsManager {
    pub fn new(sender: Sender) -> Rc<Self> {
        Rc::new(ChannelsManager {
            sender,
            ids: RefCell::new(Slab::new()),
            channels: RefCell::new(FxHashMap::default()),
        })
    }

    /// Open a channel with a fresh id under the given namespace
    /// (`"ref"`, `"form"`, a plugin name).
    pub fn open(&self, namespace: &str) -> Rc<Channel> {
        let slot = self.ids.borrow_mut().insert(());
        let id = format!("{namespace}-{slot}");
        let channel = Rc::new(Channel {
            id: id.clone(),
            sender: self.sender.clone(),
            next_request: Cell::new(1),
            pending: RefCell::new(FxHashMap::default()),
            handlers: RefCell::new(FxHashMap::default()),
        });
        self.channels.borrow_mut().insert(id, channel.clone());
        channel
    }

    pub fn get(&self, id: &str) -> Option<Rc<Channel>> {
        self.channels.borrow().get(id).cloned()
    }

    /// Route an incoming client message to its channel.
    pub fn dispatch(&self, id: &str, event: &str, payload: Value, request_id: Option<u64>) {
        match self.get(id) {
            Some(channel) => channel.handle_incoming(event, payload, request_id),
            None => tracing::warn!(channel = id, "message for unknown channel"),
        }
    }

    pub fn close_all(&self) {
        for (_, channel) in self.channels.borrow_mut().drain() {
            channel.close();
        }
    }
}

/// The ref hook's transport: one shared channel per session carrying all
/// DOM-ref operations, correlated by `refId`.
pub struct RefChannel {
    channel: Rc<Channel>,
}

impl RefChannel {
    pub fn new(channel: Rc<Channel>) -> Rc<Self> {
        Rc::new(RefChannel { channel })
    }
}

impl RefTransport for RefChannel {
    fn channel_id(&self) -> String {
        self.channel.id().to_string()
    }

    fn emit(&self, ref_id: &str, op: &str, args: Vec<Value>) {
        self.channel.emit(
            op,
            serde_json::json!({ "refId": ref_id, "args": args }),
        );
    }

    fn request(
        &self,
        ref_id: &str,
        op: &str,
        args: Vec<Value>,
    ) -> LocalBoxFuture<'static, Result<Value, String>> {
        self.channel.request(
            op,
            serde_json::json!({ "refId": ref_id, "args": args }),
        )
    }
}
