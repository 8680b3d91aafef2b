//! Server-side handles to client DOM elements.
//!
//! A ref renders into a prop as `{__pulse_ref__: {channelId, refId}}`; the
//! client binds the mounted DOM node to that id on its side of the shared
//! ref channel. Imperative operations either fire and forget (`focus`)
//! or correlate a response (`measure`, `get`).

use std::cell::Cell;
use std::rc::Rc;

use futures_util::future::LocalBoxFuture;
use serde_json::Value;

use crate::hooks::{use_hook, HookState};
use crate::nodes::{Expr, Prop};
use crate::runtime::use_env;

/// Transport for ref operations, provided by the session through the
/// render environment.
pub trait RefTransport: 'static {
    /// Channel id shared by all refs of this session.
    fn channel_id(&self) -> String;
    /// Fire-and-forget operation on the bound element.
    fn emit(&self, ref_id: &str, op: &str, args: Vec<Value>);
    /// Operation with a correlated response.
    fn request(
        &self,
        ref_id: &str,
        op: &str,
        args: Vec<Value>,
    ) -> LocalBoxFuture<'static, Result<Value, String>>;
}

thread_local! {
    static NEXT_REF_ID: Cell<u64> = const { Cell::new(1) };
}

/// A handle to a client DOM element.
#[derive(Clone)]
pub struct ElementRef {
    ref_id: String,
    transport: Option<Rc<dyn RefTransport>>,
}

impl ElementRef {
    fn new(transport: Option<Rc<dyn RefTransport>>) -> Self {
        let ref_id = NEXT_REF_ID.with(|next| {
            let id = next.get();
            next.set(id + 1);
            id
        });
        ElementRef {
            ref_id: format!("ref-{ref_id}"),
            transport,
        }
    }

    pub fn ref_id(&self) -> &str {
        &self.ref_id
    }

    /// The prop value binding this ref to an element.
    pub fn prop(&self) -> Prop {
        let channel_id = self
            .transport
            .as_ref()
            .map(|t| t.channel_id())
            .unwrap_or_default();
        Prop::Expr(Expr::ElementRef {
            channel_id,
            ref_id: self.ref_id.clone(),
        })
    }

    fn emit(&self, op: &str, args: Vec<Value>) {
        match &self.transport {
            Some(transport) => transport.emit(&self.ref_id, op, args),
            None => tracing::warn!(op, "ref operation dropped: no transport in scope"),
        }
    }

    fn request(&self, op: &str, args: Vec<Value>) -> LocalBoxFuture<'static, Result<Value, String>> {
        match &self.transport {
            Some(transport) => transport.request(&self.ref_id, op, args),
            None => Box::pin(async { Err("no ref transport in scope".to_string()) }),
        }
    }

    pub fn focus(&self) {
        self.emit("focus", vec![]);
    }

    pub fn blur(&self) {
        self.emit("blur", vec![]);
    }

    pub fn click(&self) {
        self.emit("click", vec![]);
    }

    pub fn scroll_into_view(&self) {
        self.emit("scrollIntoView", vec![]);
    }

    pub fn select_text(&self) {
        self.emit("selectText", vec![]);
    }

    /// Bounding box and layout metrics of the bound element.
    pub fn measure(&self) -> LocalBoxFuture<'static, Result<Value, String>> {
        self.request("measure", vec![])
    }

    /// Read a property off the bound element.
    pub fn get(&self, prop: &str) -> LocalBoxFuture<'static, Result<Value, String>> {
        self.request("get", vec![Value::String(prop.to_string())])
    }

    /// Write a property on the bound element.
    pub fn set(&self, prop: &str, value: Value) {
        self.emit("set", vec![Value::String(prop.to_string()), value]);
    }
}

/// Hook storage for [`use_element_ref`].
pub struct RefHook {
    handle: ElementRef,
    on_unmount: Option<Box<dyn Fn(&ElementRef)>>,
}

impl HookState for RefHook {
    fn dispose(&self) {
        if let Some(on_unmount) = &self.on_unmount {
            on_unmount(&self.handle);
        }
    }
}

/// A persistent DOM ref for this callsite.
#[track_caller]
pub fn use_element_ref() -> ElementRef {
    let hook = use_hook("ref", None, || RefHook {
        handle: ElementRef::new(use_env::<Rc<dyn RefTransport>>().map(|t| (*t).clone())),
        on_unmount: None,
    });
    hook.handle.clone()
}

/// [`use_element_ref`] with mount/unmount callbacks: `on_mount` fires when
/// the hook state is first created, `on_unmount` when the component goes
/// away.
#[track_caller]
pub fn use_element_ref_with(
    on_mount: impl Fn(&ElementRef) + 'static,
    on_unmount: impl Fn(&ElementRef) + 'static,
) -> ElementRef {
    let hook = use_hook("ref", None, || {
        let handle = ElementRef::new(use_env::<Rc<dyn RefTransport>>().map(|t| (*t).clone()));
        on_mount(&handle);
        RefHook {
            handle,
            on_unmount: Some(Box::new(on_unmount)),
        }
    });
    hook.handle.clone()
}
