//! The server-side element tree.
//!
//! A [`Node`] is what component render functions return: text, an element
//! with props and children, or a component instance. The same type doubles
//! as the mounted tree: component nodes carry their persistent
//! [`HookContext`] and the subtree they rendered last
//! (`contents`), which the reconciler transplants across renders.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use futures_util::future::LocalBoxFuture;
use indexmap::IndexMap;
use serde_json::Value;

use crate::component::ComponentDef;
use crate::hooks::HookContext;

/// Tag used for fragments: children splice into the parent on the client.
pub const FRAGMENT_TAG: &str = "";

/// Tags with this prefix are client-side mount points (`$$ErrorBoundary`,
/// registry components).
pub const MOUNT_PREFIX: &str = "$$";

/// Sentinel prop value standing in for a callback on the wire.
pub const CALLBACK_PLACEHOLDER: &str = "$cb";

/// One node of the server-side tree.
pub enum Node {
    /// A text node. Numbers render through their string form.
    Text(String),
    Element(ElementNode),
    Component(ComponentNode),
}

/// A plain element: tag, optional key, ordered props, children.
pub struct ElementNode {
    pub tag: String,
    pub key: Option<String>,
    pub props: IndexMap<String, Prop>,
    pub children: Vec<Node>,
}

/// A component instance: a definition plus the props it was given.
///
/// `hooks` and `contents` are populated by the renderer when the node is
/// mounted and move to the replacement node when the component is
/// reconciled.
pub struct ComponentNode {
    pub def: Rc<ComponentDef>,
    pub key: Option<String>,
    pub props: Rc<dyn Any>,
    pub(crate) hooks: Option<Rc<HookContext>>,
    pub(crate) contents: Option<Box<Node>>,
}

impl ComponentNode {
    pub fn new(def: Rc<ComponentDef>, props: impl Any) -> Self {
        ComponentNode {
            def,
            key: None,
            props: Rc::new(props),
            hooks: None,
            contents: None,
        }
    }

    pub fn keyed(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// The persistent hook context, present once mounted.
    pub fn hook_context(&self) -> Option<Rc<HookContext>> {
        self.hooks.clone()
    }
}

/// A prop value on an element.
pub enum Prop {
    /// A JSON value shipped verbatim.
    Value(Value),
    /// A server-side callback; serialized as the `"$cb"` sentinel and
    /// registered in the callback table under `path.key`.
    Callback(Callback),
    /// A render prop: a subtree reconciled under `path.key`. Always listed
    /// under `eval`.
    Node(Box<Node>),
    /// An expression the client evaluates (refs, css module members).
    /// Always listed under `eval`.
    Expr(Expr),
}

/// Client-evaluated expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A reference into the client's import registry: `{t:"ref", key}`.
    Ref { key: String },
    /// Member access on another expression: `{t:"member", obj, prop}`.
    Member { obj: Box<Expr>, prop: String },
    /// A DOM element handle, serialized as
    /// `{__pulse_ref__: {channelId, refId}}` for the client runtime.
    ElementRef { channel_id: String, ref_id: String },
}

impl Expr {
    /// Member access helper: `Expr::import("styles").member("button")`.
    pub fn import(key: impl Into<String>) -> Expr {
        Expr::Ref { key: key.into() }
    }

    pub fn member(self, prop: impl Into<String>) -> Expr {
        Expr::Member {
            obj: Box::new(self),
            prop: prop.into(),
        }
    }

    /// The JSON the client evaluates.
    pub fn render(&self) -> Value {
        match self {
            Expr::Ref { key } => serde_json::json!({ "t": "ref", "key": key }),
            Expr::Member { obj, prop } => {
                serde_json::json!({ "t": "member", "obj": obj.render(), "prop": prop })
            }
            Expr::ElementRef { channel_id, ref_id } => {
                serde_json::json!({ "__pulse_ref__": { "channelId": channel_id, "refId": ref_id } })
            }
        }
    }

    /// Css-module import keys referenced by this expression.
    pub fn collect_css_refs(&self, out: &mut Vec<String>) {
        match self {
            Expr::Ref { key } => {
                if !out.contains(key) {
                    out.push(key.clone());
                }
            }
            Expr::Member { obj, .. } => obj.collect_css_refs(out),
            Expr::ElementRef { .. } => {}
        }
    }
}

/// The result of invoking a callback: either done, or a future the session
/// drives to completion.
pub enum CallbackResult {
    Done,
    Async(LocalBoxFuture<'static, Result<(), String>>),
}

struct CallbackInner {
    func: Box<dyn Fn(&[Value]) -> CallbackResult>,
    n_args: usize,
}

/// A server-side event handler referenced from the client by its
/// structural path.
#[derive(Clone)]
pub struct Callback {
    inner: Rc<CallbackInner>,
}

impl Callback {
    /// A callback taking `n_args` positional JSON arguments. Dispatch
    /// truncates the client's argument list to `n_args`.
    pub fn new(n_args: usize, f: impl Fn(&[Value]) -> CallbackResult + 'static) -> Self {
        Callback {
            inner: Rc::new(CallbackInner {
                func: Box::new(f),
                n_args,
            }),
        }
    }

    /// A zero-argument synchronous callback.
    pub fn from_fn(f: impl Fn() + 'static) -> Self {
        Callback::new(0, move |_| {
            f();
            CallbackResult::Done
        })
    }

    /// A one-argument synchronous callback.
    pub fn from_fn1(f: impl Fn(&Value) + 'static) -> Self {
        Callback::new(1, move |args| {
            f(args.first().unwrap_or(&Value::Null));
            CallbackResult::Done
        })
    }

    /// An async callback; the returned future is spawned by the session.
    pub fn from_async<F, Fut>(n_args: usize, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + 'static,
        Fut: std::future::Future<Output = Result<(), String>> + 'static,
    {
        use futures_util::FutureExt;
        Callback::new(n_args, move |args| {
            CallbackResult::Async(f(args.to_vec()).boxed_local())
        })
    }

    pub fn n_args(&self) -> usize {
        self.inner.n_args
    }

    pub fn invoke(&self, args: &[Value]) -> CallbackResult {
        let take = self.inner.n_args.min(args.len());
        (self.inner.func)(&args[..take])
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("n_args", &self.inner.n_args)
            .finish()
    }
}

impl Node {
    pub fn key(&self) -> Option<&str> {
        match self {
            Node::Text(_) => None,
            Node::Element(el) => el.key.as_deref(),
            Node::Component(c) => c.key.as_deref(),
        }
    }

    /// Two nodes are reconcilable in place when they agree on identity:
    /// equal text, same `(tag, key)` for elements, same `(component, key)`
    /// for components.
    pub fn same_node(&self, other: &Node) -> bool {
        match (self, other) {
            (Node::Text(a), Node::Text(b)) => a == b,
            (Node::Element(a), Node::Element(b)) => a.tag == b.tag && a.key == b.key,
            (Node::Component(a), Node::Component(b)) => {
                a.def.id == b.def.id && a.key == b.key
            }
            _ => false,
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Text(text) => write!(f, "Text({text:?})"),
            Node::Element(el) => f
                .debug_struct("Element")
                .field("tag", &el.tag)
                .field("key", &el.key)
                .field("children", &el.children.len())
                .finish(),
            Node::Component(c) => f
                .debug_struct("Component")
                .field("id", &c.def.id)
                .field("key", &c.key)
                .finish(),
        }
    }
}

/// Validate a sibling list before rendering: keys must be unique within
/// one parent. Nested iterables are already flattened by the builders,
/// and fragments stay as empty-tag elements the client splices.
///
/// Panics on a duplicate sibling key; the render boundary reports it as a
/// render error for the mount.
pub fn normalize_children(children: Vec<Node>) -> Vec<Node> {
    let mut seen_keys: Vec<String> = Vec::new();
    for child in &children {
        if let Some(key) = child.key() {
            if seen_keys.iter().any(|k| k == key) {
                panic!(
                    "duplicate sibling key '{key}': keys must be unique within one parent"
                );
            }
            seen_keys.push(key.to_string());
        }
    }
    children
}

/// Recursively tear down a mounted subtree: hook contexts unmount,
/// render-prop subtrees and children recurse.
pub fn unmount_node(node: &mut Node) {
    match node {
        Node::Text(_) => {}
        Node::Component(component) => {
            if let Some(mut contents) = component.contents.take() {
                unmount_node(&mut contents);
            }
            if let Some(hooks) = component.hooks.take() {
                hooks.unmount();
            }
        }
        Node::Element(element) => {
            for prop in element.props.values_mut() {
                if let Prop::Node(subtree) = prop {
                    unmount_node(subtree);
                }
            }
            for child in element.children.iter_mut() {
                unmount_node(child);
            }
            element.children.clear();
        }
    }
}

/// Join a parent path with a child segment: `("", 0)` → `"0"`,
/// `("0.1", "onClick")` → `"0.1.onClick"`.
pub fn join_path(prefix: &str, segment: impl fmt::Display) -> String {
    if prefix.is_empty() {
        segment.to_string()
    } else {
        format!("{prefix}.{segment}")
    }
}
