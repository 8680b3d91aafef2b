//! Component definitions and the scoped registry.
//!
//! A [`ComponentDef`] pairs a stable id with a render function. Definitions
//! live in a [`ComponentRegistry`] owned by the app (and, in dev mode, by
//! the reload manager) so hot reload can swap render functions without
//! touching mounted hook state.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::nodes::{ComponentNode, Node};

type RenderFn = Rc<dyn Fn(&dyn Any) -> Node>;

/// A component: id, signature hash and render function.
///
/// The signature hash captures the shape of the component's interface
/// (props and hook layout); hot reload compares hashes to decide whether
/// mounted state can be preserved across a code swap. The render function
/// sits behind a cell so a reload can refresh it in place: every mounted
/// tree holding this definition picks up the new body on its next render.
pub struct ComponentDef {
    pub id: String,
    signature_hash: std::cell::Cell<u64>,
    self_weak: std::rc::Weak<ComponentDef>,
    render: RefCell<RenderFn>,
}

impl ComponentDef {
    pub fn new<P: 'static>(
        id: impl Into<String>,
        render: impl Fn(&P) -> Node + 'static,
    ) -> Rc<Self> {
        Self::with_signature(id, 0, render)
    }

    pub fn with_signature<P: 'static>(
        id: impl Into<String>,
        signature_hash: u64,
        render: impl Fn(&P) -> Node + 'static,
    ) -> Rc<Self> {
        let id = id.into();
        Rc::new_cyclic(|weak| ComponentDef {
            id: id.clone(),
            signature_hash: std::cell::Cell::new(signature_hash),
            self_weak: weak.clone(),
            render: RefCell::new(erase_render(id, render)),
        })
    }

    pub fn signature_hash(&self) -> u64 {
        self.signature_hash.get()
    }

    /// Replace the render function (and signature) in place. Hot reload
    /// uses this so mounted trees keep their hook state when the new
    /// signature is compatible.
    pub fn swap_render<P: 'static>(
        &self,
        signature_hash: u64,
        render: impl Fn(&P) -> Node + 'static,
    ) {
        *self.render.borrow_mut() = erase_render(self.id.clone(), render);
        self.signature_hash.set(signature_hash);
    }

    /// Instantiate this component with the given props.
    pub fn node(&self, props: impl Any) -> Node {
        let this = self.self_weak.upgrade().expect("component def is alive");
        Node::Component(ComponentNode::new(this, props))
    }

    pub fn keyed_node(&self, key: impl Into<String>, props: impl Any) -> Node {
        let this = self.self_weak.upgrade().expect("component def is alive");
        Node::Component(ComponentNode::new(this, props).keyed(key))
    }

    pub(crate) fn invoke(&self, props: &dyn Any) -> Node {
        let render = self.render.borrow().clone();
        render(props)
    }
}

fn erase_render<P: 'static>(id: String, render: impl Fn(&P) -> Node + 'static) -> RenderFn {
    Rc::new(move |props: &dyn Any| {
        let props = props.downcast_ref::<P>().unwrap_or_else(|| {
            panic!(
                "component `{id}` was given props of the wrong type; expected {}",
                std::any::type_name::<P>()
            )
        });
        render(props)
    })
}

impl fmt::Debug for ComponentDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentDef")
            .field("id", &self.id)
            .field("signature_hash", &self.signature_hash.get())
            .finish()
    }
}

/// A registry of component definitions, keyed by component id.
///
/// Not a global: the owner decides its lifetime, which lets the reload
/// manager clear and repopulate it inside the reload critical section.
#[derive(Default)]
pub struct ComponentRegistry {
    defs: RefCell<FxHashMap<String, Rc<ComponentDef>>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, def: Rc<ComponentDef>) {
        let previous = self.defs.borrow_mut().insert(def.id.clone(), def.clone());
        if let Some(previous) = previous {
            tracing::debug!(
                component = %def.id,
                old_signature = previous.signature_hash(),
                new_signature = def.signature_hash(),
                "component definition replaced"
            );
        }
    }

    pub fn get(&self, id: &str) -> Option<Rc<ComponentDef>> {
        self.defs.borrow().get(id).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        self.defs.borrow().keys().cloned().collect()
    }

    pub fn clear(&self) {
        self.defs.borrow_mut().clear();
    }

    pub fn len(&self) -> usize {
        self.defs.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.borrow().is_empty()
    }
}
