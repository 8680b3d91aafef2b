//! The hook runtime: callsite-identity keyed state that persists across
//! renders of one component instance.
//!
//! Every mounted component owns a [`HookContext`]. Hooks address their
//! state through a namespace (one per hook kind) and an identity: the
//! caller's source location (via `#[track_caller]`), an explicit string
//! key, or a per-component default. Calling the same hook twice at one
//! identity in a single render is an error.

mod builtin;

pub use builtin::{
    use_effect, use_effect_keyed, use_init, use_setup, use_state, use_state_keyed, EffectsHook,
    InitHook, SetupHook, StateHook,
};

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::panic::Location;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::runtime;

/// Per-render-cycle lifecycle for hook state.
pub trait HookState: 'static {
    fn on_render_start(&self) {}
    fn on_render_end(&self) {}
    /// Called once when the owning component unmounts.
    fn dispose(&self) {}
}

/// How a hook call is matched to its state across renders.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum HookIdentity {
    /// The call expression's source position.
    Callsite {
        file: &'static str,
        line: u32,
        column: u32,
    },
    /// A user-provided key.
    Key(String),
    /// One instance per component, regardless of callsite.
    Default,
}

impl HookIdentity {
    pub fn from_caller(location: &'static Location<'static>) -> Self {
        HookIdentity::Callsite {
            file: location.file(),
            line: location.line(),
            column: location.column(),
        }
    }
}

struct HookEntry {
    state: Rc<dyn HookState>,
    any: Rc<dyn Any>,
}

#[derive(Default)]
struct HookNamespace {
    entries: IndexMap<HookIdentity, HookEntry>,
    /// Identities already used this render; duplicate use is an error.
    seen: Vec<HookIdentity>,
}

/// Persistent hook storage for one mounted component instance.
pub struct HookContext {
    pub(crate) component_id: RefCell<String>,
    pub(crate) signature_hash: Cell<u64>,
    self_weak: std::rc::Weak<HookContext>,
    render_cycle: Cell<u64>,
    namespaces: RefCell<IndexMap<&'static str, Rc<RefCell<HookNamespace>>>>,
    unmounted: Cell<bool>,
}

impl HookContext {
    pub fn new() -> Rc<Self> {
        Rc::new_cyclic(|weak| HookContext {
            component_id: RefCell::new(String::new()),
            signature_hash: Cell::new(0),
            self_weak: weak.clone(),
            render_cycle: Cell::new(0),
            namespaces: RefCell::new(IndexMap::new()),
            unmounted: Cell::new(false),
        })
    }

    pub fn component_id(&self) -> String {
        self.component_id.borrow().clone()
    }

    pub fn signature_hash(&self) -> u64 {
        self.signature_hash.get()
    }

    pub fn render_cycle(&self) -> u64 {
        self.render_cycle.get()
    }

    /// Enter this context for one render. Bumps the render cycle, resets
    /// duplicate-callsite bookkeeping and notifies every hook state.
    pub fn enter(&self) -> HookContextGuard {
        let this = self
            .self_weak
            .upgrade()
            .expect("hook context entered while being dropped");
        self.render_cycle.set(self.render_cycle.get() + 1);
        let namespaces: Vec<Rc<RefCell<HookNamespace>>> =
            self.namespaces.borrow().values().cloned().collect();
        for namespace in &namespaces {
            namespace.borrow_mut().seen.clear();
            let states: Vec<Rc<dyn HookState>> = namespace
                .borrow()
                .entries
                .values()
                .map(|e| e.state.clone())
                .collect();
            for state in states {
                state.on_render_start();
            }
        }
        runtime::push_hook_context(this.clone());
        HookContextGuard { ctx: this }
    }

    /// Look up or create the hook state for `(namespace, identity)`.
    pub fn use_hook_state<T: HookState + 'static>(
        &self,
        namespace: &'static str,
        identity: HookIdentity,
        init: impl FnOnce() -> T,
    ) -> Rc<T> {
        let ns = self
            .namespaces
            .borrow_mut()
            .entry(namespace)
            .or_insert_with(|| Rc::new(RefCell::new(HookNamespace::default())))
            .clone();

        {
            let mut ns = ns.borrow_mut();
            if ns.seen.contains(&identity) {
                panic!(
                    "\nhook error in component `{}`: the `{namespace}` hook was called \
                     twice at the same {} in one render.\n\
                     Pass an explicit key to give each call its own identity.\n",
                    self.component_id.borrow(),
                    match &identity {
                        HookIdentity::Callsite { .. } => "callsite",
                        _ => "identity",
                    },
                );
            }
            ns.seen.push(identity.clone());
        }

        let existing = ns.borrow().entries.get(&identity).map(|e| e.any.clone());
        let any = match existing {
            Some(any) => any,
            None => {
                let state = Rc::new(init());
                let entry = HookEntry {
                    state: state.clone(),
                    any: state.clone(),
                };
                ns.borrow_mut().entries.insert(identity, entry);
                state
            }
        };
        any.downcast::<T>().unwrap_or_else(|_| {
            panic!(
                "\nhook error in component `{}`: the `{namespace}` hook at this callsite \
                 changed its state type between renders.\n",
                self.component_id.borrow(),
            )
        })
    }

    /// A stable fingerprint of the hook layout: the ordered sequence of
    /// (namespace, identity) pairs. Hot reload compares fingerprints to
    /// decide whether state survives a component swap.
    pub fn layout_fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        for (name, namespace) in self.namespaces.borrow().iter() {
            name.hash(&mut hasher);
            for identity in namespace.borrow().entries.keys() {
                identity.hash(&mut hasher);
            }
        }
        hasher.finish()
    }

    /// Dispose every hook state, in insertion order.
    pub fn unmount(&self) {
        if self.unmounted.replace(true) {
            return;
        }
        let namespaces: Vec<Rc<RefCell<HookNamespace>>> =
            self.namespaces.borrow().values().cloned().collect();
        for namespace in namespaces {
            let states: Vec<Rc<dyn HookState>> = namespace
                .borrow()
                .entries
                .values()
                .map(|e| e.state.clone())
                .collect();
            for state in states {
                state.dispose();
            }
        }
        self.namespaces.borrow_mut().clear();
    }

    pub fn is_unmounted(&self) -> bool {
        self.unmounted.get()
    }
}

impl fmt::Debug for HookContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookContext")
            .field("component_id", &self.component_id.borrow())
            .field("render_cycle", &self.render_cycle.get())
            .finish()
    }
}

/// Active render scope for a hook context; restores the previous context
/// and fires `on_render_end` when dropped.
pub struct HookContextGuard {
    ctx: Rc<HookContext>,
}

impl Drop for HookContextGuard {
    fn drop(&mut self) {
        runtime::pop_hook_context();
        let namespaces: Vec<Rc<RefCell<HookNamespace>>> =
            self.ctx.namespaces.borrow().values().cloned().collect();
        for namespace in namespaces {
            let states: Vec<Rc<dyn HookState>> = namespace
                .borrow()
                .entries
                .values()
                .map(|e| e.state.clone())
                .collect();
            for state in states {
                state.on_render_end();
            }
        }
    }
}

/// Core hook entry point. Builtin and user hooks call this with their
/// namespace; the identity is the caller's source position unless `key`
/// overrides it.
#[track_caller]
pub fn use_hook<T: HookState + 'static>(
    namespace: &'static str,
    key: Option<String>,
    init: impl FnOnce() -> T,
) -> Rc<T> {
    let location = Location::caller();
    let ctx = runtime::current_hook_context().unwrap_or_else(|| {
        panic!(
            "\nhook error: `{namespace}` was called outside of a component render.\n\
             Hooks can only run while a component is rendering - not in event\n\
             handlers, effects, or module initialization.\n"
        )
    });
    let identity = match key {
        Some(key) => HookIdentity::Key(key),
        None => HookIdentity::from_caller(location),
    };
    ctx.use_hook_state(namespace, identity, init)
}

/// Like [`use_hook`] but with one instance per component, regardless of
/// how many callsites use the namespace.
pub fn use_hook_default<T: HookState + 'static>(
    namespace: &'static str,
    init: impl FnOnce() -> T,
) -> Rc<T> {
    let ctx = runtime::current_hook_context().unwrap_or_else(|| {
        panic!(
            "\nhook error: `{namespace}` was called outside of a component render.\n\
             Hooks can only run while a component is rendering - not in event\n\
             handlers, effects, or module initialization.\n"
        )
    });
    ctx.use_hook_state(namespace, HookIdentity::Default, init)
}
