//! Thread-local render context.
//!
//! While a component renders, the runtime stack carries its hook context,
//! the session-provided services (query store, ref transport, route
//! context) and the hot-reload flag. Everything here is scoped with RAII
//! guards so nested renders and render props unwind cleanly.

use std::any::{Any, TypeId};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::hooks::HookContext;

thread_local! {
    static HOOK_STACK: RefCell<Vec<Rc<HookContext>>> = const { RefCell::new(Vec::new()) };
    static ENV_STACK: RefCell<Vec<FxHashMap<TypeId, Rc<dyn Any>>>> =
        const { RefCell::new(Vec::new()) };
    static HOT_RELOAD: Cell<bool> = const { Cell::new(false) };
}

/// The hook context of the component currently rendering, if any.
pub fn current_hook_context() -> Option<Rc<HookContext>> {
    HOOK_STACK.with(|stack| stack.borrow().last().cloned())
}

pub(crate) fn push_hook_context(ctx: Rc<HookContext>) {
    HOOK_STACK.with(|stack| stack.borrow_mut().push(ctx));
}

pub(crate) fn pop_hook_context() {
    HOOK_STACK.with(|stack| {
        stack.borrow_mut().pop();
    });
}

/// Install a set of services for the dynamic extent of `f`. Sessions wrap
/// renders in this so hooks can reach the query store, ref transport and
/// route context without global state.
pub struct EnvGuard {
    _priv: (),
}

impl EnvGuard {
    pub fn new(services: Vec<Rc<dyn Any>>) -> Self {
        let mut map: FxHashMap<TypeId, Rc<dyn Any>> = FxHashMap::default();
        for service in services {
            map.insert((*service).type_id(), service);
        }
        ENV_STACK.with(|stack| stack.borrow_mut().push(map));
        EnvGuard { _priv: () }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        ENV_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Look up a service provided by an enclosing [`EnvGuard`]. Inner scopes
/// shadow outer ones.
pub fn use_env<T: 'static>() -> Option<Rc<T>> {
    ENV_STACK.with(|stack| {
        let stack = stack.borrow();
        for frame in stack.iter().rev() {
            if let Some(service) = frame.get(&TypeId::of::<T>()) {
                return service.clone().downcast::<T>().ok();
            }
        }
        None
    })
}

/// True while the reload manager is re-rendering mounts after a code swap;
/// the reconciler relaxes component identity to signature compatibility.
pub fn is_hot_reload_active() -> bool {
    HOT_RELOAD.with(|flag| flag.get())
}

/// Run `f` with the hot-reload flag set.
pub fn hot_reload_scope<R>(f: impl FnOnce() -> R) -> R {
    struct Reset(bool);
    impl Drop for Reset {
        fn drop(&mut self) {
            HOT_RELOAD.with(|flag| flag.set(self.0));
        }
    }
    let previous = HOT_RELOAD.with(|flag| flag.replace(true));
    let _reset = Reset(previous);
    f()
}
