//! Built-in hooks: setup blocks, init blocks, state instances, effects.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tether_signals::{untrack, Effect};

use crate::hooks::{use_hook, use_hook_default, HookState};
use crate::runtime::{current_hook_context, use_env};
use crate::state::{QueryParamSink, State};

/// Hook storage for [`use_setup`].
pub struct SetupHook {
    last_cycle: Cell<u64>,
}

impl HookState for SetupHook {}

/// Run `f` at most once per render cycle for this key. Useful for
/// per-render side work that must not repeat when a render prop or child
/// builder re-enters the component.
pub fn use_setup(key: impl Into<String>, f: impl FnOnce()) {
    let ctx = current_hook_context().unwrap_or_else(|| {
        panic!(
            "\nhook error: `setup` was called outside of a component render.\n"
        )
    });
    let hook = use_hook("setup", Some(key.into()), || SetupHook {
        last_cycle: Cell::new(0),
    });
    let cycle = ctx.render_cycle();
    if hook.last_cycle.replace(cycle) != cycle {
        untrack(f);
    }
}

/// Hook storage for [`use_init`].
pub struct InitHook<T: 'static> {
    value: Rc<T>,
}

impl<T: 'static> HookState for InitHook<T> {}

/// Run `f` exactly once per component instance and hand back the same
/// value on every subsequent render, preserving identity.
///
/// One init block per component; a second call in the same render is an
/// error.
pub fn use_init<T: 'static>(f: impl FnOnce() -> T) -> Rc<T> {
    let hook = use_hook_default("init", || InitHook {
        value: Rc::new(untrack(f)),
    });
    hook.value.clone()
}

/// Hook storage for [`use_state`].
pub struct StateHook<S: State> {
    instance: Rc<S>,
}

impl<S: State> HookState for StateHook<S> {
    fn dispose(&self) {
        self.instance.dispose();
    }
}

/// A persistent [`State`] instance bound to this callsite. The instance is
/// created on first render and disposed when the component unmounts.
///
/// Two `use_state` calls at the same callsite in one render need keys; use
/// [`use_state_keyed`].
#[track_caller]
pub fn use_state<S: State + 'static>(init: impl FnOnce() -> S) -> Rc<S> {
    let hook = use_hook("state", None, || StateHook {
        instance: make_state(init),
    });
    hook.instance.clone()
}

/// [`use_state`] with an explicit identity key instead of the callsite.
pub fn use_state_keyed<S: State + 'static>(key: impl Into<String>, init: impl FnOnce() -> S) -> Rc<S> {
    let hook = use_hook("state", Some(key.into()), || StateHook {
        instance: make_state(init),
    });
    hook.instance.clone()
}

fn make_state<S: State + 'static>(init: impl FnOnce() -> S) -> Rc<S> {
    let instance = Rc::new(untrack(init));
    instance.post_init();
    // Query-param fields sync with the URL when a sink is in scope.
    let fields = instance.query_params();
    if !fields.is_empty() {
        if let Some(sink) = use_env::<Rc<dyn QueryParamSink>>() {
            sink.bind(fields);
        }
    }
    instance
}

/// Hook storage for [`use_effect`]/[`use_effect_keyed`].
#[derive(Default)]
pub struct EffectsHook {
    effects: RefCell<Vec<Effect>>,
    key: RefCell<Option<String>>,
    initialized: std::cell::Cell<bool>,
}

impl EffectsHook {
    fn replace(&self, effects: Vec<Effect>, key: Option<String>) {
        for effect in self.effects.borrow_mut().drain(..) {
            effect.dispose();
        }
        *self.effects.borrow_mut() = effects;
        *self.key.borrow_mut() = key;
        self.initialized.set(true);
    }
}

impl HookState for EffectsHook {
    fn dispose(&self) {
        for effect in self.effects.borrow_mut().drain(..) {
            effect.dispose();
        }
        self.initialized.set(false);
    }
}

/// Install reactive effects that persist across renders and are disposed
/// on unmount. One `use_effect`/`use_effect_keyed` call per component.
pub fn use_effect(f: impl FnMut() + 'static) {
    install_effects(None, vec![Box::new(f)]);
}

/// Like [`use_effect`], but the effects are torn down and recreated when
/// `key` changes between renders.
pub fn use_effect_keyed(key: impl Into<String>, f: impl FnMut() + 'static) {
    install_effects(Some(key.into()), vec![Box::new(f)]);
}

fn install_effects(key: Option<String>, fns: Vec<Box<dyn FnMut()>>) {
    let hook = use_hook_default("effects", EffectsHook::default);

    if hook.initialized.get() {
        let key_changed = key.is_some() && *hook.key.borrow() != key;
        if !key_changed {
            return;
        }
    }
    // Build outside any tracking scope so the mount's render effect does
    // not adopt these as children.
    let effects = untrack(|| fns.into_iter().map(Effect::new).collect::<Vec<_>>());
    hook.replace(effects, key);
}
