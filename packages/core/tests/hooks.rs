//! Hook runtime: identity, persistence, misuse diagnostics.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tether_core::factory::*;
use tether_core::prelude::*;
use tether_core::{State, StateError, StateSnapshot};
use tether_signals::Signal;

struct PlainState {
    value: Signal<i64>,
}

impl State for PlainState {
    fn drain(&self) -> Result<StateSnapshot, StateError> {
        Ok(StateSnapshot {
            version: 1,
            values: serde_json::Map::new(),
        })
    }
    fn hydrate(&self, _: StateSnapshot) -> Result<(), StateError> {
        Ok(())
    }
}

#[test]
fn init_runs_once_and_preserves_identity() {
    let inits = Rc::new(Cell::new(0));
    let seen: Rc<RefCell<Vec<usize>>> = Rc::new(RefCell::new(Vec::new()));

    let def = ComponentDef::new("init-demo", {
        let inits = inits.clone();
        let seen = seen.clone();
        move |_: &()| {
            let inits = inits.clone();
            let value = use_init(move || {
                inits.set(inits.get() + 1);
                vec![1, 2, 3]
            });
            seen.borrow_mut().push(Rc::as_ptr(&value) as usize);
            el("div").build()
        }
    });

    let mut tree = RenderTree::new(def.node(()));
    tree.render();
    tree.rerender(None);
    tree.rerender(None);

    assert_eq!(inits.get(), 1);
    let seen = seen.borrow();
    assert_eq!(seen.len(), 3);
    assert!(seen.iter().all(|ptr| *ptr == seen[0]), "identity preserved");
}

#[test]
fn state_persists_across_renders() {
    let observed: Rc<RefCell<Vec<i64>>> = Rc::new(RefCell::new(Vec::new()));

    let def = ComponentDef::new("stateful", {
        let observed = observed.clone();
        move |_: &()| {
            let state = use_state(|| PlainState {
                value: Signal::new(10),
            });
            observed.borrow_mut().push(state.value.peek());
            state.value.update(|n| *n += 1);
            el("div").build()
        }
    });

    let mut tree = RenderTree::new(def.node(()));
    tree.render();
    tree.rerender(None);
    tree.rerender(None);

    // Each render sees the previous render's mutation: same instance.
    assert_eq!(observed.borrow().as_slice(), [10, 11, 12]);
}

#[test]
#[should_panic(expected = "called twice at the same callsite")]
fn duplicate_callsite_without_key_panics() {
    let def = ComponentDef::new("looped", |_: &()| {
        for _ in 0..2 {
            use_state(|| PlainState {
                value: Signal::new(0),
            });
        }
        el("div").build()
    });
    RenderTree::new(def.node(())).render();
}

#[test]
fn keys_disambiguate_a_shared_callsite() {
    let instances: Rc<RefCell<Vec<usize>>> = Rc::new(RefCell::new(Vec::new()));

    let def = ComponentDef::new("keyed-loop", {
        let instances = instances.clone();
        move |_: &()| {
            for key in ["left", "right"] {
                let state = use_state_keyed(key, || PlainState {
                    value: Signal::new(0),
                });
                instances.borrow_mut().push(Rc::as_ptr(&state) as usize);
            }
            el("div").build()
        }
    });

    let mut tree = RenderTree::new(def.node(()));
    tree.render();
    tree.rerender(None);

    let instances = instances.borrow();
    assert_eq!(instances.len(), 4);
    assert_ne!(instances[0], instances[1], "distinct per key");
    assert_eq!(instances[0], instances[2], "left persists");
    assert_eq!(instances[1], instances[3], "right persists");
}

#[test]
#[should_panic(expected = "outside of a component render")]
fn hooks_outside_render_panic() {
    use_state(|| PlainState {
        value: Signal::new(0),
    });
}

#[test]
fn hook_effects_survive_rerenders_and_die_on_unmount() {
    let runs = Rc::new(Cell::new(0));
    let trigger = Signal::new(0);

    let def = ComponentDef::new("effectful", {
        let runs = runs.clone();
        let trigger = trigger.clone();
        move |_: &()| {
            let runs = runs.clone();
            let trigger = trigger.clone();
            use_effect(move || {
                let _ = trigger.get();
                runs.set(runs.get() + 1);
            });
            el("div").build()
        }
    });

    let mut tree = RenderTree::new(def.node(()));
    tree.render();
    assert_eq!(runs.get(), 1);

    // Re-render: the effect is neither disposed nor duplicated.
    tree.rerender(None);
    assert_eq!(runs.get(), 1);

    trigger.set(1);
    assert_eq!(runs.get(), 2);

    tree.unmount();
    trigger.set(2);
    assert_eq!(runs.get(), 2);
}

#[test]
fn effect_key_change_recreates_effects() {
    let created = Rc::new(Cell::new(0));

    let def = ComponentDef::new("keyed-effects", {
        let created = created.clone();
        move |generation: &i32| {
            let created = created.clone();
            use_effect_keyed(generation.to_string(), move || {
                created.set(created.get() + 1);
            });
            el("div").build()
        }
    });

    let mut tree = RenderTree::new(def.node(1));
    tree.render();
    assert_eq!(created.get(), 1);

    // Same key: nothing happens.
    tree.rerender(Some(def.node(1)));
    assert_eq!(created.get(), 1);

    // Key change: old effects disposed, new ones created and run.
    tree.rerender(Some(def.node(2)));
    assert_eq!(created.get(), 2);
}

#[test]
fn setup_runs_once_per_render_cycle() {
    let runs = Rc::new(Cell::new(0));

    let def = ComponentDef::new("setup-demo", {
        let runs = runs.clone();
        move |_: &()| {
            let runs = runs.clone();
            tether_core::use_setup("boot", move || runs.set(runs.get() + 1));
            el("div").build()
        }
    });

    let mut tree = RenderTree::new(def.node(()));
    tree.render();
    assert_eq!(runs.get(), 1);

    // Each re-render is a new cycle: the block fires again, once.
    tree.rerender(None);
    assert_eq!(runs.get(), 2);
}

#[test]
fn unmount_disposes_hook_state_in_order() {
    let order: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));

    struct Tattle {
        tag: &'static str,
        log: Rc<RefCell<Vec<&'static str>>>,
    }
    impl State for Tattle {
        fn drain(&self) -> Result<StateSnapshot, StateError> {
            Ok(StateSnapshot {
                version: 1,
                values: serde_json::Map::new(),
            })
        }
        fn hydrate(&self, _: StateSnapshot) -> Result<(), StateError> {
            Ok(())
        }
        fn dispose(&self) {
            self.log.borrow_mut().push(self.tag);
        }
    }

    let def = ComponentDef::new("ordered", {
        let order = order.clone();
        move |_: &()| {
            let first = order.clone();
            use_state(move || Tattle {
                tag: "first",
                log: first,
            });
            let second = order.clone();
            use_state(move || Tattle {
                tag: "second",
                log: second,
            });
            el("div").build()
        }
    });

    let mut tree = RenderTree::new(def.node(()));
    tree.render();
    tree.unmount();

    assert_eq!(order.borrow().as_slice(), ["first", "second"]);
}
