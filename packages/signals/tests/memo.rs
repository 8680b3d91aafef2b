//! Computed behavior: laziness, caching, diamonds, prev values, cycles.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tether_signals::{batch, Computed, Effect, Signal};

#[test]
fn caches_until_dependency_changes() {
    let _ = tracing_subscriber::fmt::try_init();

    let count = Signal::new(2);
    let computes = Rc::new(Cell::new(0));

    let doubled = Computed::new({
        let count = count.clone();
        let computes = computes.clone();
        move || {
            computes.set(computes.get() + 1);
            count.get() * 2
        }
    });

    assert_eq!(doubled.get(), 4);
    assert_eq!(computes.get(), 1);

    assert_eq!(doubled.get(), 4);
    assert_eq!(computes.get(), 1);

    count.set(3);
    assert_eq!(doubled.get(), 6);
    assert_eq!(computes.get(), 2);
}

#[test]
fn dirty_but_unchanged_dep_does_not_recompute() {
    let a = Signal::new(1);
    let gate = Computed::new({
        let a = a.clone();
        move || a.get() > 0
    });
    let computes = Rc::new(Cell::new(0));
    let derived = Computed::new({
        let gate = gate.clone();
        let computes = computes.clone();
        move || {
            computes.set(computes.get() + 1);
            gate.get() as i32
        }
    });

    assert_eq!(derived.get(), 1);
    assert_eq!(computes.get(), 1);

    // `gate` goes dirty but recomputes to the same value, so `derived`
    // must not recompute.
    a.set(5);
    assert_eq!(derived.get(), 1);
    assert_eq!(computes.get(), 1);
}

#[test]
fn diamond_runs_effect_once() {
    let a = Signal::new(1);
    let b = Computed::new({
        let a = a.clone();
        move || a.get() + 1
    });
    let c = Computed::new({
        let a = a.clone();
        move || a.get() * 10
    });

    let runs = Rc::new(Cell::new(0));
    let seen = Rc::new(Cell::new(0));
    let effect = Effect::new({
        let (b, c) = (b.clone(), c.clone());
        let (runs, seen) = (runs.clone(), seen.clone());
        move || {
            seen.set(b.get() + c.get());
            runs.set(runs.get() + 1);
        }
    });
    assert_eq!(runs.get(), 1);
    assert_eq!(seen.get(), 12);

    a.set(2);
    assert_eq!(runs.get(), 2);
    assert_eq!(seen.get(), 23);
    effect.dispose();
}

#[test]
fn prev_value_is_passed_to_the_thunk() {
    let tick = Signal::new(0);
    let history = Computed::with_prev({
        let tick = tick.clone();
        move |prev: Option<&Vec<i32>>| {
            let mut items = prev.cloned().unwrap_or_default();
            items.push(tick.get());
            items
        }
    });

    assert_eq!(history.get(), vec![0]);
    tick.set(7);
    assert_eq!(history.get(), vec![0, 7]);
}

#[test]
fn self_cycle_is_reported() {
    let slot: Rc<RefCell<Option<Computed<i32>>>> = Rc::new(RefCell::new(None));
    let cyclic = Computed::new({
        let slot = slot.clone();
        move || match &*slot.borrow() {
            Some(inner) => match inner.try_get() {
                Ok(v) => v + 1,
                Err(_) => -1,
            },
            None => 0,
        }
    });
    *slot.borrow_mut() = Some(cyclic.clone());

    // The re-entrant read fails with a cycle error instead of recursing.
    assert_eq!(cyclic.get(), -1);
}

#[test]
fn batch_coalesces_computed_observers() {
    let a = Signal::new(1);
    let b = Signal::new(10);
    let sum = Computed::new({
        let (a, b) = (a.clone(), b.clone());
        move || a.get() + b.get()
    });

    let runs = Rc::new(Cell::new(0));
    let seen = Rc::new(Cell::new(0));
    let effect = Effect::new({
        let sum = sum.clone();
        let (runs, seen) = (runs.clone(), seen.clone());
        move || {
            seen.set(sum.get());
            runs.set(runs.get() + 1);
        }
    });
    assert_eq!(runs.get(), 1);

    batch(|| {
        a.set(2);
        b.set(20);
    });

    assert_eq!(runs.get(), 2);
    assert_eq!(seen.get(), 22);
    effect.dispose();
}
