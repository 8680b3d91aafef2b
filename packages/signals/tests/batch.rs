//! Batching: coalescing, nesting, ordering.

use std::cell::RefCell;
use std::rc::Rc;

use tether_signals::{batch, Effect, Signal};

#[test]
fn multiple_writes_run_effect_once() {
    let count = Signal::new(0);
    let runs = Rc::new(RefCell::new(Vec::new()));

    let effect = Effect::new({
        let count = count.clone();
        let runs = runs.clone();
        move || runs.borrow_mut().push(count.get())
    });

    batch(|| {
        count.set(1);
        count.set(2);
        count.set(3);
    });

    assert_eq!(runs.borrow().as_slice(), [0, 3]);
    effect.dispose();
}

#[test]
fn nested_batches_flush_at_outermost_exit() {
    let count = Signal::new(0);
    let runs = Rc::new(RefCell::new(Vec::new()));

    let effect = Effect::new({
        let count = count.clone();
        let runs = runs.clone();
        move || runs.borrow_mut().push(count.get())
    });

    batch(|| {
        count.set(1);
        batch(|| {
            count.set(2);
        });
        // The inner batch exit must not flush.
        assert_eq!(runs.borrow().len(), 1);
        count.set(3);
    });

    assert_eq!(runs.borrow().as_slice(), [0, 3]);
    effect.dispose();
}

#[test]
fn effects_run_in_insertion_order() {
    let trigger = Signal::new(0);
    let order = Rc::new(RefCell::new(Vec::new()));

    let first = Effect::new({
        let trigger = trigger.clone();
        let order = order.clone();
        move || {
            let _ = trigger.get();
            order.borrow_mut().push("first");
        }
    });
    let second = Effect::new({
        let trigger = trigger.clone();
        let order = order.clone();
        move || {
            let _ = trigger.get();
            order.borrow_mut().push("second");
        }
    });

    order.borrow_mut().clear();
    trigger.set(1);
    assert_eq!(order.borrow().as_slice(), ["first", "second"]);
    first.dispose();
    second.dispose();
}

#[test]
fn writes_during_flush_run_in_a_later_pass() {
    let a = Signal::new(0);
    let b = Signal::new(0);
    let log = Rc::new(RefCell::new(Vec::new()));

    let forward = Effect::new({
        let (a, b) = (a.clone(), b.clone());
        let log = log.clone();
        move || {
            let n = a.get();
            log.borrow_mut().push(format!("a={n}"));
            if n == 1 {
                b.set(10);
            }
        }
    });
    let watcher = Effect::new({
        let b = b.clone();
        let log = log.clone();
        move || {
            let n = b.get();
            log.borrow_mut().push(format!("b={n}"));
        }
    });

    log.borrow_mut().clear();
    a.set(1);
    assert_eq!(log.borrow().as_slice(), ["a=1", "b=10"]);
    forward.dispose();
    watcher.dispose();
}
