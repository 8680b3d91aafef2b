//! Effect lifecycle: cleanups, nesting, explicit deps, self-writes.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tether_signals::{batch, on_cleanup, Effect, Signal};

#[test]
fn cleanup_runs_before_each_rerun_and_on_dispose() {
    let count = Signal::new(0);
    let log: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));

    let effect = Effect::new({
        let count = count.clone();
        let log = log.clone();
        move || {
            let n = count.get();
            log.borrow_mut().push(format!("run {n}"));
            let log = log.clone();
            on_cleanup(move || log.borrow_mut().push(format!("cleanup {n}")));
        }
    });

    count.set(1);
    effect.dispose();

    assert_eq!(
        log.borrow().as_slice(),
        ["run 0", "cleanup 0", "run 1", "cleanup 1"]
    );
}

#[test]
fn child_cleanups_run_before_parent_cleanup() {
    let trigger = Signal::new(0);
    let log: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));

    let effect = Effect::new({
        let trigger = trigger.clone();
        let log = log.clone();
        move || {
            let _ = trigger.get();
            log.borrow_mut().push("parent run");

            let _child = Effect::new({
                let log = log.clone();
                move || {
                    log.borrow_mut().push("child run");
                    let log = log.clone();
                    on_cleanup(move || log.borrow_mut().push("child cleanup"));
                }
            });

            let log = log.clone();
            on_cleanup(move || log.borrow_mut().push("parent cleanup"));
        }
    });

    effect.dispose();
    assert_eq!(
        log.borrow().as_slice(),
        ["parent run", "child run", "child cleanup", "parent cleanup"]
    );
}

#[test]
fn nested_effect_is_disposed_on_parent_rerun() {
    let outer = Signal::new(0);
    let inner_signal = Signal::new(0);
    let inner_runs = Rc::new(Cell::new(0));

    let effect = Effect::new({
        let outer = outer.clone();
        let inner_signal = inner_signal.clone();
        let inner_runs = inner_runs.clone();
        move || {
            let _ = outer.get();
            let _child = Effect::new({
                let inner_signal = inner_signal.clone();
                let inner_runs = inner_runs.clone();
                move || {
                    let _ = inner_signal.get();
                    inner_runs.set(inner_runs.get() + 1);
                }
            });
        }
    });

    assert_eq!(inner_runs.get(), 1);

    // Parent rerun replaces the child; the old child must be dead.
    outer.set(1);
    assert_eq!(inner_runs.get(), 2);

    inner_signal.set(5);
    assert_eq!(inner_runs.get(), 3);
    effect.dispose();

    inner_signal.set(6);
    assert_eq!(inner_runs.get(), 3);
}

#[test]
fn explicit_deps_disable_auto_tracking() {
    let tracked = Signal::new(0);
    let read_but_ignored = Signal::new(0);
    let runs = Rc::new(Cell::new(0));

    let effect = Effect::builder()
        .deps(vec![tracked.dependency()])
        .build({
            let read_but_ignored = read_but_ignored.clone();
            let runs = runs.clone();
            move || {
                let _ = read_but_ignored.get();
                runs.set(runs.get() + 1);
            }
        });
    assert_eq!(runs.get(), 1);

    read_but_ignored.set(1);
    assert_eq!(runs.get(), 1);

    tracked.set(1);
    assert_eq!(runs.get(), 2);
    effect.dispose();
}

#[test]
fn update_deps_switches_to_captured_set_after_first_run() {
    let initial = Signal::new(0);
    let captured = Signal::new(0);
    let runs = Rc::new(Cell::new(0));

    let effect = Effect::builder()
        .deps(vec![initial.dependency()])
        .update_deps()
        .build({
            let captured = captured.clone();
            let runs = runs.clone();
            move || {
                let _ = captured.get();
                runs.set(runs.get() + 1);
            }
        });
    assert_eq!(runs.get(), 1);

    // After the first run, the captured set is in charge.
    captured.set(1);
    assert_eq!(runs.get(), 2);
    effect.dispose();
}

#[test]
fn lazy_effect_waits_for_manual_run() {
    let count = Signal::new(0);
    let runs = Rc::new(Cell::new(0));

    let effect = Effect::builder().lazy().build({
        let count = count.clone();
        let runs = runs.clone();
        move || {
            let _ = count.get();
            runs.set(runs.get() + 1);
        }
    });
    assert_eq!(runs.get(), 0);

    effect.run_now();
    assert_eq!(runs.get(), 1);

    count.set(1);
    assert_eq!(runs.get(), 2);
    effect.dispose();
}

#[test]
fn immediate_effect_ignores_batch() {
    let count = Signal::new(0);
    let runs = Rc::new(Cell::new(0));

    let effect = Effect::builder().immediate().build({
        let count = count.clone();
        let runs = runs.clone();
        move || {
            let _ = count.get();
            runs.set(runs.get() + 1);
        }
    });
    assert_eq!(runs.get(), 1);

    batch(|| {
        count.set(1);
        // An immediate effect runs inside the batch, not at exit.
        assert_eq!(runs.get(), 2);
    });
    assert_eq!(runs.get(), 2);
    effect.dispose();
}

#[test]
fn effect_writing_its_own_dep_converges() {
    let count = Signal::new(0);
    let effect = Effect::new({
        let count = count.clone();
        move || {
            let n = count.get();
            if n < 5 {
                count.set(n + 1);
            }
        }
    });
    assert_eq!(count.peek(), 5);
    effect.dispose();
}

#[test]
#[should_panic(expected = "update cycle")]
fn unbounded_self_rescheduling_panics() {
    let count = Signal::new(0u64);
    let _effect = Effect::new({
        let count = count.clone();
        move || {
            let n = count.get();
            count.set(n + 1);
        }
    });
}

#[test]
fn disposed_effect_never_runs_again() {
    let count = Signal::new(0);
    let runs = Rc::new(Cell::new(0));

    let effect = Effect::new({
        let count = count.clone();
        let runs = runs.clone();
        move || {
            let _ = count.get();
            runs.set(runs.get() + 1);
        }
    });
    effect.dispose();
    assert!(effect.is_disposed());

    count.set(1);
    assert_eq!(runs.get(), 1);
}

#[tokio::test(start_paused = true)]
async fn async_effect_cancels_inflight_run_on_reschedule() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let input = Signal::new(0);
            let completed = Rc::new(RefCell::new(Vec::new()));

            let effect = Effect::new_async({
                let input = input.clone();
                let completed = completed.clone();
                move || {
                    let n = input.get();
                    let completed = completed.clone();
                    async move {
                        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                        completed.borrow_mut().push(n);
                    }
                }
            });

            // Reschedule before the first run finishes: it must be aborted.
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            input.set(1);

            effect.wait().await;
            assert_eq!(completed.borrow().as_slice(), [1]);
            effect.dispose();
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn async_effect_tracks_deps_across_awaits() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let before = Signal::new(0);
            let after = Signal::new(0);
            let runs = Rc::new(Cell::new(0));

            let effect = Effect::new_async({
                let before = before.clone();
                let after = after.clone();
                let runs = runs.clone();
                move || {
                    let _ = before.get();
                    let after = after.clone();
                    let runs = runs.clone();
                    async move {
                        tokio::time::sleep(std::time::Duration::from_millis(1)).await;
                        let _ = after.get();
                        runs.set(runs.get() + 1);
                    }
                }
            });

            effect.wait().await;
            assert_eq!(runs.get(), 1);

            // A dep read after the await must retrigger the effect.
            after.set(7);
            effect.wait().await;
            assert_eq!(runs.get(), 2);
            effect.dispose();
        })
        .await;
}
