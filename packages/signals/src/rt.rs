//! The thread-local reactive runtime.
//!
//! Every signal, computed and effect on a thread shares one runtime: a global
//! epoch counter, a stack of tracking frames, and the pending-effect queue.
//! The runtime is deliberately single-threaded (`Rc`/`RefCell`); cross-thread
//! work is marshaled onto the owning loop by higher layers.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use crate::effect::EffectInner;
use crate::CycleError;

thread_local! {
    pub(crate) static RT: Runtime = Runtime::new();
}

/// Upper bound on effect runs in a single drain. Exceeding it means an
/// effect keeps rescheduling itself without converging.
pub(crate) const MAX_EFFECT_RUNS_PER_DRAIN: usize = 10_000;

/// A node that can be depended upon: a signal or a computed.
pub(crate) trait DepNode {
    fn dep_id(&self) -> u64;

    /// Epoch of the most recent value change.
    fn last_change(&self) -> u64;

    /// Bring a derived node up to date so that `last_change` is accurate.
    /// Signals are always up to date.
    fn ensure(&self) -> Result<(), CycleError>;

    fn add_observer(&self, observer: Weak<dyn Observer>);
    fn remove_observer(&self, id: u64);

    fn debug_name(&self) -> Option<String> {
        None
    }
}

/// A node that observes dependencies: a computed or an effect.
pub(crate) trait Observer {
    fn observer_id(&self) -> u64;

    /// A dependency changed. Computeds go dirty and cascade; effects enqueue.
    fn push_change(&self);
}

pub(crate) enum FrameKind {
    /// Reads are swallowed.
    Untracked,
    /// Reads become dependencies of this effect.
    Effect(Weak<EffectInner>),
    /// Reads become dependencies of the computed being recomputed.
    Computed,
}

pub(crate) struct Frame {
    pub kind: FrameKind,
    pub reads: Vec<Rc<dyn DepNode>>,
    pub effects_created: usize,
}

impl Frame {
    fn new(kind: FrameKind) -> Self {
        Frame {
            kind,
            reads: Vec::new(),
            effects_created: 0,
        }
    }
}

pub(crate) struct Runtime {
    epoch: Cell<u64>,
    next_id: Cell<u64>,
    frames: RefCell<Vec<Frame>>,
    queue: RefCell<VecDeque<Rc<EffectInner>>>,
    batch_depth: Cell<usize>,
    draining: Cell<bool>,
}

impl Runtime {
    fn new() -> Self {
        Runtime {
            // Epoch 0 is reserved for "never changed".
            epoch: Cell::new(1),
            next_id: Cell::new(1),
            frames: RefCell::new(Vec::new()),
            queue: RefCell::new(VecDeque::new()),
            batch_depth: Cell::new(0),
            draining: Cell::new(false),
        }
    }
}

pub(crate) fn with_rt<R>(f: impl FnOnce(&Runtime) -> R) -> R {
    RT.with(f)
}

pub(crate) fn fresh_id() -> u64 {
    with_rt(|rt| {
        let id = rt.next_id.get();
        rt.next_id.set(id + 1);
        id
    })
}

pub(crate) fn current_epoch() -> u64 {
    with_rt(|rt| rt.epoch.get())
}

pub(crate) fn bump_epoch() -> u64 {
    with_rt(|rt| {
        let e = rt.epoch.get() + 1;
        rt.epoch.set(e);
        e
    })
}

pub(crate) fn push_frame(kind: FrameKind) {
    with_rt(|rt| rt.frames.borrow_mut().push(Frame::new(kind)));
}

pub(crate) fn pop_frame() -> Frame {
    with_rt(|rt| {
        rt.frames
            .borrow_mut()
            .pop()
            .expect("reactive frame stack underflow")
    })
}

/// Record a dependency read in the innermost tracking frame, if any.
pub(crate) fn record_read(dep: Rc<dyn DepNode>) {
    with_rt(|rt| {
        let mut frames = rt.frames.borrow_mut();
        let Some(frame) = frames.last_mut() else {
            return;
        };
        if matches!(frame.kind, FrameKind::Untracked) {
            return;
        }
        let id = dep.dep_id();
        if !frame.reads.iter().any(|d| d.dep_id() == id) {
            frame.reads.push(dep);
        }
    })
}

/// Note that an effect was constructed; computeds forbid this.
pub(crate) fn note_effect_created() {
    with_rt(|rt| {
        if let Some(frame) = rt.frames.borrow_mut().last_mut() {
            frame.effects_created += 1;
        }
    })
}

/// The innermost effect frame, used by `on_cleanup` and nested ownership.
pub(crate) fn current_effect() -> Option<Rc<EffectInner>> {
    with_rt(|rt| {
        let frames = rt.frames.borrow();
        for frame in frames.iter().rev() {
            match &frame.kind {
                FrameKind::Untracked => return None,
                FrameKind::Effect(weak) => return weak.upgrade(),
                FrameKind::Computed => continue,
            }
        }
        None
    })
}

pub(crate) fn enqueue_effect(effect: Rc<EffectInner>) {
    with_rt(|rt| {
        if effect.queued.get() || effect.disposed.get() {
            return;
        }
        effect.queued.set(true);
        rt.queue.borrow_mut().push_back(effect);
    })
}

pub(crate) fn start_batch() {
    with_rt(|rt| rt.batch_depth.set(rt.batch_depth.get() + 1));
}

/// Ends a batch. Returns true when this closed the outermost batch and the
/// queue should be drained.
pub(crate) fn end_batch() -> bool {
    with_rt(|rt| {
        let depth = rt.batch_depth.get();
        debug_assert!(depth > 0, "unbalanced batch");
        rt.batch_depth.set(depth - 1);
        depth == 1
    })
}

pub(crate) fn in_batch() -> bool {
    with_rt(|rt| rt.batch_depth.get() > 0)
}

/// Drain pending effects unless a batch or another drain is in progress.
pub(crate) fn maybe_flush() {
    if !in_batch() {
        drain_queue();
    }
}

/// Run every pending effect. Each full pass over the queue advances the
/// epoch once; effects rescheduled during a pass run in the next pass.
pub(crate) fn drain_queue() {
    let already = with_rt(|rt| {
        if rt.draining.get() {
            true
        } else {
            rt.draining.set(true);
            false
        }
    });
    if already {
        return;
    }

    let mut total_runs = 0usize;
    loop {
        let pass: Vec<Rc<EffectInner>> =
            with_rt(|rt| rt.queue.borrow_mut().drain(..).collect());
        if pass.is_empty() {
            break;
        }
        for effect in pass {
            effect.queued.set(false);
            if effect.should_run() {
                total_runs += 1;
                if total_runs > MAX_EFFECT_RUNS_PER_DRAIN {
                    with_rt(|rt| rt.draining.set(false));
                    panic!(
                        "reactive update cycle: effects were re-scheduled more than {} times in one flush; \
                         an effect is likely writing to a signal it depends on without converging",
                        MAX_EFFECT_RUNS_PER_DRAIN
                    );
                }
                EffectInner::run(&effect);
            }
        }
        bump_epoch();
    }
    with_rt(|rt| rt.draining.set(false));
}

/// Notify a set of observers, dropping the ones that are gone.
pub(crate) fn notify_observers(observers: &RefCell<Vec<Weak<dyn Observer>>>) {
    let live: Vec<Rc<dyn Observer>> = {
        let mut slot = observers.borrow_mut();
        slot.retain(|w| w.upgrade().is_some());
        slot.iter().filter_map(|w| w.upgrade()).collect()
    };
    for obs in live {
        obs.push_change();
    }
}

/// Remove an observer by id from an observer list.
pub(crate) fn remove_observer_from(observers: &RefCell<Vec<Weak<dyn Observer>>>, id: u64) {
    observers
        .borrow_mut()
        .retain(|w| match w.upgrade() {
            Some(o) => o.observer_id() != id,
            None => false,
        });
}

/// Subscribe/unsubscribe `observer` so that its dependency list becomes
/// exactly `new_deps`. Returns the new list to store.
pub(crate) fn rewire_deps(
    observer_id: u64,
    observer: Weak<dyn Observer>,
    old_deps: Vec<Rc<dyn DepNode>>,
    new_deps: Vec<Rc<dyn DepNode>>,
) -> Vec<Rc<dyn DepNode>> {
    for old in &old_deps {
        if !new_deps.iter().any(|d| d.dep_id() == old.dep_id()) {
            old.remove_observer(observer_id);
        }
    }
    for new in &new_deps {
        if !old_deps.iter().any(|d| d.dep_id() == new.dep_id()) {
            new.add_observer(observer.clone());
        }
    }
    new_deps
}
