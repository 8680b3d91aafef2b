//! Side-effecting observers.
//!
//! An [`Effect`] runs a thunk and re-runs it whenever one of the
//! dependencies it read has changed since its last run. Sync effects are
//! batched; async effects bypass batching, cancel their previous in-flight
//! task on reschedule, and keep tracking dependencies across `await`s by
//! re-entering the tracking scope on every poll.
//!
//! Effects created while another effect is running become its children:
//! disposing the parent disposes them first, and their cleanups run before
//! the parent's.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::future::LocalBoxFuture;
use futures_util::FutureExt;

use crate::rt::{self, DepNode, FrameKind, Observer};

/// An erased handle to a signal or computed, used for explicit dependency
/// lists.
pub struct Dependency(pub(crate) Rc<dyn DepNode>);

impl Clone for Dependency {
    fn clone(&self) -> Self {
        Dependency(self.0.clone())
    }
}

type ErrorHook = Box<dyn Fn(Box<dyn std::any::Any + Send>)>;

pub(crate) enum Thunk {
    Sync(Box<dyn FnMut()>),
    Async(Box<dyn FnMut() -> LocalBoxFuture<'static, ()>>),
}

pub(crate) struct EffectInner {
    pub(crate) id: u64,
    name: Option<String>,
    self_weak: Weak<EffectInner>,
    thunk: RefCell<Option<Thunk>>,
    pub(crate) cleanup: RefCell<Option<Box<dyn FnOnce()>>>,
    pub(crate) deps: RefCell<Vec<Rc<dyn DepNode>>>,
    run_epoch: Cell<u64>,
    has_run: Cell<bool>,
    auto_track: Cell<bool>,
    immediate: bool,
    running: Cell<bool>,
    pub(crate) queued: Cell<bool>,
    pub(crate) disposed: Cell<bool>,
    scheduled_force: Cell<bool>,
    parent: RefCell<Option<Weak<EffectInner>>>,
    children: RefCell<Vec<Rc<EffectInner>>>,
    on_error: RefCell<Option<ErrorHook>>,
    interval_task: RefCell<Option<tokio::task::JoinHandle<()>>>,
    pub(crate) inflight_abort: RefCell<Option<tokio::task::AbortHandle>>,
    inflight_join: RefCell<Option<tokio::task::JoinHandle<()>>>,
}

/// Configuration for an [`Effect`].
#[derive(Default)]
pub struct EffectBuilder {
    name: Option<String>,
    immediate: bool,
    lazy: bool,
    deps: Vec<Dependency>,
    update_deps: bool,
    interval: Option<Duration>,
    on_error: Option<ErrorHook>,
}

impl EffectBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Run synchronously on schedule instead of joining the batch.
    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }

    /// Do not run on creation; the caller triggers the first run.
    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }

    /// Register these dependencies up front and disable auto-tracking.
    pub fn deps(mut self, deps: Vec<Dependency>) -> Self {
        self.deps = deps;
        self
    }

    /// With explicit deps: use them for the first run only, then switch to
    /// the captured set.
    pub fn update_deps(mut self) -> Self {
        self.update_deps = true;
        self
    }

    /// Re-run the effect on this interval until cancelled. Requires a
    /// current-thread runtime with a `LocalSet`.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Handle panics escaping a run instead of logging them.
    pub fn on_error(mut self, f: impl Fn(Box<dyn std::any::Any + Send>) + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    pub fn build(self, f: impl FnMut() + 'static) -> Effect {
        self.finish(Thunk::Sync(Box::new(f)))
    }

    pub fn build_async<F, Fut>(self, mut f: F) -> Effect
    where
        F: FnMut() -> Fut + 'static,
        Fut: std::future::Future<Output = ()> + 'static,
    {
        self.finish(Thunk::Async(Box::new(move || f().boxed_local())))
    }

    fn finish(self, thunk: Thunk) -> Effect {
        let lazy = self.lazy;
        // With `update_deps`, the explicit list only drives the first run;
        // captured reads take over from the first run onward.
        let auto_track = self.deps.is_empty() || self.update_deps;
        let inner = Rc::new_cyclic(|weak: &Weak<EffectInner>| EffectInner {
            id: rt::fresh_id(),
            name: self.name,
            self_weak: weak.clone(),
            thunk: RefCell::new(Some(thunk)),
            cleanup: RefCell::new(None),
            deps: RefCell::new(Vec::new()),
            run_epoch: Cell::new(0),
            has_run: Cell::new(false),
            auto_track: Cell::new(auto_track),
            immediate: self.immediate,
            running: Cell::new(false),
            queued: Cell::new(false),
            disposed: Cell::new(false),
            scheduled_force: Cell::new(false),
            parent: RefCell::new(None),
            children: RefCell::new(Vec::new()),
            on_error: RefCell::new(self.on_error),
            interval_task: RefCell::new(None),
            inflight_abort: RefCell::new(None),
            inflight_join: RefCell::new(None),
        });

        rt::note_effect_created();

        // Nested effects are owned by the effect that created them.
        if let Some(parent) = rt::current_effect() {
            *inner.parent.borrow_mut() = Some(parent.self_weak.clone());
            parent.children.borrow_mut().push(inner.clone());
        }

        // Explicit dependencies subscribe at construction.
        for dep in &self.deps {
            dep.0
                .add_observer(inner.self_weak.clone() as Weak<dyn Observer>);
            inner.deps.borrow_mut().push(dep.0.clone());
        }

        if let Some(interval) = self.interval {
            let weak = inner.self_weak.clone();
            let task = tokio::task::spawn_local(async move {
                loop {
                    tokio::time::sleep(interval).await;
                    let Some(effect) = weak.upgrade() else { break };
                    if effect.disposed.get() {
                        break;
                    }
                    EffectInner::schedule(&effect);
                }
            });
            *inner.interval_task.borrow_mut() = Some(task);
        }

        let effect = Effect { inner };
        if !lazy {
            effect.schedule();
        }
        effect
    }
}

/// A side-effecting observer of signals and computeds.
///
/// The handle is cheap to clone; all clones refer to the same effect.
/// Dropping handles does not dispose the effect while a parent effect or
/// the scheduler still holds it; call [`Effect::dispose`] to tear it down.
pub struct Effect {
    inner: Rc<EffectInner>,
}

impl Effect {
    pub fn builder() -> EffectBuilder {
        EffectBuilder::default()
    }

    /// Create and schedule an effect. With no batch open this runs it
    /// before returning.
    pub fn new(f: impl FnMut() + 'static) -> Effect {
        Self::builder().build(f)
    }

    /// Create an async effect. Each run spawns a task on the local set;
    /// rescheduling aborts the previous task first.
    pub fn new_async<F, Fut>(f: F) -> Effect
    where
        F: FnMut() -> Fut + 'static,
        Fut: std::future::Future<Output = ()> + 'static,
    {
        Self::builder().build_async(f)
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    /// Queue the effect for the current batch (or run it now when the
    /// effect is immediate/async and no batch applies).
    pub fn schedule(&self) {
        EffectInner::schedule(&self.inner);
    }

    /// Run synchronously right now, regardless of batching.
    pub fn run_now(&self) {
        EffectInner::run(&self.inner);
    }

    /// Cancel the in-flight async run, and optionally the polling interval.
    pub fn cancel(&self, cancel_interval: bool) {
        if let Some(abort) = self.inner.inflight_abort.borrow_mut().take() {
            abort.abort();
        }
        if cancel_interval {
            if let Some(task) = self.inner.interval_task.borrow_mut().take() {
                task.abort();
            }
        }
    }

    /// Await the current async run, if one is in flight. Does not start a
    /// run; returns immediately when idle.
    pub async fn wait(&self) {
        let handle = self.inner.inflight_join.borrow_mut().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Tear the effect down: children first, then the cleanup, then all
    /// dependency edges and the parent link.
    pub fn dispose(&self) {
        EffectInner::dispose(&self.inner);
    }
}

impl Clone for Effect {
    fn clone(&self) -> Self {
        Effect {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl PartialEq for Effect {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.inner.id)
            .field("disposed", &self.inner.disposed.get())
            .finish()
    }
}

impl EffectInner {
    fn is_async(&self) -> bool {
        matches!(&*self.thunk.borrow(), Some(Thunk::Async(_)))
    }

    fn schedule(this: &Rc<EffectInner>) {
        if this.disposed.get() {
            return;
        }
        this.scheduled_force.set(true);
        if this.is_async() || this.immediate {
            EffectInner::run(this);
        } else {
            rt::enqueue_effect(this.clone());
            rt::maybe_flush();
        }
    }

    /// Whether the effect actually needs to run: either explicitly
    /// scheduled, never run, or some dependency changed after its last run.
    pub(crate) fn should_run(&self) -> bool {
        if self.disposed.get() {
            return false;
        }
        if self.scheduled_force.get() || !self.has_run.get() {
            return true;
        }
        let deps = self.deps.borrow().clone();
        for dep in deps {
            if dep.ensure().is_err() {
                return true;
            }
            if dep.last_change() > self.run_epoch.get() {
                return true;
            }
        }
        false
    }

    pub(crate) fn run(this: &Rc<EffectInner>) {
        if this.disposed.get() || this.running.get() {
            return;
        }
        this.scheduled_force.set(false);

        // Previous run teardown: children, then our own cleanup.
        let children = std::mem::take(&mut *this.children.borrow_mut());
        for child in children {
            EffectInner::dispose(&child);
        }
        if let Some(cleanup) = this.cleanup.borrow_mut().take() {
            crate::untrack(cleanup);
        }

        let thunk = this.thunk.borrow_mut().take();
        let Some(mut thunk) = thunk else { return };

        match &mut thunk {
            Thunk::Sync(f) => {
                this.running.set(true);
                let entry_epoch = rt::current_epoch();
                rt::push_frame(FrameKind::Effect(this.self_weak.clone()));
                let result = catch_unwind(AssertUnwindSafe(|| f()));
                let frame = rt::pop_frame();
                this.running.set(false);
                this.run_epoch.set(entry_epoch);
                this.has_run.set(true);

                if this.auto_track.get() {
                    let old = std::mem::take(&mut *this.deps.borrow_mut());
                    let weak = this.self_weak.clone() as Weak<dyn Observer>;
                    let new = rt::rewire_deps(this.id, weak, old, frame.reads);
                    *this.deps.borrow_mut() = new;
                }

                if let Err(payload) = result {
                    this.report_error(payload);
                }
            }
            Thunk::Async(f) => {
                // Cancel the previous in-flight task before the new run.
                if let Some(abort) = this.inflight_abort.borrow_mut().take() {
                    abort.abort();
                }
                this.inflight_join.borrow_mut().take();

                let entry_epoch = rt::current_epoch();
                this.run_epoch.set(entry_epoch);
                this.has_run.set(true);

                // Reads made while building the future (before the first
                // await) are dependencies too.
                rt::push_frame(FrameKind::Effect(this.self_weak.clone()));
                let future = f();
                let frame = rt::pop_frame();
                let mut seen = Vec::new();
                merge_async_reads(this, &mut seen, frame.reads);

                let scoped = ScopedFuture {
                    effect: this.self_weak.clone(),
                    inner: future,
                    seen,
                };
                let handle = tokio::task::spawn_local(scoped);
                *this.inflight_abort.borrow_mut() = Some(handle.abort_handle());
                *this.inflight_join.borrow_mut() = Some(handle);
            }
        }

        if !this.disposed.get() {
            *this.thunk.borrow_mut() = Some(thunk);
        }
    }

    fn report_error(&self, payload: Box<dyn std::any::Any + Send>) {
        let hook = self.on_error.borrow();
        if let Some(hook) = hook.as_ref() {
            hook(payload);
        } else {
            let message = panic_message(&payload);
            tracing::error!(
                effect = self.name.as_deref().unwrap_or("<unnamed>"),
                %message,
                "effect run panicked"
            );
        }
    }

    pub(crate) fn dispose(this: &Rc<EffectInner>) {
        if this.disposed.replace(true) {
            return;
        }
        if let Some(task) = this.interval_task.borrow_mut().take() {
            task.abort();
        }
        if let Some(abort) = this.inflight_abort.borrow_mut().take() {
            abort.abort();
        }
        this.inflight_join.borrow_mut().take();

        let children = std::mem::take(&mut *this.children.borrow_mut());
        for child in children {
            EffectInner::dispose(&child);
        }
        if let Some(cleanup) = this.cleanup.borrow_mut().take() {
            crate::untrack(cleanup);
        }
        for dep in std::mem::take(&mut *this.deps.borrow_mut()) {
            dep.remove_observer(this.id);
        }
        if let Some(parent) = this.parent.borrow_mut().take() {
            if let Some(parent) = parent.upgrade() {
                parent.children.borrow_mut().retain(|c| c.id != this.id);
            }
        }
        this.thunk.borrow_mut().take();
        this.on_error.borrow_mut().take();
    }
}

impl Observer for EffectInner {
    fn observer_id(&self) -> u64 {
        self.id
    }

    fn push_change(&self) {
        if self.disposed.get() {
            return;
        }
        let Some(this) = self.self_weak.upgrade() else {
            return;
        };
        if self.is_async() || self.immediate {
            // Async and immediate effects bypass batching.
            this.scheduled_force.set(true);
            EffectInner::run(&this);
        } else {
            rt::enqueue_effect(this);
        }
    }
}

/// Wraps an async effect's future so every poll happens inside the
/// effect's tracking scope. Reads from any segment between awaits become
/// dependencies; when the future completes, dependencies that were not
/// read this run are dropped.
struct ScopedFuture {
    effect: Weak<EffectInner>,
    inner: LocalBoxFuture<'static, ()>,
    seen: Vec<Rc<dyn DepNode>>,
}

impl std::future::Future for ScopedFuture {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        let Some(effect) = this.effect.upgrade() else {
            return Poll::Ready(());
        };
        if effect.disposed.get() {
            return Poll::Ready(());
        }

        rt::push_frame(FrameKind::Effect(this.effect.clone()));
        let poll = catch_unwind(AssertUnwindSafe(|| this.inner.poll_unpin(cx)));
        let frame = rt::pop_frame();

        merge_async_reads(&effect, &mut this.seen, frame.reads);

        let poll = match poll {
            Ok(poll) => poll,
            Err(payload) => {
                effect.report_error(payload);
                Poll::Ready(())
            }
        };

        if poll.is_ready() {
            let seen = std::mem::take(&mut this.seen);
            let old = std::mem::take(&mut *effect.deps.borrow_mut());
            for dep in &old {
                if !seen.iter().any(|s| s.dep_id() == dep.dep_id()) {
                    dep.remove_observer(effect.id);
                }
            }
            *effect.deps.borrow_mut() = seen;
            effect.inflight_abort.borrow_mut().take();
            return Poll::Ready(());
        }
        Poll::Pending
    }
}

/// Subscribe reads from one async segment, deduplicating against both the
/// effect's live dep set and the reads seen earlier in this run.
fn merge_async_reads(
    effect: &Rc<EffectInner>,
    seen: &mut Vec<Rc<dyn DepNode>>,
    reads: Vec<Rc<dyn DepNode>>,
) {
    for dep in reads {
        let already = effect
            .deps
            .borrow()
            .iter()
            .any(|d| d.dep_id() == dep.dep_id());
        if !already {
            dep.add_observer(effect.self_weak.clone() as Weak<dyn Observer>);
            effect.deps.borrow_mut().push(dep.clone());
        }
        if !seen.iter().any(|d| d.dep_id() == dep.dep_id()) {
            seen.push(dep);
        }
    }
}

/// Register a cleanup with the effect currently running. The cleanup runs
/// before the effect's next run and when the effect is disposed.
pub fn on_cleanup(f: impl FnOnce() + 'static) {
    match rt::current_effect() {
        Some(effect) => {
            let mut slot = effect.cleanup.borrow_mut();
            *slot = match slot.take() {
                Some(prev) => Some(Box::new(move || {
                    prev();
                    f();
                })),
                None => Some(Box::new(f)),
            };
        }
        None => {
            tracing::warn!("on_cleanup called outside of a running effect; ignored");
        }
    }
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}
