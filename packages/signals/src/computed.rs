//! Lazy derived cells.
//!
//! A [`Computed`] caches the result of a thunk and recomputes it on demand:
//! a read first checks the dirty flag, then walks its recorded dependencies
//! (recursing through other computeds) and recomputes only when some
//! dependency changed after the cached value was produced. Re-entrant reads
//! are cycles and fail with [`CycleError`].

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::rt::{self, DepNode, FrameKind, Observer};
use crate::CycleError;

type Thunk<T> = Box<dyn FnMut(Option<&T>) -> T>;

pub(crate) struct ComputedInner<T: 'static> {
    id: u64,
    name: Option<String>,
    self_weak: Weak<ComputedInner<T>>,
    thunk: RefCell<Thunk<T>>,
    value: RefCell<Option<T>>,
    dirty: Cell<bool>,
    on_stack: Cell<bool>,
    last_change: Cell<u64>,
    deps: RefCell<Vec<Rc<dyn DepNode>>>,
    observers: RefCell<Vec<Weak<dyn Observer>>>,
}

/// A cached, lazily recomputed derived value.
///
/// Like [`crate::Signal`], `Computed` is a handle; clones share the cache.
pub struct Computed<T: PartialEq + 'static> {
    inner: Rc<ComputedInner<T>>,
}

impl<T: PartialEq + 'static> Computed<T> {
    pub fn new(mut f: impl FnMut() -> T + 'static) -> Self {
        Self::with_prev(move |_| f())
    }

    /// A computed whose thunk receives the previously cached value.
    pub fn with_prev(f: impl FnMut(Option<&T>) -> T + 'static) -> Self {
        Self::build(f, None)
    }

    pub fn named(f: impl FnMut(Option<&T>) -> T + 'static, name: impl Into<String>) -> Self {
        Self::build(f, Some(name.into()))
    }

    fn build(f: impl FnMut(Option<&T>) -> T + 'static, name: Option<String>) -> Self {
        let inner = Rc::new_cyclic(|weak| ComputedInner {
            id: rt::fresh_id(),
            name,
            self_weak: weak.clone(),
            thunk: RefCell::new(Box::new(f)),
            value: RefCell::new(None),
            dirty: Cell::new(false),
            on_stack: Cell::new(false),
            last_change: Cell::new(0),
            deps: RefCell::new(Vec::new()),
            observers: RefCell::new(Vec::new()),
        });
        Computed { inner }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn last_change(&self) -> u64 {
        self.inner.last_change.get()
    }

    /// Read through a closure, recomputing first if needed. Subscribes the
    /// current tracking scope to this computed (not to its dependencies).
    pub fn try_with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, CycleError> {
        self.inner.ensure_current()?;
        rt::record_read(self.inner.clone() as Rc<dyn DepNode>);
        let value = self.inner.value.borrow();
        Ok(f(value
            .as_ref()
            .expect("computed has a value after ensure")))
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        match self.try_with(f) {
            Ok(r) => r,
            Err(err) => panic!("{err}"),
        }
    }

    /// An erased dependency handle, for effects with explicit dependencies.
    pub fn dependency(&self) -> crate::effect::Dependency {
        crate::effect::Dependency(self.inner.clone() as Rc<dyn DepNode>)
    }
}

impl<T: PartialEq + Clone + 'static> Computed<T> {
    pub fn get(&self) -> T {
        self.with(T::clone)
    }

    pub fn try_get(&self) -> Result<T, CycleError> {
        self.try_with(T::clone)
    }

    /// Read without subscribing the current scope. Still recomputes.
    pub fn peek(&self) -> T {
        self.inner
            .ensure_current()
            .unwrap_or_else(|err| panic!("{err}"));
        self.inner
            .value
            .borrow()
            .clone()
            .expect("computed has a value after ensure")
    }
}

impl<T: PartialEq + 'static> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Computed {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: PartialEq + fmt::Debug + 'static> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.inner.id)
            .field("value", &*self.inner.value.borrow())
            .field("dirty", &self.inner.dirty.get())
            .finish()
    }
}

impl<T: PartialEq + 'static> ComputedInner<T> {
    /// Recompute if never computed, or if a transitive dependency changed
    /// after our cached value was produced.
    fn ensure_current(&self) -> Result<(), CycleError> {
        if self.on_stack.get() {
            return Err(CycleError {
                name: self.name.clone(),
            });
        }
        if self.value.borrow().is_none() {
            return self.recompute();
        }
        if self.dirty.get() {
            let mut changed = false;
            let deps = self.deps.borrow().clone();
            for dep in deps {
                dep.ensure()?;
                if dep.last_change() > self.last_change.get() {
                    changed = true;
                    break;
                }
            }
            if changed {
                self.recompute()?;
            } else {
                self.dirty.set(false);
            }
        }
        Ok(())
    }

    fn recompute(&self) -> Result<(), CycleError> {
        self.on_stack.set(true);
        rt::push_frame(FrameKind::Computed);

        let prev = self.value.borrow_mut().take();
        let new = {
            let mut thunk = self.thunk.borrow_mut();
            (thunk)(prev.as_ref())
        };

        let frame = rt::pop_frame();
        self.on_stack.set(false);

        if frame.effects_created > 0 {
            panic!(
                "effects cannot be created inside a computed; \
                 move the Effect out of the computed's thunk"
            );
        }

        let old_deps = std::mem::take(&mut *self.deps.borrow_mut());
        let weak = self.self_weak.clone() as Weak<dyn Observer>;
        let new_deps = rt::rewire_deps(self.id, weak, old_deps, frame.reads);
        *self.deps.borrow_mut() = new_deps;

        let changed = match &prev {
            None => true,
            Some(p) => *p != new,
        };
        if changed {
            self.last_change.set(rt::current_epoch());
            if let Some(name) = &self.name {
                tracing::trace!(computed = %name, epoch = self.last_change.get(), "computed changed");
            }
        }
        *self.value.borrow_mut() = Some(new);
        self.dirty.set(false);
        Ok(())
    }
}

impl<T: PartialEq + 'static> DepNode for ComputedInner<T> {
    fn dep_id(&self) -> u64 {
        self.id
    }

    fn last_change(&self) -> u64 {
        self.last_change.get()
    }

    fn ensure(&self) -> Result<(), CycleError> {
        self.ensure_current()
    }

    fn add_observer(&self, observer: Weak<dyn Observer>) {
        self.observers.borrow_mut().push(observer);
    }

    fn remove_observer(&self, id: u64) {
        rt::remove_observer_from(&self.observers, id);
    }

    fn debug_name(&self) -> Option<String> {
        self.name.clone()
    }
}

impl<T: PartialEq + 'static> Observer for ComputedInner<T> {
    fn observer_id(&self) -> u64 {
        self.id
    }

    fn push_change(&self) {
        if self.dirty.get() {
            return;
        }
        self.dirty.set(true);
        rt::notify_observers(&self.observers);
    }
}
