//! Reactive cells.
//!
//! A [`Signal`] holds a single value. Reading it inside a tracking scope (an
//! effect run or a computed recomputation) records the reader as a dependent;
//! writing a different value advances the global epoch and notifies every
//! observer. Writes of an equal value are no-ops.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::rt::{self, DepNode, Observer};
use crate::CycleError;

pub(crate) struct SignalInner<T> {
    id: u64,
    name: Option<String>,
    value: RefCell<T>,
    pub(crate) observers: RefCell<Vec<Weak<dyn Observer>>>,
    last_change: Cell<u64>,
}

/// A reactive cell holding a value of type `T`.
///
/// `Signal` is a cheap handle: clones share the same cell and observer list.
/// Use [`Signal::fork`] for an independent cell with the same value.
pub struct Signal<T: 'static> {
    pub(crate) inner: Rc<SignalInner<T>>,
}

impl<T: 'static> Signal<T> {
    pub fn new(value: T) -> Self {
        Signal {
            inner: Rc::new(SignalInner {
                id: rt::fresh_id(),
                name: None,
                value: RefCell::new(value),
                observers: RefCell::new(Vec::new()),
                last_change: Cell::new(0),
            }),
        }
    }

    /// A signal with a debug name, visible in tracing output.
    pub fn named(value: T, name: impl Into<String>) -> Self {
        Signal {
            inner: Rc::new(SignalInner {
                id: rt::fresh_id(),
                name: Some(name.into()),
                value: RefCell::new(value),
                observers: RefCell::new(Vec::new()),
                last_change: Cell::new(0),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Epoch of the most recent accepted write; 0 when never written.
    pub fn last_change(&self) -> u64 {
        self.inner.last_change.get()
    }

    /// Read through a closure, subscribing the current tracking scope.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        rt::record_read(self.inner.clone());
        f(&self.inner.value.borrow())
    }

    /// Read without subscribing anything.
    pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.value.borrow())
    }

    /// Replace the value unconditionally and notify observers.
    pub fn force(&self, value: T) {
        *self.inner.value.borrow_mut() = value;
        self.touch();
    }

    /// Mutate in place and notify observers.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        f(&mut self.inner.value.borrow_mut());
        self.touch();
    }

    /// Mark the signal changed and wake observers.
    fn touch(&self) {
        let epoch = rt::bump_epoch();
        self.inner.last_change.set(epoch);
        if let Some(name) = &self.inner.name {
            tracing::trace!(signal = %name, epoch, "signal write");
        }
        rt::notify_observers(&self.inner.observers);
        rt::maybe_flush();
    }

    pub(crate) fn as_dep(&self) -> Rc<dyn DepNode> {
        self.inner.clone() as Rc<dyn DepNode>
    }

    /// An erased dependency handle, for effects with explicit dependencies.
    pub fn dependency(&self) -> crate::effect::Dependency {
        crate::effect::Dependency(self.as_dep())
    }
}

impl<T: Clone + 'static> Signal<T> {
    /// Read the value, subscribing the current tracking scope.
    pub fn get(&self) -> T {
        self.with(T::clone)
    }

    /// Read the value without subscribing.
    pub fn peek(&self) -> T {
        self.with_untracked(T::clone)
    }

    /// An independent signal holding a clone of the current value. The fork
    /// starts with an empty observer list.
    pub fn fork(&self) -> Signal<T> {
        Signal::new(self.peek())
    }
}

impl<T: PartialEq + 'static> Signal<T> {
    /// Write the value. Equal values are ignored; observers are only
    /// notified when the value actually changes.
    pub fn set(&self, value: T) {
        {
            let current = self.inner.value.borrow();
            if *current == value {
                return;
            }
        }
        *self.inner.value.borrow_mut() = value;
        self.touch();
    }
}

impl<T: 'static> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Signal {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> PartialEq for Signal<T> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.inner.id)
            .field("value", &*self.inner.value.borrow())
            .finish()
    }
}

impl<T: fmt::Display + 'static> fmt::Display for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.inner.value.borrow(), f)
    }
}

impl<T: 'static> DepNode for SignalInner<T> {
    fn dep_id(&self) -> u64 {
        self.id
    }

    fn last_change(&self) -> u64 {
        self.last_change.get()
    }

    fn ensure(&self) -> Result<(), CycleError> {
        Ok(())
    }

    fn add_observer(&self, observer: Weak<dyn Observer>) {
        let id = observer.upgrade().map(|o| o.observer_id());
        let mut observers = self.observers.borrow_mut();
        if let Some(id) = id {
            if observers
                .iter()
                .filter_map(|w| w.upgrade())
                .any(|o| o.observer_id() == id)
            {
                return;
            }
        }
        observers.push(observer);
    }

    fn remove_observer(&self, id: u64) {
        rt::remove_observer_from(&self.observers, id);
    }

    fn debug_name(&self) -> Option<String> {
        self.name.clone()
    }
}
