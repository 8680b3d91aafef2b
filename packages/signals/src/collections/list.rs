use std::cell::RefCell;
use std::fmt;
use std::ops::Range;

use crate::Signal;

/// A `Vec` with a signal per index plus a structure signal.
///
/// Per-index reads subscribe to that index only; `len` and iteration
/// subscribe to the structure signal, which changes on every non-replace
/// mutation. `Clone` produces fresh signals with no observers.
pub struct ReactiveList<T: Clone + PartialEq + 'static> {
    items: RefCell<Vec<Signal<T>>>,
    structure: Signal<u64>,
}

impl<T: Clone + PartialEq + 'static> ReactiveList<T> {
    pub fn new() -> Self {
        Self::from_values(Vec::new())
    }

    pub fn from_values(values: Vec<T>) -> Self {
        ReactiveList {
            items: RefCell::new(values.into_iter().map(Signal::new).collect()),
            structure: Signal::new(0),
        }
    }

    fn bump_structure(&self) {
        self.structure.update(|n| *n += 1);
    }

    /// Number of items; subscribes to the structure signal.
    pub fn len(&self) -> usize {
        self.structure.with(|_| ());
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read one index, subscribing only to that index's signal.
    pub fn get(&self, index: usize) -> Option<T> {
        let signal = self.items.borrow().get(index).cloned();
        signal.map(|s| s.get())
    }

    /// Replace the value at `index` in place. Equal values are ignored and
    /// the structure signal is untouched either way.
    pub fn set(&self, index: usize, value: T) {
        let signal = self.items.borrow()[index].clone();
        signal.set(value);
    }

    pub fn push(&self, value: T) {
        self.items.borrow_mut().push(Signal::new(value));
        self.bump_structure();
    }

    pub fn pop(&self) -> Option<T> {
        let popped = self.items.borrow_mut().pop();
        popped.map(|s| {
            self.bump_structure();
            s.peek()
        })
    }

    pub fn insert(&self, index: usize, value: T) {
        self.items.borrow_mut().insert(index, Signal::new(value));
        self.bump_structure();
    }

    pub fn remove(&self, index: usize) -> T {
        let signal = self.items.borrow_mut().remove(index);
        self.bump_structure();
        signal.peek()
    }

    pub fn clear(&self) {
        self.items.borrow_mut().clear();
        self.bump_structure();
    }

    /// Replace the whole list. An equal-length assignment writes through
    /// the per-index signals without bumping the structure signal; a
    /// different length rebuilds the signals and bumps it.
    pub fn assign(&self, values: Vec<T>) {
        let same_len = self.items.borrow().len() == values.len();
        if same_len {
            let signals: Vec<Signal<T>> = self.items.borrow().clone();
            for (signal, value) in signals.into_iter().zip(values) {
                signal.set(value);
            }
        } else {
            *self.items.borrow_mut() = values.into_iter().map(Signal::new).collect();
            self.bump_structure();
        }
    }

    /// Replace `range` with `values`. Equal lengths update in place;
    /// otherwise the range's signals are rebuilt and the structure bumped.
    pub fn splice(&self, range: Range<usize>, values: Vec<T>) {
        if range.len() == values.len() {
            let signals: Vec<Signal<T>> =
                self.items.borrow()[range].iter().cloned().collect();
            for (signal, value) in signals.into_iter().zip(values) {
                signal.set(value);
            }
        } else {
            self.items
                .borrow_mut()
                .splice(range, values.into_iter().map(Signal::new));
            self.bump_structure();
        }
    }

    /// Sort by the natural order. The signals move with their values, so
    /// observers keep following the element they subscribed to.
    pub fn sort(&self)
    where
        T: Ord,
    {
        self.items.borrow_mut().sort_by(|a, b| a.peek().cmp(&b.peek()));
        self.bump_structure();
    }

    pub fn sort_by(&self, mut compare: impl FnMut(&T, &T) -> std::cmp::Ordering) {
        self.items
            .borrow_mut()
            .sort_by(|a, b| compare(&a.peek(), &b.peek()));
        self.bump_structure();
    }

    /// Tracked conversion: subscribes to the structure signal and every
    /// per-index signal.
    pub fn to_vec(&self) -> Vec<T> {
        self.structure.with(|_| ());
        let signals: Vec<Signal<T>> = self.items.borrow().clone();
        signals.iter().map(Signal::get).collect()
    }

    /// Untracked plain copy of the current contents.
    pub fn snapshot(&self) -> Vec<T> {
        self.items.borrow().iter().map(Signal::peek).collect()
    }
}

impl<T: Clone + PartialEq + 'static> Default for ReactiveList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + PartialEq + 'static> Clone for ReactiveList<T> {
    fn clone(&self) -> Self {
        Self::from_values(self.snapshot())
    }
}

impl<T: Clone + PartialEq + 'static> FromIterator<T> for ReactiveList<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::from_values(iter.into_iter().collect())
    }
}

impl<T: Clone + PartialEq + fmt::Debug + 'static> fmt::Debug for ReactiveList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.snapshot()).finish()
    }
}
