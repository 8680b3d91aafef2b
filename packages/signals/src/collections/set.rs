use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;

use rustc_hash::FxHashMap;

use crate::Signal;

/// A set with a membership signal per element.
///
/// `contains` subscribes to the element's own membership signal, which is
/// allocated lazily and never destroyed by removal, so "was x in the set"
/// observers stay wired across remove/insert cycles.
pub struct ReactiveSet<T>
where
    T: Eq + Hash + Clone + 'static,
{
    members: RefCell<FxHashMap<T, Signal<bool>>>,
    structure: Signal<u64>,
}

impl<T> ReactiveSet<T>
where
    T: Eq + Hash + Clone + 'static,
{
    pub fn new() -> Self {
        ReactiveSet {
            members: RefCell::new(FxHashMap::default()),
            structure: Signal::new(0),
        }
    }

    pub fn from_values(values: impl IntoIterator<Item = T>) -> Self {
        let set = Self::new();
        {
            let mut members = set.members.borrow_mut();
            for value in values {
                members.insert(value, Signal::new(true));
            }
        }
        set
    }

    fn bump_structure(&self) {
        self.structure.update(|n| *n += 1);
    }

    fn member_signal(&self, value: &T) -> Signal<bool> {
        self.members
            .borrow_mut()
            .entry(value.clone())
            .or_insert_with(|| Signal::new(false))
            .clone()
    }

    /// Membership test; subscribes only to this element's signal.
    pub fn contains(&self, value: &T) -> bool {
        self.member_signal(value).get()
    }

    /// Returns true when the value was newly added.
    pub fn insert(&self, value: T) -> bool {
        let signal = self.member_signal(&value);
        if signal.peek() {
            return false;
        }
        signal.set(true);
        self.bump_structure();
        true
    }

    /// Returns true when the value was present. The membership signal
    /// flips to false but stays alive for its observers.
    pub fn remove(&self, value: &T) -> bool {
        let signal = self.member_signal(value);
        if !signal.peek() {
            return false;
        }
        signal.set(false);
        self.bump_structure();
        true
    }

    /// Number of members; subscribes to the structure signal.
    pub fn len(&self) -> usize {
        self.structure.with(|_| ());
        self.members.borrow().values().filter(|s| s.peek()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let signals: Vec<Signal<bool>> = self.members.borrow().values().cloned().collect();
        let mut any = false;
        for signal in signals {
            if signal.peek() {
                signal.set(false);
                any = true;
            }
        }
        if any {
            self.bump_structure();
        }
    }

    /// Current members; subscribes to the structure signal.
    pub fn iter_values(&self) -> Vec<T> {
        self.structure.with(|_| ());
        self.members
            .borrow()
            .iter()
            .filter(|(_, s)| s.peek())
            .map(|(v, _)| v.clone())
            .collect()
    }

    /// Untracked plain copy of the current members.
    pub fn snapshot(&self) -> HashSet<T> {
        self.members
            .borrow()
            .iter()
            .filter(|(_, s)| s.peek())
            .map(|(v, _)| v.clone())
            .collect()
    }
}

impl<T> Default for ReactiveSet<T>
where
    T: Eq + Hash + Clone + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for ReactiveSet<T>
where
    T: Eq + Hash + Clone + 'static,
{
    fn clone(&self) -> Self {
        Self::from_values(self.snapshot())
    }
}

impl<T> fmt::Debug for ReactiveSet<T>
where
    T: Eq + Hash + Clone + fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.snapshot()).finish()
    }
}
