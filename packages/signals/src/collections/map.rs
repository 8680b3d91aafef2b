use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use rustc_hash::FxHashMap;

use crate::Signal;

/// A map with a signal per key plus a structure signal.
///
/// Reading one key subscribes only to that key's signal, which survives
/// removal so re-inserting the key wakes the same observers. Presence
/// checks, length and iteration subscribe to the structure signal.
pub struct ReactiveMap<K, V>
where
    K: Eq + Hash + Clone + 'static,
    V: Clone + PartialEq + 'static,
{
    entries: RefCell<FxHashMap<K, Signal<Option<V>>>>,
    structure: Signal<u64>,
}

impl<K, V> ReactiveMap<K, V>
where
    K: Eq + Hash + Clone + 'static,
    V: Clone + PartialEq + 'static,
{
    pub fn new() -> Self {
        ReactiveMap {
            entries: RefCell::new(FxHashMap::default()),
            structure: Signal::new(0),
        }
    }

    pub fn from_values(values: impl IntoIterator<Item = (K, V)>) -> Self {
        let map = Self::new();
        {
            let mut entries = map.entries.borrow_mut();
            for (k, v) in values {
                entries.insert(k, Signal::new(Some(v)));
            }
        }
        map
    }

    fn bump_structure(&self) {
        self.structure.update(|n| *n += 1);
    }

    fn entry_signal(&self, key: &K) -> Signal<Option<V>> {
        self.entries
            .borrow_mut()
            .entry(key.clone())
            .or_insert_with(|| Signal::new(None))
            .clone()
    }

    /// Read one key, subscribing only to that key's signal. Missing keys
    /// still subscribe, so a later insert wakes the reader.
    pub fn get(&self, key: &K) -> Option<V> {
        self.entry_signal(key).get()
    }

    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let signal = self.entry_signal(&key);
        let previous = signal.peek();
        signal.set(Some(value));
        if previous.is_none() {
            self.bump_structure();
        }
        previous
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        let signal = self.entry_signal(key);
        let previous = signal.peek();
        if previous.is_some() {
            // The signal stays alive so key observers keep watching.
            signal.set(None);
            self.bump_structure();
        }
        previous
    }

    /// Presence check; subscribes to the structure signal.
    pub fn contains_key(&self, key: &K) -> bool {
        self.structure.with(|_| ());
        self.entries
            .borrow()
            .get(key)
            .map(|s| s.peek().is_some())
            .unwrap_or(false)
    }

    /// Number of present keys; subscribes to the structure signal.
    pub fn len(&self) -> usize {
        self.structure.with(|_| ());
        self.entries
            .borrow()
            .values()
            .filter(|s| s.peek().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Present keys; subscribes to the structure signal.
    pub fn keys(&self) -> Vec<K> {
        self.structure.with(|_| ());
        self.entries
            .borrow()
            .iter()
            .filter(|(_, s)| s.peek().is_some())
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Present values; subscribes to the structure signal and to every
    /// present key's signal, so value changes also wake the reader.
    pub fn values(&self) -> Vec<V> {
        self.items().into_iter().map(|(_, v)| v).collect()
    }

    /// Present entries; subscribes like [`Self::values`].
    pub fn items(&self) -> Vec<(K, V)> {
        self.structure.with(|_| ());
        let signals: Vec<(K, Signal<Option<V>>)> = self
            .entries
            .borrow()
            .iter()
            .map(|(k, s)| (k.clone(), s.clone()))
            .collect();
        signals
            .into_iter()
            .filter_map(|(k, s)| s.get().map(|v| (k, v)))
            .collect()
    }

    pub fn clear(&self) {
        let signals: Vec<Signal<Option<V>>> =
            self.entries.borrow().values().cloned().collect();
        let mut any = false;
        for signal in signals {
            if signal.peek().is_some() {
                signal.set(None);
                any = true;
            }
        }
        if any {
            self.bump_structure();
        }
    }

    /// Untracked plain copy of the present entries.
    pub fn snapshot(&self) -> HashMap<K, V> {
        self.entries
            .borrow()
            .iter()
            .filter_map(|(k, s)| s.peek().map(|v| (k.clone(), v)))
            .collect()
    }
}

impl<K, V> Default for ReactiveMap<K, V>
where
    K: Eq + Hash + Clone + 'static,
    V: Clone + PartialEq + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Clone for ReactiveMap<K, V>
where
    K: Eq + Hash + Clone + 'static,
    V: Clone + PartialEq + 'static,
{
    fn clone(&self) -> Self {
        Self::from_values(self.snapshot())
    }
}

impl<K, V> fmt::Debug for ReactiveMap<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + 'static,
    V: Clone + PartialEq + fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.snapshot()).finish()
    }
}
