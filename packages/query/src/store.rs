//! The session-local query store: a keyed, ref-counted cache.

use std::any::Any;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

use rustc_hash::FxHashMap;

use crate::query::{Query, QueryConfig};

/// One normalized segment of a query key. Nested lists flatten to
/// [`KeyPart::List`]; floats and maps are not hashable keys and are
/// rejected at construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyPart {
    Str(String),
    Int(i64),
    Bool(bool),
    Null,
    List(Vec<KeyPart>),
}

impl From<&str> for KeyPart {
    fn from(value: &str) -> Self {
        KeyPart::Str(value.to_string())
    }
}

impl From<String> for KeyPart {
    fn from(value: String) -> Self {
        KeyPart::Str(value)
    }
}

impl From<i64> for KeyPart {
    fn from(value: i64) -> Self {
        KeyPart::Int(value)
    }
}

impl From<i32> for KeyPart {
    fn from(value: i32) -> Self {
        KeyPart::Int(value as i64)
    }
}

impl From<bool> for KeyPart {
    fn from(value: bool) -> Self {
        KeyPart::Bool(value)
    }
}

impl<P: Into<KeyPart>> From<Vec<P>> for KeyPart {
    fn from(value: Vec<P>) -> Self {
        KeyPart::List(value.into_iter().map(Into::into).collect())
    }
}

/// A hashable query key: an ordered list of parts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey(pub Vec<KeyPart>);

impl QueryKey {
    pub fn new(parts: Vec<KeyPart>) -> Self {
        QueryKey(parts)
    }

    pub fn single(part: impl Into<KeyPart>) -> Self {
        QueryKey(vec![part.into()])
    }
}

impl From<&str> for QueryKey {
    fn from(value: &str) -> Self {
        QueryKey::single(value)
    }
}

impl From<(&str, i64)> for QueryKey {
    fn from(value: (&str, i64)) -> Self {
        QueryKey(vec![value.0.into(), value.1.into()])
    }
}

impl From<(&str, String)> for QueryKey {
    fn from(value: (&str, String)) -> Self {
        QueryKey(vec![value.0.into(), value.1.into()])
    }
}

struct StoreEntry {
    query: Rc<dyn Any>,
    type_name: &'static str,
}

/// Session-local map from key to query, with ref-counted GC: a query
/// removes itself when its GC timer fires with no observers left.
pub struct QueryStore {
    self_weak: Weak<QueryStore>,
    entries: RefCell<FxHashMap<QueryKey, StoreEntry>>,
}

impl QueryStore {
    pub fn new() -> Rc<Self> {
        Rc::new_cyclic(|weak| QueryStore {
            self_weak: weak.clone(),
            entries: RefCell::new(FxHashMap::default()),
        })
    }

    /// Get or create the query for `key`. A key reused with a different
    /// data type is a programming error and panics with both type names.
    pub fn ensure<T: Clone + PartialEq + 'static>(
        &self,
        key: impl Into<QueryKey>,
        config: QueryConfig,
    ) -> Query<T> {
        let key = key.into();
        if let Some(existing) = self.get::<T>(&key) {
            return existing;
        }

        let query = Query::<T>::new(key.clone(), config);
        let store = self.self_weak.clone();
        query.set_on_dispose(move |key| {
            if let Some(store) = store.upgrade() {
                store.entries.borrow_mut().remove(key);
            }
        });
        self.entries.borrow_mut().insert(
            key,
            StoreEntry {
                query: Rc::new(query.clone()),
                type_name: std::any::type_name::<T>(),
            },
        );
        query
    }

    /// The query for `key`, if present.
    pub fn get<T: Clone + PartialEq + 'static>(&self, key: &QueryKey) -> Option<Query<T>> {
        let entries = self.entries.borrow();
        let entry = entries.get(key)?;
        match entry.query.downcast_ref::<Query<T>>() {
            Some(query) => Some(query.clone()),
            None => panic!(
                "query key {key:?} is already cached with type `{}`, not `{}`",
                entry.type_name,
                std::any::type_name::<T>()
            ),
        }
    }

    /// Remove and dispose the query for `key`.
    pub fn remove<T: Clone + PartialEq + 'static>(&self, key: &QueryKey) {
        let entry = self.entries.borrow_mut().remove(key);
        if let Some(entry) = entry {
            if let Some(query) = entry.query.downcast_ref::<Query<T>>() {
                query.dispose();
            }
        }
    }

    pub fn contains(&self, key: &QueryKey) -> bool {
        self.entries.borrow().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Drop every entry. Typed disposal happens through each query's GC
    /// or its owner; clearing severs the store's references.
    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }
}
