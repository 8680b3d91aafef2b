//! Reactive containers: per-element granularity and structure signals.

use std::cell::Cell;
use std::rc::Rc;

use tether_signals::{Effect, ReactiveList, ReactiveMap, ReactiveSet};

#[test]
fn list_index_reads_are_isolated() {
    let list = Rc::new(ReactiveList::from_values(vec![1, 2, 3]));
    let runs = Rc::new(Cell::new(0));

    let effect = Effect::new({
        let list = list.clone();
        let runs = runs.clone();
        move || {
            let _ = list.get(0);
            runs.set(runs.get() + 1);
        }
    });
    assert_eq!(runs.get(), 1);

    // Mutating another index must not wake an index-0 reader.
    list.set(2, 30);
    assert_eq!(runs.get(), 1);

    list.set(0, 10);
    assert_eq!(runs.get(), 2);
    effect.dispose();
}

#[test]
fn list_len_subscribes_to_structure_only() {
    let list = Rc::new(ReactiveList::from_values(vec![1, 2, 3]));
    let runs = Rc::new(Cell::new(0));

    let effect = Effect::new({
        let list = list.clone();
        let runs = runs.clone();
        move || {
            let _ = list.len();
            runs.set(runs.get() + 1);
        }
    });
    assert_eq!(runs.get(), 1);

    // In-place replacement leaves the structure untouched.
    list.set(1, 20);
    assert_eq!(runs.get(), 1);

    list.push(4);
    assert_eq!(runs.get(), 2);
    effect.dispose();
}

#[test]
fn equal_length_assign_does_not_bump_structure() {
    let list = Rc::new(ReactiveList::from_values(vec![1, 2, 3]));
    let len_runs = Rc::new(Cell::new(0));
    let item_runs = Rc::new(Cell::new(0));

    let len_effect = Effect::new({
        let list = list.clone();
        let len_runs = len_runs.clone();
        move || {
            let _ = list.len();
            len_runs.set(len_runs.get() + 1);
        }
    });
    let item_effect = Effect::new({
        let list = list.clone();
        let item_runs = item_runs.clone();
        move || {
            let _ = list.get(1);
            item_runs.set(item_runs.get() + 1);
        }
    });

    list.assign(vec![4, 5, 6]);
    assert_eq!(len_runs.get(), 1);
    assert_eq!(item_runs.get(), 2);

    list.assign(vec![7, 8]);
    assert_eq!(len_runs.get(), 2);
    len_effect.dispose();
    item_effect.dispose();
}

#[test]
fn list_sort_moves_signals_with_their_values() {
    let list = ReactiveList::from_values(vec![3, 1, 2]);
    list.sort();
    assert_eq!(list.snapshot(), vec![1, 2, 3]);
}

#[test]
fn map_key_reads_are_isolated() {
    let map = Rc::new(ReactiveMap::from_values([("a", 1), ("b", 2)]));
    let runs = Rc::new(Cell::new(0));

    let effect = Effect::new({
        let map = map.clone();
        let runs = runs.clone();
        move || {
            let _ = map.get(&"a");
            runs.set(runs.get() + 1);
        }
    });
    assert_eq!(runs.get(), 1);

    map.insert("b", 20);
    assert_eq!(runs.get(), 1);

    map.insert("a", 10);
    assert_eq!(runs.get(), 2);
    effect.dispose();
}

#[test]
fn map_reader_of_missing_key_wakes_on_insert() {
    let map: Rc<ReactiveMap<&str, i32>> = Rc::new(ReactiveMap::new());
    let seen = Rc::new(Cell::new(None));

    let effect = Effect::new({
        let map = map.clone();
        let seen = seen.clone();
        move || seen.set(map.get(&"later"))
    });
    assert_eq!(seen.get(), None);

    map.insert("later", 42);
    assert_eq!(seen.get(), Some(42));
    effect.dispose();
}

#[test]
fn set_membership_reads_are_isolated() {
    let set = Rc::new(ReactiveSet::from_values(["x"]));
    let runs = Rc::new(Cell::new(0));
    let present = Rc::new(Cell::new(false));

    let effect = Effect::new({
        let set = set.clone();
        let runs = runs.clone();
        let present = present.clone();
        move || {
            present.set(set.contains(&"x"));
            runs.set(runs.get() + 1);
        }
    });
    assert_eq!(runs.get(), 1);
    assert!(present.get());

    // Changes to other elements are invisible to an "x" observer.
    set.insert("y");
    set.remove(&"y");
    assert_eq!(runs.get(), 1);

    set.remove(&"x");
    assert_eq!(runs.get(), 2);
    assert!(!present.get());

    // The membership signal survives removal.
    set.insert("x");
    assert_eq!(runs.get(), 3);
    assert!(present.get());
    effect.dispose();
}

#[test]
fn snapshots_are_plain_collections() {
    let list = ReactiveList::from_values(vec![1, 2]);
    let map = ReactiveMap::from_values([("k", 1)]);
    let set = ReactiveSet::from_values([5]);

    assert_eq!(list.snapshot(), vec![1, 2]);
    assert_eq!(map.snapshot().get("k"), Some(&1));
    assert!(set.snapshot().contains(&5));
}

#[test]
fn clones_have_fresh_signals() {
    let list = Rc::new(ReactiveList::from_values(vec![1]));
    let runs = Rc::new(Cell::new(0));

    let effect = Effect::new({
        let list = list.clone();
        let runs = runs.clone();
        move || {
            let _ = list.get(0);
            runs.set(runs.get() + 1);
        }
    });
    assert_eq!(runs.get(), 1);

    let copy = ReactiveList::clone(&list);
    copy.set(0, 99);
    assert_eq!(runs.get(), 1);
    assert_eq!(list.snapshot(), vec![1]);
    effect.dispose();
}
