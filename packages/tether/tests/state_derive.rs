//! The `State` derive: drain/hydrate, versions, query params.

use serde_json::json;
use tether::State;
use tether_core::{State as _, StateSnapshot};
use tether_signals::Signal;

#[derive(State)]
#[state(version = 2)]
struct SearchState {
    #[state(query_param = "q")]
    query: Signal<String>,
    #[state(query_param)]
    page: Signal<i64>,
    #[state(query_param)]
    since: Signal<Option<chrono::NaiveDate>>,
    results: Signal<Vec<String>>,
    #[state(skip)]
    scratch: Signal<u64>,
}

impl SearchState {
    fn new() -> Self {
        SearchState {
            query: Signal::new(String::new()),
            page: Signal::new(1),
            since: Signal::new(None),
            results: Signal::new(Vec::new()),
            scratch: Signal::new(0),
        }
    }
}

#[test]
fn drain_produces_versioned_values() {
    let state = SearchState::new();
    state.query.set("tether".to_string());
    state.results.set(vec!["a".into(), "b".into()]);
    state.scratch.set(99);

    let snapshot = state.drain().unwrap();
    assert_eq!(snapshot.version, 2);
    assert_eq!(snapshot.values["query"], json!("tether"));
    assert_eq!(snapshot.values["page"], json!(1));
    assert_eq!(snapshot.values["results"], json!(["a", "b"]));
    assert!(!snapshot.values.contains_key("scratch"), "skipped field");

    // The wire shape uses the dunder version key.
    let wire = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(wire["__version__"], json!(2));
    assert_eq!(wire["values"]["page"], json!(1));
}

#[test]
fn hydrate_writes_signals_back() {
    let state = SearchState::new();
    let snapshot = StateSnapshot {
        version: 2,
        values: serde_json::Map::from_iter([
            ("query".to_string(), json!("restored")),
            ("page".to_string(), json!(7)),
            ("results".to_string(), json!(["x"])),
            ("unknown".to_string(), json!("ignored")),
        ]),
    };
    state.hydrate(snapshot).unwrap();
    assert_eq!(state.query.peek(), "restored");
    assert_eq!(state.page.peek(), 7);
    assert_eq!(state.results.peek(), vec!["x".to_string()]);
}

#[test]
fn newer_snapshots_are_rejected() {
    let state = SearchState::new();
    let snapshot = StateSnapshot {
        version: 9,
        values: serde_json::Map::new(),
    };
    assert!(state.hydrate(snapshot).is_err());
}

#[test]
fn version_accessor_comes_from_the_attribute() {
    assert_eq!(SearchState::state_version(), 2);
}

#[test]
fn query_params_encode_and_decode() {
    let state = SearchState::new();
    let fields = state.query_params();
    assert_eq!(fields.len(), 3);

    let query_field = fields.iter().find(|f| f.name == "q").unwrap();
    let page_field = fields.iter().find(|f| f.name == "page").unwrap();

    // Empty string omits the parameter.
    assert_eq!((query_field.read)(), None);
    state.query.set("abc".to_string());
    assert_eq!((query_field.read)(), Some("abc".to_string()));

    (page_field.write)("42").unwrap();
    assert_eq!(state.page.peek(), 42);
    assert!((page_field.write)("not-a-number").is_err());

    assert_eq!((page_field.read)(), Some("42".to_string()));
}

#[test]
fn date_query_params_round_trip() {
    let state = SearchState::new();
    let fields = state.query_params();
    let since_field = fields.iter().find(|f| f.name == "since").unwrap();

    // Optional and unset: omitted from the URL.
    assert_eq!((since_field.read)(), None);

    (since_field.write)("2024-03-09").unwrap();
    assert_eq!(
        state.since.peek(),
        chrono::NaiveDate::from_ymd_opt(2024, 3, 9)
    );
    assert_eq!((since_field.read)(), Some("2024-03-09".to_string()));

    assert!((since_field.write)("last tuesday").is_err());

    // The parameter disappearing clears the field.
    (since_field.clear)();
    assert_eq!(state.since.peek(), None);
}

#[test]
fn round_trip_through_drain_and_hydrate() {
    let original = SearchState::new();
    original.query.set("hello".to_string());
    original.page.set(3);

    let restored = SearchState::new();
    restored.hydrate(original.drain().unwrap()).unwrap();
    assert_eq!(restored.query.peek(), "hello");
    assert_eq!(restored.page.peek(), 3);
}
