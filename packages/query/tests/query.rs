//! Query lifecycle: fetching, retries, dedupe, GC, observer churn.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use futures_util::FutureExt;
use tether_query::{Fetcher, FetchStatus, QueryConfig, QueryError, QueryStatus, QueryStore};

fn fetch_ok(counter: Rc<Cell<u32>>, value: &'static str) -> Fetcher<String> {
    Rc::new(move |/* no args */| {
        let counter = counter.clone();
        let value = value.to_string();
        async move {
            counter.set(counter.get() + 1);
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(value)
        }
        .boxed_local()
    })
}

fn fetch_failing(counter: Rc<Cell<u32>>) -> Fetcher<String> {
    Rc::new(move || {
        let counter = counter.clone();
        async move {
            let n = counter.get() + 1;
            counter.set(n);
            Err(QueryError::new(format!("failure {n}")))
        }
        .boxed_local()
    })
}

fn config(retries: u32) -> QueryConfig {
    QueryConfig {
        retries,
        retry_delay: Duration::from_millis(10),
        gc_time: Duration::from_millis(100),
    }
}

#[tokio::test(start_paused = true)]
async fn fetch_succeeds_and_caches() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let store = QueryStore::new();
            let calls = Rc::new(Cell::new(0));
            let query = store.ensure::<String>("greeting", config(0));
            query.observe(fetch_ok(calls.clone(), "hello"));

            assert_eq!(query.status(), QueryStatus::Loading);
            query.fetch();
            assert_eq!(query.fetch_status(), FetchStatus::Fetching);

            query.wait().await;
            assert_eq!(query.status(), QueryStatus::Success);
            assert_eq!(query.fetch_status(), FetchStatus::Idle);
            assert_eq!(query.data(), Some("hello".to_string()));
            assert!(query.last_updated().is_some());
            assert_eq!(calls.get(), 1);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn retry_exhaustion_reports_final_error() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let store = QueryStore::new();
            let attempts = Rc::new(Cell::new(0));
            let query = store.ensure::<String>("flaky", config(2));
            query.observe(fetch_failing(attempts.clone()));

            query.fetch();
            query.wait().await;

            assert_eq!(query.status(), QueryStatus::Error);
            assert_eq!(query.retries(), 2);
            assert_eq!(attempts.get(), 3, "retries=2 means three attempts");
            assert_eq!(
                query.retry_reason(),
                Some(QueryError::new("failure 3")),
                "the reason is the final exception"
            );
            assert_eq!(query.error(), Some(QueryError::new("failure 3")));
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn refetch_without_cancel_dedupes() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let store = QueryStore::new();
            let calls = Rc::new(Cell::new(0));
            let fetcher = fetch_ok(calls.clone(), "value");
            let query = store.ensure::<String>("dedupe", config(0));
            query.observe(fetcher.clone());

            query.fetch();
            // A second caller piggybacks on the in-flight run.
            query.refetch(fetcher.clone(), false).await;
            assert_eq!(calls.get(), 1);

            // With cancel_refetch a fresh run starts.
            query.refetch(fetcher, true).await;
            assert_eq!(calls.get(), 2);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn gc_disposes_after_last_observer_leaves() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let store = QueryStore::new();
            let calls = Rc::new(Cell::new(0));
            let query = store.ensure::<String>("gc-me", config(0));
            let id = query.observe(fetch_ok(calls.clone(), "x"));
            query.fetch();
            query.wait().await;

            query.unobserve(id);
            assert!(query.has_gc_scheduled());
            assert!(store.contains(&"gc-me".into()));

            tokio::time::sleep(Duration::from_millis(150)).await;
            assert!(query.is_disposed());
            assert!(!store.contains(&"gc-me".into()));
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn reobserving_cancels_pending_gc() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let store = QueryStore::new();
            let calls = Rc::new(Cell::new(0));
            let query = store.ensure::<String>("sticky", config(0));
            let id = query.observe(fetch_ok(calls.clone(), "x"));

            query.unobserve(id);
            assert!(query.has_gc_scheduled());

            let _id2 = query.observe(fetch_ok(calls.clone(), "x"));
            tokio::time::sleep(Duration::from_millis(300)).await;
            assert!(!query.is_disposed());
            assert!(store.contains(&"sticky".into()));
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn newest_observer_fetcher_is_active() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let store = QueryStore::new();
            let first_calls = Rc::new(Cell::new(0));
            let second_calls = Rc::new(Cell::new(0));
            let query = store.ensure::<String>("shared", config(0));
            query.observe(fetch_ok(first_calls.clone(), "first"));
            query.observe(fetch_ok(second_calls.clone(), "second"));

            query.fetch();
            query.wait().await;

            assert_eq!(first_calls.get(), 0);
            assert_eq!(second_calls.get(), 1);
            assert_eq!(query.data(), Some("second".to_string()));
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn set_data_preserves_retry_bookkeeping() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let store = QueryStore::new();
            let attempts = Rc::new(Cell::new(0));
            let query = store.ensure::<String>("manual", config(1));
            query.observe(fetch_failing(attempts.clone()));
            query.fetch();
            query.wait().await;
            assert_eq!(query.retries(), 1);

            query.set_data("patched".to_string());
            assert_eq!(query.data(), Some("patched".to_string()));
            assert_eq!(query.status(), QueryStatus::Success);
            // Retry counters survive manual writes.
            assert_eq!(query.retries(), 1);
            assert!(query.retry_reason().is_some());

            query.set_data_with(|prev| format!("{}!", prev.unwrap()));
            assert_eq!(query.data(), Some("patched!".to_string()));
        })
        .await;
}

#[test]
#[should_panic(expected = "already cached with type")]
fn key_type_mismatch_panics() {
    let store = QueryStore::new();
    let _q = store.ensure::<String>("typed", QueryConfig::default());
    let _mismatch = store.ensure::<i64>("typed", QueryConfig::default());
}
