//! Infinite queries: directional fetching, sorted inserts, trimming.

use std::rc::Rc;
use std::time::Duration;

use futures_util::FutureExt;
use tether_query::{InfiniteQuery, NextParam, Page, PageFetcher, QueryConfig, QueryKey};

fn page_fetcher() -> PageFetcher<String, i64> {
    Rc::new(|param: i64| {
        async move { Ok(format!("page-{param}")) }.boxed_local()
    })
}

fn next_param(limit: i64) -> NextParam<String, i64> {
    Rc::new(move |pages: &[Page<String, i64>]| {
        let next = pages.last().map(|p| p.param + 1).unwrap_or(0);
        (next < limit).then_some(next)
    })
}

fn prev_param() -> NextParam<String, i64> {
    Rc::new(|pages: &[Page<String, i64>]| {
        pages.first().and_then(|p| (p.param > 0).then(|| p.param - 1))
    })
}

fn config() -> QueryConfig {
    QueryConfig {
        retries: 0,
        retry_delay: Duration::from_millis(1),
        gc_time: Duration::from_secs(1),
    }
}

fn infinite(max_pages: Option<usize>) -> InfiniteQuery<String, i64> {
    InfiniteQuery::new(
        QueryKey::from("feed"),
        config(),
        page_fetcher(),
        next_param(100),
        Some(prev_param()),
        max_pages,
    )
}

fn params(query: &InfiniteQuery<String, i64>) -> Vec<i64> {
    query.pages().iter().map(|p| p.param).collect()
}

#[tokio::test(start_paused = true)]
async fn next_pages_append_in_order() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let query = infinite(None);
            query.fetch_next_page().await.unwrap();
            query.fetch_next_page().await.unwrap();
            query.fetch_next_page().await.unwrap();
            assert_eq!(params(&query), vec![0, 1, 2]);
            assert_eq!(query.pages()[1].data, "page-1");
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn previous_pages_prepend() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let query = infinite(None);
            query.fetch_page(5).await.unwrap();
            query.fetch_previous_page().await.unwrap();
            assert_eq!(params(&query), vec![4, 5]);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn appending_beyond_max_pages_drops_the_front() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let query = infinite(Some(3));
            for _ in 0..5 {
                query.fetch_next_page().await.unwrap();
            }
            assert_eq!(params(&query), vec![2, 3, 4]);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn sorted_insert_trims_far_end() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let query = infinite(Some(3));
            query.fetch_page(10).await.unwrap();
            query.fetch_page(20).await.unwrap();
            query.fetch_page(30).await.unwrap();

            // Fetching near the front keeps the pages closest to it.
            query.fetch_page(11).await.unwrap();
            assert_eq!(params(&query), vec![10, 11, 20]);

            // Fetching near the back evicts from the front.
            query.fetch_page(21).await.unwrap();
            assert_eq!(params(&query), vec![11, 20, 21]);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn fetch_existing_param_replaces_in_place() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let query = infinite(None);
            query.fetch_page(1).await.unwrap();
            query.fetch_page(2).await.unwrap();
            query.fetch_page(1).await.unwrap();
            assert_eq!(params(&query), vec![1, 2]);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn refetch_updates_matching_pages() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let query = infinite(None);
            query.fetch_next_page().await.unwrap();
            query.fetch_next_page().await.unwrap();

            query.refetch(|page| page.param == 0).await.unwrap();
            assert_eq!(params(&query), vec![0, 1]);
            assert_eq!(query.pages()[0].data, "page-0");
        })
        .await;
}
