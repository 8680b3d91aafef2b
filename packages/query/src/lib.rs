//! Cached async queries for Tether sessions.
//!
//! One [`Query`] exists per key in a session's [`QueryStore`]; observers
//! ref-count it and the last one to leave arms a GC timer. Fetches retry
//! with a bounded budget, and every lifecycle facet (data, error, status,
//! fetch status, retry bookkeeping) is a signal, so components re-render
//! exactly when the facet they read changes.

mod infinite;
mod observer;
mod query;
mod store;

pub use infinite::{InfiniteQuery, NextParam, Page, PageFetcher};
pub use observer::{use_query, QueryHandle, QueryHook, QueryOptions};
pub use query::{Fetcher, FetchStatus, Query, QueryConfig, QueryError, QueryStatus};
pub use store::{KeyPart, QueryKey, QueryStore};

pub mod prelude {
    pub use crate::{use_query, QueryError, QueryKey, QueryOptions, QueryStatus, QueryStore};
}
