//! Paginated queries: a page list with directional fetching and bounded
//! memory.

use std::rc::Rc;

use futures_util::future::LocalBoxFuture;
use tether_signals::batch;

use crate::query::{FetchStatus, Query, QueryConfig, QueryError, QueryStatus};
use crate::store::QueryKey;

/// One fetched page and the parameter that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T, P> {
    pub data: T,
    pub param: P,
}

pub type PageFetcher<T, P> = Rc<dyn Fn(P) -> LocalBoxFuture<'static, Result<T, QueryError>>>;
pub type NextParam<T, P> = Rc<dyn Fn(&[Page<T, P>]) -> Option<P>>;

/// A query whose data is an ordered list of pages.
pub struct InfiniteQuery<T, P>
where
    T: Clone + PartialEq + 'static,
    P: Clone + PartialEq + Ord + 'static,
{
    query: Query<Vec<Page<T, P>>>,
    fetch_page: PageFetcher<T, P>,
    get_next_param: NextParam<T, P>,
    get_previous_param: Option<NextParam<T, P>>,
    max_pages: Option<usize>,
}

impl<T, P> InfiniteQuery<T, P>
where
    T: Clone + PartialEq + 'static,
    P: Clone + PartialEq + Ord + 'static,
{
    pub fn new(
        key: QueryKey,
        config: QueryConfig,
        fetch_page: PageFetcher<T, P>,
        get_next_param: NextParam<T, P>,
        get_previous_param: Option<NextParam<T, P>>,
        max_pages: Option<usize>,
    ) -> Self {
        InfiniteQuery {
            query: Query::new(key, config),
            fetch_page,
            get_next_param,
            get_previous_param,
            max_pages,
        }
    }

    /// The underlying query, for observation and status signals.
    pub fn query(&self) -> &Query<Vec<Page<T, P>>> {
        &self.query
    }

    /// Tracked read of the page list.
    pub fn pages(&self) -> Vec<Page<T, P>> {
        self.query.data().unwrap_or_default()
    }

    fn pages_untracked(&self) -> Vec<Page<T, P>> {
        self.query.inner.data.peek().unwrap_or_default()
    }

    pub fn has_next_page(&self) -> bool {
        (self.get_next_param)(&self.pages_untracked()).is_some()
    }

    async fn run_page(&self, param: P) -> Result<T, QueryError> {
        self.query.inner.fetch_status.set(FetchStatus::Fetching);
        let result = (self.fetch_page)(param).await;
        match &result {
            Ok(_) => batch(|| {
                self.query.inner.fetch_status.set(FetchStatus::Idle);
                self.query.inner.status.set(QueryStatus::Success);
                self.query.inner.error.set(None);
                self.query
                    .inner
                    .last_updated
                    .set(Some(std::time::Instant::now()));
            }),
            Err(err) => batch(|| {
                self.query.inner.fetch_status.set(FetchStatus::Idle);
                self.query.inner.status.set(QueryStatus::Error);
                self.query.inner.error.set(Some(err.clone()));
            }),
        }
        result
    }

    /// Fetch and append the next page. No-op when `get_next_param`
    /// returns `None`.
    pub async fn fetch_next_page(&self) -> Result<(), QueryError> {
        let pages = self.pages_untracked();
        let Some(param) = (self.get_next_param)(&pages) else {
            return Ok(());
        };
        let data = self.run_page(param.clone()).await?;
        let mut pages = self.pages_untracked();
        pages.push(Page { data, param });
        if let Some(max) = self.max_pages {
            // Appending evicts from the front.
            while pages.len() > max {
                pages.remove(0);
            }
        }
        self.query.inner.data.set(Some(pages));
        Ok(())
    }

    /// Fetch and prepend the previous page. No-op without a
    /// `get_previous_param` or when it returns `None`.
    pub async fn fetch_previous_page(&self) -> Result<(), QueryError> {
        let pages = self.pages_untracked();
        let Some(get_previous) = &self.get_previous_param else {
            return Ok(());
        };
        let Some(param) = get_previous(&pages) else {
            return Ok(());
        };
        let data = self.run_page(param.clone()).await?;
        let mut pages = self.pages_untracked();
        pages.insert(0, Page { data, param });
        if let Some(max) = self.max_pages {
            // Prepending evicts from the back.
            while pages.len() > max {
                pages.pop();
            }
        }
        self.query.inner.data.set(Some(pages));
        Ok(())
    }

    /// Fetch one page by parameter: replace it if present, otherwise
    /// insert at the sorted position. Trimming keeps the pages closest to
    /// the fetched parameter.
    pub async fn fetch_page(&self, param: P) -> Result<(), QueryError> {
        let data = self.run_page(param.clone()).await?;
        let mut pages = self.pages_untracked();

        let position = pages.iter().position(|page| page.param == param);
        let inserted_at = match position {
            Some(index) => {
                pages[index] = Page { data, param };
                index
            }
            None => {
                let index = pages
                    .iter()
                    .position(|page| page.param > param)
                    .unwrap_or(pages.len());
                pages.insert(index, Page { data, param });
                index
            }
        };

        if let Some(max) = self.max_pages {
            let mut anchor = inserted_at;
            while pages.len() > max {
                // Drop whichever end is farther from the fetched page.
                let from_front = anchor;
                let from_back = pages.len() - 1 - anchor;
                if from_front >= from_back {
                    pages.remove(0);
                    anchor = anchor.saturating_sub(1);
                } else {
                    pages.pop();
                }
            }
        }
        self.query.inner.data.set(Some(pages));
        Ok(())
    }

    /// Refetch the pages selected by `predicate` in order, stopping early
    /// if `get_next_param` reports the sequence is exhausted.
    pub async fn refetch(&self, predicate: impl Fn(&Page<T, P>) -> bool) -> Result<(), QueryError> {
        let snapshot = self.pages_untracked();
        for page in snapshot {
            if !predicate(&page) {
                continue;
            }
            let data = self.run_page(page.param.clone()).await?;
            let mut pages = self.pages_untracked();
            if let Some(slot) = pages.iter_mut().find(|p| p.param == page.param) {
                slot.data = data;
            }
            self.query.inner.data.set(Some(pages));

            if (self.get_next_param)(&self.pages_untracked()).is_none() {
                break;
            }
        }
        Ok(())
    }
}
