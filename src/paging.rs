//! Lazy iteration over paginated remote collections.
//!
//! [`PagedLister`] pulls one page at a time from a [`PageSource`] and yields
//! the items in order. It never fetches page `N + 1` before page `N` is
//! drained, stops once `total_count` items have been yielded or an empty page
//! arrives, and is fused after it finishes or fails.

use std::collections::VecDeque;
use std::future::Future;

use crate::api::{Page, PageRequest};

/// Remote collection that can be fetched page by page.
pub trait PageSource {
    /// Item type held by the collection.
    type Item;
    /// Error raised by a failed fetch.
    type Error;

    /// Fetches one page.
    fn fetch_page(
        &mut self,
        request: PageRequest,
    ) -> impl Future<Output = Result<Page<Self::Item>, Self::Error>>;
}

/// Adapts a closure returning a page future into a [`PageSource`].
#[derive(Clone, Debug)]
pub struct PageFn<F>(F);

impl<F> PageFn<F> {
    /// Wraps `fetch`.
    #[must_use]
    pub const fn new(fetch: F) -> Self {
        Self(fetch)
    }
}

impl<F, Fut, T, E> PageSource for PageFn<F>
where
    F: FnMut(PageRequest) -> Fut,
    Fut: Future<Output = Result<Page<T>, E>>,
{
    type Item = T;
    type Error = E;

    fn fetch_page(&mut self, request: PageRequest) -> impl Future<Output = Result<Page<T>, E>> {
        (self.0)(request)
    }
}

/// Finite, non-restartable iterator over a paginated collection.
pub struct PagedLister<S: PageSource> {
    source: S,
    items_per_page: u32,
    next_page: u32,
    buffer: VecDeque<S::Item>,
    yielded: u64,
    total: Option<u64>,
    pages_fetched: u32,
    exhausted: bool,
}

impl<S: PageSource> PagedLister<S> {
    /// Creates a lister starting at page 1.
    #[must_use]
    pub const fn new(source: S, items_per_page: u32) -> Self {
        Self {
            source,
            items_per_page,
            next_page: 1,
            buffer: VecDeque::new(),
            yielded: 0,
            total: None,
            pages_fetched: 0,
            exhausted: false,
        }
    }

    /// Seeds the lister with an already fetched page 1.
    ///
    /// The next remote fetch, if any, requests page 2.
    #[must_use]
    pub fn with_first_page(mut self, page: Page<S::Item>) -> Self {
        self.next_page = 2;
        self.absorb(page);
        self
    }

    /// Number of pages fetched from the source so far. A seeded first page
    /// is not counted.
    #[must_use]
    pub const fn pages_fetched(&self) -> u32 {
        self.pages_fetched
    }

    /// Yields the next item, fetching the next page when the current one is
    /// drained.
    ///
    /// Returns `Ok(None)` once the collection is exhausted, and keeps
    /// returning it afterwards.
    ///
    /// # Errors
    ///
    /// Returns the source error from the first failed fetch. The lister is
    /// exhausted afterwards.
    pub async fn next(&mut self) -> Result<Option<S::Item>, S::Error> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                self.yielded = self.yielded.saturating_add(1);
                return Ok(Some(item));
            }
            if self.exhausted || self.total.is_some_and(|total| self.yielded >= total) {
                self.exhausted = true;
                return Ok(None);
            }

            let request = PageRequest {
                page_num: self.next_page,
                items_per_page: self.items_per_page,
            };
            let page = match self.source.fetch_page(request).await {
                Ok(page) => page,
                Err(err) => {
                    self.exhausted = true;
                    return Err(err);
                }
            };
            self.pages_fetched = self.pages_fetched.saturating_add(1);
            self.next_page = self.next_page.saturating_add(1);
            self.absorb(page);
        }
    }

    /// Drains the remaining items into a vector.
    ///
    /// # Errors
    ///
    /// Returns the first fetch error.
    pub async fn collect_all(&mut self) -> Result<Vec<S::Item>, S::Error> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await? {
            items.push(item);
        }
        Ok(items)
    }

    fn absorb(&mut self, page: Page<S::Item>) {
        self.total = Some(page.total_count);
        if page.items.is_empty() {
            self.exhausted = true;
        }
        self.buffer.extend(page.items);
    }
}
