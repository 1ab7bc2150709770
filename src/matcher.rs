//! First-match search over paginated collections.

use crate::api::Page;
use crate::paging::{PageSource, PagedLister};

/// Walks the lister's remaining items in page order and returns the first one
/// satisfying `predicate`.
///
/// No page beyond the one holding the match is fetched.
///
/// # Errors
///
/// Returns the first fetch error raised before a match is found.
pub async fn find_entry<S, P>(
    lister: &mut PagedLister<S>,
    mut predicate: P,
) -> Result<Option<S::Item>, S::Error>
where
    S: PageSource,
    P: FnMut(&S::Item) -> bool,
{
    while let Some(item) = lister.next().await? {
        if predicate(&item) {
            return Ok(Some(item));
        }
    }
    Ok(None)
}

/// Searches a paginated collection from page 1, optionally starting from an
/// already fetched first page.
///
/// # Errors
///
/// Returns the first fetch error raised before a match is found.
pub async fn find_in_pages<S, P>(
    source: S,
    items_per_page: u32,
    first_page: Option<Page<S::Item>>,
    predicate: P,
) -> Result<Option<S::Item>, S::Error>
where
    S: PageSource,
    P: FnMut(&S::Item) -> bool,
{
    let mut lister = PagedLister::new(source, items_per_page);
    if let Some(page) = first_page {
        lister = lister.with_first_page(page);
    }
    find_entry(&mut lister, predicate).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::PageRequest;
    use crate::paging::PageFn;
    use std::cell::Cell;
    use std::future::ready;

    fn letters(request: PageRequest) -> Page<char> {
        let pages = [vec!['a', 'b'], vec!['c', 'd'], vec!['e']];
        let index = usize::try_from(request.page_num)
            .unwrap_or_else(|err| panic!("page number: {err}"))
            .saturating_sub(1);
        Page::new(pages.get(index).cloned().unwrap_or_default(), 5)
    }

    #[tokio::test]
    async fn stops_fetching_once_matched() {
        let fetches = Cell::new(0_u32);
        let found = find_in_pages(
            PageFn::new(|request: PageRequest| {
                fetches.set(fetches.get() + 1);
                ready(Ok::<_, String>(letters(request)))
            }),
            2,
            None,
            |item| *item == 'c',
        )
        .await;

        assert_eq!(found, Ok(Some('c')));
        assert_eq!(fetches.get(), 2);
    }

    #[tokio::test]
    async fn returns_none_after_last_page() {
        let found = find_in_pages(
            PageFn::new(|request: PageRequest| ready(Ok::<_, String>(letters(request)))),
            2,
            None,
            |item| *item == 'z',
        )
        .await;

        assert_eq!(found, Ok(None));
    }

    #[tokio::test]
    async fn uses_prefetched_first_page_before_fetching() {
        let fetches = Cell::new(0_u32);
        let found = find_in_pages(
            PageFn::new(|request: PageRequest| {
                fetches.set(fetches.get() + 1);
                ready(Ok::<_, String>(letters(request)))
            }),
            2,
            Some(Page::new(vec!['a', 'b'], 5)),
            |item| *item == 'b',
        )
        .await;

        assert_eq!(found, Ok(Some('b')));
        assert_eq!(fetches.get(), 0);
    }

    #[tokio::test]
    async fn fetch_error_before_match_is_returned() {
        let found = find_in_pages(
            PageFn::new(|request: PageRequest| {
                ready(if request.page_num == 1 {
                    Ok(Page::new(vec!['a'], 3))
                } else {
                    Err(String::from("throttled"))
                })
            }),
            1,
            None,
            |item| *item == 'c',
        )
        .await;

        assert_eq!(found, Err(String::from("throttled")));
    }
}
