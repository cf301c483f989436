//! Paginated search results: materialized lists and single-pass streams.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::DaoError;

/// How a paginated search learns whether more pages exist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaginatedSearchStrategy {
    /// Count matching documents first; an empty count skips the find.
    #[default]
    CountQueryBeforeSearch,
    /// No count; fetch one extra document to tell whether a next page exists.
    HasNextPage,
}

/// One page of converted results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListWithPagination<T> {
    items: Vec<T>,
    page: u64,
    page_size: u64,
    /// `None` when the search did not count.
    total: Option<u64>,
    /// Limit the count ran with; a total equal to it may be truncated.
    count_limit: Option<u64>,
    has_next_page: bool,
}

impl<T> ListWithPagination<T> {
    /// Page of a counted search.
    pub fn counted(
        items: Vec<T>,
        page: u64,
        page_size: u64,
        total: u64,
        count_limit: Option<u64>,
    ) -> Self {
        let seen = page.saturating_add(1).saturating_mul(page_size);
        Self {
            items,
            page,
            page_size,
            total: Some(total),
            count_limit,
            has_next_page: page_size > 0 && seen < total,
        }
    }

    /// Page of an uncounted search.
    pub fn with_next_page(items: Vec<T>, page: u64, page_size: u64, has_next_page: bool) -> Self {
        Self {
            items,
            page,
            page_size,
            total: None,
            count_limit: None,
            has_next_page,
        }
    }

    pub fn empty(page: u64, page_size: u64) -> Self {
        Self::counted(Vec::new(), page, page_size, 0, None)
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn into_items(self) -> Vec<T> {
        self.items
    }

    pub fn page(&self) -> u64 {
        self.page
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn total(&self) -> Option<u64> {
        self.total
    }

    pub fn count_limit(&self) -> Option<u64> {
        self.count_limit
    }

    pub fn has_next_page(&self) -> bool {
        self.has_next_page
    }

    /// True when the total hit the count limit and the real total may be larger.
    pub fn is_total_capped(&self) -> bool {
        matches!((self.total, self.count_limit), (Some(total), Some(limit)) if total >= limit)
    }

    /// Number of pages implied by the total.
    pub fn page_count(&self) -> Option<u64> {
        let total = self.total?;
        if self.page_size == 0 {
            return Some(u64::from(total > 0));
        }
        Some(total.div_ceil(self.page_size))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> ListWithPagination<U> {
        ListWithPagination {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            page_size: self.page_size,
            total: self.total,
            count_limit: self.count_limit,
            has_next_page: self.has_next_page,
        }
    }
}

/// Lazily converted page. Consuming it is the only way to read the items,
/// so it can be iterated once.
pub struct StreamWithPagination<T> {
    items: Box<dyn Iterator<Item = Result<T, DaoError>>>,
    page: u64,
    page_size: u64,
    total: u64,
}

impl<T> StreamWithPagination<T> {
    pub fn new(
        items: Box<dyn Iterator<Item = Result<T, DaoError>>>,
        page: u64,
        page_size: u64,
        total: u64,
    ) -> Self {
        Self {
            items,
            page,
            page_size,
            total,
        }
    }

    pub fn empty(page: u64, page_size: u64) -> Self
    where
        T: 'static,
    {
        Self::new(Box::new(std::iter::empty()), page, page_size, 0)
    }

    pub fn page(&self) -> u64 {
        self.page
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Drain the stream into a list, stopping at the first conversion error.
    pub fn collect_list(self) -> Result<ListWithPagination<T>, DaoError> {
        let (page, page_size, total) = (self.page, self.page_size, self.total);
        let items = self.items.collect::<Result<Vec<_>, _>>()?;
        Ok(ListWithPagination::counted(items, page, page_size, total, None))
    }
}

impl<T> IntoIterator for StreamWithPagination<T> {
    type Item = Result<T, DaoError>;
    type IntoIter = Box<dyn Iterator<Item = Result<T, DaoError>>>;

    fn into_iter(self) -> Self::IntoIter {
        self.items
    }
}

impl<T> fmt::Debug for StreamWithPagination<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamWithPagination")
            .field("page", &self.page)
            .field("page_size", &self.page_size)
            .field("total", &self.total)
            .finish_non_exhaustive()
    }
}
