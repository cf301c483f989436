//! Generic DAOs over a [`DocumentStore`](crate::store::DocumentStore).
//!
//! [`ReadWriteDao`] is the single implementation of both [`ReadDao`] and
//! [`WriteDao`]. Domain DAOs wrap one and supply a [`FilterBuilder`](crate::filter::FilterBuilder)
//! for their own filter type.

pub mod logger;
mod read;
mod read_write;
mod write;

use crate::pagination::PaginatedSearchStrategy;
use crate::query::{Projection, Sort};
use crate::store::{CountOptions, IndexSpec};

pub use logger::{Operation, OperationLogger};
pub use read::{AggregateStream, ReadDao};
pub use read_write::ReadWriteDao;
pub use write::WriteDao;

/// Per-DAO behavior.
#[derive(Debug, Clone)]
pub struct DaoOptions {
    /// Path appended to the configured generation prefix; defaults to the collection name.
    pub uri_path: Option<String>,
    /// Resolve a uri for every model of a bulk create. When false, every model must carry one.
    pub check_uri_generation: bool,
    /// Probe the store for each candidate or provided uri before inserting.
    /// One round trip per probe; disable when uris carry a random part.
    pub check_uri_existence: bool,
    /// Sort used when a filter has none.
    pub default_sort: Sort,
    /// Secondary indexes created with the DAO, next to the unique `uri` index.
    pub indexes: Vec<IndexSpec>,
}

impl Default for DaoOptions {
    fn default() -> Self {
        Self {
            uri_path: None,
            check_uri_generation: true,
            check_uri_existence: false,
            default_sort: Sort::new(),
            indexes: Vec::new(),
        }
    }
}

impl DaoOptions {
    pub fn uri_path(mut self, path: impl Into<String>) -> Self {
        self.uri_path = Some(path.into());
        self
    }

    pub fn check_uri_existence(mut self, check: bool) -> Self {
        self.check_uri_existence = check;
        self
    }

    pub fn check_uri_generation(mut self, check: bool) -> Self {
        self.check_uri_generation = check;
        self
    }

    pub fn default_sort(mut self, sort: Sort) -> Self {
        self.default_sort = sort;
        self
    }

    pub fn index(mut self, index: IndexSpec) -> Self {
        self.indexes.push(index);
        self
    }
}

/// A paginated search: filter, record conversion and search settings.
pub struct SearchQuery<'a, S, F, C> {
    pub(crate) session: Option<&'a S>,
    pub(crate) filter: &'a F,
    pub(crate) convert: C,
    pub(crate) projection: Option<Projection>,
    pub(crate) strategy: PaginatedSearchStrategy,
    pub(crate) count_options: Option<CountOptions>,
}

impl<'a, S, F, C> SearchQuery<'a, S, F, C> {
    /// `convert` is applied to each record as it is read.
    pub fn new(filter: &'a F, convert: C) -> Self {
        Self {
            session: None,
            filter,
            convert,
            projection: None,
            strategy: PaginatedSearchStrategy::default(),
            count_options: None,
        }
    }

    pub fn session(mut self, session: Option<&'a S>) -> Self {
        self.session = session;
        self
    }

    pub fn projection(mut self, projection: Projection) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn strategy(mut self, strategy: PaginatedSearchStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Replaces the count options derived from the page size.
    pub fn count_options(mut self, options: CountOptions) -> Self {
        self.count_options = Some(options);
        self
    }
}
