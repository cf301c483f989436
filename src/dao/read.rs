use std::collections::HashSet;

use serde::de::DeserializeOwned;

use super::SearchQuery;
use crate::error::DaoResult;
use crate::filter::DaoFilter;
use crate::model::Model;
use crate::pagination::{ListWithPagination, StreamWithPagination};
use crate::query::{Document, Pipeline, Projection};
use crate::store::CountOptions;
use crate::uri::Uri;

/// Lazily deserialized aggregation results.
pub type AggregateStream<R> = Box<dyn Iterator<Item = DaoResult<R>>>;

/// Read access to one collection of `M`, searched with filters of type `F`.
///
/// Methods with a `session` parameter read through it, seeing its uncommitted writes.
pub trait ReadDao<M: Model, F: DaoFilter> {
    type Session;

    /// The document with this uri; `InvalidUri` when absent.
    fn get(&self, uri: &Uri) -> DaoResult<M> {
        self.get_in(None, uri)
    }

    fn get_in(&self, session: Option<&Self::Session>, uri: &Uri) -> DaoResult<M>;

    /// Like [`get_in`](Self::get_in) with only the projected fields loaded.
    fn get_projected(
        &self,
        session: Option<&Self::Session>,
        uri: &Uri,
        projection: &Projection,
    ) -> DaoResult<M>;

    /// Models whose uri is among the first `size` uris; unknown uris are skipped.
    fn find_by_uris(&self, uris: &[Uri], size: usize) -> DaoResult<Vec<M>>;

    fn exists(&self, uri: &Uri) -> DaoResult<bool> {
        self.exists_in(None, uri)
    }

    fn exists_in(&self, session: Option<&Self::Session>, uri: &Uri) -> DaoResult<bool>;

    /// Matching documents, capped by the configured count limit.
    fn count(&self, filter: &F) -> DaoResult<u64>;

    fn count_with(
        &self,
        session: Option<&Self::Session>,
        filter: &F,
        options: CountOptions,
    ) -> DaoResult<u64>;

    fn search(&self, filter: &F) -> DaoResult<ListWithPagination<M>> {
        self.search_with(SearchQuery::new(filter, std::convert::identity))
    }

    fn search_with<T, C>(
        &self,
        query: SearchQuery<'_, Self::Session, F, C>,
    ) -> DaoResult<ListWithPagination<T>>
    where
        C: Fn(M) -> T;

    fn search_as_stream(&self, filter: &F) -> DaoResult<StreamWithPagination<M>> {
        self.search_as_stream_with(SearchQuery::new(filter, std::convert::identity))
    }

    fn search_as_stream_with<T, C>(
        &self,
        query: SearchQuery<'_, Self::Session, F, C>,
    ) -> DaoResult<StreamWithPagination<T>>
    where
        T: 'static,
        C: Fn(M) -> T + 'static;

    /// Distinct uris of the matching documents, unordered.
    fn distinct_uris(&self, filter: &F) -> DaoResult<HashSet<Uri>>;

    /// Distinct values of `field`, unordered and unpaginated.
    fn distinct<T: DeserializeOwned>(
        &self,
        session: Option<&Self::Session>,
        field: &str,
        filter: &F,
    ) -> DaoResult<Vec<T>>;

    /// One page of the distinct values of `field`, ordered by value.
    fn distinct_with_pagination<T: DeserializeOwned>(
        &self,
        session: Option<&Self::Session>,
        field: &str,
        filter: &F,
    ) -> DaoResult<ListWithPagination<T>>;

    fn aggregate(
        &self,
        session: Option<&Self::Session>,
        pipeline: &Pipeline,
    ) -> DaoResult<Vec<Document>>;

    fn aggregate_as<R: DeserializeOwned>(
        &self,
        session: Option<&Self::Session>,
        pipeline: &Pipeline,
    ) -> DaoResult<Vec<R>>;

    fn aggregate_as_stream<R: DeserializeOwned + 'static>(
        &self,
        session: Option<&Self::Session>,
        pipeline: &Pipeline,
    ) -> DaoResult<AggregateStream<R>>;

    /// Resolve the distinct `lookup_field` references of the matching
    /// documents against `lookup_collection` in one aggregation.
    fn lookup_aggregation<J, T>(
        &self,
        session: Option<&Self::Session>,
        filter: Option<&F>,
        lookup_field: &str,
        lookup_collection: &str,
        convert: impl Fn(J) -> T,
    ) -> DaoResult<Vec<T>>
    where
        J: DeserializeOwned;
}
