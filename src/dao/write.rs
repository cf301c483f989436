use crate::error::DaoResult;
use crate::filter::DaoFilter;
use crate::model::Model;
use crate::uri::Uri;

/// Write access to one collection of `M`.
///
/// Multi-document writes are atomic: they join the given session, or run in
/// a transaction of their own when there is none.
pub trait WriteDao<M: Model, F: DaoFilter> {
    type Session;

    /// Insert `model`, generating its uri when unset. Returns the stored uri.
    fn create(&self, model: &mut M) -> DaoResult<Uri> {
        self.create_in(None, model)
    }

    fn create_in(&self, session: Option<&Self::Session>, model: &mut M) -> DaoResult<Uri>;

    /// Insert every model or none. Uris are resolved before anything is written.
    fn create_many(&self, models: &mut [M]) -> DaoResult<Vec<Uri>> {
        self.create_many_in(None, models)
    }

    fn create_many_in(
        &self,
        session: Option<&Self::Session>,
        models: &mut [M],
    ) -> DaoResult<Vec<Uri>>;

    /// Replace the stored document with the same uri; `InvalidUri` when there is none.
    fn update(&self, model: &M) -> DaoResult<()> {
        self.update_in(None, model)
    }

    fn update_in(&self, session: Option<&Self::Session>, model: &M) -> DaoResult<()>;

    /// Replace or insert. Returns true when a document was inserted.
    fn upsert(&self, model: &M) -> DaoResult<bool> {
        self.upsert_in(None, model)
    }

    fn upsert_in(&self, session: Option<&Self::Session>, model: &M) -> DaoResult<bool>;

    /// `InvalidUri` when nothing was deleted.
    fn delete(&self, uri: &Uri) -> DaoResult<()> {
        self.delete_in(None, uri)
    }

    fn delete_in(&self, session: Option<&Self::Session>, uri: &Uri) -> DaoResult<()>;

    /// Delete the documents with these uris. An empty list is rejected.
    fn delete_many_uris(&self, session: Option<&Self::Session>, uris: &[Uri]) -> DaoResult<u64>;

    /// Delete the matching documents. A filter matching everything is rejected.
    fn delete_many(&self, session: Option<&Self::Session>, filter: &F) -> DaoResult<u64>;
}
