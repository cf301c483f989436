//! DocumentStore - the backend seam every DAO runs on.
//!
//! Operations mirror a MongoDB collection API: filters, sorts and pipelines
//! are expressed with [`crate::query`] types, documents are JSON objects and
//! every call takes an optional session so it can join a transaction.

mod in_memory;

use std::time::Duration;

use serde_json::Value;

use crate::error::StoreError;
use crate::query::{Direction, Document, Filter, OrderBy, Pipeline, Projection, Sort};

pub use in_memory::{InMemoryDocumentStore, InMemorySession};

/// Lazily consumed query results.
pub type Cursor = Box<dyn Iterator<Item = Result<Document, StoreError>> + Send>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub sort: Sort,
    pub skip: u64,
    /// `None` returns every matching document.
    pub limit: Option<u64>,
    pub projection: Option<Projection>,
    pub max_time: Option<Duration>,
}

impl FindOptions {
    pub fn projection(mut self, projection: Projection) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn max_time(mut self, max_time: Duration) -> Self {
        self.max_time = Some(max_time);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountOptions {
    pub skip: u64,
    /// `None` counts every matching document.
    pub limit: Option<u64>,
    pub max_time: Option<Duration>,
}

impl CountOptions {
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = skip;
        self
    }

    pub fn max_time(mut self, max_time: Duration) -> Self {
        self.max_time = Some(max_time);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateResult {
    pub matched: u64,
    pub modified: u64,
    pub upserted_id: Option<String>,
}

/// Secondary index declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    pub keys: Vec<OrderBy>,
    pub unique: bool,
}

impl IndexSpec {
    /// Index over `keys`, named the MongoDB way (`field_1_other_-1`).
    pub fn new(keys: impl IntoIterator<Item = OrderBy>) -> Self {
        let keys: Vec<OrderBy> = keys.into_iter().collect();
        let name = keys
            .iter()
            .map(|k| match k.direction {
                Direction::Asc => format!("{}_1", k.field),
                Direction::Desc => format!("{}_-1", k.field),
            })
            .collect::<Vec<_>>()
            .join("_");
        Self {
            name,
            keys,
            unique: false,
        }
    }

    pub fn ascending(fields: &[&str]) -> Self {
        Self::new(fields.iter().map(|f| OrderBy::asc(*f)))
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(|k| k.field.as_str())
    }
}

/// Abstract document database.
///
/// Writes given a session with an open transaction are only visible through
/// that session until it commits.
pub trait DocumentStore: Send + Sync {
    type Session: Send + Sync;

    fn start_session(&self) -> Result<Self::Session, StoreError>;

    fn start_transaction(&self, session: &Self::Session) -> Result<(), StoreError>;

    /// Fails with a transient `WriteConflict` when a concurrent write committed first.
    fn commit_transaction(&self, session: &Self::Session) -> Result<(), StoreError>;

    fn abort_transaction(&self, session: &Self::Session) -> Result<(), StoreError>;

    /// Idempotent: an index with the same name is left untouched.
    fn create_index(&self, collection: &str, index: &IndexSpec) -> Result<(), StoreError>;

    fn find(
        &self,
        session: Option<&Self::Session>,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Cursor, StoreError>;

    fn count_documents(
        &self,
        session: Option<&Self::Session>,
        collection: &str,
        filter: &Filter,
        options: &CountOptions,
    ) -> Result<u64, StoreError>;

    /// Collection size from metadata, without a scan.
    fn estimated_document_count(
        &self,
        collection: &str,
        max_time: Option<Duration>,
    ) -> Result<u64, StoreError>;

    /// Returns the assigned `_id`.
    fn insert_one(
        &self,
        session: Option<&Self::Session>,
        collection: &str,
        document: Document,
    ) -> Result<String, StoreError>;

    /// Ordered insert: stops at the first failure and reports it as `BulkWrite`.
    fn insert_many(
        &self,
        session: Option<&Self::Session>,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<Vec<String>, StoreError>;

    /// Replace the first match and return it as it was before the replace.
    fn find_one_and_replace(
        &self,
        session: Option<&Self::Session>,
        collection: &str,
        filter: &Filter,
        replacement: Document,
        projection: Option<&Projection>,
    ) -> Result<Option<Document>, StoreError>;

    fn replace_one(
        &self,
        session: Option<&Self::Session>,
        collection: &str,
        filter: &Filter,
        replacement: Document,
        upsert: bool,
    ) -> Result<UpdateResult, StoreError>;

    fn delete_one(
        &self,
        session: Option<&Self::Session>,
        collection: &str,
        filter: &Filter,
    ) -> Result<u64, StoreError>;

    fn delete_many(
        &self,
        session: Option<&Self::Session>,
        collection: &str,
        filter: &Filter,
    ) -> Result<u64, StoreError>;

    /// Distinct non-null values at `field`; array values are flattened.
    fn distinct(
        &self,
        session: Option<&Self::Session>,
        collection: &str,
        field: &str,
        filter: &Filter,
        max_time: Option<Duration>,
    ) -> Result<Vec<Value>, StoreError>;

    fn aggregate(
        &self,
        session: Option<&Self::Session>,
        collection: &str,
        pipeline: &Pipeline,
        max_time: Option<Duration>,
    ) -> Result<Cursor, StoreError>;
}
