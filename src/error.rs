use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Result alias for DAO operations.
pub type DaoResult<T> = Result<T, DaoError>;

/// Errors raised by the DAO layer.
///
/// Validation failures (`InvalidArgument`, `MalformedUri`, `AccessDenied`) are
/// raised before any round trip to the store.
#[derive(Error, Debug)]
pub enum DaoError {
    /// No document with this uri in the collection.
    #[error("invalid uri {uri} in collection {collection}")]
    InvalidUri { collection: String, uri: String },

    /// A document with this uri already exists.
    #[error("uri {uri} already exists in collection {collection}")]
    AlreadyExists { collection: String, uri: String },

    /// A unique index rejected one or more documents.
    #[error("duplicate key in collection {collection}: {}", join_write_errors(.errors))]
    DuplicateKey {
        collection: String,
        errors: Vec<WriteError>,
    },

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("malformed uri: {0}")]
    MalformedUri(String),

    #[error("no free uri found in collection {collection} after {attempts} attempts")]
    UriGenerationExhausted { collection: String, attempts: u32 },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DaoError {
    /// True for errors a transaction retry may resolve.
    pub fn is_transient(&self) -> bool {
        matches!(self, DaoError::Store(err) if err.is_transient())
    }
}

/// Errors raised by a [`DocumentStore`](crate::store::DocumentStore).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("duplicate key in {collection} on index {index}: {key}")]
    DuplicateKey {
        collection: String,
        index: String,
        key: String,
    },

    /// An ordered bulk insert stopped at its first failure.
    #[error(
        "bulk write failed in {collection}: {inserted} inserted, {}",
        join_write_errors(.errors)
    )]
    BulkWrite {
        collection: String,
        inserted: usize,
        errors: Vec<WriteError>,
    },

    /// Concurrent transactions touched the same collection; retryable.
    #[error("write conflict on collection {collection}")]
    WriteConflict { collection: String },

    #[error("operation exceeded time limit of {0:?}")]
    Timeout(Duration),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("document store lock poisoned")]
    LockPoisoned,

    #[error("document serialization error: {0}")]
    Serde(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::WriteConflict { .. })
    }

    pub fn is_duplicate_key(&self) -> bool {
        match self {
            StoreError::DuplicateKey { .. } => true,
            StoreError::BulkWrite { errors, .. } => errors
                .iter()
                .any(|e| e.kind == WriteErrorKind::DuplicateKey),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serde(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteErrorKind {
    DuplicateKey,
    Other,
}

/// Failure of a single document inside a bulk write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteError {
    /// Position of the document in the submitted batch.
    pub index: usize,
    pub kind: WriteErrorKind,
    pub message: String,
}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "document #{}: {}", self.index, self.message)
    }
}

fn join_write_errors(errors: &[WriteError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
