//! Generic read/write DAOs over a MongoDB-style document store: URI-keyed
//! models, composable search filters, experiment-aware access control,
//! pagination and transactional multi-document writes.

extern crate self as nosql_dao;

pub mod access;
pub mod config;
pub mod dao;
pub mod data;
pub mod error;
pub mod filter;
pub mod model;
pub mod pagination;
pub mod provenance;
pub mod query;
pub mod store;
pub mod transaction;
pub mod uri;

pub use access::{Account, ExperimentAccess, InMemoryExperimentAccess, ProvenanceAgentResolver};
pub use config::{DaoConfig, ExperimentAccessPolicy, NoAuthorizedExperiments, UnauthorizedExperiments};
pub use dao::{DaoOptions, ReadDao, ReadWriteDao, SearchQuery, WriteDao};
pub use error::{DaoError, DaoResult, StoreError, WriteError, WriteErrorKind};
pub use filter::{Criterion, CriteriaFilterBuilder, DaoFilter, FilterBuilder, SearchFilter};
pub use model::Model;
pub use pagination::{ListWithPagination, PaginatedSearchStrategy, StreamWithPagination};
pub use store::{DocumentStore, InMemoryDocumentStore, InMemorySession};
pub use uri::{Namespaces, Uri};

// Derive macro for Model
pub use nosql_dao_macros::Model;
