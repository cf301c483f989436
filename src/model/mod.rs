//! Models - URI-keyed entities persisted one collection per kind.
//!
//! ## Example
//!
//! ```ignore
//! use nosql_dao::{Model, Uri};
//!
//! #[derive(Serialize, Deserialize, Clone, Model)]
//! #[model(collection = "devices", uri_segment = "name")]
//! struct Device {
//!     pub uri: Option<Uri>,
//!     pub rdf_type: Option<Uri>,
//!     pub name: String,
//! }
//! ```

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::error::DaoError;
use crate::query::Document;
use crate::uri::{generation, Namespaces, Uri};

/// Key of the identifier in every stored document.
pub const URI_FIELD: &str = "uri";

/// Key of the type discriminator in every stored document.
pub const TYPE_FIELD: &str = "rdf_type";

/// Trait for types persisted through a DAO.
///
/// Implementations serialize their identifier under [`URI_FIELD`] and their
/// type under [`TYPE_FIELD`]. Once stored, the uri must not change.
pub trait Model: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// The collection holding this model kind.
    const COLLECTION: &'static str;

    fn uri(&self) -> Option<&Uri>;

    fn set_uri(&mut self, uri: Uri);

    fn rdf_type(&self) -> Option<&Uri>;

    fn set_rdf_type(&mut self, rdf_type: Uri);

    /// Candidate uri for attempt number `retry` under `prefix`.
    ///
    /// Must return a different candidate for each retry value. The default
    /// uses a random segment.
    fn generate_uri(&self, prefix: &str, retry: u32) -> Result<Uri, DaoError> {
        generation::random(prefix, retry)
    }

    /// Expand every uri the model holds before it is written.
    ///
    /// The default covers the identifier and the type. The derive also
    /// covers `Uri` typed fields and fields marked `#[model(expand)]`.
    fn expand_uris(&mut self, namespaces: &Namespaces) {
        if let Some(uri) = self.uri() {
            let expanded = namespaces.expand(uri);
            self.set_uri(expanded);
        }
        if let Some(rdf_type) = self.rdf_type() {
            let expanded = namespaces.expand(rdf_type);
            self.set_rdf_type(expanded);
        }
    }
}

pub(crate) fn to_document<M: Serialize>(model: &M) -> Result<Document, DaoError> {
    match serde_json::to_value(model)? {
        Value::Object(map) => Ok(map),
        other => Err(DaoError::InvalidArgument(format!(
            "model does not serialize to a document: {other}"
        ))),
    }
}

pub(crate) fn from_document<M: DeserializeOwned>(document: Document) -> Result<M, DaoError> {
    Ok(serde_json::from_value(Value::Object(document))?)
}
