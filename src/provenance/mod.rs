//! Global provenances and the agent to provenance resolution used by data searches.

use std::collections::HashSet;
use std::ops::Deref;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::access::ProvenanceAgentResolver;
use crate::config::DaoConfig;
use crate::dao::{DaoOptions, ReadDao, ReadWriteDao};
use crate::error::DaoResult;
use crate::filter::SearchFilter;
use crate::model::URI_FIELD;
use crate::store::{DocumentStore, IndexSpec};
use crate::uri::{ExpandUris, Namespaces, Uri};
use crate::Model;

/// Field holding the agents of a global provenance.
pub const AGENTS_FIELD: &str = "agents";

/// Typed reference to an entity or agent (device, operator).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProvEntity {
    pub uri: Uri,
    #[serde(default)]
    pub rdf_type: Option<Uri>,
}

impl ProvEntity {
    pub fn new(uri: Uri) -> Self {
        Self {
            uri,
            rdf_type: None,
        }
    }

    pub fn typed(uri: Uri, rdf_type: Uri) -> Self {
        Self {
            uri,
            rdf_type: Some(rdf_type),
        }
    }
}

impl ExpandUris for ProvEntity {
    fn expand_uris(&mut self, namespaces: &Namespaces) {
        self.uri.expand_uris(namespaces);
        self.rdf_type.expand_uris(namespaces);
    }
}

/// A reusable provenance: how data were produced, and by which agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Model)]
#[model(collection = "provenance", uri_segment = "name")]
pub struct ProvenanceModel {
    pub uri: Option<Uri>,
    pub rdf_type: Option<Uri>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[model(expand)]
    #[serde(default)]
    pub agents: Vec<ProvEntity>,
}

impl ProvenanceModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            uri: None,
            rdf_type: None,
            name: name.into(),
            description: None,
            agents: Vec::new(),
        }
    }

    pub fn with_agent(mut self, agent: ProvEntity) -> Self {
        self.agents.push(agent);
        self
    }
}

/// DAO of the global provenance collection.
pub struct ProvenanceDao<S: DocumentStore> {
    dao: ReadWriteDao<S, ProvenanceModel>,
}

impl<S: DocumentStore> ProvenanceDao<S> {
    pub fn new(store: S, config: Arc<DaoConfig>) -> DaoResult<Self> {
        let options = DaoOptions::default()
            .uri_path("provenance")
            .index(IndexSpec::ascending(&["agents.uri"]));
        Ok(Self {
            dao: ReadWriteDao::new(store, config, options)?,
        })
    }
}

impl<S: DocumentStore> Deref for ProvenanceDao<S> {
    type Target = ReadWriteDao<S, ProvenanceModel>;

    fn deref(&self) -> &Self::Target {
        &self.dao
    }
}

impl<S: DocumentStore> ProvenanceAgentResolver for ProvenanceDao<S> {
    fn provenances_by_agents(&self, agents: &[Uri]) -> DaoResult<HashSet<Uri>> {
        if agents.is_empty() {
            return Ok(HashSet::new());
        }
        let agents = self.namespaces().expand_all(agents);
        let filter = SearchFilter::builder()
            .any_of(format!("{AGENTS_FIELD}.{URI_FIELD}"), agents)
            .build();
        Ok(self
            .dao
            .distinct::<Uri>(None, URI_FIELD, &filter)?
            .into_iter()
            .collect())
    }
}
