//! Collaborator contracts consumed by the specialized filter builders.
//!
//! The DAO layer does not decide who may see what: an [`ExperimentAccess`]
//! oracle provides the experiments an account is authorized on, and a
//! [`ProvenanceAgentResolver`] maps agents to the global provenances they are
//! associated with.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::DaoResult;
use crate::uri::Uri;

/// The user a search runs on behalf of.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub uri: Uri,
    #[serde(default)]
    pub admin: bool,
    #[serde(default)]
    pub language: Option<String>,
}

impl Account {
    pub fn user(uri: Uri) -> Self {
        Self {
            uri,
            admin: false,
            language: None,
        }
    }

    pub fn admin(uri: Uri) -> Self {
        Self {
            uri,
            admin: true,
            language: None,
        }
    }
}

/// Experiments an account may read.
pub trait ExperimentAccess: Send + Sync {
    fn user_experiments(&self, account: &Account) -> DaoResult<HashSet<Uri>>;
}

/// Global provenances associated with any of the given agents.
pub trait ProvenanceAgentResolver: Send + Sync {
    fn provenances_by_agents(&self, agents: &[Uri]) -> DaoResult<HashSet<Uri>>;
}

/// Fixed account to experiments table.
#[derive(Debug, Clone, Default)]
pub struct InMemoryExperimentAccess {
    experiments: HashMap<Uri, HashSet<Uri>>,
}

impl InMemoryExperimentAccess {
    pub fn new() -> Self {
        Self::default()
    }

    /// Authorize `account` on `experiments`, on top of earlier grants.
    pub fn grant(mut self, account: &Uri, experiments: impl IntoIterator<Item = Uri>) -> Self {
        self.experiments
            .entry(account.clone())
            .or_default()
            .extend(experiments);
        self
    }
}

impl ExperimentAccess for InMemoryExperimentAccess {
    fn user_experiments(&self, account: &Account) -> DaoResult<HashSet<Uri>> {
        Ok(self
            .experiments
            .get(&account.uri)
            .cloned()
            .unwrap_or_default())
    }
}
