use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{
    BATCH_URI_FIELD, CONFIDENCE_FIELD, DATE_FIELD, FILENAME_FIELD, METADATA_FIELD,
    PROVENANCE_AGENTS_FIELD, PROVENANCE_AGENTS_URI_FIELD, PROVENANCE_EXPERIMENT_FIELD,
    PROVENANCE_URI_FIELD, TARGET_FIELD, VARIABLE_FIELD,
};
use crate::access::{Account, ExperimentAccess, ProvenanceAgentResolver};
use crate::config::{ExperimentAccessPolicy, NoAuthorizedExperiments, UnauthorizedExperiments};
use crate::error::{DaoError, DaoResult};
use crate::filter::{DaoFilter, FilterBuilder, SearchFilter};
use crate::query::Filter;
use crate::uri::{Namespaces, Uri};

/// Criteria shared by data and data file searches.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataCriteria {
    /// Required: visibility is computed for this account.
    pub account: Option<Account>,
    pub experiments: Vec<Uri>,
    pub targets: Vec<Uri>,
    pub provenances: Vec<Uri>,
    pub devices: Vec<Uri>,
    pub operators: Vec<Uri>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub min_confidence: Option<f64>,
    pub max_confidence: Option<f64>,
    pub metadata: BTreeMap<String, Value>,
    pub batch_uri: Option<Uri>,
}

impl DataCriteria {
    pub fn for_account(account: Account) -> Self {
        Self {
            account: Some(account),
            ..Self::default()
        }
    }

    pub fn experiments(mut self, experiments: impl IntoIterator<Item = Uri>) -> Self {
        self.experiments.extend(experiments);
        self
    }

    pub fn targets(mut self, targets: impl IntoIterator<Item = Uri>) -> Self {
        self.targets.extend(targets);
        self
    }

    pub fn provenances(mut self, provenances: impl IntoIterator<Item = Uri>) -> Self {
        self.provenances.extend(provenances);
        self
    }

    pub fn devices(mut self, devices: impl IntoIterator<Item = Uri>) -> Self {
        self.devices.extend(devices);
        self
    }

    pub fn operators(mut self, operators: impl IntoIterator<Item = Uri>) -> Self {
        self.operators.extend(operators);
        self
    }

    pub fn between(mut self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        self.start_date = start;
        self.end_date = end;
        self
    }

    pub fn confidence(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min_confidence = min;
        self.max_confidence = max;
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn batch(mut self, batch_uri: Uri) -> Self {
        self.batch_uri = Some(batch_uri);
        self
    }

    fn clauses(&self, namespaces: &Namespaces) -> Vec<Filter> {
        let mut clauses = Vec::new();
        if !self.targets.is_empty() {
            clauses.push(Filter::is_in(TARGET_FIELD, namespaces.expand_all(&self.targets)));
        }
        if !self.provenances.is_empty() {
            clauses.push(Filter::is_in(
                PROVENANCE_URI_FIELD,
                namespaces.expand_all(&self.provenances),
            ));
        }
        if let Some(start) = self.start_date {
            clauses.push(Filter::gte(DATE_FIELD, start.timestamp_millis()));
        }
        if let Some(end) = self.end_date {
            clauses.push(Filter::lte(DATE_FIELD, end.timestamp_millis()));
        }
        if let Some(min) = self.min_confidence {
            clauses.push(Filter::gte(CONFIDENCE_FIELD, min));
        }
        if let Some(max) = self.max_confidence {
            clauses.push(Filter::lte(CONFIDENCE_FIELD, max));
        }
        for (key, value) in &self.metadata {
            clauses.push(Filter::eq(format!("{METADATA_FIELD}.{key}"), value.clone()));
        }
        if let Some(batch) = &self.batch_uri {
            clauses.push(Filter::eq(BATCH_URI_FIELD, namespaces.expand(batch)));
        }
        clauses
    }

    /// Devices and operators, expanded and deduplicated, in request order.
    fn agents(&self, namespaces: &Namespaces) -> Vec<Uri> {
        let mut seen = HashSet::new();
        self.devices
            .iter()
            .chain(&self.operators)
            .map(|agent| namespaces.expand(agent))
            .filter(|agent| seen.insert(agent.clone()))
            .collect()
    }
}

/// Filters compiled by [`DataFilterBuilder`].
pub trait DataFilter: DaoFilter {
    fn criteria(&self) -> &DataCriteria;

    /// Clauses specific to the filter kind.
    fn specific_clauses(&self, namespaces: &Namespaces) -> Vec<Filter>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataSearchFilter {
    pub search: SearchFilter,
    pub criteria: DataCriteria,
    pub variables: Vec<Uri>,
}

impl DataSearchFilter {
    pub fn new(criteria: DataCriteria) -> Self {
        Self {
            criteria,
            ..Self::default()
        }
    }

    pub fn with_search(mut self, search: SearchFilter) -> Self {
        self.search = search;
        self
    }

    pub fn variables(mut self, variables: impl IntoIterator<Item = Uri>) -> Self {
        self.variables.extend(variables);
        self
    }
}

impl DaoFilter for DataSearchFilter {
    fn search(&self) -> &SearchFilter {
        &self.search
    }
}

impl DataFilter for DataSearchFilter {
    fn criteria(&self) -> &DataCriteria {
        &self.criteria
    }

    fn specific_clauses(&self, namespaces: &Namespaces) -> Vec<Filter> {
        if self.variables.is_empty() {
            return Vec::new();
        }
        vec![Filter::is_in(VARIABLE_FIELD, namespaces.expand_all(&self.variables))]
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataFileSearchFilter {
    pub search: SearchFilter,
    pub criteria: DataCriteria,
    /// Case-insensitive pattern on the file name.
    pub name: Option<String>,
}

impl DataFileSearchFilter {
    pub fn new(criteria: DataCriteria) -> Self {
        Self {
            criteria,
            ..Self::default()
        }
    }

    pub fn with_search(mut self, search: SearchFilter) -> Self {
        self.search = search;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl DaoFilter for DataFileSearchFilter {
    fn search(&self) -> &SearchFilter {
        &self.search
    }
}

impl DataFilter for DataFileSearchFilter {
    fn criteria(&self) -> &DataCriteria {
        &self.criteria
    }

    fn specific_clauses(&self, _namespaces: &Namespaces) -> Vec<Filter> {
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => vec![Filter::iregex(FILENAME_FIELD, name)],
            _ => Vec::new(),
        }
    }
}

/// Compiles data and data file filters.
///
/// Experiment visibility is returned as a constraint, so it applies even when
/// the search combines its criteria with OR.
pub struct DataFilterBuilder {
    namespaces: Namespaces,
    policy: ExperimentAccessPolicy,
    access: Arc<dyn ExperimentAccess>,
    provenances: Arc<dyn ProvenanceAgentResolver>,
}

impl DataFilterBuilder {
    pub fn new(
        namespaces: Namespaces,
        policy: ExperimentAccessPolicy,
        access: Arc<dyn ExperimentAccess>,
        provenances: Arc<dyn ProvenanceAgentResolver>,
    ) -> Self {
        Self {
            namespaces,
            policy,
            access,
            provenances,
        }
    }

    /// Clause restricting results to the experiments `account` may see;
    /// `None` when nothing needs restricting.
    pub fn experiment_visibility(
        &self,
        account: &Account,
        requested: &[Uri],
    ) -> DaoResult<Option<Filter>> {
        let requested: BTreeSet<Uri> = requested.iter().map(|e| self.namespaces.expand(e)).collect();

        if account.admin {
            return Ok((!requested.is_empty())
                .then(|| Filter::is_in(PROVENANCE_EXPERIMENT_FIELD, requested)));
        }

        let authorized: BTreeSet<Uri> = self
            .access
            .user_experiments(account)?
            .iter()
            .map(|e| self.namespaces.expand(e))
            .collect();

        if !requested.is_empty() {
            let visible: Vec<Uri> = match self.policy.unauthorized {
                UnauthorizedExperiments::Deny => {
                    let denied: Vec<&Uri> = requested.difference(&authorized).collect();
                    if !denied.is_empty() {
                        return Err(DaoError::AccessDenied(format!(
                            "{} cannot access experiments {}",
                            account.uri,
                            join(denied)
                        )));
                    }
                    requested.into_iter().collect()
                }
                UnauthorizedExperiments::Intersect => {
                    requested.intersection(&authorized).cloned().collect()
                }
            };
            if visible.is_empty() {
                return Err(DaoError::AccessDenied(format!(
                    "{} cannot access any of the requested experiments",
                    account.uri
                )));
            }
            return Ok(Some(Filter::is_in(PROVENANCE_EXPERIMENT_FIELD, visible)));
        }

        if authorized.is_empty() {
            return Ok(match self.policy.no_authorized {
                NoAuthorizedExperiments::UnassignedOnly => {
                    Some(Filter::absent_or_empty(PROVENANCE_EXPERIMENT_FIELD))
                }
                NoAuthorizedExperiments::Unrestricted => None,
            });
        }

        Ok(Some(Filter::or([
            Filter::is_in(PROVENANCE_EXPERIMENT_FIELD, authorized),
            Filter::absent_or_empty(PROVENANCE_EXPERIMENT_FIELD),
        ])))
    }

    /// Data produced by one of `agents`, directly or through a global
    /// provenance when the data point recorded no agent of its own.
    pub fn agent_filter(&self, agents: &[Uri]) -> DaoResult<Option<Filter>> {
        if agents.is_empty() {
            return Ok(None);
        }
        let direct = Filter::is_in(PROVENANCE_AGENTS_URI_FIELD, agents.iter().cloned());

        let global: BTreeSet<Uri> = self
            .provenances
            .provenances_by_agents(agents)?
            .iter()
            .map(|p| self.namespaces.expand(p))
            .collect();
        if global.is_empty() {
            return Ok(Some(direct));
        }

        Ok(Some(Filter::or([
            direct,
            Filter::and([
                Filter::is_in(PROVENANCE_URI_FIELD, global),
                Filter::absent_or_empty(PROVENANCE_AGENTS_FIELD),
            ]),
        ])))
    }
}

impl<F: DataFilter> FilterBuilder<F> for DataFilterBuilder {
    fn clauses(&self, filter: &F) -> DaoResult<Vec<Filter>> {
        let criteria = filter.criteria();
        let mut clauses = filter.search().clauses(&self.namespaces);
        clauses.extend(criteria.clauses(&self.namespaces));
        clauses.extend(filter.specific_clauses(&self.namespaces));
        clauses.extend(self.agent_filter(&criteria.agents(&self.namespaces))?);
        Ok(clauses)
    }

    fn constraints(&self, filter: &F) -> DaoResult<Vec<Filter>> {
        let criteria = filter.criteria();
        let account = criteria.account.as_ref().ok_or_else(|| {
            DaoError::InvalidArgument("an account is required to search data".into())
        })?;
        Ok(self
            .experiment_visibility(account, &criteria.experiments)?
            .into_iter()
            .collect())
    }
}

fn join<'a>(uris: impl IntoIterator<Item = &'a Uri>) -> String {
    uris.into_iter()
        .map(Uri::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
