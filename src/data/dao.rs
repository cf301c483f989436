use std::ops::Deref;
use std::sync::Arc;

use super::{
    DataFileModel, DataFileSearchFilter, DataFilterBuilder, DataModel, DataSearchFilter,
    DATE_FIELD, PROVENANCE_AGENTS_URI_FIELD, PROVENANCE_EXPERIMENT_FIELD, PROVENANCE_FIELD,
    PROVENANCE_URI_FIELD, TARGET_FIELD, VARIABLE_FIELD,
};
use crate::access::{ExperimentAccess, ProvenanceAgentResolver};
use crate::config::DaoConfig;
use crate::dao::{DaoOptions, ReadDao, ReadWriteDao};
use crate::error::DaoResult;
use crate::provenance::ProvenanceModel;
use crate::query::{OrderBy, Pipeline, Sort, Stage};
use crate::store::{DocumentStore, IndexSpec};
use crate::uri::Uri;
use crate::Model;

/// Indexes of the file collection; data points share them.
fn file_indexes() -> Vec<IndexSpec> {
    let date = || OrderBy::desc(DATE_FIELD);
    let target = || OrderBy::asc(TARGET_FIELD);
    let experiment = || OrderBy::asc(PROVENANCE_EXPERIMENT_FIELD);
    let agent = || OrderBy::asc(PROVENANCE_AGENTS_URI_FIELD);
    vec![
        IndexSpec::new([date()]),
        IndexSpec::new([experiment(), date()]),
        IndexSpec::new([OrderBy::asc(PROVENANCE_URI_FIELD), date()]),
        IndexSpec::new([target(), date()]),
        IndexSpec::new([agent(), date()]),
        IndexSpec::new([agent(), target(), date()]),
    ]
}

fn data_indexes() -> Vec<IndexSpec> {
    let date = || OrderBy::desc(DATE_FIELD);
    let target = || OrderBy::asc(TARGET_FIELD);
    let variable = || OrderBy::asc(VARIABLE_FIELD);
    let mut indexes = file_indexes();
    indexes.extend([
        IndexSpec::new([variable(), date()]),
        IndexSpec::new([
            OrderBy::asc(PROVENANCE_EXPERIMENT_FIELD),
            variable(),
            target(),
            date(),
        ]),
        IndexSpec::new([variable(), target(), date()]),
        // One value per variable, provenance, target and instant.
        IndexSpec::new([
            variable(),
            OrderBy::asc(PROVENANCE_FIELD),
            target(),
            date(),
        ])
        .unique(),
    ]);
    indexes
}

fn options(indexes: Vec<IndexSpec>) -> DaoOptions {
    let mut options = DaoOptions::default().default_sort(Sort::new().desc(DATE_FIELD));
    options.indexes = indexes;
    options
}

fn builder(
    config: &DaoConfig,
    access: Arc<dyn ExperimentAccess>,
    provenances: Arc<dyn ProvenanceAgentResolver>,
) -> DataFilterBuilder {
    DataFilterBuilder::new(
        config.namespaces.clone(),
        config.experiment_access,
        access,
        provenances,
    )
}

/// DAO of data points.
pub struct DataDao<S: DocumentStore> {
    dao: ReadWriteDao<S, DataModel, DataSearchFilter>,
}

impl<S: DocumentStore> DataDao<S> {
    pub fn new(
        store: S,
        config: Arc<DaoConfig>,
        access: Arc<dyn ExperimentAccess>,
        provenances: Arc<dyn ProvenanceAgentResolver>,
    ) -> DaoResult<Self> {
        let builder = builder(&config, access, provenances);
        let dao = ReadWriteDao::with_builder(
            store,
            config,
            options(data_indexes()),
            Box::new(builder),
        )?;
        Ok(Self { dao })
    }

    /// Distinct targets of the visible data.
    pub fn used_targets(&self, filter: &DataSearchFilter) -> DaoResult<Vec<Uri>> {
        self.dao.distinct(None, TARGET_FIELD, filter)
    }

    /// Distinct variables of the visible data.
    pub fn used_variables(&self, filter: &DataSearchFilter) -> DaoResult<Vec<Uri>> {
        self.dao.distinct(None, VARIABLE_FIELD, filter)
    }

    /// Global provenances referenced by the visible data, joined in one aggregation.
    pub fn used_provenances(&self, filter: &DataSearchFilter) -> DaoResult<Vec<ProvenanceModel>> {
        self.dao.lookup_aggregation(
            None,
            Some(filter),
            PROVENANCE_FIELD,
            ProvenanceModel::COLLECTION,
            std::convert::identity,
        )
    }

    /// Most recent visible data point. Ties keep the first one found.
    pub fn last_data(&self, filter: &DataSearchFilter) -> DaoResult<Option<DataModel>> {
        let pipeline = Pipeline::new()
            .then(Stage::Match(self.dao.compile(filter)?))
            .then(Stage::Sort(Sort::new().desc(DATE_FIELD)))
            .then(Stage::Limit(1));
        Ok(self.dao.aggregate_as::<DataModel>(None, &pipeline)?.into_iter().next())
    }
}

impl<S: DocumentStore> Deref for DataDao<S> {
    type Target = ReadWriteDao<S, DataModel, DataSearchFilter>;

    fn deref(&self) -> &Self::Target {
        &self.dao
    }
}

/// DAO of data files.
pub struct DataFileDao<S: DocumentStore> {
    dao: ReadWriteDao<S, DataFileModel, DataFileSearchFilter>,
}

impl<S: DocumentStore> DataFileDao<S> {
    pub fn new(
        store: S,
        config: Arc<DaoConfig>,
        access: Arc<dyn ExperimentAccess>,
        provenances: Arc<dyn ProvenanceAgentResolver>,
    ) -> DaoResult<Self> {
        let builder = builder(&config, access, provenances);
        let dao = ReadWriteDao::with_builder(
            store,
            config,
            options(file_indexes()).uri_path("datafile"),
            Box::new(builder),
        )?;
        Ok(Self { dao })
    }
}

impl<S: DocumentStore> Deref for DataFileDao<S> {
    type Target = ReadWriteDao<S, DataFileModel, DataFileSearchFilter>;

    fn deref(&self) -> &Self::Target {
        &self.dao
    }
}
