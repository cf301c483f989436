use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use nosql_dao::data::{DataCriteria, DataDao, DataFileDao, DataModel, DataProvenanceModel, DataSearchFilter};
use nosql_dao::provenance::{ProvEntity, ProvenanceDao, ProvenanceModel};
use nosql_dao::{
    Account, DaoConfig, ExperimentAccessPolicy, InMemoryDocumentStore, InMemoryExperimentAccess,
    Namespaces, Uri, WriteDao,
};

pub const ALICE: &str = "http://test.org/users/alice";
pub const BOB: &str = "http://test.org/users/bob";
pub const E1: &str = "http://test.org/experiments/e1";
pub const E2: &str = "http://test.org/experiments/e2";
pub const E3: &str = "http://test.org/experiments/e3";
pub const D1: &str = "http://test.org/devices/d1";
pub const D2: &str = "http://test.org/devices/d2";
pub const HEIGHT: &str = "http://test.org/variables/height";
pub const WEIGHT: &str = "http://test.org/variables/weight";
pub const PLANT_1: &str = "http://test.org/plants/p1";
pub const PLANT_2: &str = "http://test.org/plants/p2";

pub type Store = InMemoryDocumentStore;

pub struct Platform {
    pub provenances: Arc<ProvenanceDao<Store>>,
    pub data: DataDao<Store>,
    pub files: DataFileDao<Store>,
}

pub fn uri(value: &str) -> Uri {
    Uri::parse(value).unwrap()
}

pub fn day(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, day, 12, 0, 0).unwrap()
}

pub fn platform(policy: ExperimentAccessPolicy) -> Platform {
    let store = InMemoryDocumentStore::new();
    let config = Arc::new(DaoConfig {
        generation_prefix: "http://test.org/id".into(),
        namespaces: Namespaces::new().with("test", "http://test.org/"),
        experiment_access: policy,
        ..DaoConfig::default()
    });
    let access = Arc::new(
        InMemoryExperimentAccess::new().grant(&uri(ALICE), [uri(E1), uri(E2)]),
    );
    let provenances = Arc::new(ProvenanceDao::new(store.clone(), config.clone()).unwrap());

    let data = DataDao::new(
        store.clone(),
        config.clone(),
        access.clone(),
        provenances.clone(),
    )
    .unwrap();
    let files = DataFileDao::new(store, config, access, provenances.clone()).unwrap();

    Platform {
        provenances,
        data,
        files,
    }
}

impl Platform {
    pub fn provenance(&self, name: &str, agents: &[&str]) -> Uri {
        let mut model = ProvenanceModel::new(name);
        for agent in agents {
            model = model.with_agent(ProvEntity::new(uri(agent)));
        }
        self.provenances.create(&mut model).unwrap()
    }

    pub fn record(&self, model: DataModel) -> Uri {
        let mut model = model;
        self.data.create(&mut model).unwrap()
    }
}

/// Data point of `HEIGHT` on `PLANT_1` identified by its value.
pub fn point(value: i64, date: DateTime<Utc>, provenance: DataProvenanceModel) -> DataModel {
    DataModel::new(date, uri(HEIGHT), provenance, value).target(uri(PLANT_1))
}

pub fn in_experiment(provenance: &Uri, experiment: &str) -> DataProvenanceModel {
    DataProvenanceModel::new(provenance.clone()).experiment(uri(experiment))
}

pub fn data_filter(criteria: DataCriteria) -> DataSearchFilter {
    DataSearchFilter::new(criteria)
}

pub fn search_as(account: Account) -> DataSearchFilter {
    data_filter(DataCriteria::for_account(account))
}

pub fn admin() -> Account {
    Account::admin(uri("http://test.org/users/admin"))
}

pub fn values(items: &[DataModel]) -> Vec<i64> {
    items.iter().filter_map(|d| d.value.as_i64()).collect()
}
