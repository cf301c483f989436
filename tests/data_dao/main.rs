//! Integration tests for data and data file DAOs: experiment visibility,
//! agent resolution through global provenances, and the data-specific reads.

mod fixtures;

use std::collections::HashSet;

use fixtures::*;
use nosql_dao::data::{DataCriteria, DataFileModel, DataFileSearchFilter, DataModel, DataProvenanceModel};
use nosql_dao::provenance::ProvEntity;
use nosql_dao::query::Sort;
use nosql_dao::{
    Account, DaoError, ExperimentAccessPolicy, NoAuthorizedExperiments, ReadDao, SearchFilter,
    UnauthorizedExperiments, WriteDao,
};

#[test]
fn device_matches_data_through_its_global_provenance() {
    let platform = platform(ExperimentAccessPolicy::default());
    let station = platform.provenance("station", &[D1]);
    let manual = platform.provenance("manual", &[D2]);
    let unknown = uri("http://test.org/id/provenance/unknown");

    // Inherits D1 from the station provenance.
    platform.record(point(1, day(1), DataProvenanceModel::new(station.clone())));
    platform.record(point(
        2,
        day(2),
        DataProvenanceModel::new(manual).agent(ProvEntity::new(uri(D2))),
    ));
    // Names D1 itself.
    platform.record(point(
        3,
        day(3),
        DataProvenanceModel::new(unknown).agent(ProvEntity::new(uri(D1))),
    ));
    // Own agents override the global provenance.
    platform.record(point(
        4,
        day(4),
        DataProvenanceModel::new(station).agent(ProvEntity::new(uri(D2))),
    ));

    let filter = data_filter(DataCriteria::for_account(admin()).devices([uri(D1)]));
    let found = platform.data.search(&filter).unwrap();

    assert_eq!(values(found.items()), [3, 1]);
    assert_eq!(found.total(), Some(2));
}

#[test]
fn device_without_global_provenance_matches_only_direct_agents() {
    let platform = platform(ExperimentAccessPolicy::default());
    let station = platform.provenance("station", &[D2]);
    platform.record(point(1, day(1), DataProvenanceModel::new(station.clone())));
    platform.record(point(
        2,
        day(2),
        DataProvenanceModel::new(station).agent(ProvEntity::new(uri(D1))),
    ));

    let filter = data_filter(DataCriteria::for_account(admin()).devices([uri("test:devices/d1")]));
    assert_eq!(values(platform.data.search(&filter).unwrap().items()), [2]);
}

#[test]
fn unauthorized_experiments_deny_the_search() {
    let platform = platform(ExperimentAccessPolicy::default());
    let station = platform.provenance("station", &[]);
    platform.record(point(1, day(1), in_experiment(&station, E2)));

    let filter = data_filter(
        DataCriteria::for_account(Account::user(uri(ALICE))).experiments([uri(E2), uri(E3)]),
    );
    assert!(matches!(
        platform.data.search(&filter),
        Err(DaoError::AccessDenied(_))
    ));
    assert!(matches!(platform.data.count(&filter), Err(DaoError::AccessDenied(_))));
}

#[test]
fn intersect_policy_keeps_the_authorized_experiments() {
    let platform = platform(ExperimentAccessPolicy {
        unauthorized: UnauthorizedExperiments::Intersect,
        ..ExperimentAccessPolicy::default()
    });
    let station = platform.provenance("station", &[]);
    platform.record(point(1, day(1), in_experiment(&station, E2)));
    platform.record(point(2, day(2), in_experiment(&station, E3)));
    platform.record(point(3, day(3), DataProvenanceModel::new(station.clone())));

    let filter = data_filter(
        DataCriteria::for_account(Account::user(uri(ALICE))).experiments([uri(E2), uri(E3)]),
    );
    assert_eq!(values(platform.data.search(&filter).unwrap().items()), [1]);

    let outside = data_filter(
        DataCriteria::for_account(Account::user(uri(ALICE))).experiments([uri(E3)]),
    );
    assert!(matches!(
        platform.data.search(&outside),
        Err(DaoError::AccessDenied(_))
    ));
}

#[test]
fn users_see_their_experiments_and_unassigned_data() {
    let platform = platform(ExperimentAccessPolicy::default());
    let station = platform.provenance("station", &[]);
    platform.record(point(1, day(1), in_experiment(&station, E1)));
    platform.record(point(2, day(2), in_experiment(&station, E3)));
    platform.record(point(3, day(3), DataProvenanceModel::new(station.clone())));

    let alice = platform.data.search(&search_as(Account::user(uri(ALICE)))).unwrap();
    assert_eq!(values(alice.items()), [3, 1]);

    let bob = platform.data.search(&search_as(Account::user(uri(BOB)))).unwrap();
    assert_eq!(values(bob.items()), [3]);

    let admin = platform.data.search(&search_as(admin())).unwrap();
    assert_eq!(values(admin.items()), [3, 2, 1]);
}

#[test]
fn accounts_without_experiments_can_be_left_unrestricted() {
    let platform = platform(ExperimentAccessPolicy {
        no_authorized: NoAuthorizedExperiments::Unrestricted,
        ..ExperimentAccessPolicy::default()
    });
    let station = platform.provenance("station", &[]);
    platform.record(point(1, day(1), in_experiment(&station, E3)));
    platform.record(point(2, day(2), DataProvenanceModel::new(station.clone())));

    let bob = platform.data.count(&search_as(Account::user(uri(BOB)))).unwrap();
    assert_eq!(bob, 2);
}

#[test]
fn searching_without_an_account_is_rejected() {
    let platform = platform(ExperimentAccessPolicy::default());
    let filter = data_filter(DataCriteria::default());
    assert!(matches!(
        platform.data.search(&filter),
        Err(DaoError::InvalidArgument(_))
    ));
}

#[test]
fn criteria_combine_dates_confidence_and_metadata() {
    let platform = platform(ExperimentAccessPolicy::default());
    let station = platform.provenance("station", &[]);
    let provenance = || DataProvenanceModel::new(station.clone());
    platform.record(point(1, day(1), provenance()).confidence(0.9));
    platform.record(point(2, day(2), provenance()).confidence(0.4).metadata("rep", 1));
    platform.record(point(3, day(3), provenance()).confidence(0.8).metadata("rep", 2));
    platform.record(point(4, day(4), provenance()).confidence(0.95).metadata("rep", 2));

    let in_range = data_filter(DataCriteria::for_account(admin()).between(Some(day(2)), Some(day(3))));
    assert_eq!(values(platform.data.search(&in_range).unwrap().items()), [3, 2]);

    let confident = data_filter(DataCriteria::for_account(admin()).confidence(Some(0.85), None));
    assert_eq!(values(platform.data.search(&confident).unwrap().items()), [4, 1]);

    let replicate = data_filter(DataCriteria::for_account(admin()).metadata("rep", 2));
    assert_eq!(platform.data.count(&replicate).unwrap(), 2);
}

#[test]
fn variables_narrow_and_search_sorts_override_the_default_order() {
    let platform = platform(ExperimentAccessPolicy::default());
    let station = platform.provenance("station", &[]);
    platform.record(point(1, day(1), DataProvenanceModel::new(station.clone())));
    platform.record(
        DataModel::new(day(2), uri(WEIGHT), DataProvenanceModel::new(station.clone()), 2)
            .target(uri(PLANT_2)),
    );
    platform.record(point(3, day(3), DataProvenanceModel::new(station.clone())));

    let heights = search_as(admin())
        .variables([uri("test:variables/height")])
        .with_search(SearchFilter::builder().sort(Sort::new().asc("date")).build());
    assert_eq!(values(platform.data.search(&heights).unwrap().items()), [1, 3]);

    let mut variables = platform.data.used_variables(&search_as(admin())).unwrap();
    variables.sort();
    assert_eq!(variables, [uri(HEIGHT), uri(WEIGHT)]);

    let targets: HashSet<_> = platform
        .data
        .used_targets(&search_as(admin()))
        .unwrap()
        .into_iter()
        .collect();
    assert_eq!(targets, HashSet::from([uri(PLANT_1), uri(PLANT_2)]));
}

#[test]
fn used_provenances_joins_the_referenced_global_provenances() {
    let platform = platform(ExperimentAccessPolicy::default());
    let station = platform.provenance("station", &[D1]);
    let manual = platform.provenance("manual", &[]);
    platform.provenance("unused", &[]);
    let missing = uri("http://test.org/id/provenance/missing");

    platform.record(point(1, day(1), DataProvenanceModel::new(station.clone())));
    platform.record(point(2, day(2), DataProvenanceModel::new(station)));
    platform.record(point(3, day(3), in_experiment(&manual, E3)));
    platform.record(point(4, day(4), DataProvenanceModel::new(missing)));

    let mut names: Vec<String> = platform
        .data
        .used_provenances(&search_as(admin()))
        .unwrap()
        .into_iter()
        .map(|p| p.name)
        .collect();
    names.sort();
    assert_eq!(names, ["manual", "station"]);

    // E3 is hidden from alice, and so is its provenance.
    let visible: Vec<String> = platform
        .data
        .used_provenances(&search_as(Account::user(uri(ALICE))))
        .unwrap()
        .into_iter()
        .map(|p| p.name)
        .collect();
    assert_eq!(visible, ["station"]);
}

#[test]
fn compact_references_in_data_points_are_stored_expanded() {
    let platform = platform(ExperimentAccessPolicy::default());
    let station = platform.provenance("station", &["test:devices/d9"]);
    let d9 = uri("http://test.org/devices/d9");

    // Inherits d9 from the station provenance.
    let compact = DataModel::new(
        day(1),
        uri("test:variables/height"),
        DataProvenanceModel::new(uri("test:id/provenance/station"))
            .experiment(uri("test:experiments/e1")),
        7,
    )
    .target(uri("test:plants/p1"));
    let created = platform.record(compact);
    platform.record(point(
        8,
        day(2),
        DataProvenanceModel::new(station.clone())
            .agent(ProvEntity::new(uri("test:devices/d9")))
            .experiment(uri("test:experiments/e3")),
    ));

    let stored = platform.data.get(&created).unwrap();
    assert_eq!(stored.provenance.uri, station);
    assert_eq!(stored.provenance.experiments, [uri(E1)]);
    assert_eq!(stored.target, Some(uri(PLANT_1)));

    let alice = || DataCriteria::for_account(Account::user(uri(ALICE)));
    let found = platform.data.search(&data_filter(alice())).unwrap();
    assert_eq!(values(found.items()), [7]);
    let in_e1 = data_filter(alice().experiments([uri(E1)]));
    assert_eq!(values(platform.data.search(&in_e1).unwrap().items()), [7]);

    let by_device = data_filter(DataCriteria::for_account(admin()).devices([d9]));
    assert_eq!(values(platform.data.search(&by_device).unwrap().items()), [8, 7]);

    assert_eq!(platform.data.used_variables(&search_as(admin())).unwrap(), [uri(HEIGHT)]);
    assert_eq!(platform.data.used_targets(&search_as(admin())).unwrap(), [uri(PLANT_1)]);
}

#[test]
fn compact_references_in_data_files_are_stored_expanded() {
    let platform = platform(ExperimentAccessPolicy::default());
    let station = platform.provenance("station", &[]);
    let mut file = DataFileModel::new(
        day(1),
        DataProvenanceModel::new(station).experiment(uri("test:experiments/e1")),
        "plot.png",
    )
    .target(uri("test:plants/p2"));
    let created = platform.files.create(&mut file).unwrap();

    let stored = platform.files.get(&created).unwrap();
    assert_eq!(stored.target, Some(uri(PLANT_2)));
    assert_eq!(stored.provenance.experiments, [uri(E1)]);
}

#[test]
fn last_data_is_the_most_recent_visible_point() {
    let platform = platform(ExperimentAccessPolicy::default());
    let station = platform.provenance("station", &[]);
    assert!(platform.data.last_data(&search_as(admin())).unwrap().is_none());

    platform.record(point(1, day(1), in_experiment(&station, E1)));
    platform.record(point(2, day(5), in_experiment(&station, E1)));
    platform.record(point(3, day(9), in_experiment(&station, E3)));

    let latest = platform.data.last_data(&search_as(admin())).unwrap().unwrap();
    assert_eq!(latest.value.as_i64(), Some(3));

    let alice = platform
        .data
        .last_data(&search_as(Account::user(uri(ALICE))))
        .unwrap()
        .unwrap();
    assert_eq!(alice.value.as_i64(), Some(2));
    assert_eq!(alice.date, day(5));
}

#[test]
fn one_value_per_variable_provenance_target_and_date() {
    let platform = platform(ExperimentAccessPolicy::default());
    let station = platform.provenance("station", &[]);
    platform.record(point(1, day(1), DataProvenanceModel::new(station.clone())));

    let mut twin = point(2, day(1), DataProvenanceModel::new(station));
    assert!(matches!(
        platform.data.create(&mut twin),
        Err(DaoError::DuplicateKey { .. })
    ));
}

#[test]
fn data_uris_are_timestamped_under_the_data_collection() {
    let platform = platform(ExperimentAccessPolicy::default());
    let station = platform.provenance("station", &[]);
    let created = platform.record(point(1, day(1), DataProvenanceModel::new(station)));
    assert!(created
        .as_str()
        .starts_with("http://test.org/id/data/20240501_120000000-"));
    assert_eq!(platform.data.get(&created).unwrap().date, day(1));
}

#[test]
fn files_are_searched_by_case_insensitive_name() {
    let platform = platform(ExperimentAccessPolicy::default());
    let station = platform.provenance("camera", &[D1]);
    for (i, name) in ["plot_12.csv", "PLOT_7.jpg", "leaf.png"].into_iter().enumerate() {
        let mut file = DataFileModel::new(day(i as u32 + 1), DataProvenanceModel::new(station.clone()), name)
            .target(uri(PLANT_1));
        let created = platform.files.create(&mut file).unwrap();
        assert!(created.as_str().starts_with("http://test.org/id/datafile/"));
    }

    let plots = DataFileSearchFilter::new(DataCriteria::for_account(admin())).name("^plot");
    let names: Vec<String> = platform
        .files
        .search(&plots)
        .unwrap()
        .into_items()
        .into_iter()
        .map(|f| f.filename)
        .collect();
    assert_eq!(names, ["PLOT_7.jpg", "plot_12.csv"]);

    let by_camera = DataFileSearchFilter::new(DataCriteria::for_account(admin()).devices([uri(D1)]));
    assert_eq!(platform.files.count(&by_camera).unwrap(), 3);
}

#[test]
fn deleting_data_by_criteria_keeps_the_rest() {
    let platform = platform(ExperimentAccessPolicy::default());
    let station = platform.provenance("station", &[]);
    platform.record(point(1, day(1), in_experiment(&station, E1)));
    platform.record(point(2, day(2), in_experiment(&station, E2)));

    let e1 = data_filter(DataCriteria::for_account(admin()).experiments([uri(E1)]));
    assert_eq!(platform.data.delete_many(None, &e1).unwrap(), 1);
    assert_eq!(values(platform.data.search(&search_as(admin())).unwrap().items()), [2]);
}
