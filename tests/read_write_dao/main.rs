//! Integration tests for the generic DAO over the in-memory store.

mod fixtures;

use std::collections::HashSet;

use fixtures::{config, dao, dao_with, seeded, uri, CapturedLogs, Germplasm};
use nosql_dao::query::{Filter, Sort};
use nosql_dao::store::CountOptions;
use nosql_dao::transaction::run_in_transaction;
use nosql_dao::{
    DaoError, DaoOptions, DocumentStore, ListWithPagination, ReadDao, ReadWriteDao, SearchFilter,
    SearchQuery, WriteDao,
};
use proptest::prelude::*;

#[test]
fn created_model_reads_back_equal() {
    let dao = dao();
    let mut model = Germplasm::new("B73", "zea mays", 1972);
    let uri = dao.create(&mut model).unwrap();

    assert_eq!(uri.as_str(), "http://test.org/id/germplasm/b73");
    assert_eq!(dao.get(&uri).unwrap(), model);
    assert!(dao.exists(&uri).unwrap());
}

#[test]
fn compact_and_expanded_uris_are_the_same_identity() {
    let dao = dao();
    let uri = dao.create(&mut Germplasm::new("B73", "zea mays", 1972)).unwrap();

    let compact = fixtures::uri("test:germplasm/b73");
    assert_eq!(dao.get(&compact).unwrap().uri, Some(uri));
}

#[test]
fn compact_references_are_stored_expanded() {
    let dao = dao();
    let mut b73 = Germplasm::new("B73", "zea mays", 1972).accession();
    let b73_uri = dao.create(&mut b73).unwrap();
    let mut hybrids = vec![
        Germplasm::new("B73xMo17", "zea mays", 1980)
            .accession()
            .parents(&["test:germplasm/b73", "test:germplasm/mo17"]),
    ];
    let hybrid_uri = dao.create_many(&mut hybrids).unwrap().remove(0);

    let accession = uri("http://test.org/id/Accession");
    let by_type = |rdf_type: &str| {
        dao.count(&SearchFilter::builder().rdf_types([uri(rdf_type)]).build())
            .unwrap()
    };
    assert_eq!(by_type("test:Accession"), 2);
    assert_eq!(by_type("http://test.org/id/Accession"), 2);
    assert_eq!(dao.get(&b73_uri).unwrap().rdf_type, Some(accession.clone()));

    let stored = dao.get(&hybrid_uri).unwrap();
    assert_eq!(
        stored.parents,
        vec![
            uri("http://test.org/id/germplasm/b73"),
            uri("http://test.org/id/germplasm/mo17"),
        ]
    );

    let mut renamed = stored.parents(&["test:germplasm/b73", "test:germplasm/w22"]);
    dao.update(&renamed).unwrap();
    assert_eq!(
        dao.get(&hybrid_uri).unwrap().parents[1],
        uri("http://test.org/id/germplasm/w22")
    );

    renamed.uri = Some(uri("test:germplasm/w22"));
    renamed.rdf_type = Some(uri("test:Line"));
    assert!(dao.upsert(&renamed).unwrap());
    let upserted = dao.get(&uri("http://test.org/id/germplasm/w22")).unwrap();
    assert_eq!(upserted.rdf_type, Some(uri("http://test.org/id/Line")));
    assert_eq!(upserted.parents[0], uri("http://test.org/id/germplasm/b73"));
}

#[test]
fn updating_twice_with_the_same_values_is_idempotent() {
    let dao = dao();
    let mut model = Germplasm::new("Mo17", "zea mays", 1964);
    let uri = dao.create(&mut model).unwrap();

    model.year = 1965;
    dao.update(&model).unwrap();
    let once = dao.get(&uri).unwrap();
    dao.update(&model).unwrap();
    let twice = dao.get(&uri).unwrap();

    assert_eq!(once, twice);
    assert_eq!(twice.year, 1965);
    assert_eq!(dao.count(&SearchFilter::all()).unwrap(), 1);
}

#[test]
fn colliding_uris_get_a_retry_suffix() {
    let dao = dao_with(DaoOptions::default().check_uri_existence(true));
    let first = dao.create(&mut Germplasm::new("Renan", "triticum aestivum", 1989)).unwrap();
    let second = dao.create(&mut Germplasm::new("Renan", "triticum aestivum", 1990)).unwrap();
    let third = dao.create(&mut Germplasm::new("renan", "triticum aestivum", 1991)).unwrap();

    assert_eq!(first.as_str(), "http://test.org/id/germplasm/renan");
    assert_eq!(second.as_str(), "http://test.org/id/germplasm/renan-1");
    assert_eq!(third.as_str(), "http://test.org/id/germplasm/renan-2");
}

#[test]
fn empty_filter_matches_everything() {
    let dao = seeded();
    assert_eq!(dao.count(&SearchFilter::all()).unwrap(), 5);
    let page = dao.search(&SearchFilter::all()).unwrap();
    assert_eq!(page.len(), 5);
    assert_eq!(page.total(), Some(5));
}

#[test]
fn single_criterion_applies_unwrapped() {
    let dao = seeded();
    let filter = SearchFilter::builder().equals("species", "zea mays").build();
    assert_eq!(dao.compile(&filter).unwrap(), Filter::eq("species", "zea mays"));

    let names: HashSet<String> = dao
        .search(&filter)
        .unwrap()
        .into_items()
        .into_iter()
        .map(|g| g.name)
        .collect();
    assert_eq!(names, HashSet::from(["B73".to_string(), "Mo17".to_string()]));
}

#[test]
fn logical_or_combines_criteria() {
    let dao = seeded();
    let and = SearchFilter::builder()
        .equals("species", "zea mays")
        .range("year", Some(1970), None::<i64>)
        .build();
    assert_eq!(dao.count(&and).unwrap(), 1);

    let or = and.to_builder().logical_and(false).build();
    // Both maize lines, plus Renan (1989).
    assert_eq!(dao.count(&or).unwrap(), 3);
}

#[test]
fn regex_criteria_match_on_arrays() {
    let dao = seeded();
    let filter = SearchFilter::builder().iregex("synonyms", "^REN").build();
    let page = dao.search(&filter).unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page.items()[0].name, "Renan");
}

#[test]
fn pages_follow_the_requested_order() {
    let dao = seeded();
    let filter = SearchFilter::builder()
        .page_size(2)
        .sort(Sort::new().asc("year"))
        .build();

    let first = dao.search(&filter).unwrap();
    let years: Vec<i64> = first.items().iter().map(|g| g.year).collect();
    assert_eq!(years, [1920, 1963]);
    assert_eq!(first.total(), Some(5));
    assert_eq!(first.page_count(), Some(3));
    assert!(first.has_next_page());

    let last = dao.search(&filter.with_page(2)).unwrap();
    let years: Vec<i64> = last.items().iter().map(|g| g.year).collect();
    assert_eq!(years, [1989]);
    assert!(!last.has_next_page());

    let beyond = dao.search(&filter.with_page(3)).unwrap();
    assert!(beyond.is_empty());
}

#[test]
fn search_converts_each_record() {
    let dao = seeded();
    let filter = SearchFilter::builder().sort(Sort::new().desc("year")).build();
    let names = dao
        .search_with(SearchQuery::new(&filter, |g: Germplasm| g.name.to_uppercase()))
        .unwrap();
    assert_eq!(names.items()[0], "RENAN");
}

#[test]
fn total_is_capped_by_the_count_limit() {
    let dao = seeded();
    let filter = SearchFilter::builder().page_size(1).build();
    let page = dao
        .search_with(
            SearchQuery::new(&filter, |g: Germplasm| g)
                .count_options(CountOptions::default().limit(3)),
        )
        .unwrap();
    assert_eq!(page.total(), Some(3));
    assert!(page.is_total_capped());
}

#[test]
fn streams_carry_pagination_and_convert_lazily() {
    let dao = seeded();
    let filter = SearchFilter::builder()
        .page_size(2)
        .page(1)
        .sort(Sort::new().asc("name"))
        .build();
    let stream = dao
        .search_as_stream_with(SearchQuery::new(&filter, |g: Germplasm| g.name))
        .unwrap();
    assert_eq!((stream.page(), stream.page_size(), stream.total()), (1, 2, 5));

    let names: Vec<String> = stream.into_iter().map(Result::unwrap).collect();
    assert_eq!(names, ["Mo17", "Nipponbare"]);
}

#[test]
fn distinct_values_and_uris() {
    let dao = seeded();
    let mut species: Vec<String> = dao.distinct(None, "species", &SearchFilter::all()).unwrap();
    species.sort();
    assert_eq!(species, ["oryza sativa", "triticum aestivum", "zea mays"]);

    let wheat = SearchFilter::builder().equals("species", "triticum aestivum").build();
    let uris = dao.distinct_uris(&wheat).unwrap();
    assert_eq!(
        uris,
        HashSet::from([
            uri("http://test.org/id/germplasm/chinese_spring"),
            uri("http://test.org/id/germplasm/renan"),
        ])
    );
}

#[test]
fn distinct_pages_are_ordered_and_report_next_page() {
    let dao = seeded();
    let filter = SearchFilter::builder()
        .page_size(2)
        .sort(Sort::new().desc("species"))
        .build();

    let first: ListWithPagination<String> =
        dao.distinct_with_pagination(None, "species", &filter).unwrap();
    assert_eq!(first.items(), ["zea mays".to_string(), "triticum aestivum".to_string()]);
    assert!(first.has_next_page());

    let second: ListWithPagination<String> = dao
        .distinct_with_pagination(None, "species", &filter.with_page(1))
        .unwrap();
    assert_eq!(second.items(), ["oryza sativa".to_string()]);
    assert!(!second.has_next_page());
}

#[test]
fn find_by_uris_keeps_the_first_size_uris() {
    let dao = seeded();
    let uris = [
        uri("test:germplasm/b73"),
        uri("test:germplasm/missing"),
        uri("test:germplasm/renan"),
    ];
    let found = dao.find_by_uris(&uris, 2).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].name, "B73");

    assert!(matches!(dao.find_by_uris(&uris, 0), Err(DaoError::InvalidArgument(_))));
}

#[test]
fn deleting_with_an_empty_filter_is_rejected() {
    let dao = seeded();
    let err = dao.delete_many(None, &SearchFilter::all()).unwrap_err();
    assert!(matches!(err, DaoError::InvalidArgument(_)));
    assert_eq!(dao.count(&SearchFilter::all()).unwrap(), 5);

    let rice = SearchFilter::builder().equals("species", "oryza sativa").build();
    assert_eq!(dao.delete_many(None, &rice).unwrap(), 1);
    assert_eq!(dao.count(&SearchFilter::all()).unwrap(), 4);
}

#[test]
fn delete_many_uris_removes_only_the_listed_documents() {
    let dao = seeded();
    let deleted = dao
        .delete_many_uris(None, &[uri("test:germplasm/b73"), uri("test:germplasm/mo17")])
        .unwrap();
    assert_eq!(deleted, 2);
    let zea = SearchFilter::builder().equals("species", "zea mays").build();
    assert_eq!(dao.count(&zea).unwrap(), 0);
}

#[test]
fn writes_in_a_session_stay_private_until_commit() {
    let dao = dao();
    let store = dao.store().clone();
    let session = store.start_session().unwrap();
    store.start_transaction(&session).unwrap();

    let uri = dao
        .create_in(Some(&session), &mut Germplasm::new("B73", "zea mays", 1972))
        .unwrap();
    assert!(dao.exists_in(Some(&session), &uri).unwrap());
    assert!(!dao.exists(&uri).unwrap());

    store.commit_transaction(&session).unwrap();
    assert!(dao.exists(&uri).unwrap());
}

#[test]
fn aborted_session_leaves_nothing_behind() {
    let dao = dao();
    let store = dao.store().clone();
    let session = store.start_session().unwrap();
    store.start_transaction(&session).unwrap();

    let mut batch = vec![
        Germplasm::new("B73", "zea mays", 1972),
        Germplasm::new("Mo17", "zea mays", 1964),
    ];
    let uris = dao.create_many_in(Some(&session), &mut batch).unwrap();
    assert_eq!(
        dao.count_with(Some(&session), &SearchFilter::all(), CountOptions::default())
            .unwrap(),
        2
    );

    store.abort_transaction(&session).unwrap();
    assert_eq!(dao.count(&SearchFilter::all()).unwrap(), 0);
    assert!(!dao.exists(&uris[0]).unwrap());
}

#[test]
fn failed_operation_rolls_back_the_whole_transaction() {
    let dao = seeded();
    let result: Result<(), DaoError> = run_in_transaction(dao.store(), 0, |session| {
        dao.delete_in(Some(session), &uri("test:germplasm/b73"))?;
        dao.delete_in(Some(session), &uri("test:germplasm/unknown"))
    });
    assert!(matches!(result, Err(DaoError::InvalidUri { .. })));
    assert!(dao.exists(&uri("test:germplasm/b73")).unwrap());
}

#[test]
fn bulk_duplicate_keys_report_each_failed_document() {
    let dao = seeded();
    let mut batch = vec![
        Germplasm::new("Fresh", "zea mays", 2001),
        Germplasm::new("Renan", "triticum aestivum", 1989),
    ];
    batch[1].uri = Some(uri("test:germplasm/renan"));

    match dao.create_many(&mut batch).unwrap_err() {
        DaoError::DuplicateKey { collection, errors } => {
            assert_eq!(collection, "germplasm");
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].index, 1);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!dao.exists(&uri("test:germplasm/fresh")).unwrap());
}

#[test]
fn secondary_unique_indexes_are_enforced_on_update() {
    let dao = ReadWriteDao::<_, Germplasm>::new(
        nosql_dao::InMemoryDocumentStore::new(),
        config(),
        DaoOptions::default().index(nosql_dao::store::IndexSpec::ascending(&["name", "year"]).unique()),
    )
    .unwrap();
    dao.create(&mut Germplasm::new("B73", "zea mays", 1972)).unwrap();
    let mut other = Germplasm::new("B74", "zea mays", 1972);
    dao.create(&mut other).unwrap();

    other.name = "B73".into();
    assert!(matches!(dao.update(&other), Err(DaoError::DuplicateKey { .. })));
}

#[test]
fn operations_are_logged_with_status_and_duration() {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_ansi(false)
        .finish();

    tracing::subscriber::with_default(subscriber, || {
        let dao = dao();
        dao.create(&mut Germplasm::new("B73", "zea mays", 1972)).unwrap();
        let _ = dao.get(&uri("test:germplasm/none"));
    });

    let output = logs.contents();
    assert!(output.contains("insert_one"));
    assert!(output.contains("START"));
    assert!(output.contains("duration_ms"));
    assert!(output.contains("germplasm"));
    assert!(output.contains("ERROR"));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn pages_partition_the_sorted_collection(count in 0usize..10, page_size in 1u64..5) {
        let dao = dao();
        let mut models: Vec<Germplasm> = (0..count)
            .map(|i| Germplasm::new(&format!("line {i:02}"), "zea mays", 1900 + i as i64))
            .collect();
        if !models.is_empty() {
            dao.create_many(&mut models).unwrap();
        }

        let filter = SearchFilter::builder()
            .page_size(page_size)
            .sort(Sort::new().asc("year"))
            .build();
        let mut seen = Vec::new();
        let mut page = 0;
        loop {
            let result = dao.search(&filter.with_page(page)).unwrap();
            prop_assert_eq!(result.total(), Some(count as u64));
            seen.extend(result.items().iter().map(|g| g.year));
            if !result.has_next_page() {
                break;
            }
            page += 1;
        }
        let expected: Vec<i64> = (0..count).map(|i| 1900 + i as i64).collect();
        prop_assert_eq!(seen, expected);
    }
}
