//! Native, typed and named queries against the recording driver.

use entipa_core::graph::NodeBean;
use entipa_core::PersistenceError;
use entipa_driver::{DriverEvent, Select, Value};
use entipa_testkit::prelude::*;
use proptest::prelude::*;

fn folders(n: i64) -> Vec<Folder> {
    (1..=n).map(|id| Folder::new(id, format!("folder {id}"))).collect()
}

fn queried_params(unit: &TestUnit) -> Vec<Vec<Value>> {
    unit.source
        .events()
        .into_iter()
        .filter_map(|e| match e {
            DriverEvent::Queried { params, .. } => Some(params),
            _ => None,
        })
        .collect()
}

#[test]
fn native_query_closes_after_result_list() {
    let unit = TestUnit::new("classyfy");
    unit.stock_folders(&folders(2));
    let mut em = unit.entity_manager();

    let mut query = em.create_native_query("SELECT * FROM folders").unwrap();
    assert!(!query.is_closed());
    assert_eq!(query.get_result_list().unwrap().len(), 2);
    assert!(query.is_closed());

    assert!(query.get_result_list().unwrap().is_empty());
    assert!(matches!(
        query.get_single_result(),
        Err(PersistenceError::NoResult { cause: None, .. })
    ));
    drop(query);

    assert_eq!(unit.source.queried_sql(), vec!["SELECT * FROM folders"]);
}

#[test]
fn native_query_closes_after_single_result() {
    let unit = TestUnit::new("classyfy");
    unit.stock_folders(&folders(3));
    let mut em = unit.entity_manager();

    let mut query = em.create_native_query("SELECT * FROM folders").unwrap();
    let row = query.get_single_result().unwrap();
    assert_eq!(row.get_by_name("id"), Some(&Value::Integer(1)));

    assert!(query.get_result_list().unwrap().is_empty());
    assert!(query.get_single_result().is_err());
    drop(query);

    assert_eq!(unit.source.queried_sql().len(), 1);
}

#[test]
fn native_query_closes_after_update() {
    let unit = TestUnit::new("classyfy");
    unit.source.set_update_count("DELETE FROM folders", 3);
    let mut em = unit.entity_manager();

    let mut query = em
        .create_native_query("DELETE FROM folders WHERE parent_id = ?")
        .unwrap();
    query.set_parameter_at(1, 7i64).unwrap();
    assert_eq!(query.execute_update().unwrap(), 3);

    assert!(query.get_result_list().unwrap().is_empty());
    assert!(matches!(
        query.get_single_result(),
        Err(PersistenceError::NoResult { .. })
    ));
    assert!(matches!(
        query.execute_update(),
        Err(PersistenceError::InvalidOperation { .. })
    ));
    drop(query);

    assert_eq!(
        unit.source.executed_sql(),
        vec!["DELETE FROM folders WHERE parent_id = ?"]
    );
    assert!(unit.source.queried_sql().is_empty());
}

#[test]
fn invalid_positions_fail_before_execution() {
    let unit = TestUnit::new("classyfy");
    let mut em = unit.entity_manager();

    let mut query = em
        .create_native_query("SELECT * FROM folders WHERE id = ?")
        .unwrap();
    for position in [0, 2, 10] {
        match query.set_parameter_at(position, 1i64) {
            Err(PersistenceError::InvalidParameter { parameter, .. }) => {
                assert_eq!(parameter, position.to_string());
            }
            other => panic!("expected InvalidParameter, got {other:?}"),
        }
    }
    assert!(matches!(
        query.set_parameter("title", "inbox"),
        Err(PersistenceError::InvalidParameter { .. })
    ));
    assert!(!query.is_closed());
    drop(query);

    assert!(unit.source.queried_sql().is_empty());
}

#[test]
fn unbound_parameter_is_reported_without_querying() {
    let unit = TestUnit::new("classyfy");
    let mut em = unit.entity_manager();

    let mut query = em
        .create_native_query("SELECT * FROM folders WHERE id = ? AND title = :title")
        .unwrap();
    query.set_parameter_at(1, 1i64).unwrap();
    match query.get_result_list() {
        Err(PersistenceError::InvalidParameter { parameter, .. }) => {
            assert_eq!(parameter, ":title (unbound)");
        }
        other => panic!("expected InvalidParameter, got {other:?}"),
    }
    drop(query);

    assert!(unit.source.queried_sql().is_empty());
}

#[test]
fn named_parameters_bind_every_occurrence() {
    let unit = TestUnit::new("classyfy");
    unit.stock_folders(&folders(1));
    let mut em = unit.entity_manager();

    let mut query = em
        .create_native_query_for::<Folder>(
            "SELECT * FROM folders WHERE id = :id OR parent_id = :id",
        )
        .unwrap();
    query.set_parameter("id", 1i64).unwrap();
    assert_eq!(query.get_result_list().unwrap(), folders(1));
    drop(query);

    assert_eq!(
        unit.source.queried_sql(),
        vec!["SELECT * FROM folders WHERE id = ? OR parent_id = ?"]
    );
    assert_eq!(
        queried_params(&unit),
        vec![vec![Value::Integer(1), Value::Integer(1)]]
    );
}

#[test]
fn native_query_window() {
    let unit = TestUnit::new("classyfy");
    unit.stock_folders(&folders(5));
    let mut em = unit.entity_manager();

    let mut query = em.create_native_query_for::<Folder>("SELECT * FROM folders").unwrap();
    query.set_first_result(1).set_max_results(2);
    let ids: Vec<i64> = query
        .get_result_list()
        .unwrap()
        .into_iter()
        .map(|f| f.id)
        .collect();
    assert_eq!(ids, vec![2, 3]);
    drop(query);

    assert_eq!(
        unit.source.queried_sql(),
        vec!["SELECT * FROM folders LIMIT 2 OFFSET 1"]
    );
}

#[test]
fn failed_single_result_carries_the_cause() {
    init_test_logging();
    let unit = TestUnit::new("classyfy");
    unit.source.fail_on("SELECT * FROM folders");
    let mut em = unit.entity_manager();

    let mut query = em.create_native_query("SELECT * FROM folders").unwrap();
    match query.get_single_result() {
        Err(PersistenceError::NoResult { cause: Some(cause), .. }) => {
            assert!(matches!(*cause, PersistenceError::Query { .. }));
        }
        other => panic!("expected NoResult with a cause, got {other:?}"),
    }
    assert!(query.is_closed());
}

#[test]
fn query_for_all_returns_every_row() {
    let unit = TestUnit::new("classyfy");
    unit.stock_folders(&folders(3));
    unit.admin.registry().add_query_for_all::<Folder>("all_folders");
    let mut em = unit.entity_manager();

    let all = em
        .create_named_query::<Folder>("all_folders")
        .unwrap()
        .get_all()
        .unwrap();
    assert_eq!(all, folders(3));
    assert_eq!(unit.source.queried_sql(), vec!["SELECT * FROM folders"]);
}

#[test]
fn named_query_placeholders() {
    let unit = TestUnit::new("classyfy");
    unit.stock_folders(&folders(2));
    unit.admin.registry().add::<Folder, _>("children", || {
        Select::new("folders").where_named("parent_id", "parent")
    });
    let mut em = unit.entity_manager();

    let mut query = em.create_named_query::<Folder>("children").unwrap();
    assert!(matches!(
        query.get_all(),
        Err(PersistenceError::InvalidParameter { .. })
    ));
    assert!(matches!(
        query.set_parameter("missing", 1i64),
        Err(PersistenceError::InvalidParameter { .. })
    ));
    query.set_parameter("parent", 1i64).unwrap();
    assert_eq!(query.get_all().unwrap().len(), 2);
    drop(query);

    assert_eq!(
        unit.source.queried_sql(),
        vec!["SELECT * FROM folders WHERE parent_id = ?"]
    );
    assert_eq!(queried_params(&unit), vec![vec![Value::Integer(1)]]);
}

#[test]
fn unknown_and_mismatched_named_queries() {
    let unit = TestUnit::new("classyfy");
    unit.admin.registry().add_query_for_all::<Folder>("all_folders");
    let mut em = unit.entity_manager();

    match em.create_named_query::<Folder>("missing") {
        Err(e @ PersistenceError::QueryNotFound { .. }) => assert!(e.is_configuration()),
        other => panic!("expected QueryNotFound, got {other:?}"),
    }
    match em.create_named_query::<NodeBean>("all_folders") {
        Err(PersistenceError::EntityTypeMismatch { actual, requested, .. }) => {
            assert_eq!(actual, "folders");
            assert_eq!(requested, "nodes");
        }
        other => panic!("expected EntityTypeMismatch, got {other:?}"),
    }
    assert!(unit.source.queried_sql().is_empty());
}

#[test]
fn driver_failure_names_the_query() {
    let unit = TestUnit::new("classyfy");
    unit.source.fail_on("SELECT * FROM folders");
    unit.admin.registry().add_query_for_all::<Folder>("all_folders");
    let mut em = unit.entity_manager();

    match em.create_named_query::<Folder>("all_folders").unwrap().get_all() {
        Err(PersistenceError::Query { query, .. }) => assert_eq!(query, "all_folders"),
        other => panic!("expected Query error, got {other:?}"),
    }
}

#[test]
fn queries_in_a_transaction_share_its_connection() {
    let unit = TestUnit::new("classyfy");
    unit.stock_folders(&folders(2));
    unit.admin.registry().add_query_for_all::<Folder>("all_folders");
    let mut em = unit.entity_manager();

    em.transaction().begin().unwrap();
    for _ in 0..3 {
        let all = em
            .create_named_query::<Folder>("all_folders")
            .unwrap()
            .get_all()
            .unwrap();
        assert_eq!(all.len(), 2);
    }
    assert_eq!(unit.source.open_connections(), 1);
    em.transaction().commit().unwrap();

    let opened = unit
        .source
        .events()
        .into_iter()
        .filter(|e| matches!(e, DriverEvent::Opened { .. }))
        .count();
    assert_eq!(opened, 1);
    assert_eq!(unit.source.open_connections(), 0);
}

proptest! {
    #[test]
    fn each_window_is_a_fresh_statement(
        n in 0i64..20,
        windows in prop::collection::vec((0u64..25, 1u64..10), 1..5),
    ) {
        let unit = TestUnit::new("classyfy");
        let all = folders(n);
        unit.stock_folders(&all);
        unit.admin.registry().add_query_for_all::<Folder>("all_folders");
        let mut em = unit.entity_manager();

        let mut query = em.create_named_query::<Folder>("all_folders").unwrap();
        for (start, max) in &windows {
            let page = query.get_result_list(Some(*start), Some(*max)).unwrap();
            let expected: Vec<Folder> = all
                .iter()
                .skip(*start as usize)
                .take(*max as usize)
                .cloned()
                .collect();
            prop_assert_eq!(page, expected);
        }
        drop(query);

        prop_assert_eq!(unit.source.queried_sql().len(), windows.len());
    }
}
