//! Partial node trees rebuilt from flat records.

use entipa_core::graph::{NodeBean, NodeGraph, NodeId, ROOT_MODEL};
use entipa_core::PersistenceError;
use entipa_driver::{Row, Value};
use entipa_testkit::prelude::*;
use proptest::prelude::*;

fn names(graph: &NodeGraph, ids: &[NodeId]) -> Vec<String> {
    ids.iter()
        .map(|id| graph.node(*id).unwrap().name().to_string())
        .collect()
}

fn node_row(bean: &NodeBean) -> Row {
    Row::from_pairs([
        ("id", Value::Integer(bean.id)),
        ("name", Value::from(bean.name.as_str())),
        ("parent_id", Value::from(bean.parent_id)),
        ("model", Value::from(bean.model.as_str())),
    ])
}

#[test]
fn three_level_path_to_the_root() {
    let mut source = classyfy_tree();
    let record = source[&3].clone();
    let mut graph = NodeGraph::new();

    let cats = graph.marshall(&mut source, record).unwrap();
    let animals = graph.parent(cats).unwrap();
    let root = graph.parent(animals).unwrap();

    assert_eq!(graph.node(animals).unwrap().name(), "animals");
    assert_eq!(graph.node(root).unwrap().model(), ROOT_MODEL);
    assert!(graph.node(root).unwrap().is_root());
    assert_eq!(graph.root_of(cats), Some(root));

    assert_eq!(names(&graph, &graph.children(root)), vec!["animals"]);
    assert_eq!(names(&graph, &graph.children(animals)), vec!["cats"]);
    assert_eq!(graph.all_children(root).len(), 2);
    assert_eq!(graph.all_children(animals).len(), 2);

    let dogs = graph.find(4).unwrap();
    assert!(graph.node(dogs).unwrap().is_placeholder());
    assert!(!graph.node(dogs).unwrap().is_fragment());
    assert!(graph.node(cats).unwrap().is_fragment());
}

#[test]
fn added_tree_is_not_duplicated_by_marshalling() {
    let mut source = classyfy_tree();
    let mut graph = NodeGraph::new();
    for id in 1..=5 {
        graph.add(source[&id].clone());
    }
    assert_eq!(graph.len(), 5);
    assert!((1..=5).all(|id| !graph.node(graph.find(id).unwrap()).unwrap().is_placeholder()));

    let record = source[&3].clone();
    let cats = graph.marshall(&mut source, record).unwrap();

    assert_eq!(graph.len(), 5);
    assert_eq!(graph.find(3), Some(cats));
    let root = graph.root_of(cats).unwrap();
    assert_eq!(graph.node(root).unwrap().id(), 1);
    assert_eq!(names(&graph, graph.all_children(root)), vec!["animals", "plants"]);
    assert_eq!(names(&graph, &graph.children(root)), vec!["animals"]);
}

#[test]
fn child_added_first_is_relinked_under_its_parent() {
    let source = classyfy_tree();
    let mut graph = NodeGraph::new();

    let dogs = graph.add(source[&4].clone());
    assert!(graph.node(dogs).unwrap().is_root());

    let animals = graph.add(source[&2].clone());
    assert_eq!(graph.parent(dogs), Some(animals));
    assert_eq!(graph.all_children(animals).len(), 2);
    assert_eq!(
        graph
            .all_children(animals)
            .iter()
            .filter(|c| **c == dogs)
            .count(),
        1
    );
}

#[test]
fn missing_ancestor_is_a_mapping_error() {
    let mut source = classyfy_tree();
    source.remove(&1);
    let record = source[&3].clone();

    match NodeGraph::new().marshall(&mut source, record) {
        Err(PersistenceError::EntityMapping { message, .. }) => {
            assert_eq!(message, "parent 1 of node 2 not found");
        }
        other => panic!("expected EntityMapping, got {other:?}"),
    }
}

#[test]
fn record_without_parent_link_becomes_a_root() {
    init_test_logging();
    let mut source = classyfy_tree();
    let loose = NodeBean::new(9, "loose", None, "folder");
    let mut graph = NodeGraph::new();

    let node = graph.marshall(&mut source, loose).unwrap();
    assert!(graph.node(node).unwrap().is_root());
    assert_eq!(graph.len(), 1);
}

#[test]
fn entity_manager_reads_ancestors() {
    let unit = TestUnit::new("classyfy");
    let tree = classyfy_tree();
    unit.source
        .respond("SELECT * FROM nodes WHERE id = ?", vec![node_row(&tree[&1])]);
    unit.source.respond(
        "SELECT * FROM nodes WHERE parent_id = ?",
        vec![node_row(&tree[&2]), node_row(&tree[&5])],
    );
    let mut em = unit.entity_manager();
    let mut graph = NodeGraph::new();

    let animals = graph.marshall(&mut em, tree[&2].clone()).unwrap();
    let root = graph.parent(animals).unwrap();

    assert_eq!(graph.node(root).unwrap().model(), ROOT_MODEL);
    assert_eq!(names(&graph, graph.all_children(root)), vec!["animals", "plants"]);
    assert_eq!(names(&graph, &graph.children(root)), vec!["animals"]);
    assert_eq!(graph.all_children(animals).len(), 2);
    assert_eq!(graph.len(), 5);
    assert_eq!(
        unit.source.queried_sql(),
        vec![
            "SELECT * FROM nodes WHERE id = ? LIMIT 1",
            "SELECT * FROM nodes WHERE parent_id = ?",
        ]
    );
    assert_eq!(unit.source.open_connections(), 0);
}

proptest! {
    #[test]
    fn marshalled_path_presents_one_child_per_level((records, leaf) in node_path_strategy(6)) {
        let mut source = records.clone();
        let mut graph = NodeGraph::new();
        let node = graph.marshall(&mut source, records[&leaf].clone()).unwrap();

        prop_assert_eq!(graph.len(), records.len());

        let mut path = vec![node];
        let mut current = node;
        while let Some(parent) = graph.parent(current).filter(|p| *p != current) {
            path.push(parent);
            current = parent;
        }
        prop_assert_eq!(path.len() as i64, leaf);
        prop_assert_eq!(graph.node(current).unwrap().model(), ROOT_MODEL);
        prop_assert_eq!(graph.root_of(node), Some(current));

        for pair in path.windows(2) {
            let (child, parent) = (pair[0], pair[1]);
            prop_assert_eq!(graph.children(parent), vec![child]);
            prop_assert!(graph.node(parent).unwrap().is_fragment());
        }

        let placeholders = records
            .keys()
            .filter(|id| graph.node(graph.find(**id).unwrap()).unwrap().is_placeholder())
            .count();
        prop_assert_eq!(placeholders as i64, records.len() as i64 - leaf);
    }
}
