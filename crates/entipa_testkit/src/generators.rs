//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random test data
//! that maintains required invariants.

use crate::fixtures::Folder;
use entipa_core::graph::NodeBean;
use entipa_driver::MemoryDriverConfig;
use proptest::prelude::*;
use std::collections::HashMap;

/// Strategy for generating folder titles.
pub fn title_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9 ]{0,15}").expect("Invalid regex")
}

/// Strategy for generating folders.
pub fn folder_strategy() -> impl Strategy<Value = Folder> {
    (1i64..10_000, title_strategy()).prop_map(|(id, title)| Folder::new(id, title))
}

/// Strategy for generating folders with distinct ids.
pub fn distinct_folders_strategy(max: usize) -> impl Strategy<Value = Vec<Folder>> {
    prop::collection::btree_map(1i64..10_000, title_strategy(), 1..=max.max(1))
        .prop_map(|folders| folders.into_iter().map(|(id, title)| Folder::new(id, title)).collect())
}

/// Strategy for generating every driver behaviour the engine must handle.
pub fn driver_config_strategy() -> impl Strategy<Value = MemoryDriverConfig> {
    (any::<bool>(), any::<bool>(), any::<bool>()).prop_map(|(pin, nested, auto_commit)| {
        MemoryDriverConfig::new()
            .pin_special(pin)
            .nested_savepoints(nested)
            .initial_auto_commit(auto_commit)
    })
}

/// Strategy for generating SQL statements without `;`.
pub fn statement_strategy() -> impl Strategy<Value = String> {
    (
        prop::sample::select(vec!["CREATE TABLE", "INSERT INTO", "DELETE FROM", "UPDATE"]),
        prop::string::string_regex("[a-z_]{1,12}").expect("Invalid regex"),
    )
        .prop_map(|(verb, table)| format!("{verb} {table}"))
}

/// Strategy for generating script text and the statements it holds.
///
/// Statements are joined with `;`, newlines and random padding.
pub fn script_strategy() -> impl Strategy<Value = (String, Vec<String>)> {
    prop::collection::vec((statement_strategy(), "[ \t\n]{0,3}"), 0..8).prop_map(|parts| {
        let mut text = String::new();
        let mut statements = Vec::new();
        for (statement, padding) in parts {
            text.push_str(&padding);
            text.push_str(&statement);
            text.push_str(";\n");
            statements.push(statement);
        }
        (text, statements)
    })
}

/// Strategy for generating a node path from a root down to a leaf.
///
/// Every node on the path has between zero and three extra children that
/// are never marshalled. Returns the records and the leaf id.
pub fn node_path_strategy(max_depth: usize) -> impl Strategy<Value = (HashMap<i64, NodeBean>, i64)> {
    prop::collection::vec(0usize..=3, 1..=max_depth.max(1)).prop_map(|siblings| {
        let depth = siblings.len() as i64;
        let mut records = HashMap::new();
        let mut sibling_id = 1_000i64;

        for (id, extra) in (1i64..).zip(siblings) {
            let mut bean = if id == 1 {
                NodeBean::root(id, "root")
            } else {
                NodeBean::new(id, format!("node {id}"), Some(id - 1), "folder")
            };
            if id < depth {
                bean.children.push(id + 1);
            }
            for _ in 0..extra {
                sibling_id += 1;
                bean.children.push(sibling_id);
                records.insert(
                    sibling_id,
                    NodeBean::new(sibling_id, format!("sibling {sibling_id}"), Some(id), "folder"),
                );
            }
            records.insert(id, bean);
        }
        (records, depth)
    })
}
