//! In-memory node graphs built from flat records.

use super::bean::{NodeBean, NodeSource};
use crate::entity::Entity;
use crate::error::{PersistenceError, PersistenceResult};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Index of a node inside its [`NodeGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// A node of a [`NodeGraph`].
#[derive(Debug, Clone)]
pub struct Node {
    index: NodeId,
    record: NodeBean,
    parent: NodeId,
    children: Vec<NodeId>,
    fragment: bool,
    placeholder: bool,
}

impl Node {
    /// Returns the record id.
    #[must_use]
    pub fn id(&self) -> i64 {
        self.record.id
    }

    /// Returns the name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.record.name
    }

    /// Returns the model name.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.record.model
    }

    /// Returns the record the node was built from.
    #[must_use]
    pub fn record(&self) -> &NodeBean {
        &self.record
    }

    /// Returns the parent. A root is its own parent.
    #[must_use]
    pub fn parent(&self) -> NodeId {
        self.parent
    }

    /// Returns true if the node is its own parent.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parent == self.index
    }

    /// Returns true if the node lies on a marshalled path.
    #[must_use]
    pub fn is_fragment(&self) -> bool {
        self.fragment
    }

    /// Returns true while only the id of the node is known.
    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.placeholder
    }
}

/// A partial tree of nodes.
///
/// Marshalling a record loads its ancestors up to the root and links them
/// into the graph. Every node on that path is flagged as a fragment, and
/// siblings known only by id are held as placeholders. Nodes are addressed
/// by [`NodeId`]; each record id appears at most once.
#[derive(Debug, Default)]
pub struct NodeGraph {
    nodes: Vec<Node>,
    by_record: HashMap<i64, NodeId>,
}

impl NodeGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of nodes, placeholders included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns a node.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    /// Returns the node built from record `record_id`.
    #[must_use]
    pub fn find(&self, record_id: i64) -> Option<NodeId> {
        self.by_record.get(&record_id).copied()
    }

    /// Returns the parent of a node.
    #[must_use]
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).map(Node::parent)
    }

    /// Returns the root above a node.
    #[must_use]
    pub fn root_of(&self, id: NodeId) -> Option<NodeId> {
        let mut current = self.node(id)?;
        for _ in 0..self.nodes.len() {
            if current.is_root() {
                return Some(current.index);
            }
            current = &self.nodes[current.parent.0];
        }
        None
    }

    /// Returns the children of a node as presented to callers.
    ///
    /// A fragment node with several children of which exactly one is a
    /// fragment presents only that child.
    #[must_use]
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        let Some(node) = self.node(id) else {
            return Vec::new();
        };
        if node.fragment && node.children.len() > 1 {
            let mut fragments = node
                .children
                .iter()
                .copied()
                .filter(|c| self.nodes[c.0].fragment);
            if let (Some(only), None) = (fragments.next(), fragments.next()) {
                return vec![only];
            }
        }
        node.children.clone()
    }

    /// Returns every child of a node, placeholders included.
    #[must_use]
    pub fn all_children(&self, id: NodeId) -> &[NodeId] {
        self.node(id).map_or(&[][..], |n| n.children.as_slice())
    }

    /// Adds a record without loading anything.
    ///
    /// The node is linked under its parent if the parent is already in the
    /// graph, and is its own parent otherwise. A node already built from
    /// the same record id, placeholder or not, is replaced in place.
    pub fn add(&mut self, record: NodeBean) -> NodeId {
        let parent = record
            .parent_id
            .filter(|p| *p != record.id)
            .and_then(|p| self.find(p));
        self.insert(record, parent, false)
    }

    /// Builds the path from `record` up to the root.
    ///
    /// Ancestors are read from `source` and every node on the path is
    /// flagged as a fragment. A record without a parent link is taken as
    /// its own parent. Returns the node of `record`.
    ///
    /// # Errors
    ///
    /// Returns the lookup error, or `EntityMapping` if an ancestor is
    /// missing or the parent links form a cycle.
    pub fn marshall<S: NodeSource + ?Sized>(
        &mut self,
        source: &mut S,
        record: NodeBean,
    ) -> PersistenceResult<NodeId> {
        let mut seen = HashSet::from([record.id]);
        let mut current = (record.id, record.parent_id, record.model.clone());
        let mut path = vec![record];

        loop {
            let (id, parent_id, model) = current;
            let parent_id = match parent_id {
                Some(p) if p == id => break,
                Some(p) => p,
                None => {
                    if model != super::ROOT_MODEL {
                        warn!(node = id, "node has no parent link, treating it as its own parent");
                    }
                    break;
                }
            };
            if !seen.insert(parent_id) {
                return Err(PersistenceError::entity_mapping(
                    NodeBean::entity_type(),
                    format!("parent links of node {id} form a cycle"),
                ));
            }
            let parent = source.node(parent_id)?.ok_or_else(|| {
                PersistenceError::entity_mapping(
                    NodeBean::entity_type(),
                    format!("parent {parent_id} of node {id} not found"),
                )
            })?;
            current = (parent.id, parent.parent_id, parent.model.clone());
            path.push(parent);
        }

        debug!(depth = path.len(), "marshalling node path");
        let mut parent = None;
        for bean in path.into_iter().rev() {
            parent = Some(self.insert(bean, parent, true));
        }
        parent.ok_or_else(|| PersistenceError::invalid_operation("marshall: empty node path"))
    }

    fn insert(&mut self, record: NodeBean, parent: Option<NodeId>, fragment: bool) -> NodeId {
        let child_ids = record.children.clone();
        let record_id = record.id;
        let index = match self.find(record_id) {
            Some(existing) => {
                let node = &mut self.nodes[existing.0];
                node.record = record;
                node.placeholder = false;
                node.fragment |= fragment;
                existing
            }
            None => {
                let index = NodeId(self.nodes.len());
                self.nodes.push(Node {
                    index,
                    record,
                    parent: index,
                    children: Vec::new(),
                    fragment,
                    placeholder: false,
                });
                self.by_record.insert(record_id, index);
                index
            }
        };
        if let Some(parent) = parent {
            self.attach(index, parent);
        }

        for child_id in child_ids.into_iter().filter(|c| *c != record_id) {
            match self.find(child_id) {
                Some(child) => {
                    if self.nodes[child.0].is_root() {
                        self.attach(child, index);
                    }
                }
                None => {
                    let child = NodeId(self.nodes.len());
                    self.nodes.push(Node {
                        index: child,
                        record: NodeBean::placeholder(child_id, record_id),
                        parent: index,
                        children: Vec::new(),
                        fragment: false,
                        placeholder: true,
                    });
                    self.by_record.insert(child_id, child);
                    self.nodes[index.0].children.push(child);
                }
            }
        }
        index
    }

    fn attach(&mut self, child: NodeId, parent: NodeId) {
        if child == parent {
            return;
        }
        let old = self.nodes[child.0].parent;
        if old != parent && old != child {
            self.nodes[old.0].children.retain(|c| *c != child);
        }
        self.nodes[child.0].parent = parent;
        let siblings = &mut self.nodes[parent.0].children;
        if !siblings.contains(&child) {
            siblings.push(child);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ROOT_MODEL;
    use proptest::prelude::*;

    fn store() -> HashMap<i64, NodeBean> {
        [
            NodeBean::root(1, "root").with_children([2, 5]),
            NodeBean::new(2, "animals", Some(1), "category").with_children([3, 4]),
            NodeBean::new(3, "cats", Some(2), "folder"),
            NodeBean::new(4, "dogs", Some(2), "folder"),
            NodeBean::new(5, "plants", Some(1), "category"),
        ]
        .into_iter()
        .map(|b| (b.id, b))
        .collect()
    }

    #[test]
    fn marshall_builds_path_to_root() {
        let mut source = store();
        let mut graph = NodeGraph::new();
        let record = source[&3].clone();
        let leaf = graph.marshall(&mut source, record).unwrap();

        let category = graph.parent(leaf).unwrap();
        let root = graph.parent(category).unwrap();
        assert_eq!(graph.node(root).unwrap().model(), ROOT_MODEL);
        assert!(graph.node(root).unwrap().is_root());
        assert_eq!(graph.root_of(leaf), Some(root));

        assert_eq!(graph.all_children(category).len(), 2);
        assert_eq!(graph.children(category), vec![leaf]);
        assert_eq!(graph.children(root), vec![category]);
        for id in [leaf, category, root] {
            assert!(graph.node(id).unwrap().is_fragment());
        }
        assert!(graph.node(graph.find(4).unwrap()).unwrap().is_placeholder());
    }

    #[test]
    fn placeholder_is_replaced_in_place() {
        let mut source = store();
        let mut graph = NodeGraph::new();
        let record = source[&3].clone();
        let first = graph.marshall(&mut source, record).unwrap();
        let placeholder = graph.find(4).unwrap();
        let record = source[&4].clone();
        let second = graph.marshall(&mut source, record).unwrap();

        assert_eq!(second, placeholder);
        assert!(!graph.node(second).unwrap().is_placeholder());
        assert_eq!(graph.node(second).unwrap().name(), "dogs");
        let category = graph.parent(first).unwrap();
        assert_eq!(graph.all_children(category), &[first, second]);
        assert_eq!(graph.children(category), vec![first, second]);
    }

    #[test]
    fn added_record_is_relinked_when_marshalled() {
        let mut source = store();
        let mut graph = NodeGraph::new();
        let added = graph.add(NodeBean::new(3, "cats", Some(2), "folder"));
        assert!(graph.node(added).unwrap().is_root());
        assert!(!graph.node(added).unwrap().is_fragment());

        let record = source[&3].clone();
        let marshalled = graph.marshall(&mut source, record).unwrap();
        assert_eq!(marshalled, added);
        let mut current = marshalled;
        while !graph.node(current).unwrap().is_root() {
            assert!(graph.node(current).unwrap().is_fragment());
            current = graph.parent(current).unwrap();
        }
        assert!(graph.node(current).unwrap().is_fragment());
        assert_eq!(graph.node(current).unwrap().model(), ROOT_MODEL);
        assert_eq!(graph.len(), 5);
    }

    #[test]
    fn missing_parent_link_makes_its_own_root() {
        let mut source = HashMap::new();
        let mut graph = NodeGraph::new();
        let id = graph
            .marshall(&mut source, NodeBean::new(9, "loose", None, "folder"))
            .unwrap();
        assert!(graph.node(id).unwrap().is_root());
    }

    #[test]
    fn missing_ancestor_is_an_error() {
        let mut source = HashMap::new();
        let mut graph = NodeGraph::new();
        let err = graph
            .marshall(&mut source, NodeBean::new(3, "cats", Some(2), "folder"))
            .unwrap_err();
        assert!(err.to_string().contains("parent 2 of node 3 not found"));
    }

    #[test]
    fn parent_cycle_is_an_error() {
        let mut source: HashMap<i64, NodeBean> = [
            NodeBean::new(1, "a", Some(2), "folder"),
            NodeBean::new(2, "b", Some(1), "folder"),
        ]
        .into_iter()
        .map(|b| (b.id, b))
        .collect();
        let mut graph = NodeGraph::new();
        let start = source[&1].clone();
        assert!(graph.marshall(&mut source, start).is_err());
    }

    proptest! {
        #[test]
        fn marshalling_never_duplicates_children(order in Just(vec![3i64, 4, 5, 2]).prop_shuffle()) {
            let mut source = store();
            let mut graph = NodeGraph::new();
            for id in order {
                let record = source[&id].clone();
                graph.marshall(&mut source, record).unwrap();
            }
            prop_assert_eq!(graph.len(), 5);
            for index in 0..graph.len() {
                let children = graph.all_children(NodeId(index));
                let unique: HashSet<_> = children.iter().collect();
                prop_assert_eq!(unique.len(), children.len());
            }
        }
    }
}
