//! The persisted node record and where records come from.

use crate::entity::{integer_column, optional_integer_column, text_column, Entity, PrimaryKey};
use crate::error::PersistenceResult;
use crate::manager::EntityManager;
use entipa_driver::{Row, Select, Value};
use std::collections::HashMap;

/// Model name of the root node of a graph.
pub const ROOT_MODEL: &str = "root";

/// Flat persisted record of one node.
///
/// `children` holds the ids of the node's children as known when the
/// record was read. They become placeholder nodes until their own records
/// are marshalled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeBean {
    /// Primary key.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Parent id. The root is its own parent; `None` means the link was
    /// never set.
    pub parent_id: Option<i64>,
    /// Model name, [`ROOT_MODEL`] for the root.
    pub model: String,
    /// Child ids.
    pub children: Vec<i64>,
}

impl NodeBean {
    /// Creates a record with no children.
    pub fn new(id: i64, name: impl Into<String>, parent_id: Option<i64>, model: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            parent_id,
            model: model.into(),
            children: Vec::new(),
        }
    }

    /// Creates a root record, parented to itself.
    pub fn root(id: i64, name: impl Into<String>) -> Self {
        Self::new(id, name, Some(id), ROOT_MODEL)
    }

    /// Creates the stand-in for a child whose record has not been read.
    #[must_use]
    pub fn placeholder(id: i64, parent_id: i64) -> Self {
        Self::new(id, "", Some(parent_id), "")
    }

    /// Sets the child ids.
    #[must_use]
    pub fn with_children(mut self, children: impl IntoIterator<Item = i64>) -> Self {
        self.children = children.into_iter().collect();
        self
    }

    /// Returns true for the root record.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parent_id == Some(self.id) || self.model == ROOT_MODEL
    }
}

impl Entity for NodeBean {
    fn entity_type() -> &'static str {
        "nodes"
    }

    fn primary_key(&self) -> PrimaryKey {
        PrimaryKey::Integer(self.id)
    }

    fn to_columns(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", self.id.into()),
            ("name", self.name.as_str().into()),
            ("parent_id", self.parent_id.into()),
            ("model", self.model.as_str().into()),
        ]
    }

    fn from_row(row: &Row) -> PersistenceResult<Self> {
        Ok(Self {
            id: integer_column(row, "nodes", "id")?,
            name: text_column(row, "nodes", "name")?,
            parent_id: optional_integer_column(row, "nodes", "parent_id")?,
            model: text_column(row, "nodes", "model")?,
            children: Vec::new(),
        })
    }
}

/// Looks up node records by id.
pub trait NodeSource {
    /// Returns the record of node `id` with its child ids, if it exists.
    ///
    /// # Errors
    ///
    /// Returns the lookup failure.
    fn node(&mut self, id: i64) -> PersistenceResult<Option<NodeBean>>;
}

impl NodeSource for HashMap<i64, NodeBean> {
    fn node(&mut self, id: i64) -> PersistenceResult<Option<NodeBean>> {
        Ok(self.get(&id).cloned())
    }
}

impl NodeSource for EntityManager {
    fn node(&mut self, id: i64) -> PersistenceResult<Option<NodeBean>> {
        let Some(mut bean) = self.find::<NodeBean>(id)? else {
            return Ok(None);
        };
        let select = Select::new(NodeBean::entity_type()).where_eq("parent_id", Value::Integer(id));
        bean.children = self
            .create_query::<NodeBean>(select)?
            .get_all()?
            .into_iter()
            .map(|child| child.id)
            .filter(|child| *child != id)
            .collect();
        Ok(Some(bean))
    }
}
