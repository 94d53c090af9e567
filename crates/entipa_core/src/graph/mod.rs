//! Partial node trees.
//!
//! Records are stored flat, each pointing at its parent. A [`NodeGraph`]
//! rebuilds just the part of the tree a caller needs: the path from one
//! node up to the root, with siblings along that path held as
//! placeholders.

mod bean;
mod tree;

pub use bean::{NodeBean, NodeSource, ROOT_MODEL};
pub use tree::{Node, NodeGraph, NodeId};
