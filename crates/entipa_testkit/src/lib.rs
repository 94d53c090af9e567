//! # Entipa Testkit
//!
//! Test utilities for entipa.
//!
//! This crate provides:
//! - Persistence units backed by the recording in-memory driver
//! - Script resources held in memory or in a temporary directory
//! - Sample entities and node trees
//! - Property-based test generators using proptest
//! - Stress testing utilities for the worker pool and transactions
//! - Test logging setup
//!
//! ## Usage
//!
//! ```rust,ignore
//! use entipa_testkit::prelude::*;
//!
//! #[test]
//! fn folder_is_inserted() {
//!     let unit = TestUnit::new("classyfy");
//!     let mut em = unit.entity_manager();
//!     em.transaction().begin().unwrap();
//!     em.persist(Folder::new(1, "inbox")).unwrap();
//!     em.transaction().commit().unwrap();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod logging;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::logging::*;
    pub use crate::stress::*;
    pub use entipa_core::EntityTransaction;
}

pub use fixtures::*;
pub use generators::*;
pub use logging::*;
pub use stress::*;
