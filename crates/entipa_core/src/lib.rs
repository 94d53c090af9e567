//! # Entipa Core
//!
//! Embeddable entity-manager persistence engine.
//!
//! This crate provides:
//! - Transactions over pooled connections, with savepoints where the
//!   connection cannot be pinned or the database nests transactions
//! - A per-transaction store of managed entities, flushed at commit
//! - Typed, named and native queries
//! - Schema creation and upgrade from SQL scripts
//! - A bounded worker pool running persistence work
//! - Partial node trees rebuilt from flat records
//!
//! ## Layout
//!
//! A [`PersistenceContext`] holds every persistence unit of an application.
//! Each unit has a [`PersistenceAdmin`], which hands out the
//! [`EntityManagerFactory`] its entity managers come from.
//!
//! ## Example
//!
//! ```rust
//! use entipa_core::{DirectoryResources, ExecutorConfig, PersistenceContext, UnitConfig};
//! use entipa_core::admin::work;
//! use entipa_driver::MemoryConnectionSource;
//! use std::sync::Arc;
//!
//! let resources = Arc::new(DirectoryResources::new("scripts", "db"));
//! let mut context = PersistenceContext::new(resources, ExecutorConfig::new().pool_size(2));
//! context.add_unit(UnitConfig::new("classyfy"), Arc::new(MemoryConnectionSource::new()));
//!
//! let outcome = context
//!     .execute("classyfy", work(|em| Ok(em.unit_name().to_string())))
//!     .unwrap();
//! assert_eq!(outcome.value, "classyfy");
//! context.close().unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod admin;
pub mod config;
pub mod entity;
mod error;
pub mod executor;
pub mod graph;
mod manager;
pub mod query;
mod resource;
pub mod schema;
pub mod transaction;
mod types;

pub use admin::{PersistenceAdmin, PersistenceContext, PersistenceWork, WorkOutcome};
pub use config::{ExecutorConfig, UnitConfig};
pub use entity::{Entity, EntityStore, ManagedEntityKey, PrimaryKey};
pub use error::{BoxError, PersistenceError, PersistenceResult, PostCommitFailure};
pub use executor::{TaskHandle, TaskStatus, WorkerPool};
pub use manager::{EntityManager, EntityManagerFactory};
pub use resource::{DirectoryResources, ResourceEnvironment};
pub use schema::BootstrapOutcome;
pub use transaction::{EntityTransaction, MonitoredTransaction, TransactionMode, TransactionStatus};
pub use types::{SchemaVersion, TransactionId, TransactionIdGenerator};
