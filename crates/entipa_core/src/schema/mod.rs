//! Schema bootstrap.
//!
//! A unit's database is created by running its drop, create and data
//! scripts, and upgraded by running one conventional upgrade script per
//! version step. The version reached is stored with the database and read
//! back on the next start.

mod bootstrap;
mod script;

pub use bootstrap::{read_version, write_version, BootstrapOutcome, DatabaseAdmin};
pub use script::NativeScriptRunner;
