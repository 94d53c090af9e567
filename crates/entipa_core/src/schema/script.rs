//! Runs `;`-separated SQL script resources.

use crate::error::{PersistenceError, PersistenceResult};
use crate::resource::ResourceEnvironment;
use entipa_driver::Connection;
use std::io::{BufRead, BufReader};
use tracing::{debug, error, info};

/// Executes script resources statement by statement.
///
/// A script is plain text with statements separated by `;`. Statements are
/// trimmed; comments get no special treatment.
pub struct NativeScriptRunner<'r> {
    resources: &'r dyn ResourceEnvironment,
}

impl<'r> NativeScriptRunner<'r> {
    /// Creates a runner reading scripts from `resources`.
    pub fn new(resources: &'r dyn ResourceEnvironment) -> Self {
        Self { resources }
    }

    /// Runs the script `file` on `conn`.
    ///
    /// Returns true if at least one statement ran. A missing or empty file
    /// name is a no-op returning false.
    ///
    /// # Errors
    ///
    /// Returns `ResourceNotFound` if the script cannot be opened, `Script`
    /// if reading fails before the end of the stream, or `Query` naming the
    /// file if a statement fails. Statements already run are left to the
    /// caller's transaction to roll back.
    pub fn run(&self, conn: &mut dyn Connection, file: Option<&str>) -> PersistenceResult<bool> {
        let Some(file) = file.map(str::trim).filter(|f| !f.is_empty()) else {
            return Ok(false);
        };
        let mut reader = BufReader::new(self.resources.open_resource(file)?);

        let mut executed = 0usize;
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b';', &mut buf) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    error!(file, executed, error = %e, "script read failed");
                    return Err(PersistenceError::Script {
                        file: file.to_string(),
                        source: e,
                    });
                }
            }
            let text = String::from_utf8_lossy(&buf);
            let statement = text.trim().trim_end_matches(';').trim();
            if statement.is_empty() {
                continue;
            }
            debug!(file, statement, "executing script statement");
            conn.execute(statement, &[])
                .map_err(|e| PersistenceError::query(file, e))?;
            executed += 1;
        }

        info!(file, statements = executed, "script executed");
        Ok(executed > 0)
    }
}
