//! The persistence context: every unit of an application plus the pool
//! that runs their work.

use super::unit::PersistenceAdmin;
use crate::config::{ExecutorConfig, UnitConfig};
use crate::error::{BoxError, PersistenceError, PersistenceResult, PostCommitFailure};
use crate::executor::{TaskHandle, WorkerPool};
use crate::manager::{EntityManager, EntityManagerFactory};
use crate::resource::ResourceEnvironment;
use crate::schema::BootstrapOutcome;
use crate::transaction::EntityTransaction;
use entipa_driver::ConnectionSource;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A unit of persistence work run inside one transaction.
///
/// The context begins the transaction, calls [`execute`](Self::execute)
/// and commits. On success [`on_post_commit`](Self::on_post_commit) runs
/// after the commit; its failure is reported beside the result and never
/// undoes the commit. On failure the transaction is rolled back and
/// [`on_rollback`](Self::on_rollback) is told why.
pub trait PersistenceWork: Send + 'static {
    /// Value produced by the work.
    type Output: Send + 'static;

    /// Performs the work through `em`, whose transaction is active.
    ///
    /// # Errors
    ///
    /// Any error rolls the transaction back.
    fn execute(&mut self, em: &mut EntityManager) -> PersistenceResult<Self::Output>;

    /// Runs after a successful commit.
    ///
    /// # Errors
    ///
    /// The error is reported as a [`PostCommitFailure`].
    fn on_post_commit(&mut self, _output: &Self::Output) -> Result<(), BoxError> {
        Ok(())
    }

    /// Runs after the transaction was rolled back.
    fn on_rollback(&mut self, _error: &PersistenceError) {}
}

/// Adapts a closure to [`PersistenceWork`]. See [`work`].
pub struct WorkFn<F>(F);

/// Wraps a closure as persistence work with no commit or rollback hooks.
///
/// ```rust,ignore
/// let count = context.execute("classyfy", work(|em| {
///     em.create_native_query("SELECT * FROM nodes")?.get_result_list()
/// }))?;
/// ```
pub fn work<F, T>(f: F) -> WorkFn<F>
where
    F: FnMut(&mut EntityManager) -> PersistenceResult<T> + Send + 'static,
    T: Send + 'static,
{
    WorkFn(f)
}

impl<F, T> PersistenceWork for WorkFn<F>
where
    F: FnMut(&mut EntityManager) -> PersistenceResult<T> + Send + 'static,
    T: Send + 'static,
{
    type Output = T;

    fn execute(&mut self, em: &mut EntityManager) -> PersistenceResult<T> {
        (self.0)(em)
    }
}

/// Result of committed persistence work.
#[derive(Debug)]
pub struct WorkOutcome<T> {
    /// Value returned by the work.
    pub value: T,
    /// Failures of work that ran after the commit.
    pub post_commit_failures: Vec<PostCommitFailure>,
}

impl<T> WorkOutcome<T> {
    /// Returns true if all post-commit work succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.post_commit_failures.is_empty()
    }
}

/// Every persistence unit of an application, its resources, and the
/// worker pool that runs persistence work.
///
/// Built once at startup with [`add_unit`](Self::add_unit) and then shared
/// read-only.
pub struct PersistenceContext {
    units: HashMap<String, Arc<PersistenceAdmin>>,
    pool: Arc<WorkerPool>,
    resources: Arc<dyn ResourceEnvironment>,
    shutdown_timeout: std::time::Duration,
}

impl PersistenceContext {
    /// Creates a context with its own worker pool.
    pub fn new(resources: Arc<dyn ResourceEnvironment>, executor: ExecutorConfig) -> Self {
        let shutdown_timeout = executor.shutdown_timeout;
        Self {
            units: HashMap::new(),
            pool: Arc::new(WorkerPool::new(executor)),
            resources,
            shutdown_timeout,
        }
    }

    /// Creates a context sharing an existing pool.
    pub fn with_pool(resources: Arc<dyn ResourceEnvironment>, pool: Arc<WorkerPool>) -> Self {
        Self {
            units: HashMap::new(),
            pool,
            resources,
            shutdown_timeout: ExecutorConfig::default().shutdown_timeout,
        }
    }

    /// Adds a unit backed by `source`, replacing any unit of the same name.
    pub fn add_unit(
        &mut self,
        config: UnitConfig,
        source: Arc<dyn ConnectionSource>,
    ) -> Arc<PersistenceAdmin> {
        let admin = Arc::new(PersistenceAdmin::new(config, source));
        info!(unit = %admin.unit_name(), "persistence unit added");
        self.units
            .insert(admin.unit_name().to_string(), Arc::clone(&admin));
        admin
    }

    /// Returns the admin of unit `name`.
    ///
    /// # Errors
    ///
    /// Returns `UnitNotFound` if no unit has that name.
    pub fn persistence_admin(&self, name: &str) -> PersistenceResult<Arc<PersistenceAdmin>> {
        self.units
            .get(name)
            .cloned()
            .ok_or_else(|| PersistenceError::unit_not_found(name))
    }

    /// Returns the entity manager factory of unit `name`.
    ///
    /// # Errors
    ///
    /// Returns `UnitNotFound` if no unit has that name.
    pub fn entity_manager_factory(&self, name: &str) -> PersistenceResult<EntityManagerFactory> {
        Ok(self.persistence_admin(name)?.entity_manager_factory())
    }

    /// Returns the unit names, sorted.
    #[must_use]
    pub fn unit_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.units.keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns the resource environment.
    #[must_use]
    pub fn resources(&self) -> &dyn ResourceEnvironment {
        self.resources.as_ref()
    }

    /// Returns the worker pool.
    #[must_use]
    pub fn executor(&self) -> &WorkerPool {
        &self.pool
    }

    /// Creates or upgrades the schema of unit `name`.
    ///
    /// # Errors
    ///
    /// Returns `UnitNotFound`, or the bootstrap failure.
    pub fn bootstrap(&self, name: &str) -> PersistenceResult<BootstrapOutcome> {
        self.persistence_admin(name)?
            .bootstrap(self.resources.as_ref())
    }

    /// Bootstraps every unit in name order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the first bootstrap failure.
    pub fn bootstrap_all(&self) -> PersistenceResult<Vec<(String, BootstrapOutcome)>> {
        self.unit_names()
            .into_iter()
            .map(|name| {
                let outcome = self.bootstrap(&name)?;
                Ok((name, outcome))
            })
            .collect()
    }

    /// Runs `work` on the pool in a transaction of unit `unit` and waits
    /// for it.
    ///
    /// # Errors
    ///
    /// Returns `UnitNotFound`, `ExecutorShutdown`, `TaskFailed` if the work
    /// panicked, or the error that rolled the work back.
    pub fn execute<W: PersistenceWork>(
        &self,
        unit: &str,
        work: W,
    ) -> PersistenceResult<WorkOutcome<W::Output>> {
        self.spawn(unit, work)?.join()
    }

    /// Queues `work` on the pool in a transaction of unit `unit`.
    ///
    /// # Errors
    ///
    /// Returns `UnitNotFound` or `ExecutorShutdown`.
    pub fn spawn<W: PersistenceWork>(
        &self,
        unit: &str,
        work: W,
    ) -> PersistenceResult<TaskHandle<WorkOutcome<W::Output>>> {
        let factory = self.entity_manager_factory(unit)?;
        self.pool.spawn(move || run_work(&factory, work))
    }

    /// Shuts the pool down and closes every unit.
    ///
    /// Returns true if queued work finished within the shutdown timeout.
    ///
    /// # Errors
    ///
    /// Returns the first failure closing a unit; the remaining units are
    /// still closed.
    pub fn close(&self) -> PersistenceResult<bool> {
        let graceful = self.pool.shutdown(self.shutdown_timeout);
        let mut first_error = None;
        for name in self.unit_names() {
            if let Some(admin) = self.units.get(&name) {
                if let Err(e) = admin.close() {
                    warn!(unit = %name, error = %e, "failed to close persistence unit");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(graceful),
        }
    }
}

impl fmt::Debug for PersistenceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistenceContext")
            .field("units", &self.unit_names())
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

fn run_work<W: PersistenceWork>(
    factory: &EntityManagerFactory,
    mut work: W,
) -> PersistenceResult<WorkOutcome<W::Output>> {
    let mut em = factory.create_entity_manager()?;
    em.transaction().begin()?;

    let value = match work.execute(&mut em) {
        Ok(value) => value,
        Err(e) => {
            debug!(unit = %factory.unit_name(), error = %e, "work failed, rolling back");
            em.close();
            work.on_rollback(&e);
            return Err(e);
        }
    };
    if em.transaction().is_active() {
        if let Err(e) = em.transaction().commit() {
            em.close();
            work.on_rollback(&e);
            return Err(e);
        }
    }

    let mut post_commit_failures = em.transaction().take_post_commit_failures();
    if let Err(e) = work.on_post_commit(&value) {
        post_commit_failures.push(PostCommitFailure::new(e));
    }
    for failure in &post_commit_failures {
        warn!(unit = %factory.unit_name(), failure = %failure, "post-commit work failed");
    }
    em.close();
    Ok(WorkOutcome {
        value,
        post_commit_failures,
    })
}
