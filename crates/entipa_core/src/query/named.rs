//! Named query registry.

use crate::entity::Entity;
use crate::error::{PersistenceError, PersistenceResult};
use entipa_driver::Select;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Builds the descriptor of a named query.
///
/// A factory is asked for a fresh descriptor on every invocation of its
/// query; no open statement is kept between invocations.
pub trait QueryFactory: Send + Sync {
    /// Returns a new descriptor.
    fn descriptor(&self) -> Select;
}

impl<F> QueryFactory for F
where
    F: Fn() -> Select + Send + Sync,
{
    fn descriptor(&self) -> Select {
        self()
    }
}

/// A factory selecting every row of `T`'s table, with no filter.
pub struct QueryForAllGenerator<T> {
    _entity: PhantomData<fn() -> T>,
}

impl<T> QueryForAllGenerator<T> {
    /// Creates the generator.
    #[must_use]
    pub fn new() -> Self {
        Self {
            _entity: PhantomData,
        }
    }
}

impl<T> Default for QueryForAllGenerator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for QueryForAllGenerator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryForAllGenerator").finish()
    }
}

impl<T: Entity> QueryFactory for QueryForAllGenerator<T> {
    fn descriptor(&self) -> Select {
        Select::new(T::entity_type())
    }
}

/// A registered query: its entity type and factory.
#[derive(Clone)]
pub struct NamedQuery {
    name: String,
    entity_type: &'static str,
    factory: Arc<dyn QueryFactory>,
}

impl NamedQuery {
    /// Returns the query name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the entity type the query returns.
    #[must_use]
    pub fn entity_type(&self) -> &'static str {
        self.entity_type
    }

    /// Builds a fresh descriptor.
    #[must_use]
    pub fn descriptor(&self) -> Select {
        self.factory.descriptor()
    }
}

impl fmt::Debug for NamedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedQuery")
            .field("name", &self.name)
            .field("entity_type", &self.entity_type)
            .finish_non_exhaustive()
    }
}

/// Named queries of one persistence unit.
///
/// Lookups run concurrently from every transaction of the unit;
/// registration is expected at startup and during schema upgrade.
#[derive(Default)]
pub struct NamedQueryRegistry {
    queries: RwLock<HashMap<String, NamedQuery>>,
}

impl NamedQueryRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` as query `name` returning `entity_type`.
    ///
    /// A later registration under the same name replaces the earlier one.
    pub fn add_named_query(
        &self,
        entity_type: &'static str,
        name: impl Into<String>,
        factory: Arc<dyn QueryFactory>,
    ) {
        let name = name.into();
        let query = NamedQuery {
            name: name.clone(),
            entity_type,
            factory,
        };
        self.queries.write().insert(name, query);
    }

    /// Registers a query for entity type `T`.
    pub fn add<T, F>(&self, name: impl Into<String>, factory: F)
    where
        T: Entity,
        F: QueryFactory + 'static,
    {
        self.add_named_query(T::entity_type(), name, Arc::new(factory));
    }

    /// Registers `name` as an unfiltered query over every `T`.
    pub fn add_query_for_all<T: Entity>(&self, name: impl Into<String>) {
        self.add::<T, _>(name, QueryForAllGenerator::<T>::new());
    }

    /// Returns the query registered under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<NamedQuery> {
        self.queries.read().get(name).cloned()
    }

    /// Returns a fresh descriptor for query `name`, which must return `T`.
    ///
    /// # Errors
    ///
    /// Returns `QueryNotFound` for an unknown name, or
    /// `EntityTypeMismatch` if the query returns another entity type.
    pub fn descriptor_for<T: Entity>(&self, name: &str) -> PersistenceResult<Select> {
        let query = self.get(name).ok_or_else(|| PersistenceError::QueryNotFound {
            query: name.to_string(),
        })?;
        if query.entity_type != T::entity_type() {
            return Err(PersistenceError::EntityTypeMismatch {
                query: name.to_string(),
                actual: query.entity_type.to_string(),
                requested: T::entity_type().to_string(),
            });
        }
        Ok(query.descriptor())
    }

    /// Returns the registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.queries.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns the number of registered queries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queries.read().len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queries.read().is_empty()
    }
}

impl fmt::Debug for NamedQueryRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedQueryRegistry")
            .field("queries", &self.names())
            .finish()
    }
}
