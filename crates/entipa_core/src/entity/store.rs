//! Per-transaction store of managed entities.

use super::key::ManagedEntityKey;
use super::model::{Entity, ManagedEntity};
use crate::error::{PersistenceError, PersistenceResult};
use std::collections::HashMap;
use std::fmt;

struct Slot {
    entity: Box<dyn ManagedEntity>,
    dirty: bool,
}

/// Keyed cache of the entities managed by one transaction.
///
/// The map is created on first insert and cleared when the transaction
/// ends. Each entry carries a dirty bit; [`objects_to_update`] hands out
/// the dirty entries once and clears their bits.
///
/// A store is owned by exactly one transaction and is never shared
/// between threads.
///
/// [`objects_to_update`]: EntityStore::objects_to_update
#[derive(Default)]
pub struct EntityStore {
    entries: Option<HashMap<ManagedEntityKey, Slot>>,
}

impl EntityStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a managed entity.
    ///
    /// Replacing an entity keeps the dirty bit of the entry it replaces.
    pub fn put(
        &mut self,
        key: ManagedEntityKey,
        entity: Box<dyn ManagedEntity>,
    ) -> Option<Box<dyn ManagedEntity>> {
        let entries = self.entries.get_or_insert_with(HashMap::new);
        match entries.get_mut(&key) {
            Some(slot) => Some(std::mem::replace(&mut slot.entity, entity)),
            None => {
                entries.insert(
                    key,
                    Slot {
                        entity,
                        dirty: false,
                    },
                );
                None
            }
        }
    }

    /// Inserts or replaces a typed entity, returning its key.
    pub fn put_entity<T: Entity>(&mut self, entity: T) -> ManagedEntityKey {
        let key = entity.managed_key();
        self.put(key.clone(), Box::new(entity));
        key
    }

    /// Returns the managed instance for a key.
    #[must_use]
    pub fn get(&self, key: &ManagedEntityKey) -> Option<&dyn ManagedEntity> {
        self.entries
            .as_ref()?
            .get(key)
            .map(|slot| slot.entity.as_ref())
    }

    /// Returns the managed instance for a key as its concrete type.
    #[must_use]
    pub fn get_as<T: Entity>(&self, key: &ManagedEntityKey) -> Option<&T> {
        self.get(key)?.as_any().downcast_ref::<T>()
    }

    /// Returns the managed instance for mutation and marks it dirty.
    pub fn get_mut_as<T: Entity>(&mut self, key: &ManagedEntityKey) -> Option<&mut T> {
        let slot = self.entries.as_mut()?.get_mut(key)?;
        let entity = slot.entity.as_any_mut().downcast_mut::<T>()?;
        slot.dirty = true;
        Some(entity)
    }

    /// Marks an entity dirty so the next flush writes it.
    ///
    /// # Errors
    ///
    /// Returns `EntityNotManaged` if the key is not in the store.
    pub fn mark_dirty(&mut self, key: &ManagedEntityKey) -> PersistenceResult<()> {
        match self.entries.as_mut().and_then(|e| e.get_mut(key)) {
            Some(slot) => {
                slot.dirty = true;
                Ok(())
            }
            None => Err(not_managed(key)),
        }
    }

    /// Returns true if the entity is managed and dirty.
    #[must_use]
    pub fn is_dirty(&self, key: &ManagedEntityKey) -> bool {
        self.entries
            .as_ref()
            .and_then(|e| e.get(key))
            .is_some_and(|slot| slot.dirty)
    }

    /// Returns true if the key is managed.
    #[must_use]
    pub fn contains(&self, key: &ManagedEntityKey) -> bool {
        self.entries.as_ref().is_some_and(|e| e.contains_key(key))
    }

    /// Removes and returns a managed entity.
    ///
    /// # Errors
    ///
    /// Returns `EntityNotManaged` if the key is not in the store. Removing
    /// an unmanaged entity is a caller bug, not a missing row.
    pub fn remove(&mut self, key: &ManagedEntityKey) -> PersistenceResult<Box<dyn ManagedEntity>> {
        self.entries
            .as_mut()
            .and_then(|e| e.remove(key))
            .map(|slot| slot.entity)
            .ok_or_else(|| not_managed(key))
    }

    /// Forgets every entity without writing anything.
    pub fn release(&mut self) {
        self.entries = None;
    }

    /// Returns every dirty entity and clears its dirty bit.
    pub fn objects_to_update(&mut self) -> Vec<&dyn ManagedEntity> {
        let mut dirty = Vec::new();
        if let Some(entries) = self.entries.as_mut() {
            for slot in entries.values_mut() {
                if slot.dirty {
                    slot.dirty = false;
                    dirty.push(slot.entity.as_ref());
                }
            }
        }
        dirty
    }

    /// Returns the number of managed entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.as_ref().map_or(0, HashMap::len)
    }

    /// Returns true if nothing is managed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for EntityStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        if let Some(entries) = &self.entries {
            for (key, slot) in entries {
                map.entry(&key.to_string(), &slot.dirty);
            }
        }
        map.finish()
    }
}

fn not_managed(key: &ManagedEntityKey) -> PersistenceError {
    PersistenceError::EntityNotManaged {
        key: key.to_string(),
    }
}
