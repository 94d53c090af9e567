//! Entity identity.

use entipa_driver::Value;
use std::fmt;

/// Primary key value of an entity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PrimaryKey {
    /// Integer key.
    Integer(i64),
    /// Text key.
    Text(String),
}

impl PrimaryKey {
    /// Converts the key to a driver value for binding.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            PrimaryKey::Integer(v) => Value::Integer(*v),
            PrimaryKey::Text(s) => Value::Text(s.clone()),
        }
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrimaryKey::Integer(v) => write!(f, "{v}"),
            PrimaryKey::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for PrimaryKey {
    fn from(v: i64) -> Self {
        PrimaryKey::Integer(v)
    }
}

impl From<&str> for PrimaryKey {
    fn from(v: &str) -> Self {
        PrimaryKey::Text(v.to_string())
    }
}

impl From<String> for PrimaryKey {
    fn from(v: String) -> Self {
        PrimaryKey::Text(v)
    }
}

/// Identity of a managed entity: its type and primary key.
///
/// Equality and hashing use only these two parts, never field values, so
/// two instances of the same row are the same managed entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ManagedEntityKey {
    entity_type: &'static str,
    primary_key: PrimaryKey,
}

impl ManagedEntityKey {
    /// Creates a key.
    pub fn new(entity_type: &'static str, primary_key: impl Into<PrimaryKey>) -> Self {
        Self {
            entity_type,
            primary_key: primary_key.into(),
        }
    }

    /// Returns the entity type.
    #[must_use]
    pub fn entity_type(&self) -> &'static str {
        self.entity_type
    }

    /// Returns the primary key.
    #[must_use]
    pub fn primary_key(&self) -> &PrimaryKey {
        &self.primary_key
    }
}

impl fmt::Display for ManagedEntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity_type, self.primary_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn identity_is_type_and_key() {
        let a = ManagedEntityKey::new("folders", 7);
        let b = ManagedEntityKey::new("folders", 7);
        let c = ManagedEntityKey::new("categories", 7);
        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: HashSet<_> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn display() {
        assert_eq!(ManagedEntityKey::new("nodes", "abc").to_string(), "nodes#abc");
    }
}
