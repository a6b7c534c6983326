//! Property-space values and criteria.
//!
//! Criteria are written against entity field names and may hold managed entities
//! (for reference and embedded fields). The compiler turns them into storage-space
//! [`bson::Document`]s.

use bson::{Bson, Document, oid::ObjectId};

use crate::entity::EntityRef;

/// Prefix shared by every query and update operator key.
pub const OPERATOR_PREFIX: char = '$';

/// Keys of a structured (DBRef style) reference document.
pub const REFERENCE_KEYS: [&str; 3] = ["$ref", "$id", "$db"];

/// A value in property space.
///
/// Documents and arrays coming from BSON are lifted into [`Value::Map`] and
/// [`Value::Array`] so operator detection works the same way for both sources.
#[derive(Debug, Clone)]
pub enum Value {
    /// A scalar BSON value.
    Bson(Bson),
    /// A managed entity (target of a reference or an embedded document).
    Entity(EntityRef),
    /// An ordered list of values.
    Array(Vec<Value>),
    /// A nested map: either an operator expression or a sub-document.
    Map(Criteria),
}

impl Value {
    pub fn null() -> Self {
        Value::Bson(Bson::Null)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Bson(Bson::Null))
    }

    pub fn as_bson(&self) -> Option<&Bson> {
        match self {
            Value::Bson(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_entity(&self) -> Option<&EntityRef> {
        match self {
            Value::Entity(entity) => Some(entity),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Criteria> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Returns `true` for null and for empty arrays and maps.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Bson(Bson::Null) => true,
            Value::Array(items) => items.is_empty(),
            Value::Map(map) => map.is_empty(),
            _ => false,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Bson(a), Value::Bson(b)) => a == b,
            (Value::Entity(a), Value::Entity(b)) => a.key() == b.key(),
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl From<Bson> for Value {
    fn from(value: Bson) -> Self {
        match value {
            Bson::Document(doc) => Value::Map(Criteria::from(doc)),
            Bson::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            other => Value::Bson(other),
        }
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        Value::Map(Criteria::from(doc))
    }
}

impl From<EntityRef> for Value {
    fn from(entity: EntityRef) -> Self {
        Value::Entity(entity)
    }
}

impl From<Criteria> for Value {
    fn from(map: Criteria) -> Self {
        Value::Map(map)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

macro_rules! value_from_scalar {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::Bson(Bson::from(value))
                }
            }
        )*
    };
}

value_from_scalar!(&str, String, i32, i64, f64, bool, ObjectId, bson::DateTime);

/// An ordered map of property paths (or operator keys) to values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Criteria {
    entries: Vec<(String, Value)>,
}

impl Criteria {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Inserts or replaces a value, keeping the position of an existing key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();

        match self.entries.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let position = self.entries.iter().position(|(existing, _)| existing == key)?;
        Some(self.entries.remove(position).1)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<Document> for Criteria {
    fn from(doc: Document) -> Self {
        Self {
            entries: doc
                .into_iter()
                .map(|(key, value)| (key, Value::from(value)))
                .collect(),
        }
    }
}

impl IntoIterator for Criteria {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Criteria {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut criteria = Criteria::new();
        for (key, value) in iter {
            criteria.insert(key, value);
        }
        criteria
    }
}

pub(crate) fn is_operator(key: &str) -> bool {
    key.starts_with(OPERATOR_PREFIX)
}

/// Returns `true` if `value` is a map containing at least one operator key.
pub fn has_operators(value: &Value) -> bool {
    match value {
        Value::Map(map) => map.keys().any(is_operator),
        _ => false,
    }
}

/// Returns `true` if `value` is a map containing one of the structured reference keys.
pub fn has_reference_fields(value: &Value) -> bool {
    match value {
        Value::Map(map) => map.keys().any(|key| REFERENCE_KEYS.contains(&key)),
        _ => false,
    }
}
