//! Entity access without reflection.
//!
//! Typed entities implement [`Entity`] and expose an [`Accessors`] table built once per
//! type; the persister only reads and writes fields through that table. Entities are
//! handled as type-erased [`AnyEntity`] objects behind shared [`EntityRef`] handles,
//! whose pointer identity is the key of every pending-write set.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::OnceLock;
//! use docmapper::entity::{Accessors, Entity};
//! use docmapper::value::Value;
//!
//! #[derive(Debug, Default)]
//! pub struct User {
//!     pub id: Option<bson::oid::ObjectId>,
//!     pub name: String,
//! }
//!
//! impl Entity for User {
//!     fn type_name() -> &'static str {
//!         "User"
//!     }
//!
//!     fn accessors() -> &'static Accessors<Self> {
//!         static ACCESSORS: OnceLock<Accessors<User>> = OnceLock::new();
//!         ACCESSORS.get_or_init(|| {
//!             Accessors::new()
//!                 .field("id", |u| u.id.map(Value::from), |u, v| {
//!                     u.id = v.and_then(|v| v.as_bson().and_then(|b| b.as_object_id()));
//!                 })
//!                 .field("name", |u| Some(Value::from(u.name.clone())), |u, v| {
//!                     u.name = v.and_then(|v| v.as_bson().and_then(|b| b.as_str().map(String::from))).unwrap_or_default();
//!                 })
//!         })
//!     }
//! }
//! ```

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::{any::Any, fmt, sync::Arc};

use crate::value::{Criteria, Value};

/// Reads a field from a typed entity.
pub type Getter<E> = fn(&E) -> Option<Value>;

/// Writes a field on a typed entity. `None` clears the field.
pub type Setter<E> = fn(&mut E, Option<Value>);

/// Per-type table of field accessors, keyed by entity field name.
pub struct Accessors<E> {
    fields: Vec<(&'static str, Getter<E>, Setter<E>)>,
}

impl<E> Accessors<E> {
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Registers the getter and setter of one field.
    pub fn field(mut self, name: &'static str, get: Getter<E>, set: Setter<E>) -> Self {
        self.fields.push((name, get, set));
        self
    }

    pub fn get(&self, entity: &E, field: &str) -> Option<Value> {
        self.fields
            .iter()
            .find(|(name, _, _)| *name == field)
            .and_then(|(_, get, _)| get(entity))
    }

    /// Returns `false` when the field has no accessor.
    pub fn set(&self, entity: &mut E, field: &str, value: Option<Value>) -> bool {
        match self.fields.iter().find(|(name, _, _)| *name == field) {
            Some((_, _, set)) => {
                set(entity, value);
                true
            }
            None => false,
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().map(|(name, _, _)| *name)
    }
}

impl<E> Default for Accessors<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Core trait for typed application entities.
pub trait Entity: fmt::Debug + Send + Sync + 'static {
    /// Name of the entity type, as registered with the metadata provider.
    fn type_name() -> &'static str
    where
        Self: Sized;

    /// The accessor table of this type.
    fn accessors() -> &'static Accessors<Self>
    where
        Self: Sized;
}

/// Type-erased entity interface used by the persister.
pub trait AnyEntity: fmt::Debug + Send + Sync {
    /// Name of the entity type, as registered with the metadata provider.
    fn entity_type(&self) -> &str;

    /// Reads a field by entity field name. `None` means the field holds no value.
    fn get_field(&self, field: &str) -> Option<Value>;

    /// Writes a field by entity field name.
    fn set_field(&mut self, field: &str, value: Option<Value>);

    /// Names of every accessible field.
    fn field_names(&self) -> Vec<String>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<E: Entity> AnyEntity for E {
    fn entity_type(&self) -> &str {
        E::type_name()
    }

    fn get_field(&self, field: &str) -> Option<Value> {
        E::accessors().get(self, field)
    }

    fn set_field(&mut self, field: &str, value: Option<Value>) {
        if !E::accessors().set(self, field, value) {
            tracing::debug!(target: "docmapper::entity", entity_type = E::type_name(), field, "no accessor for field");
        }
    }

    fn field_names(&self) -> Vec<String> {
        E::accessors().names().map(String::from).collect()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl dyn AnyEntity {
    /// Attempts to downcast a reference to a specific entity type.
    pub fn downcast_ref<E: Entity>(&self) -> Option<&E> {
        self.as_any().downcast_ref::<E>()
    }

    /// Attempts to downcast a mutable reference to a specific entity type.
    pub fn downcast_mut<E: Entity>(&mut self) -> Option<&mut E> {
        self.as_any_mut().downcast_mut::<E>()
    }
}

/// A dynamically shaped entity: a type name plus an ordered field map.
///
/// Useful for ad hoc documents and for hydrating types that have no Rust struct.
#[derive(Debug, Clone, Default)]
pub struct Record {
    type_name: String,
    fields: Criteria,
}

impl Record {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self { type_name: type_name.into(), fields: Criteria::new() }
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field, value);
        self
    }

    pub fn fields(&self) -> &Criteria {
        &self.fields
    }
}

impl AnyEntity for Record {
    fn entity_type(&self) -> &str {
        &self.type_name
    }

    fn get_field(&self, field: &str) -> Option<Value> {
        self.fields
            .get(field)
            .filter(|value| !value.is_null())
            .cloned()
    }

    fn set_field(&mut self, field: &str, value: Option<Value>) {
        match value {
            Some(value) => self.fields.insert(field, value),
            None => {
                self.fields.remove(field);
            }
        }
    }

    fn field_names(&self) -> Vec<String> {
        self.fields.keys().map(String::from).collect()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Identity of an entity handle, stable for the lifetime of the handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey(usize);

/// Shared handle to a managed entity.
#[derive(Clone)]
pub struct EntityRef(Arc<RwLock<dyn AnyEntity>>);

impl EntityRef {
    pub fn new<E: AnyEntity + 'static>(entity: E) -> Self {
        Self(Arc::new(RwLock::new(entity)))
    }

    /// Pointer identity of this handle; clones share the same key.
    pub fn key(&self) -> EntityKey {
        EntityKey(Arc::as_ptr(&self.0) as *const () as usize)
    }

    pub fn entity_type(&self) -> String {
        self.0.read().entity_type().to_string()
    }

    pub fn get(&self, field: &str) -> Option<Value> {
        self.0.read().get_field(field)
    }

    pub fn set(&self, field: &str, value: Option<Value>) {
        self.0.write().set_field(field, value);
    }

    pub fn read(&self) -> RwLockReadGuard<'_, dyn AnyEntity> {
        self.0.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, dyn AnyEntity> {
        self.0.write()
    }

    /// Runs `f` against the entity if it is an `E`.
    pub fn with<E: Entity, R>(&self, f: impl FnOnce(&E) -> R) -> Option<R> {
        let guard = self.0.read();
        guard.downcast_ref::<E>().map(f)
    }
}

impl fmt::Debug for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityRef")
            .field("key", &self.key())
            .field("entity", &&*self.0.read())
            .finish()
    }
}

impl<E: AnyEntity + 'static> From<E> for EntityRef {
    fn from(entity: E) -> Self {
        EntityRef::new(entity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::OnceLock;

    #[derive(Debug, Default)]
    struct Counter {
        count: i64,
    }

    impl Entity for Counter {
        fn type_name() -> &'static str {
            "Counter"
        }

        fn accessors() -> &'static Accessors<Self> {
            static ACCESSORS: OnceLock<Accessors<Counter>> = OnceLock::new();
            ACCESSORS.get_or_init(|| {
                Accessors::new().field(
                    "count",
                    |c| Some(Value::from(c.count)),
                    |c, v| c.count = v.and_then(|v| v.as_bson().and_then(|b| b.as_i64())).unwrap_or(0),
                )
            })
        }
    }

    #[test]
    fn typed_entities_go_through_the_accessor_table() {
        let entity = EntityRef::new(Counter { count: 3 });
        entity.set("count", Some(Value::from(4_i64)));

        assert_eq!(entity.entity_type(), "Counter");
        assert_eq!(entity.get("count"), Some(Value::from(4_i64)));
        assert_eq!(entity.with(|c: &Counter| c.count), Some(4));
        assert_eq!(entity.get("missing"), None);
    }

    #[test]
    fn clones_share_identity() {
        let entity = EntityRef::new(Record::new("User"));
        let other = EntityRef::new(Record::new("User"));

        assert_eq!(entity.key(), entity.clone().key());
        assert_ne!(entity.key(), other.key());
    }
}
