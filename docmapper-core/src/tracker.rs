//! Unit of work interface.
//!
//! The persister never tracks entity state itself. Change sets, collection
//! scheduling and the identity map are owned by a [`UnitOfWork`] implementation
//! and consulted through this trait.

use bson::{Bson, Document};
use std::collections::BTreeMap;

use crate::{collection::CollectionRef, entity::EntityRef, value::Value};

/// Before and after values of one entity field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    pub old: Option<Value>,
    pub new: Option<Value>,
}

impl FieldChange {
    pub fn new(old: Option<Value>, new: Option<Value>) -> Self {
        Self { old, new }
    }

    pub fn is_changed(&self) -> bool {
        self.old != self.new
    }
}

/// Changed fields of one entity, keyed by entity field name.
pub type ChangeSet = BTreeMap<String, FieldChange>;

pub trait UnitOfWork: Send + Sync {
    /// Identifier tracked for `entity`, when it differs from the entity's identifier field.
    fn identifier(&self, entity: &EntityRef) -> Option<Value> {
        let _ = entity;
        None
    }

    fn change_set(&self, entity: &EntityRef) -> ChangeSet;

    fn is_scheduled_for_update(&self, entity: &EntityRef) -> bool;

    /// Child collections of `entity` with pending changes.
    fn scheduled_collections(&self, entity: &EntityRef) -> Vec<CollectionRef>;

    fn is_collection_scheduled_for_deletion(&self, collection: &CollectionRef) -> bool;

    fn is_collection_scheduled_for_update(&self, collection: &CollectionRef) -> bool;

    /// Child collections of `entity` read during this unit of work.
    fn visited_collections(&self, entity: &EntityRef) -> Vec<CollectionRef>;

    /// Identity map lookup by entity type and storage identifier.
    fn get_by_id(&self, type_name: &str, identifier: &Bson) -> Option<EntityRef>;

    /// Registers a loaded entity together with the document it was hydrated from.
    fn register_managed(&self, entity: &EntityRef, identifier: Option<Bson>, data: &Document);
}
