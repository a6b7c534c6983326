//! A process-local unit of work.
//!
//! [`MemoryUnitOfWork`] keeps the identity map, the change sets the application
//! computed and the scheduled child-collection changes. It does not compute change
//! sets itself; callers record them with [`MemoryUnitOfWork::schedule_update`].

use bson::{Bson, Document};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

use docmapper_core::{
    collection::{CollectionKey, CollectionRef},
    entity::{EntityKey, EntityRef},
    tracker::{ChangeSet, FieldChange, UnitOfWork},
    value::Value,
};

#[derive(Default)]
struct State {
    identity: HashMap<(String, String), EntityRef>,
    originals: HashMap<EntityKey, Document>,
    identifiers: HashMap<EntityKey, Value>,
    change_sets: HashMap<EntityKey, ChangeSet>,
    scheduled: Vec<CollectionRef>,
    deletions: HashSet<CollectionKey>,
    updates: HashSet<CollectionKey>,
    visited: Vec<CollectionRef>,
}

/// Thread-safe unit of work backed by in-process maps.
#[derive(Default)]
pub struct MemoryUnitOfWork {
    state: RwLock<State>,
}

impl MemoryUnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the changed fields of `entity` and schedules it for update.
    pub fn schedule_update(&self, entity: &EntityRef, changes: impl IntoIterator<Item = (String, FieldChange)>) {
        self.state
            .write()
            .change_sets
            .insert(entity.key(), changes.into_iter().collect());
    }

    /// Records a single field change, keeping the other changes of `entity`.
    pub fn record_change(&self, entity: &EntityRef, field: &str, old: Option<Value>, new: Option<Value>) {
        self.state
            .write()
            .change_sets
            .entry(entity.key())
            .or_default()
            .insert(field.to_string(), FieldChange::new(old, new));
    }

    /// Overrides the identifier reported for `entity`.
    pub fn set_identifier(&self, entity: &EntityRef, identifier: impl Into<Value>) {
        self.state
            .write()
            .identifiers
            .insert(entity.key(), identifier.into());
    }

    pub fn schedule_collection_update(&self, collection: &CollectionRef) {
        let mut state = self.state.write();
        state.updates.insert(collection.key());
        schedule(&mut state.scheduled, collection);
    }

    pub fn schedule_collection_deletion(&self, collection: &CollectionRef) {
        let mut state = self.state.write();
        state.deletions.insert(collection.key());
        schedule(&mut state.scheduled, collection);
    }

    /// Marks `collection` as read during this unit of work.
    pub fn mark_visited(&self, collection: &CollectionRef) {
        schedule(&mut self.state.write().visited, collection);
    }

    /// The document `entity` was last registered with.
    pub fn original_document(&self, entity: &EntityRef) -> Option<Document> {
        self.state
            .read()
            .originals
            .get(&entity.key())
            .cloned()
    }

    pub fn is_managed(&self, entity: &EntityRef) -> bool {
        self.state
            .read()
            .originals
            .contains_key(&entity.key())
    }

    /// Number of entities in the identity map.
    pub fn identity_map_len(&self) -> usize {
        self.state.read().identity.len()
    }

    /// Forgets change sets and collection scheduling, keeping the identity map.
    pub fn commit(&self) {
        let mut state = self.state.write();
        state.change_sets.clear();
        state.scheduled.clear();
        state.deletions.clear();
        state.updates.clear();
    }

    /// Forgets everything.
    pub fn clear(&self) {
        *self.state.write() = State::default();
    }
}

fn schedule(collections: &mut Vec<CollectionRef>, collection: &CollectionRef) {
    if !collections.iter().any(|known| known.key() == collection.key()) {
        collections.push(collection.clone());
    }
}

fn owned_by(collections: &[CollectionRef], entity: &EntityRef) -> Vec<CollectionRef> {
    let owner = entity.key();
    collections
        .iter()
        .filter(|collection| collection.owner().key() == owner)
        .cloned()
        .collect()
}

fn identity_key(type_name: &str, identifier: &Bson) -> (String, String) {
    (type_name.to_string(), identifier.to_string())
}

impl UnitOfWork for MemoryUnitOfWork {
    fn identifier(&self, entity: &EntityRef) -> Option<Value> {
        self.state
            .read()
            .identifiers
            .get(&entity.key())
            .cloned()
    }

    fn change_set(&self, entity: &EntityRef) -> ChangeSet {
        self.state
            .read()
            .change_sets
            .get(&entity.key())
            .cloned()
            .unwrap_or_default()
    }

    fn is_scheduled_for_update(&self, entity: &EntityRef) -> bool {
        self.state
            .read()
            .change_sets
            .contains_key(&entity.key())
    }

    fn scheduled_collections(&self, entity: &EntityRef) -> Vec<CollectionRef> {
        owned_by(&self.state.read().scheduled, entity)
    }

    fn is_collection_scheduled_for_deletion(&self, collection: &CollectionRef) -> bool {
        self.state
            .read()
            .deletions
            .contains(&collection.key())
    }

    fn is_collection_scheduled_for_update(&self, collection: &CollectionRef) -> bool {
        self.state
            .read()
            .updates
            .contains(&collection.key())
    }

    fn visited_collections(&self, entity: &EntityRef) -> Vec<CollectionRef> {
        owned_by(&self.state.read().visited, entity)
    }

    fn get_by_id(&self, type_name: &str, identifier: &Bson) -> Option<EntityRef> {
        self.state
            .read()
            .identity
            .get(&identity_key(type_name, identifier))
            .cloned()
    }

    fn register_managed(&self, entity: &EntityRef, identifier: Option<Bson>, data: &Document) {
        let type_name = entity.entity_type();
        let mut state = self.state.write();

        if let Some(identifier) = identifier.filter(|identifier| !matches!(identifier, Bson::Null)) {
            state
                .identity
                .insert(identity_key(&type_name, &identifier), entity.clone());
        }
        state.originals.insert(entity.key(), data.clone());
        state.change_sets.remove(&entity.key());
    }
}
