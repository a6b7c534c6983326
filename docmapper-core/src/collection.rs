//! Persistent child collections.
//!
//! A [`PersistentCollection`] wraps one to-many association of an owner entity. It
//! starts out holding the raw stored data and is filled with entities by the loader.
//! Snapshots taken after a flush are the baseline for the next diff.

use async_trait::async_trait;
use bson::Bson;
use parking_lot::RwLock;
use std::{fmt, sync::Arc};

use crate::{
    entity::{EntityKey, EntityRef},
    error::MapperResult,
    hydrate::Hints,
    mapping::FieldMapping,
};

/// Identity of a collection handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionKey(usize);

pub struct PersistentCollection {
    owner: EntityRef,
    mapping: FieldMapping,
    raw: Option<Bson>,
    elements: Vec<(Option<String>, EntityRef)>,
    snapshot: Vec<(Option<String>, EntityRef)>,
    initialized: bool,
    hints: Hints,
}

/// Shared handle to a [`PersistentCollection`].
#[derive(Clone)]
pub struct CollectionRef(Arc<RwLock<PersistentCollection>>);

impl CollectionRef {
    /// Wraps the association `mapping` of `owner`, holding its stored data `raw`.
    pub fn new(owner: EntityRef, mapping: FieldMapping, raw: Option<Bson>) -> Self {
        Self(Arc::new(RwLock::new(PersistentCollection {
            owner,
            mapping,
            raw,
            elements: Vec::new(),
            snapshot: Vec::new(),
            initialized: false,
            hints: Hints::default(),
        })))
    }

    pub fn with_hints(self, hints: Hints) -> Self {
        self.0.write().hints = hints;
        self
    }

    pub fn key(&self) -> CollectionKey {
        CollectionKey(Arc::as_ptr(&self.0) as *const () as usize)
    }

    pub fn owner(&self) -> EntityRef {
        self.0.read().owner.clone()
    }

    pub fn field_mapping(&self) -> FieldMapping {
        self.0.read().mapping.clone()
    }

    pub fn hints(&self) -> Hints {
        self.0.read().hints
    }

    /// Stored entries: array items without a key, sub-document entries keyed by name.
    pub fn raw_entries(&self) -> Vec<(Option<String>, Bson)> {
        match &self.0.read().raw {
            Some(Bson::Array(items)) => items.iter().map(|item| (None, item.clone())).collect(),
            Some(Bson::Document(entries)) => entries
                .iter()
                .map(|(key, value)| (Some(key.clone()), value.clone()))
                .collect(),
            Some(Bson::Null) | None => Vec::new(),
            Some(other) => vec![(None, other.clone())],
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.0.read().initialized
    }

    /// Replaces the elements and marks the collection initialized.
    pub fn fill(&self, elements: Vec<(Option<String>, EntityRef)>) {
        let mut collection = self.0.write();
        collection.elements = elements;
        collection.initialized = true;
    }

    /// Adds an element; keyed elements replace an existing entry with the same key.
    pub fn insert(&self, key: Option<String>, entity: EntityRef) {
        let mut collection = self.0.write();
        if let Some(key) = &key {
            collection
                .elements
                .retain(|(existing, _)| existing.as_ref() != Some(key));
        }
        collection.elements.push((key, entity));
    }

    pub fn push(&self, entity: EntityRef) {
        self.insert(None, entity);
    }

    pub fn remove(&self, entity: &EntityRef) {
        let key = entity.key();
        self.0
            .write()
            .elements
            .retain(|(_, element)| element.key() != key);
    }

    pub fn entries(&self) -> Vec<(Option<String>, EntityRef)> {
        self.0.read().elements.clone()
    }

    pub fn elements(&self) -> Vec<EntityRef> {
        self.0
            .read()
            .elements
            .iter()
            .map(|(_, entity)| entity.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.0.read().elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.read().elements.is_empty()
    }

    pub fn take_snapshot(&self) {
        let mut collection = self.0.write();
        collection.snapshot = collection.elements.clone();
    }

    pub fn snapshot(&self) -> Vec<EntityRef> {
        self.0
            .read()
            .snapshot
            .iter()
            .map(|(_, entity)| entity.clone())
            .collect()
    }

    /// Elements not present in the last snapshot.
    pub fn insert_diff(&self) -> Vec<EntityRef> {
        let collection = self.0.read();
        difference(&collection.elements, &collection.snapshot)
    }

    /// Snapshot elements no longer present.
    pub fn delete_diff(&self) -> Vec<EntityRef> {
        let collection = self.0.read();
        difference(&collection.snapshot, &collection.elements)
    }
}

fn difference(
    left: &[(Option<String>, EntityRef)],
    right: &[(Option<String>, EntityRef)],
) -> Vec<EntityRef> {
    let keys = right
        .iter()
        .map(|(_, entity)| entity.key())
        .collect::<Vec<EntityKey>>();

    left.iter()
        .filter(|(_, entity)| !keys.contains(&entity.key()))
        .map(|(_, entity)| entity.clone())
        .collect()
}

impl fmt::Debug for CollectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let collection = self.0.read();
        f.debug_struct("CollectionRef")
            .field("key", &self.key())
            .field("field", &collection.mapping.name)
            .field("len", &collection.elements.len())
            .field("initialized", &collection.initialized)
            .finish()
    }
}

/// Writes child collections of an owner entity.
#[async_trait]
pub trait CollectionPersister: Send + Sync {
    /// Deletes the given collections of `owner` wholesale.
    async fn delete(&self, owner: &EntityRef, collections: &[CollectionRef]) -> MapperResult<()>;

    /// Applies element-level inserts, updates and deletes for the given collections.
    async fn update(&self, owner: &EntityRef, collections: &[CollectionRef]) -> MapperResult<()>;
}

/// Renders collection elements the way the owner's field stores them.
pub(crate) fn element_value(entries: &[(Option<String>, EntityRef)]) -> crate::value::Value {
    use crate::value::{Criteria, Value};

    if !entries.is_empty() && entries.iter().all(|(key, _)| key.is_some()) {
        return Value::Map(
            entries
                .iter()
                .filter_map(|(key, entity)| key.clone().map(|key| (key, entity.clone())))
                .collect::<Criteria>(),
        );
    }

    Value::Array(
        entries
            .iter()
            .map(|(_, entity)| Value::Entity(entity.clone()))
            .collect(),
    )
}
