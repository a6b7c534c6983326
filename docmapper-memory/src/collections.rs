//! A collection persister that records what it is asked to write.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

use docmapper_core::{
    collection::{CollectionPersister, CollectionRef},
    entity::EntityRef,
    error::MapperResult,
};

/// Kind of collection write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionWrite {
    Delete,
    Update,
}

/// One recorded collection write: kind, owner type and field name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionCall {
    pub write: CollectionWrite,
    pub owner_type: String,
    pub field: String,
    /// Elements added since the last snapshot (updates only).
    pub inserted: usize,
    /// Elements removed since the last snapshot (updates only).
    pub deleted: usize,
}

/// Records collection writes instead of performing them.
///
/// Clones share the same log.
#[derive(Debug, Default, Clone)]
pub struct RecordingCollectionPersister {
    calls: Arc<Mutex<Vec<CollectionCall>>>,
}

impl RecordingCollectionPersister {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<CollectionCall> {
        self.calls.lock().clone()
    }

    fn record(&self, write: CollectionWrite, owner: &EntityRef, collections: &[CollectionRef]) {
        let owner_type = owner.entity_type();
        let mut calls = self.calls.lock();

        for collection in collections {
            let (inserted, deleted) = match write {
                CollectionWrite::Delete => (0, 0),
                CollectionWrite::Update => (collection.insert_diff().len(), collection.delete_diff().len()),
            };
            calls.push(CollectionCall {
                write,
                owner_type: owner_type.clone(),
                field: collection.field_mapping().name,
                inserted,
                deleted,
            });
        }
    }
}

#[async_trait]
impl CollectionPersister for RecordingCollectionPersister {
    async fn delete(&self, owner: &EntityRef, collections: &[CollectionRef]) -> MapperResult<()> {
        tracing::debug!(target: "docmapper::memory", owner = %owner.entity_type(), count = collections.len(), "deleting collections");
        self.record(CollectionWrite::Delete, owner, collections);
        Ok(())
    }

    async fn update(&self, owner: &EntityRef, collections: &[CollectionRef]) -> MapperResult<()> {
        tracing::debug!(target: "docmapper::memory", owner = %owner.entity_type(), count = collections.len(), "updating collections");
        self.record(CollectionWrite::Update, owner, collections);
        Ok(())
    }
}
