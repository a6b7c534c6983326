//! Writes: queued inserts and upserts, guarded updates and deletes, locks and
//! child-collection diffs.

use bson::{Bson, Document};
use tracing::{debug, warn};

use crate::{
    backend::WriteOptions,
    builder::document_identifier,
    collection::CollectionRef,
    entity::EntityRef,
    error::{MapperError, MapperResult, StorageErrorKind},
    mapping::IDENTIFIER_STORAGE_NAME,
    mutation::Mutation,
    persister::{ConcurrencyGuard, DocumentPersister, LockMode, ShardKeyGuard},
    value::Value,
};

/// Entities queued for insertion or upsertion, keyed by handle identity.
///
/// An entity is never queued in both sets: queueing it in one evicts it from the other.
#[derive(Debug, Default)]
pub struct PendingWrites {
    inserts: Vec<EntityRef>,
    upserts: Vec<EntityRef>,
}

impl PendingWrites {
    pub fn add_insert(&mut self, entity: &EntityRef) {
        evict(&mut self.upserts, entity);
        if !contains(&self.inserts, entity) {
            self.inserts.push(entity.clone());
        }
    }

    pub fn add_upsert(&mut self, entity: &EntityRef) {
        evict(&mut self.inserts, entity);
        if !contains(&self.upserts, entity) {
            self.upserts.push(entity.clone());
        }
    }

    pub fn inserts(&self) -> &[EntityRef] {
        &self.inserts
    }

    pub fn upserts(&self) -> &[EntityRef] {
        &self.upserts
    }

    pub fn is_queued_for_insert(&self, entity: &EntityRef) -> bool {
        contains(&self.inserts, entity)
    }

    pub fn is_queued_for_upsert(&self, entity: &EntityRef) -> bool {
        contains(&self.upserts, entity)
    }

    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.upserts.is_empty()
    }
}

fn contains(queue: &[EntityRef], entity: &EntityRef) -> bool {
    let key = entity.key();
    queue.iter().any(|queued| queued.key() == key)
}

fn evict(queue: &mut Vec<EntityRef>, entity: &EntityRef) {
    let key = entity.key();
    queue.retain(|queued| queued.key() != key);
}

impl DocumentPersister {
    /// Queues `entity` for the next [`execute_inserts`](Self::execute_inserts).
    pub fn add_insert(&mut self, entity: &EntityRef) {
        self.pending.add_insert(entity);
    }

    /// Queues `entity` for the next [`execute_upserts`](Self::execute_upserts).
    pub fn add_upsert(&mut self, entity: &EntityRef) {
        self.pending.add_upsert(entity);
    }

    pub fn pending(&self) -> &PendingWrites {
        &self.pending
    }

    /// Inserts every queued entity in one batch.
    ///
    /// Entities without an identifier receive the one generated by storage. Versioned
    /// entities get their initial version. Child-collection diffs are applied per
    /// entity in queue order afterwards.
    ///
    /// # Errors
    ///
    /// A storage failure clears the whole queue before it is returned. Failures while
    /// building documents leave the queue untouched.
    pub async fn execute_inserts(&mut self) -> MapperResult<()> {
        if self.pending.inserts.is_empty() {
            return Ok(());
        }

        let entities = self.pending.inserts.clone();
        let guard = ConcurrencyGuard::new(&self.manager, &self.mapping);
        let shard = ShardKeyGuard::new(&self.manager, &self.mapping);
        let builder = self.manager.document_builder();

        let mut documents = Vec::with_capacity(entities.len());
        let mut transitions = Vec::with_capacity(entities.len());
        for entity in &entities {
            let mut document = builder.insert_document(&self.manager, &self.mapping, entity)?;
            shard.shard_key_query(entity)?;
            transitions.push(guard.insert_version(entity, &mut document));
            documents.push(document);
        }

        let preassigned = documents
            .iter()
            .map(|document| document_identifier(document).is_some())
            .collect::<Vec<_>>();

        debug!(
            target: "docmapper::persister",
            entity_type = %self.mapping.name,
            collection = %self.mapping.collection,
            count = documents.len(),
            "inserting batch"
        );

        let identifiers = match self
            .manager
            .backend()
            .insert_many(documents, &self.mapping.collection)
            .await
        {
            Ok(identifiers) => identifiers,
            Err(err) => {
                warn!(
                    target: "docmapper::persister",
                    entity_type = %self.mapping.name,
                    count = entities.len(),
                    error = %err,
                    "batch insert failed, discarding queued inserts"
                );
                self.pending.inserts.clear();
                return Err(err);
            }
        };

        let inserted = std::mem::take(&mut self.pending.inserts);

        let identifier_field = self.mapping.identifier_name();
        for (((entity, identifier), preassigned), transition) in inserted
            .iter()
            .zip(identifiers)
            .zip(preassigned)
            .zip(transitions)
        {
            if let (false, Some(field)) = (preassigned, identifier_field) {
                entity.set(field, Some(Value::Bson(identifier)));
            }
            guard.advance(entity, transition, false);
        }

        for entity in &inserted {
            self.apply_collection_diffs(entity).await?;
        }

        Ok(())
    }

    /// Upserts every queued entity, one storage call each.
    ///
    /// Each entity leaves the queue once attempted, whether it succeeded or not.
    ///
    /// # Errors
    ///
    /// The first failure is returned; entities after it stay queued.
    pub async fn execute_upserts(&mut self) -> MapperResult<()> {
        let entities = self.pending.upserts.clone();

        for entity in entities {
            let result = self.execute_upsert(&entity).await;
            evict(&mut self.pending.upserts, &entity);

            if let Err(err) = result {
                warn!(
                    target: "docmapper::persister",
                    entity_type = %self.mapping.name,
                    error = %err,
                    "upsert failed"
                );
                return Err(err);
            }
        }

        Ok(())
    }

    async fn execute_upsert(&self, entity: &EntityRef) -> MapperResult<()> {
        let guard = ConcurrencyGuard::new(&self.manager, &self.mapping);
        let criteria = ShardKeyGuard::new(&self.manager, &self.mapping).query_for_entity(entity)?;

        let mut mutation = self
            .manager
            .document_builder()
            .upsert_mutation(&self.manager, &self.mapping, entity)?;
        let transition = guard.guard_upsert(entity, &mut mutation);

        mutation.strip_fields(criteria.keys().map(String::as_str));
        mutation.prune_empty();

        let identifier_only = mutation.is_empty();
        if identifier_only {
            let identifier = criteria
                .get(IDENTIFIER_STORAGE_NAME)
                .cloned()
                .unwrap_or(Bson::Null);
            let mut fields = Document::new();
            fields.insert(IDENTIFIER_STORAGE_NAME, identifier);
            mutation = Mutation::replace_fields(fields);
        }

        let backend = self.manager.backend();
        let collection = &self.mapping.collection;

        match backend
            .update_one(criteria.clone(), mutation.into_document(), WriteOptions::upsert(), collection)
            .await
        {
            Ok(_) => {}
            Err(err) if identifier_only && err.storage_kind() == Some(StorageErrorKind::ImmutableIdentifier) => {
                debug!(
                    target: "docmapper::persister",
                    entity_type = %self.mapping.name,
                    "storage refused to set the identifier, retrying with an empty $set"
                );
                backend
                    .update_one(criteria, Mutation::empty_set().into_document(), WriteOptions::upsert(), collection)
                    .await?;
            }
            Err(err) => return Err(err),
        }

        guard.advance(entity, transition, false);
        self.apply_collection_diffs(entity).await
    }

    /// Writes the changes of a managed entity.
    ///
    /// Versioned entities must still hold the stored version and lockable entities
    /// must not be locked by someone else.
    ///
    /// # Errors
    ///
    /// Returns [`MapperError::LockConflict`] when a guarded update matches nothing; the
    /// entity is left unchanged.
    pub async fn update(&self, entity: &EntityRef) -> MapperResult<()> {
        let guard = ConcurrencyGuard::new(&self.manager, &self.mapping);
        let mut criteria = self.query_for_entity(entity)?;

        let mut mutation = self
            .manager
            .document_builder()
            .update_mutation(&self.manager, &self.mapping, entity)?;
        mutation.strip_fields(criteria.keys().map(String::as_str));
        mutation.prune_empty();

        let transition = guard.guard_update(entity, &mut criteria, &mut mutation);

        if !mutation.is_empty() {
            let released = guard.guard_lock(entity, &mut criteria, &mut mutation);
            let identifier = criteria.get(IDENTIFIER_STORAGE_NAME).cloned();

            debug!(
                target: "docmapper::persister",
                entity_type = %self.mapping.name,
                criteria = %criteria,
                "updating document"
            );

            let outcome = self
                .manager
                .backend()
                .update_one(criteria, mutation.into_document(), WriteOptions::default(), &self.mapping.collection)
                .await?;

            if guard.is_guarded() && outcome.matched == 0 {
                return Err(MapperError::lock_conflict(&self.mapping.name, identifier.as_ref()));
            }
            guard.advance(entity, transition, released);
        }

        self.apply_collection_diffs(entity).await
    }

    /// Deletes the document of `entity`.
    ///
    /// # Errors
    ///
    /// Returns [`MapperError::LockConflict`] when a guarded delete removes nothing.
    pub async fn delete(&self, entity: &EntityRef) -> MapperResult<()> {
        let guard = ConcurrencyGuard::new(&self.manager, &self.mapping);
        let mut criteria = self.query_for_entity(entity)?;
        guard.require_unlocked(&mut criteria);
        let identifier = criteria.get(IDENTIFIER_STORAGE_NAME).cloned();

        let outcome = self
            .manager
            .backend()
            .delete_one(criteria, &self.mapping.collection)
            .await?;

        if guard.is_guarded() && outcome.deleted == 0 {
            return Err(MapperError::lock_conflict(&self.mapping.name, identifier.as_ref()));
        }

        Ok(())
    }

    /// Stores `mode` in the lock field of `entity`'s document and of `entity`.
    pub async fn lock(&self, entity: &EntityRef, mode: LockMode) -> MapperResult<()> {
        let field = self.lock_field()?;
        let criteria = self.query_for_entity(entity)?;

        let mut mutation = Mutation::new();
        mutation.set(field.storage_name.clone(), mode.as_i32());

        self.manager
            .backend()
            .update_one(criteria, mutation.into_document(), WriteOptions::default(), &self.mapping.collection)
            .await?;
        entity.set(&field.name, Some(Value::from(mode.as_i32())));

        Ok(())
    }

    /// Removes the lock field from `entity`'s document and from `entity`.
    pub async fn unlock(&self, entity: &EntityRef) -> MapperResult<()> {
        let field = self.lock_field()?;
        let criteria = self.query_for_entity(entity)?;

        let mut mutation = Mutation::new();
        mutation.unset(field.storage_name.clone());

        self.manager
            .backend()
            .update_one(criteria, mutation.into_document(), WriteOptions::default(), &self.mapping.collection)
            .await?;
        entity.set(&field.name, None);

        Ok(())
    }

    fn lock_field(&self) -> MapperResult<&crate::mapping::FieldMapping> {
        self.mapping
            .lock_field
            .as_deref()
            .and_then(|name| self.mapping.field(name))
            .ok_or_else(|| MapperError::MappingConfiguration(format!("{} is not lockable", self.mapping.name)))
    }

    /// Writes the scheduled child-collection changes of `entity`.
    ///
    /// Wholesale deletions go first, then incremental updates; afterwards every
    /// collection read during this unit of work takes a fresh snapshot.
    pub(crate) async fn apply_collection_diffs(&self, entity: &EntityRef) -> MapperResult<()> {
        let unit_of_work = self.manager.unit_of_work();

        let mut deletions = Vec::<CollectionRef>::new();
        let mut updates = Vec::<CollectionRef>::new();
        for collection in unit_of_work.scheduled_collections(entity) {
            if unit_of_work.is_collection_scheduled_for_deletion(&collection) {
                deletions.push(collection);
            } else if unit_of_work.is_collection_scheduled_for_update(&collection) {
                updates.push(collection);
            }
        }

        if !deletions.is_empty() || !updates.is_empty() {
            let persister = self.manager.collection_persister().ok_or_else(|| {
                MapperError::Configuration(format!(
                    "{} has scheduled collection changes but no collection persister is configured",
                    self.mapping.name
                ))
            })?;

            if !deletions.is_empty() {
                persister.delete(entity, &deletions).await?;
            }
            if !updates.is_empty() {
                persister.update(entity, &updates).await?;
            }
        }

        for collection in unit_of_work.visited_collections(entity) {
            collection.take_snapshot();
        }

        Ok(())
    }
}
