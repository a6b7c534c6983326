//! In-memory storage implementation for the document mapper.
//!
//! Documents are kept per collection in insertion order behind an async-aware
//! read-write lock. Update semantics follow the storage server: `$set`, `$unset`
//! and `$inc` modifiers, upserts seeded from equality criteria, and an immutable
//! `_id`.

use std::{collections::HashMap, sync::Arc};
use async_trait::async_trait;
use bson::{Bson, Document, oid::ObjectId};
use futures::StreamExt;
use mea::rwlock::RwLock;
use parking_lot::Mutex;

use docmapper_core::{
    backend::{
        DeleteOutcome, DocumentCursor, FindOptions, StoreBackend, StoreBackendBuilder, UpdateOutcome,
        WriteOptions,
    },
    error::{MapperResult, StorageError, StorageErrorKind},
    mapping::IDENTIFIER_STORAGE_NAME,
    value::REFERENCE_KEYS,
};

use crate::evaluator::DocumentEvaluator;

type StoreMap = HashMap<String, Vec<Document>>;

/// How the store treats identifier modifiers and empty modifiers.
///
/// Older storage servers rejected any modifier naming `_id`, even when the value was
/// unchanged, but accepted an empty `$set`. Current servers accept a no-op `_id`
/// assignment and reject empty modifiers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UpdateDialect {
    #[default]
    Modern,
    Legacy,
}

/// One call made against the store, recorded in call order.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOperation {
    InsertMany { collection: String, documents: Vec<Document> },
    UpdateOne { collection: String, criteria: Document, mutation: Document, options: WriteOptions },
    DeleteOne { collection: String, criteria: Document },
    FindOne { collection: String, criteria: Document, options: FindOptions },
    Find { collection: String, criteria: Document, options: FindOptions },
}

impl StoreOperation {
    pub fn collection(&self) -> &str {
        match self {
            StoreOperation::InsertMany { collection, .. }
            | StoreOperation::UpdateOne { collection, .. }
            | StoreOperation::DeleteOne { collection, .. }
            | StoreOperation::FindOne { collection, .. }
            | StoreOperation::Find { collection, .. } => collection,
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(
            self,
            StoreOperation::InsertMany { .. } | StoreOperation::UpdateOne { .. } | StoreOperation::DeleteOne { .. }
        )
    }
}

/// Thread-safe in-memory document storage backend.
///
/// This struct implements the [`StoreBackend`] trait on top of BSON documents held in
/// memory. Every call is recorded as a [`StoreOperation`], which makes the store
/// suitable for asserting on the exact criteria and mutations a persister issues.
///
/// # Thread Safety
///
/// `InMemoryStore` is cloneable and uses `Arc`-wrapped internal state. Clones of the
/// same instance share the same documents and the same operation log.
///
/// # Performance
///
/// Queries scan all documents in a collection (no indexing).
///
/// # Example
///
/// ```ignore
/// use docmapper_memory::InMemoryStore;
/// use docmapper_core::backend::{FindOptions, StoreBackend};
/// use bson::doc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = InMemoryStore::new();
///
///     let ids = store.insert_many(vec![doc! { "name": "Alice" }], "users").await?;
///     let alice = store.find_one(doc! { "_id": ids[0].clone() }, FindOptions::default(), "users").await?;
///     assert!(alice.is_some());
///
///     Ok(())
/// }
/// ```
#[derive(Default, Clone, Debug)]
pub struct InMemoryStore {
    /// The main storage map: collection_name -> documents in insertion order
    store: Arc<RwLock<StoreMap>>,
    operations: Arc<Mutex<Vec<StoreOperation>>>,
    failures: Arc<Mutex<Vec<StorageError>>>,
    dialect: UpdateDialect,
}

impl InMemoryStore {
    /// Creates a new empty in-memory document store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder for constructing an `InMemoryStore` with custom options.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use docmapper_memory::{InMemoryStore, UpdateDialect};
    ///
    /// let store = InMemoryStore::builder()
    ///     .dialect(UpdateDialect::Legacy)
    ///     .build()
    ///     .await?;
    /// ```
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }

    pub fn dialect(&self) -> UpdateDialect {
        self.dialect
    }

    /// Stores `documents` directly, bypassing the operation log.
    pub async fn seed(&self, collection: &str, documents: impl IntoIterator<Item = Document>) {
        self.store
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .extend(documents);
    }

    /// Snapshot of the documents of `collection`, in insertion order.
    pub async fn documents(&self, collection: &str) -> Vec<Document> {
        self.store
            .read()
            .await
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Every call made so far, in call order.
    pub fn operations(&self) -> Vec<StoreOperation> {
        self.operations.lock().clone()
    }

    /// The write calls made so far, in call order.
    pub fn writes(&self) -> Vec<StoreOperation> {
        self.operations
            .lock()
            .iter()
            .filter(|operation| operation.is_write())
            .cloned()
            .collect()
    }

    pub fn clear_operations(&self) {
        self.operations.lock().clear();
    }

    /// Makes the next write fail with `error` after it has been recorded.
    pub fn fail_next_write(&self, error: StorageError) {
        self.failures.lock().push(error);
    }

    fn record(&self, operation: StoreOperation) -> MapperResult<()> {
        let write = operation.is_write();
        self.operations.lock().push(operation);

        if write {
            let mut failures = self.failures.lock();
            if !failures.is_empty() {
                return Err(failures.remove(0).into());
            }
        }

        Ok(())
    }

    /// Validates the shape of an update document before anything is matched.
    fn check_mutation(&self, mutation: &Document) -> MapperResult<()> {
        if mutation.is_empty() {
            return Err(invalid_mutation("update document is empty"));
        }

        for (operator, fields) in mutation {
            if !matches!(operator.as_str(), "$set" | "$unset" | "$inc") {
                return Err(invalid_mutation(&format!("unknown modifier: {operator}")));
            }
            let Bson::Document(fields) = fields else {
                return Err(invalid_mutation(&format!("modifier {operator} needs a document")));
            };

            match self.dialect {
                UpdateDialect::Legacy => {
                    if fields.keys().any(|field| is_identifier_path(field)) {
                        return Err(StorageError::new(
                            StorageErrorKind::ImmutableIdentifier,
                            "Mod on _id not allowed",
                        )
                        .into());
                    }
                },
                UpdateDialect::Modern => {
                    if fields.is_empty() {
                        return Err(invalid_mutation(&format!(
                            "'{operator}' is empty. You must specify a field like so: {{{operator}: {{<field>: ...}}}}"
                        )));
                    }
                },
            }
        }

        Ok(())
    }
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    async fn insert_many(&self, documents: Vec<Document>, collection: &str) -> MapperResult<Vec<Bson>> {
        self.record(StoreOperation::InsertMany {
            collection: collection.to_string(),
            documents: documents.clone(),
        })?;

        let mut store = self.store.write().await;
        let existing = store
            .entry(collection.to_string())
            .or_default();

        let mut ids = Vec::with_capacity(documents.len());
        let mut batch = Vec::with_capacity(documents.len());
        for document in documents {
            let document = with_identifier(document);
            let id = document
                .get(IDENTIFIER_STORAGE_NAME)
                .cloned()
                .unwrap_or(Bson::Null);

            if ids.contains(&id) || existing.iter().any(|stored| stored.get(IDENTIFIER_STORAGE_NAME) == Some(&id)) {
                return Err(duplicate_key(collection, &id));
            }

            ids.push(id);
            batch.push(document);
        }

        existing.extend(batch);

        Ok(ids)
    }

    async fn update_one(
        &self,
        criteria: Document,
        mutation: Document,
        options: WriteOptions,
        collection: &str,
    ) -> MapperResult<UpdateOutcome> {
        self.record(StoreOperation::UpdateOne {
            collection: collection.to_string(),
            criteria: criteria.clone(),
            mutation: mutation.clone(),
            options,
        })?;
        self.check_mutation(&mutation)?;

        let mut store = self.store.write().await;
        let documents = store
            .entry(collection.to_string())
            .or_default();

        let mut position = None;
        for (index, document) in documents.iter().enumerate() {
            if DocumentEvaluator::new(document).matches(&criteria)? {
                position = Some(index);
                break;
            }
        }

        if let Some(index) = position {
            let current = &documents[index];
            let mut updated = current.clone();
            apply_mutation(&mut updated, &mutation)?;

            if updated.get(IDENTIFIER_STORAGE_NAME) != current.get(IDENTIFIER_STORAGE_NAME) {
                return Err(StorageError::new(
                    StorageErrorKind::ImmutableIdentifier,
                    "Performing an update on the path '_id' would modify the immutable field '_id'",
                )
                .into());
            }

            let modified = updated != *current;
            documents[index] = updated;

            return Ok(UpdateOutcome { matched: 1, modified: u64::from(modified), upserted_id: None });
        }

        if !options.upsert {
            return Ok(UpdateOutcome::default());
        }

        let mut seeded = seed_from_criteria(&criteria);
        let seeded_id = seeded.get(IDENTIFIER_STORAGE_NAME).cloned();
        apply_mutation(&mut seeded, &mutation)?;
        if seeded_id.is_some() && seeded.get(IDENTIFIER_STORAGE_NAME) != seeded_id.as_ref() {
            return Err(StorageError::new(
                StorageErrorKind::ImmutableIdentifier,
                "Performing an update on the path '_id' would modify the immutable field '_id'",
            )
            .into());
        }

        let seeded = with_identifier(seeded);
        let id = seeded
            .get(IDENTIFIER_STORAGE_NAME)
            .cloned()
            .unwrap_or(Bson::Null);
        if documents.iter().any(|stored| stored.get(IDENTIFIER_STORAGE_NAME) == Some(&id)) {
            return Err(duplicate_key(collection, &id));
        }
        documents.push(seeded);

        Ok(UpdateOutcome { matched: 0, modified: 0, upserted_id: Some(id) })
    }

    async fn delete_one(&self, criteria: Document, collection: &str) -> MapperResult<DeleteOutcome> {
        self.record(StoreOperation::DeleteOne {
            collection: collection.to_string(),
            criteria: criteria.clone(),
        })?;

        let mut store = self.store.write().await;
        let Some(documents) = store.get_mut(collection) else {
            return Ok(DeleteOutcome::default());
        };

        for index in 0..documents.len() {
            if DocumentEvaluator::new(&documents[index]).matches(&criteria)? {
                documents.remove(index);
                return Ok(DeleteOutcome { deleted: 1 });
            }
        }

        Ok(DeleteOutcome::default())
    }

    async fn find_one(
        &self,
        criteria: Document,
        options: FindOptions,
        collection: &str,
    ) -> MapperResult<Option<Document>> {
        self.record(StoreOperation::FindOne {
            collection: collection.to_string(),
            criteria: criteria.clone(),
            options: options.clone(),
        })?;

        let options = FindOptions { limit: Some(1), ..options };

        Ok(self
            .query(&criteria, &options, collection)
            .await?
            .into_iter()
            .next())
    }

    async fn find(
        &self,
        criteria: Document,
        options: FindOptions,
        collection: &str,
    ) -> MapperResult<DocumentCursor> {
        self.record(StoreOperation::Find {
            collection: collection.to_string(),
            criteria: criteria.clone(),
            options: options.clone(),
        })?;

        let documents = self
            .query(&criteria, &options, collection)
            .await?;

        Ok(futures::stream::iter(documents.into_iter().map(Ok)).boxed())
    }
}

impl InMemoryStore {
    async fn query(&self, criteria: &Document, options: &FindOptions, collection: &str) -> MapperResult<Vec<Document>> {
        let store = self.store.read().await;
        let Some(documents) = store.get(collection) else {
            return Ok(Vec::new());
        };

        let mut matched = DocumentEvaluator::filter_documents(documents.iter(), criteria)?;
        if let Some(sort) = &options.sort {
            DocumentEvaluator::sort_documents(&mut matched, sort);
        }

        let limit = match options.limit {
            Some(limit) if limit != 0 => limit.unsigned_abs() as usize,
            _ => usize::MAX,
        };

        Ok(matched
            .into_iter()
            .skip(options.skip.unwrap_or(0) as usize)
            .take(limit)
            .collect())
    }
}

fn invalid_mutation(message: &str) -> docmapper_core::error::MapperError {
    StorageError::new(StorageErrorKind::InvalidMutation, message).into()
}

fn duplicate_key(collection: &str, id: &Bson) -> docmapper_core::error::MapperError {
    StorageError::new(
        StorageErrorKind::DuplicateKey,
        format!("E11000 duplicate key error collection: {collection} index: _id_ dup key: {{ _id: {id} }}"),
    )
    .into()
}

fn is_identifier_path(field: &str) -> bool {
    field == IDENTIFIER_STORAGE_NAME || field.starts_with("_id.")
}

/// Puts a generated `_id` in front of documents that have none.
fn with_identifier(document: Document) -> Document {
    if document
        .get(IDENTIFIER_STORAGE_NAME)
        .is_some_and(|id| !matches!(id, Bson::Null))
    {
        return document;
    }

    let mut identified = Document::new();
    identified.insert(IDENTIFIER_STORAGE_NAME, ObjectId::new());
    for (key, value) in document {
        if key != IDENTIFIER_STORAGE_NAME {
            identified.insert(key, value);
        }
    }
    identified
}

/// The document an upsert starts from: the equality parts of its criteria.
fn seed_from_criteria(criteria: &Document) -> Document {
    let mut seeded = Document::new();
    seed_into(&mut seeded, criteria);
    seeded
}

fn seed_into(seeded: &mut Document, criteria: &Document) {
    for (key, condition) in criteria {
        if key == "$and" {
            if let Bson::Array(clauses) = condition {
                for clause in clauses {
                    if let Bson::Document(clause) = clause {
                        seed_into(seeded, clause);
                    }
                }
            }
            continue;
        }
        if key.starts_with('$') {
            continue;
        }

        let value = match condition {
            Bson::Document(operators)
                if operators
                    .keys()
                    .next()
                    .is_some_and(|first| first.starts_with('$') && !REFERENCE_KEYS.contains(&first.as_str())) =>
            {
                match operators.get("$eq") {
                    Some(value) => value.clone(),
                    None => continue,
                }
            },
            other => other.clone(),
        };
        set_path(seeded, key, value);
    }
}

fn apply_mutation(document: &mut Document, mutation: &Document) -> MapperResult<()> {
    for (operator, fields) in mutation {
        let Bson::Document(fields) = fields else {
            continue;
        };

        for (path, value) in fields {
            match operator.as_str() {
                "$set" => set_path(document, path, value.clone()),
                "$unset" => unset_path(document, path),
                "$inc" => {
                    let current = get_path(document, path).unwrap_or(Bson::Int32(0));
                    set_path(document, path, increment(&current, value, path)?);
                },
                _ => {},
            }
        }
    }

    Ok(())
}

fn increment(current: &Bson, by: &Bson, path: &str) -> MapperResult<Bson> {
    Ok(match (current, by) {
        (Bson::Int32(a), Bson::Int32(b)) => Bson::Int32(a + b),
        (Bson::Int32(a), Bson::Int64(b)) => Bson::Int64(i64::from(*a) + b),
        (Bson::Int64(a), Bson::Int32(b)) => Bson::Int64(a + i64::from(*b)),
        (Bson::Int64(a), Bson::Int64(b)) => Bson::Int64(a + b),
        (Bson::Double(a), Bson::Double(b)) => Bson::Double(a + b),
        (Bson::Double(a), Bson::Int32(b)) => Bson::Double(a + f64::from(*b)),
        (Bson::Double(a), Bson::Int64(b)) => Bson::Double(a + *b as f64),
        (Bson::Int32(a), Bson::Double(b)) => Bson::Double(f64::from(*a) + b),
        (Bson::Int64(a), Bson::Double(b)) => Bson::Double(*a as f64 + b),
        _ => {
            return Err(invalid_mutation(&format!(
                "Cannot apply $inc to a value of non-numeric type at '{path}'"
            )));
        },
    })
}

fn get_path(document: &Document, path: &str) -> Option<Bson> {
    match path.split_once('.') {
        Some((head, rest)) => match document.get(head)? {
            Bson::Document(child) => get_path(child, rest),
            _ => None,
        },
        None => document.get(path).cloned(),
    }
}

fn set_path(document: &mut Document, path: &str, value: Bson) {
    match path.split_once('.') {
        Some((head, rest)) => {
            if !matches!(document.get(head), Some(Bson::Document(_))) {
                document.insert(head, Document::new());
            }
            if let Some(Bson::Document(child)) = document.get_mut(head) {
                set_path(child, rest, value);
            }
        },
        None => {
            document.insert(path, value);
        },
    }
}

fn unset_path(document: &mut Document, path: &str) {
    match path.split_once('.') {
        Some((head, rest)) => {
            if let Some(Bson::Document(child)) = document.get_mut(head) {
                unset_path(child, rest);
            }
        },
        None => {
            document.remove(path);
        },
    }
}

/// Builder for constructing [`InMemoryStore`] instances.
///
/// # Example
///
/// ```ignore
/// use docmapper_memory::InMemoryStore;
/// use docmapper_core::backend::StoreBackendBuilder;
///
/// #[tokio::main]
/// async fn main() {
///     let store = InMemoryStore::builder().build().await.unwrap();
/// }
/// ```
#[derive(Default)]
pub struct InMemoryStoreBuilder {
    dialect: UpdateDialect,
}

impl InMemoryStoreBuilder {
    pub fn dialect(mut self, dialect: UpdateDialect) -> Self {
        self.dialect = dialect;
        self
    }
}

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    /// Builds and returns a new [`InMemoryStore`] instance.
    ///
    /// This always succeeds and returns a freshly initialized store.
    async fn build(self) -> MapperResult<Self::Backend> {
        Ok(InMemoryStore { dialect: self.dialect, ..InMemoryStore::default() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn inserts_assign_missing_identifiers() {
        let store = InMemoryStore::new();

        let ids = store
            .insert_many(vec![doc! { "_id": 1, "n": "a" }, doc! { "n": "b" }], "users")
            .await
            .unwrap();

        assert_eq!(ids[0], Bson::Int32(1));
        assert!(matches!(ids[1], Bson::ObjectId(_)));
        assert_eq!(store.documents("users").await.len(), 2);
    }

    #[tokio::test]
    async fn duplicate_identifiers_abort_the_whole_batch() {
        let store = InMemoryStore::new();
        store.seed("users", [doc! { "_id": 1 }]).await;

        let err = store
            .insert_many(vec![doc! { "_id": 2 }, doc! { "_id": 1 }], "users")
            .await
            .unwrap_err();

        assert_eq!(err.storage_kind(), Some(StorageErrorKind::DuplicateKey));
        assert_eq!(store.documents("users").await, vec![doc! { "_id": 1 }]);
    }

    #[tokio::test]
    async fn updates_apply_modifiers_to_the_first_match() {
        let store = InMemoryStore::new();
        store.seed("articles", [doc! { "_id": 1, "v": 3_i64, "t": "a" }]).await;

        let outcome = store
            .update_one(
                doc! { "_id": 1, "v": 3_i64 },
                doc! { "$set": { "t": "b", "meta.seen": true }, "$inc": { "v": 1_i64 }, "$unset": { "missing": true } },
                WriteOptions::default(),
                "articles",
            )
            .await
            .unwrap();

        assert_eq!(outcome.matched, 1);
        assert_eq!(
            store.documents("articles").await,
            vec![doc! { "_id": 1, "v": 4_i64, "t": "b", "meta": { "seen": true } }]
        );
    }

    #[tokio::test]
    async fn upserts_seed_from_equality_criteria() {
        let store = InMemoryStore::new();

        let outcome = store
            .update_one(
                doc! { "_id": 7, "region": "eu", "lk": { "$exists": false } },
                doc! { "$set": { "n": "x" } },
                WriteOptions::upsert(),
                "orders",
            )
            .await
            .unwrap();

        assert_eq!(outcome.upserted_id, Some(Bson::Int32(7)));
        assert_eq!(store.documents("orders").await, vec![doc! { "_id": 7, "region": "eu", "n": "x" }]);
    }

    #[tokio::test]
    async fn dialects_disagree_on_identifier_modifiers() {
        let modern = InMemoryStore::new();
        let legacy = InMemoryStore::builder()
            .dialect(UpdateDialect::Legacy)
            .build()
            .await
            .unwrap();

        modern
            .update_one(doc! { "_id": 1 }, doc! { "$set": { "_id": 1 } }, WriteOptions::upsert(), "c")
            .await
            .unwrap();
        let err = modern
            .update_one(doc! { "_id": 2 }, doc! { "$set": {} }, WriteOptions::upsert(), "c")
            .await
            .unwrap_err();
        assert_eq!(err.storage_kind(), Some(StorageErrorKind::InvalidMutation));

        let err = legacy
            .update_one(doc! { "_id": 1 }, doc! { "$set": { "_id": 1 } }, WriteOptions::upsert(), "c")
            .await
            .unwrap_err();
        assert_eq!(err.storage_kind(), Some(StorageErrorKind::ImmutableIdentifier));
        legacy
            .update_one(doc! { "_id": 1 }, doc! { "$set": {} }, WriteOptions::upsert(), "c")
            .await
            .unwrap();
        assert_eq!(legacy.documents("c").await, vec![doc! { "_id": 1 }]);
    }

    #[tokio::test]
    async fn identifiers_cannot_change() {
        let store = InMemoryStore::new();
        store.seed("c", [doc! { "_id": 1 }]).await;

        let err = store
            .update_one(doc! { "_id": 1 }, doc! { "$set": { "_id": 2 } }, WriteOptions::default(), "c")
            .await
            .unwrap_err();

        assert_eq!(err.storage_kind(), Some(StorageErrorKind::ImmutableIdentifier));
    }

    #[tokio::test]
    async fn finds_sort_skip_and_limit() {
        let store = InMemoryStore::new();
        store
            .seed("users", (1..=5).map(|n| doc! { "_id": n, "a": 10 - n }))
            .await;

        let found = store
            .find(
                doc! { "a": { "$gte": 6 } },
                FindOptions { sort: Some(doc! { "a": 1 }), limit: Some(2), skip: Some(1) },
                "users",
            )
            .await
            .unwrap()
            .try_collect::<Vec<_>>()
            .await
            .unwrap();

        assert_eq!(found, vec![doc! { "_id": 3, "a": 7 }, doc! { "_id": 2, "a": 8 }]);
    }

    #[tokio::test]
    async fn injected_failures_hit_the_next_write_only() {
        let store = InMemoryStore::new();
        store.fail_next_write(StorageError::other("boom"));

        assert!(store.insert_many(vec![doc! {}], "c").await.is_err());
        assert!(store.insert_many(vec![doc! {}], "c").await.is_ok());
        assert_eq!(store.writes().len(), 2);
        assert_eq!(store.documents("c").await.len(), 1);
    }
}
