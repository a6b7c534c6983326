//! Storage backend abstraction.
//!
//! The persister talks to storage exclusively through [`StoreBackend`]: single-document
//! updates and deletes, batched inserts and criteria-based reads. Criteria and mutations
//! reach the backend already compiled to storage space.
//!
//! # Traits
//!
//! - [`StoreBackend`]: The core trait for storage backends
//! - [`StoreBackendBuilder`]: Factory trait for creating backend instances
//!
//! # Examples
//!
//! ```ignore
//! use docmapper::backend::{FindOptions, StoreBackend};
//! use bson::doc;
//!
//! let ids = backend.insert_many(vec![doc! { "name": "Alice" }], "users").await?;
//! let alice = backend.find_one(doc! { "_id": ids[0].clone() }, FindOptions::default(), "users").await?;
//! ```

use async_trait::async_trait;
use bson::{Bson, Document};
use futures::stream::BoxStream;
use std::fmt::Debug;

use crate::error::MapperResult;

/// A lazily consumed sequence of raw storage documents.
pub type DocumentCursor = BoxStream<'static, MapperResult<Document>>;

/// Options applied to a read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    /// Storage-space sort specification.
    pub sort: Option<Document>,
    pub limit: Option<i64>,
    pub skip: Option<u64>,
}

impl FindOptions {
    pub fn sorted(sort: Document) -> Self {
        Self { sort: Some(sort), ..Default::default() }
    }
}

/// Options applied to a single-document write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Insert a document built from the criteria and mutation when nothing matches.
    pub upsert: bool,
}

impl WriteOptions {
    pub fn upsert() -> Self {
        Self { upsert: true }
    }
}

/// Result of [`StoreBackend::update_one`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOutcome {
    pub matched: u64,
    pub modified: u64,
    /// Identifier of the document inserted by an upsert.
    pub upserted_id: Option<Bson>,
}

/// Result of [`StoreBackend::delete_one`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub deleted: u64,
}

/// Abstract interface for document storage backends.
///
/// # Thread Safety
///
/// All implementations must be thread-safe. The persister awaits each call before
/// issuing the next one, so implementations never see concurrent writes from the
/// same persister.
///
/// # Error Handling
///
/// Backends report failures as [`MapperError::Storage`](crate::error::MapperError::Storage)
/// carrying a [`StorageErrorKind`](crate::error::StorageErrorKind). The persister relies
/// on [`StorageErrorKind::ImmutableIdentifier`](crate::error::StorageErrorKind::ImmutableIdentifier)
/// for its single retry path, so drivers must classify that failure.
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Inserts a batch of documents in one call.
    ///
    /// Documents without an `_id` get a storage-generated identifier.
    ///
    /// # Arguments
    ///
    /// * `documents` - Storage-space documents to insert
    /// * `collection` - The collection to insert into
    ///
    /// # Returns
    ///
    /// The `_id` of every inserted document, in input order.
    ///
    /// # Errors
    ///
    /// Returns a storage error if any document is rejected. Callers treat the whole
    /// batch as not written.
    async fn insert_many(
        &self,
        documents: Vec<Document>,
        collection: &str,
    ) -> MapperResult<Vec<Bson>>;

    /// Applies `mutation` to the first document matching `criteria`.
    ///
    /// # Arguments
    ///
    /// * `criteria` - Storage-space match criteria
    /// * `mutation` - Update operators (`$set`, `$unset`, `$inc`)
    /// * `options` - Write options; `upsert` inserts when nothing matches
    /// * `collection` - The collection to write to
    ///
    /// # Returns
    ///
    /// The matched and modified counts, plus the new `_id` when an upsert inserted.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the mutation is rejected. A mutation that changes
    /// `_id` must be reported as [`StorageErrorKind::ImmutableIdentifier`](crate::error::StorageErrorKind::ImmutableIdentifier).
    async fn update_one(
        &self,
        criteria: Document,
        mutation: Document,
        options: WriteOptions,
        collection: &str,
    ) -> MapperResult<UpdateOutcome>;

    /// Deletes the first document matching `criteria`.
    ///
    /// # Arguments
    ///
    /// * `criteria` - Storage-space match criteria
    /// * `collection` - The collection to delete from
    ///
    /// # Returns
    ///
    /// The number of deleted documents, `0` when nothing matched.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the delete cannot be executed.
    async fn delete_one(&self, criteria: Document, collection: &str) -> MapperResult<DeleteOutcome>;

    /// Returns the first document matching `criteria`, honouring `options.sort` and `options.skip`.
    ///
    /// # Arguments
    ///
    /// * `criteria` - Storage-space match criteria
    /// * `options` - Sort and skip; `limit` is ignored
    /// * `collection` - The collection to read from
    ///
    /// # Returns
    ///
    /// `Some(document)` if a document matched, `None` otherwise.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the criteria use an unsupported operator or the read fails.
    async fn find_one(
        &self,
        criteria: Document,
        options: FindOptions,
        collection: &str,
    ) -> MapperResult<Option<Document>>;

    /// Returns a cursor over every document matching `criteria`.
    ///
    /// # Arguments
    ///
    /// * `criteria` - Storage-space match criteria
    /// * `options` - Sort, limit and skip
    /// * `collection` - The collection to read from
    ///
    /// # Returns
    ///
    /// A stream of matching documents. Failures while iterating surface as stream items.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the query cannot be started.
    async fn find(
        &self,
        criteria: Document,
        options: FindOptions,
        collection: &str,
    ) -> MapperResult<DocumentCursor>;
}

/// Factory for backends that need asynchronous setup (connections, pools).
#[async_trait]
pub trait StoreBackendBuilder {
    type Backend: StoreBackend;

    /// Builds the backend.
    ///
    /// # Errors
    ///
    /// Returns [`MapperError::Initialization`](crate::error::MapperError::Initialization)
    /// if the backend cannot be set up.
    async fn build(self) -> MapperResult<Self::Backend>;
}
