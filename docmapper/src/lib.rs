//! Main docmapper crate providing a unified interface to the persistence core.
//!
//! This crate is the primary entry point for users of docmapper. It re-exports the
//! core types from the sub-crates and provides convenient access to the storage
//! backends.
//!
//! # Features
//!
//! - **Declarative mappings** - Field names, storage names, references, embeds and shard keys
//! - **Query compilation** - Property-space criteria compiled to storage space, references included
//! - **Guarded writes** - Optimistic versions, pessimistic locks and shard-key checks
//! - **Batched persistence** - One storage call per batch of queued inserts
//! - **Collection loading** - Embedded, owning-side, inverse-side and repository-backed collections
//! - **Multiple backends** - In-memory and MongoDB storage behind one trait
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use docmapper::{prelude::*, memory::{InMemoryStore, MemoryUnitOfWork, RecordHydrator}};
//!
//! #[tokio::main]
//! async fn main() -> MapperResult<()> {
//!     let registry = MappingRegistry::new().with(
//!         ClassMapping::new("User", "users")
//!             .with_field(FieldMapping::identifier("id"))
//!             .with_field(FieldMapping::new("name").stored_as("n")),
//!     )?;
//!
//!     let manager = DocumentManager::builder()
//!         .metadata(registry.clone())
//!         .backend(InMemoryStore::new())
//!         .unit_of_work(Arc::new(MemoryUnitOfWork::new()))
//!         .hydrator(RecordHydrator::with_metadata(registry))
//!         .build()?;
//!
//!     // Queue and flush an insert
//!     let mut users = manager.persister("User")?;
//!     let alice = EntityRef::new(Record::new("User").with("name", "Alice"));
//!     users.add_insert(&alice);
//!     users.execute_inserts().await?;
//!
//!     // Criteria use entity field names; the compiler maps them to storage names
//!     let found = users
//!         .load(&Criteria::new().with("name", "Alice"), LoadOptions::default())
//!         .await?;
//!     assert!(found.is_some());
//!
//!     Ok(())
//! }
//! ```
//!
//! # Mappings From Configuration
//!
//! Class mappings are plain data and can be loaded from JSON:
//!
//! ```ignore
//! use docmapper::{config::MapperConfig, store::DocumentManager};
//!
//! let config = MapperConfig::from_json_str(include_str!("mappings.json"))?;
//! let manager = DocumentManager::builder()
//!     .config(&config)?
//!     .backend(store)
//!     .unit_of_work(unit_of_work)
//!     .hydrator(hydrator)
//!     .build()?;
//! ```
//!
//! # Backends
//!
//! - [`memory`] - In-memory storage and collaborators for development and testing
//! - [`mongodb`] - Persistent MongoDB backend (requires `mongodb` feature)

pub mod prelude;

pub use docmapper_core::{
    backend, builder, collection, config, convert, entity, error, filter, hydrate, mapping, mutation,
    persister, repository, store, tracker, value,
};

// Re-export BSON types for convenience
pub use bson;

// Collaborator traits are async; implementors need the same attribute
pub use async_trait::async_trait;

/// In-memory storage backend and collaborators.
pub mod memory {
    pub use docmapper_memory::{
        CollectionCall, CollectionWrite, InMemoryStore, InMemoryStoreBuilder, MemoryUnitOfWork, RecordHydrator,
        RecordingCollectionPersister, StoreOperation, UpdateDialect,
    };
}

/// MongoDB storage backend implementations.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use docmapper_mongodb::{MongoDbStore, MongoDbStoreBuilder};
}
