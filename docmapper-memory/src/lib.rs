//! In-memory collaborators for docmapper.
//!
//! This crate provides a thread-safe, in-memory implementation of the `StoreBackend`
//! trait together with the other collaborators a `DocumentManager` needs. It is
//! meant for development, tests and small embedded deployments.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using an async-aware RwLock
//! - **Storage-faithful updates** - `$set`/`$unset`/`$inc`, upserts and an immutable `_id`
//! - **Query support** - Logical, comparison, array and element operators over dotted paths
//! - **Call recording** - Every backend and collection call is logged for assertions
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use docmapper_core::{mapping::*, store::DocumentManager, entity::{EntityRef, Record}};
//! use docmapper_memory::{InMemoryStore, MemoryUnitOfWork, RecordHydrator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = MappingRegistry::new().with(
//!         ClassMapping::new("User", "users")
//!             .with_field(FieldMapping::identifier("id"))
//!             .with_field(FieldMapping::new("name")),
//!     )?;
//!
//!     let manager = DocumentManager::builder()
//!         .metadata(registry.clone())
//!         .backend(InMemoryStore::new())
//!         .unit_of_work(Arc::new(MemoryUnitOfWork::new()))
//!         .hydrator(RecordHydrator::with_metadata(registry))
//!         .build()?;
//!
//!     let mut users = manager.persister("User")?;
//!     users.add_insert(&EntityRef::new(Record::new("User").with("name", "Alice")));
//!     users.execute_inserts().await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmapper_memory;

pub mod collections;
pub mod evaluator;
pub mod hydrator;
pub mod store;
pub mod unit_of_work;

pub use collections::{CollectionCall, CollectionWrite, RecordingCollectionPersister};
pub use hydrator::RecordHydrator;
pub use store::{InMemoryStore, InMemoryStoreBuilder, StoreOperation, UpdateDialect};
pub use unit_of_work::MemoryUnitOfWork;
