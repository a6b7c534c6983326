//! Convenient re-exports of commonly used types from docmapper.
//!
//! Import this prelude module to quickly access the most frequently used types
//! and traits without needing to import from multiple sub-modules:
//!
//! ```ignore
//! use docmapper::prelude::*;
//! ```
//!
//! This provides access to:
//! - Mappings and the metadata provider
//! - Entities, values and criteria
//! - The document manager and persister
//! - Collaborator traits
//! - Error types

pub use docmapper_core::{
    backend::{StoreBackend, StoreBackendBuilder, FindOptions, WriteOptions, DocumentCursor},
    collection::{CollectionPersister, CollectionRef},
    entity::{Accessors, AnyEntity, Entity, EntityRef, Record},
    filter::{FilterSource, StaticFilters},
    hydrate::{Hints, Hydrator},
    mapping::{
        ClassMapping, CollectionStrategy, Discriminator, FieldMapping, MappingRegistry, MetadataProvider,
        ReferenceStorage, TypeTag, VersionKind,
    },
    persister::{DocumentPersister, LoadOptions, LockMode},
    repository::{Repository, RepositoryResult},
    store::DocumentManager,
    tracker::{ChangeSet, FieldChange, UnitOfWork},
    value::{Criteria, Value},
    error::{MapperError, MapperResult, StorageError, StorageErrorKind},
};
