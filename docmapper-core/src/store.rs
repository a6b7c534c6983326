//! The document manager: the set of collaborators shared by every persister.
//!
//! # Example
//!
//! ```ignore
//! use docmapper::store::DocumentManager;
//!
//! let manager = DocumentManager::builder()
//!     .metadata(registry)
//!     .backend(InMemoryStore::new())
//!     .unit_of_work(MemoryUnitOfWork::new())
//!     .hydrator(RecordHydrator)
//!     .build()?;
//!
//! let mut users = manager.persister("User")?;
//! users.add_insert(&user);
//! users.execute_inserts().await?;
//! ```

use bson::Bson;
use std::{collections::HashMap, fmt, sync::Arc};

use crate::{
    backend::StoreBackend,
    builder::{DocumentBuilder, MappedDocumentBuilder},
    collection::CollectionPersister,
    config::MapperConfig,
    convert::{NativeValueConverter, ValueConverter},
    entity::EntityRef,
    error::{MapperError, MapperResult},
    filter::{FilterSource, NoFilters},
    hydrate::Hydrator,
    mapping::{ClassMapping, MetadataProvider},
    persister::{DocumentPersister, compile::QueryCompiler, reference::ReferenceEncoder},
    repository::Repository,
    tracker::UnitOfWork,
    value::Value,
};

struct Collaborators {
    metadata: Arc<dyn MetadataProvider>,
    backend: Arc<dyn StoreBackend>,
    unit_of_work: Arc<dyn UnitOfWork>,
    hydrator: Arc<dyn Hydrator>,
    converter: Arc<dyn ValueConverter>,
    filters: Arc<dyn FilterSource>,
    builder: Arc<dyn DocumentBuilder>,
    collections: Option<Arc<dyn CollectionPersister>>,
    repositories: HashMap<String, Arc<dyn Repository>>,
    database: Option<String>,
}

/// Cheaply cloneable handle to the mapper's collaborators.
#[derive(Clone)]
pub struct DocumentManager {
    inner: Arc<Collaborators>,
}

impl DocumentManager {
    pub fn builder() -> DocumentManagerBuilder {
        DocumentManagerBuilder::default()
    }

    pub fn metadata(&self) -> &dyn MetadataProvider {
        self.inner.metadata.as_ref()
    }

    pub fn backend(&self) -> &dyn StoreBackend {
        self.inner.backend.as_ref()
    }

    pub fn unit_of_work(&self) -> &dyn UnitOfWork {
        self.inner.unit_of_work.as_ref()
    }

    pub fn hydrator(&self) -> &dyn Hydrator {
        self.inner.hydrator.as_ref()
    }

    pub fn converter(&self) -> &dyn ValueConverter {
        self.inner.converter.as_ref()
    }

    pub fn filters(&self) -> &dyn FilterSource {
        self.inner.filters.as_ref()
    }

    pub fn document_builder(&self) -> &dyn DocumentBuilder {
        self.inner.builder.as_ref()
    }

    pub fn collection_persister(&self) -> Option<&dyn CollectionPersister> {
        self.inner.collections.as_deref()
    }

    /// Repository registered for the entity type `type_name`.
    pub fn repository(&self, type_name: &str) -> Option<&dyn Repository> {
        self.inner
            .repositories
            .get(type_name)
            .map(|repository| repository.as_ref())
    }

    /// Database name used for `$db` in fully qualified references.
    pub fn database(&self) -> Option<&str> {
        self.inner.database.as_deref()
    }

    /// Mapping of `type_name`, failing with [`MapperError::UnresolvedReferenceTarget`].
    pub fn class_mapping(&self, type_name: &str) -> MapperResult<Arc<ClassMapping>> {
        self.metadata().require(type_name)
    }

    /// Creates a persister for the entity type `type_name`.
    pub fn persister(&self, type_name: &str) -> MapperResult<DocumentPersister> {
        Ok(DocumentPersister::new(self.clone(), self.class_mapping(type_name)?))
    }

    pub fn compiler(&self) -> QueryCompiler<'_> {
        QueryCompiler::new(self)
    }

    pub fn references(&self) -> ReferenceEncoder<'_> {
        ReferenceEncoder::new(self)
    }

    /// Property-space identifier of `entity`, preferring the unit of work's view.
    pub fn identifier_of(&self, entity: &EntityRef, mapping: &ClassMapping) -> Option<Value> {
        self.unit_of_work()
            .identifier(entity)
            .or_else(|| entity.get(mapping.identifier_name()?))
            .filter(|value| !value.is_null())
    }

    /// Storage-native identifier of `entity`.
    pub fn storage_identifier(&self, entity: &EntityRef, mapping: &ClassMapping) -> Option<Bson> {
        self.identifier_of(entity, mapping)
            .map(|value| self.compiler().identifier_value(value, mapping))
    }
}

impl fmt::Debug for DocumentManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentManager")
            .field("backend", &self.inner.backend)
            .field("database", &self.inner.database)
            .field("repositories", &self.inner.repositories.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Builder for [`DocumentManager`].
///
/// Metadata, backend, unit of work and hydrator are required. The value converter,
/// filter source and document builder default to [`NativeValueConverter`],
/// [`NoFilters`] and [`MappedDocumentBuilder`].
#[derive(Default)]
pub struct DocumentManagerBuilder {
    metadata: Option<Arc<dyn MetadataProvider>>,
    backend: Option<Arc<dyn StoreBackend>>,
    unit_of_work: Option<Arc<dyn UnitOfWork>>,
    hydrator: Option<Arc<dyn Hydrator>>,
    converter: Option<Arc<dyn ValueConverter>>,
    filters: Option<Arc<dyn FilterSource>>,
    builder: Option<Arc<dyn DocumentBuilder>>,
    collections: Option<Arc<dyn CollectionPersister>>,
    repositories: HashMap<String, Arc<dyn Repository>>,
    database: Option<String>,
}

impl DocumentManagerBuilder {
    pub fn metadata(mut self, metadata: impl MetadataProvider + 'static) -> Self {
        self.metadata = Some(Arc::new(metadata));
        self
    }

    /// Uses the mappings and database name of `config`.
    ///
    /// # Errors
    ///
    /// Returns [`MapperError::MappingConfiguration`] when a mapping fails validation.
    pub fn config(mut self, config: &MapperConfig) -> MapperResult<Self> {
        self.metadata = Some(Arc::new(config.registry()?));
        self.database = config.database.clone();
        Ok(self)
    }

    pub fn backend(mut self, backend: impl StoreBackend + 'static) -> Self {
        self.backend = Some(Arc::new(backend));
        self
    }

    pub fn unit_of_work(mut self, unit_of_work: Arc<dyn UnitOfWork>) -> Self {
        self.unit_of_work = Some(unit_of_work);
        self
    }

    pub fn hydrator(mut self, hydrator: impl Hydrator + 'static) -> Self {
        self.hydrator = Some(Arc::new(hydrator));
        self
    }

    pub fn converter(mut self, converter: impl ValueConverter + 'static) -> Self {
        self.converter = Some(Arc::new(converter));
        self
    }

    pub fn filters(mut self, filters: impl FilterSource + 'static) -> Self {
        self.filters = Some(Arc::new(filters));
        self
    }

    pub fn document_builder(mut self, builder: impl DocumentBuilder + 'static) -> Self {
        self.builder = Some(Arc::new(builder));
        self
    }

    pub fn collection_persister(mut self, persister: Arc<dyn CollectionPersister>) -> Self {
        self.collections = Some(persister);
        self
    }

    /// Registers the repository of the entity type `type_name`.
    pub fn repository(mut self, type_name: &str, repository: impl Repository + 'static) -> Self {
        self.repositories
            .insert(type_name.to_string(), Arc::new(repository));
        self
    }

    pub fn database(mut self, database: &str) -> Self {
        self.database = Some(database.to_string());
        self
    }

    /// # Errors
    ///
    /// Returns [`MapperError::Configuration`] when a required collaborator is missing.
    pub fn build(self) -> MapperResult<DocumentManager> {
        let missing = |name: &str| MapperError::Configuration(format!("no {name} configured"));

        Ok(DocumentManager {
            inner: Arc::new(Collaborators {
                metadata: self.metadata.ok_or_else(|| missing("metadata provider"))?,
                backend: self.backend.ok_or_else(|| missing("store backend"))?,
                unit_of_work: self.unit_of_work.ok_or_else(|| missing("unit of work"))?,
                hydrator: self.hydrator.ok_or_else(|| missing("hydrator"))?,
                converter: self
                    .converter
                    .unwrap_or_else(|| Arc::new(NativeValueConverter)),
                filters: self.filters.unwrap_or_else(|| Arc::new(NoFilters)),
                builder: self
                    .builder
                    .unwrap_or_else(|| Arc::new(MappedDocumentBuilder)),
                collections: self.collections,
                repositories: self.repositories,
                database: self.database,
            }),
        })
    }
}
