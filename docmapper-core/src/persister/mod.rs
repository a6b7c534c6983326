//! The document persister.
//!
//! A [`DocumentPersister`] executes the persistence protocol for one entity type:
//! criteria compilation, queued inserts and upserts, guarded updates and deletes,
//! lock management and loading. It owns nothing but its pending-write queues; every
//! other collaborator comes from the [`DocumentManager`].

pub mod compile;
pub mod concurrency;
pub mod load;
pub mod reference;
pub mod resolve;
pub mod shard;
pub mod write;

use bson::Document;
use std::sync::Arc;

pub use concurrency::{ConcurrencyGuard, LockMode, VersionTransition};
pub use load::LoadOptions;
pub use reference::{Reference, ReferenceEncoder};
pub use shard::ShardKeyGuard;
pub use write::PendingWrites;

use crate::{
    entity::EntityRef,
    error::MapperResult,
    filter,
    mapping::ClassMapping,
    store::DocumentManager,
    value::Criteria,
};

/// Persists and loads the entities of one class mapping.
#[derive(Debug)]
pub struct DocumentPersister {
    manager: DocumentManager,
    mapping: Arc<ClassMapping>,
    pending: PendingWrites,
}

impl DocumentPersister {
    pub fn new(manager: DocumentManager, mapping: Arc<ClassMapping>) -> Self {
        Self { manager, mapping, pending: PendingWrites::default() }
    }

    pub fn mapping(&self) -> &ClassMapping {
        &self.mapping
    }

    pub fn manager(&self) -> &DocumentManager {
        &self.manager
    }

    /// Compiles property-space criteria to storage space.
    pub fn compile_query(&self, criteria: &Criteria) -> MapperResult<Document> {
        self.manager
            .compiler()
            .compile(criteria, &self.mapping, false)
    }

    pub fn compile_field_name(&self, path: &str) -> MapperResult<String> {
        self.manager
            .compiler()
            .compile_field_name(path, &self.mapping)
    }

    pub fn compile_sort(&self, sort: &Criteria) -> MapperResult<Document> {
        self.manager
            .compiler()
            .compile_sort(sort, &self.mapping)
    }

    /// Constrains compiled criteria to this type and its subclasses.
    pub fn inject_discriminator(&self, criteria: Document) -> Document {
        filter::inject_discriminator(criteria, &self.mapping, self.manager.metadata())
    }

    /// Point query of `entity`: its identifier plus its shard key.
    pub fn query_for_entity(&self, entity: &EntityRef) -> MapperResult<Document> {
        ShardKeyGuard::new(&self.manager, &self.mapping).query_for_entity(entity)
    }

    pub fn shard_key_query(&self, entity: &EntityRef) -> MapperResult<Document> {
        ShardKeyGuard::new(&self.manager, &self.mapping).shard_key_query(entity)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use async_trait::async_trait;
    use bson::{Bson, Document, oid::ObjectId};
    use futures::StreamExt;
    use parking_lot::Mutex;
    use std::{collections::HashMap, sync::Arc};

    use crate::{
        backend::{DeleteOutcome, DocumentCursor, FindOptions, StoreBackend, UpdateOutcome, WriteOptions},
        collection::CollectionRef,
        entity::{EntityKey, EntityRef, Record},
        error::MapperResult,
        hydrate::{Hints, Hydrator},
        mapping::{
            ClassMapping, CollectionStrategy, Discriminator, FieldMapping, MappingRegistry, ReferenceStorage,
            TypeTag, VersionKind,
        },
        store::DocumentManager,
        tracker::{ChangeSet, FieldChange, UnitOfWork},
        value::Value,
    };

    /// Accepts every write and finds nothing.
    #[derive(Debug, Default)]
    pub(crate) struct NullBackend;

    #[async_trait]
    impl StoreBackend for NullBackend {
        async fn insert_many(&self, documents: Vec<Document>, _collection: &str) -> MapperResult<Vec<Bson>> {
            Ok(documents
                .iter()
                .map(|document| {
                    document
                        .get("_id")
                        .cloned()
                        .unwrap_or_else(|| Bson::ObjectId(ObjectId::new()))
                })
                .collect())
        }

        async fn update_one(
            &self,
            _criteria: Document,
            _mutation: Document,
            _options: WriteOptions,
            _collection: &str,
        ) -> MapperResult<UpdateOutcome> {
            Ok(UpdateOutcome { matched: 1, modified: 1, upserted_id: None })
        }

        async fn delete_one(&self, _criteria: Document, _collection: &str) -> MapperResult<DeleteOutcome> {
            Ok(DeleteOutcome { deleted: 1 })
        }

        async fn find_one(
            &self,
            _criteria: Document,
            _options: FindOptions,
            _collection: &str,
        ) -> MapperResult<Option<Document>> {
            Ok(None)
        }

        async fn find(
            &self,
            _criteria: Document,
            _options: FindOptions,
            _collection: &str,
        ) -> MapperResult<DocumentCursor> {
            Ok(futures::stream::empty().boxed())
        }
    }

    /// Tracks scheduled updates only.
    #[derive(Default)]
    pub(crate) struct StubUnitOfWork {
        updates: Mutex<HashMap<EntityKey, ChangeSet>>,
    }

    impl StubUnitOfWork {
        pub(crate) fn schedule_update(
            &self,
            entity: &EntityRef,
            changes: impl IntoIterator<Item = (String, FieldChange)>,
        ) {
            self.updates
                .lock()
                .insert(entity.key(), changes.into_iter().collect());
        }
    }

    impl UnitOfWork for StubUnitOfWork {
        fn change_set(&self, entity: &EntityRef) -> ChangeSet {
            self.updates
                .lock()
                .get(&entity.key())
                .cloned()
                .unwrap_or_default()
        }

        fn is_scheduled_for_update(&self, entity: &EntityRef) -> bool {
            self.updates.lock().contains_key(&entity.key())
        }

        fn scheduled_collections(&self, _entity: &EntityRef) -> Vec<CollectionRef> {
            Vec::new()
        }

        fn is_collection_scheduled_for_deletion(&self, _collection: &CollectionRef) -> bool {
            false
        }

        fn is_collection_scheduled_for_update(&self, _collection: &CollectionRef) -> bool {
            false
        }

        fn visited_collections(&self, _entity: &EntityRef) -> Vec<CollectionRef> {
            Vec::new()
        }

        fn get_by_id(&self, _type_name: &str, _identifier: &Bson) -> Option<EntityRef> {
            None
        }

        fn register_managed(&self, _entity: &EntityRef, _identifier: Option<Bson>, _data: &Document) {}
    }

    /// Hydrates records keyed by entity field name.
    pub(crate) struct StubHydrator;

    impl Hydrator for StubHydrator {
        fn hydrate(
            &self,
            mapping: &ClassMapping,
            target: Option<&EntityRef>,
            document: &Document,
            _hints: &Hints,
        ) -> MapperResult<EntityRef> {
            let entity = target
                .cloned()
                .unwrap_or_else(|| EntityRef::new(Record::new(mapping.name.clone())));
            for (key, value) in document {
                if let Some(field) = mapping.field_by_storage_name(key) {
                    entity.set(&field.name, Some(Value::from(value.clone())));
                }
            }
            Ok(entity)
        }
    }

    pub(crate) fn registry() -> MappingRegistry {
        let address = ClassMapping::new("Address", "")
            .embedded()
            .with_field(FieldMapping::new("city").stored_as("c").typed(TypeTag::String));

        let user = ClassMapping::new("User", "users")
            .with_field(FieldMapping::identifier("id"))
            .with_field(FieldMapping::new("name").stored_as("n").typed(TypeTag::String))
            .with_field(FieldMapping::new("age").stored_as("a").typed(TypeTag::Int))
            .with_field(FieldMapping::new("tags"))
            .with_field(FieldMapping::new("settings").stored_as("prefs").typed(TypeTag::Hash))
            .with_field(FieldMapping::new("address").stored_as("addr").embed_one("Address"))
            .with_field(FieldMapping::new("addresses").embed_many("Address"))
            .with_field(
                FieldMapping::new("places")
                    .embed_many("Address")
                    .with_strategy(CollectionStrategy::Hash),
            );

        let comment = ClassMapping::new("Comment", "")
            .embedded()
            .with_field(FieldMapping::new("body").typed(TypeTag::String))
            .with_field(FieldMapping::new("author").reference_one(Some("User"), ReferenceStorage::DbRef));

        let post = ClassMapping::new("Post", "posts")
            .with_field(FieldMapping::identifier("id"))
            .with_field(FieldMapping::new("title").typed(TypeTag::String))
            .with_field(FieldMapping::new("author").reference_one(Some("User"), ReferenceStorage::DbRef))
            .with_field(FieldMapping::new("editor").reference_one(Some("User"), ReferenceStorage::Ref))
            .with_field(FieldMapping::new("reviewers").reference_many(Some("User"), ReferenceStorage::Id))
            .with_field(FieldMapping::new("comments").embed_many("Comment"));

        let article = ClassMapping::new("Article", "articles")
            .with_field(FieldMapping::identifier("id"))
            .with_field(FieldMapping::new("title").typed(TypeTag::String))
            .with_field(FieldMapping::new("version").stored_as("v").typed(TypeTag::Int))
            .with_field(FieldMapping::new("lock").stored_as("lk").typed(TypeTag::Int))
            .versioned("version", VersionKind::Counter)
            .lockable("lock");

        let event = ClassMapping::new("Event", "events")
            .with_field(FieldMapping::identifier("id"))
            .with_field(FieldMapping::new("updated").stored_as("ts").typed(TypeTag::Date))
            .versioned("updated", VersionKind::Timestamp);

        let order = ClassMapping::new("Order", "orders")
            .with_field(FieldMapping::identifier("id"))
            .with_field(FieldMapping::new("region").typed(TypeTag::String))
            .with_field(FieldMapping::new("customer").reference_one(Some("User"), ReferenceStorage::Ref))
            .sharded(&["region", "customer"]);

        let discriminator = |value: &str| Discriminator {
            field: "type".into(),
            map: vec![("person".into(), "Person".into()), ("employee".into(), "Employee".into())],
            value: Some(value.into()),
            default_value: Some("person".into()),
        };
        let person = ClassMapping::new("Person", "people")
            .with_field(FieldMapping::identifier("id"))
            .with_field(FieldMapping::new("name"))
            .with_discriminator(discriminator("person"))
            .with_subclass("Employee");
        let employee = ClassMapping::new("Employee", "people")
            .with_field(FieldMapping::identifier("id"))
            .with_field(FieldMapping::new("name"))
            .with_discriminator(discriminator("employee"));

        let mut registry = MappingRegistry::new();
        for mapping in [address, user, comment, post, article, event, order, person, employee] {
            registry
                .register(mapping)
                .expect("fixture mappings are valid");
        }
        registry
    }

    pub(crate) fn manager_with() -> (DocumentManager, Arc<StubUnitOfWork>) {
        let unit_of_work = Arc::new(StubUnitOfWork::default());
        let manager = DocumentManager::builder()
            .metadata(registry())
            .backend(NullBackend)
            .unit_of_work(unit_of_work.clone())
            .hydrator(StubHydrator)
            .build()
            .expect("fixture manager is complete");

        (manager, unit_of_work)
    }

    pub(crate) fn manager() -> DocumentManager {
        manager_with().0
    }

    /// A manager whose references carry the database name `database`.
    pub(crate) fn manager_in(database: &str) -> DocumentManager {
        DocumentManager::builder()
            .metadata(registry())
            .backend(NullBackend)
            .unit_of_work(Arc::new(StubUnitOfWork::default()))
            .hydrator(StubHydrator)
            .database(database)
            .build()
            .expect("fixture manager is complete")
    }
}
