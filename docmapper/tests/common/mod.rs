#![allow(dead_code)]

use std::sync::Arc;

use docmapper::{
    memory::{InMemoryStore, MemoryUnitOfWork, RecordHydrator, RecordingCollectionPersister},
    prelude::*,
    store::DocumentManagerBuilder,
};

pub struct Harness {
    pub manager: DocumentManager,
    pub store: InMemoryStore,
    pub unit_of_work: Arc<MemoryUnitOfWork>,
    pub collections: RecordingCollectionPersister,
}

impl Harness {
    pub fn persister(&self, type_name: &str) -> DocumentPersister {
        self.manager
            .persister(type_name)
            .expect("fixture type is mapped")
    }
}

fn people_discriminator(value: &str) -> Discriminator {
    Discriminator {
        field: "type".into(),
        map: vec![("person".into(), "Person".into()), ("employee".into(), "Employee".into())],
        value: Some(value.into()),
        default_value: Some("person".into()),
    }
}

pub fn registry() -> MappingRegistry {
    let address = ClassMapping::new("Address", "")
        .embedded()
        .with_field(FieldMapping::new("city").stored_as("c").typed(TypeTag::String));

    let user = ClassMapping::new("User", "users")
        .with_field(FieldMapping::identifier("id"))
        .with_field(FieldMapping::new("name").stored_as("n").typed(TypeTag::String))
        .with_field(FieldMapping::new("age").stored_as("a").typed(TypeTag::Int))
        .with_field(FieldMapping::new("active").typed(TypeTag::Bool))
        .with_field(FieldMapping::new("address").stored_as("addr").embed_one("Address"))
        .with_field(FieldMapping::new("addresses").embed_many("Address"))
        .with_field(FieldMapping::new("favorites").reference_many(Some("Post"), ReferenceStorage::Ref))
        .with_field(
            FieldMapping::new("posts")
                .reference_many(Some("Post"), ReferenceStorage::Id)
                .mapped_by("author")
                .with_sort("title", 1),
        )
        .with_field(
            FieldMapping::new("recent")
                .reference_many(Some("Post"), ReferenceStorage::Id)
                .with_repository_method("recent_for")
                .with_prime("author"),
        );

    let post = ClassMapping::new("Post", "posts")
        .with_field(FieldMapping::identifier("id"))
        .with_field(FieldMapping::new("title").typed(TypeTag::String))
        .with_field(FieldMapping::new("author").reference_one(Some("User"), ReferenceStorage::DbRef))
        .with_field(FieldMapping::new("reviewers").reference_many(Some("User"), ReferenceStorage::Id));

    let article = ClassMapping::new("Article", "articles")
        .with_field(FieldMapping::identifier("id"))
        .with_field(FieldMapping::new("title").typed(TypeTag::String))
        .with_field(FieldMapping::new("version").stored_as("v").typed(TypeTag::Int))
        .with_field(FieldMapping::new("lock").stored_as("lk").typed(TypeTag::Int))
        .versioned("version", VersionKind::Counter)
        .lockable("lock");

    let order = ClassMapping::new("Order", "orders")
        .with_field(FieldMapping::identifier("id"))
        .with_field(FieldMapping::new("region").typed(TypeTag::String))
        .with_field(FieldMapping::new("customer").reference_one(Some("User"), ReferenceStorage::Ref))
        .sharded(&["region", "customer"]);

    let person = ClassMapping::new("Person", "people")
        .with_field(FieldMapping::identifier("id"))
        .with_field(FieldMapping::new("name"))
        .with_discriminator(people_discriminator("person"))
        .with_subclass("Employee");
    let employee = ClassMapping::new("Employee", "people")
        .with_field(FieldMapping::identifier("id"))
        .with_field(FieldMapping::new("name"))
        .with_discriminator(people_discriminator("employee"));

    let mut registry = MappingRegistry::new();
    for mapping in [address, user, post, article, order, person, employee] {
        registry
            .register(mapping)
            .expect("fixture mappings are valid");
    }
    registry
}

pub fn harness() -> Harness {
    harness_with(InMemoryStore::new(), |builder| builder)
}

/// Builds a harness around `store`; `configure` may add filters or repositories.
pub fn harness_with(
    store: InMemoryStore,
    configure: impl FnOnce(DocumentManagerBuilder) -> DocumentManagerBuilder,
) -> Harness {
    let registry = registry();
    let unit_of_work = Arc::new(MemoryUnitOfWork::new());
    let collections = RecordingCollectionPersister::new();

    let builder = DocumentManager::builder()
        .metadata(registry.clone())
        .backend(store.clone())
        .unit_of_work(unit_of_work.clone())
        .hydrator(RecordHydrator::with_metadata(registry))
        .collection_persister(Arc::new(collections.clone()));

    let manager = configure(builder)
        .build()
        .expect("fixture manager is complete");

    Harness { manager, store, unit_of_work, collections }
}

pub fn user(id: bson::oid::ObjectId, name: &str) -> EntityRef {
    EntityRef::new(Record::new("User").with("id", id).with("name", name))
}
