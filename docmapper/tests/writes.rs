mod common;

use bson::{Bson, doc, oid::ObjectId};
use docmapper::{
    collection::CollectionRef,
    error::ShardKeyViolation,
    memory::{CollectionWrite, InMemoryStore, StoreOperation, UpdateDialect},
    prelude::*,
};

use common::{harness, harness_with, user};

#[tokio::test]
async fn queued_inserts_share_one_storage_call() {
    let harness = harness();
    let mut users = harness.persister("User");
    let ada = EntityRef::new(Record::new("User").with("name", "Ada").with("age", 36));
    let bob = EntityRef::new(Record::new("User").with("name", "Bob"));

    users.add_insert(&ada);
    users.add_insert(&bob);
    users.execute_inserts().await.unwrap();

    let writes = harness.store.writes();
    assert_eq!(writes.len(), 1);
    let StoreOperation::InsertMany { collection, documents } = &writes[0] else {
        panic!("expected a batch insert, got {writes:?}");
    };
    assert_eq!(collection, "users");
    assert_eq!(documents, &vec![doc! { "n": "Ada", "a": 36 }, doc! { "n": "Bob" }]);

    let stored = harness.store.documents("users").await;
    assert_eq!(ada.get("id"), Some(Value::Bson(stored[0].get("_id").cloned().unwrap())));
    assert_eq!(bob.get("id"), Some(Value::Bson(stored[1].get("_id").cloned().unwrap())));
    assert!(users.pending().is_empty());
}

#[tokio::test]
async fn preassigned_identifiers_are_kept() {
    let harness = harness();
    let mut users = harness.persister("User");
    let id = ObjectId::new();
    let ada = user(id, "Ada");

    users.add_insert(&ada);
    users.execute_inserts().await.unwrap();

    assert_eq!(harness.store.documents("users").await, vec![doc! { "_id": id, "n": "Ada" }]);
    assert_eq!(ada.get("id"), Some(Value::from(id)));
}

#[tokio::test]
async fn inserted_versions_start_at_one() {
    let harness = harness();
    let mut articles = harness.persister("Article");
    let article = EntityRef::new(Record::new("Article").with("id", ObjectId::new()).with("title", "a"));

    articles.add_insert(&article);
    articles.execute_inserts().await.unwrap();

    assert_eq!(article.get("version"), Some(Value::from(1_i64)));
    assert_eq!(harness.store.documents("articles").await[0].get_i64("v").unwrap(), 1);
}

#[tokio::test]
async fn identifier_only_upserts_set_the_identifier() {
    let harness = harness();
    let mut users = harness.persister("User");
    let id = ObjectId::new();

    users.add_upsert(&EntityRef::new(Record::new("User").with("id", id)));
    users.execute_upserts().await.unwrap();

    assert_eq!(
        harness.store.writes(),
        vec![StoreOperation::UpdateOne {
            collection: "users".into(),
            criteria: doc! { "_id": id },
            mutation: doc! { "$set": { "_id": id } },
            options: WriteOptions::upsert(),
        }]
    );
    assert_eq!(harness.store.documents("users").await, vec![doc! { "_id": id }]);
}

#[tokio::test]
async fn legacy_storage_gets_an_empty_set_on_retry() {
    let store = InMemoryStore::builder()
        .dialect(UpdateDialect::Legacy)
        .build()
        .await
        .unwrap();
    let harness = harness_with(store, |builder| builder);
    let mut users = harness.persister("User");
    let id = ObjectId::new();

    users.add_upsert(&EntityRef::new(Record::new("User").with("id", id)));
    users.execute_upserts().await.unwrap();

    let mutations = harness
        .store
        .writes()
        .into_iter()
        .filter_map(|operation| match operation {
            StoreOperation::UpdateOne { mutation, .. } => Some(mutation),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(mutations, vec![doc! { "$set": { "_id": id } }, doc! { "$set": {} }]);
    assert_eq!(harness.store.documents("users").await, vec![doc! { "_id": id }]);
}

#[tokio::test]
async fn upserts_write_every_field_but_the_criteria() {
    let harness = harness();
    let mut users = harness.persister("User");
    let id = ObjectId::new();

    users.add_upsert(&user(id, "Ada"));
    users.execute_upserts().await.unwrap();

    let StoreOperation::UpdateOne { mutation, .. } = &harness.store.writes()[0] else {
        panic!("expected an update");
    };
    assert_eq!(mutation, &doc! { "$set": { "n": "Ada" } });
    assert_eq!(harness.store.documents("users").await, vec![doc! { "_id": id, "n": "Ada" }]);
}

#[tokio::test]
async fn upserted_versions_match_storage() {
    let harness = harness();
    let mut articles = harness.persister("Article");
    let id = ObjectId::new();
    harness
        .store
        .seed("articles", [doc! { "_id": id, "title": "old", "v": 5_i64 }])
        .await;
    let article = EntityRef::new(Record::new("Article").with("id", id).with("title", "new"));

    articles.add_upsert(&article);
    articles.execute_upserts().await.unwrap();

    let StoreOperation::UpdateOne { criteria, mutation, .. } = &harness.store.writes()[0] else {
        panic!("expected an update");
    };
    assert_eq!(criteria, &doc! { "_id": id });
    assert_eq!(mutation, &doc! { "$set": { "title": "new", "v": 1_i64 } });
    assert_eq!(article.get("version"), Some(Value::from(1_i64)));
    assert_eq!(harness.store.documents("articles").await[0].get_i64("v").unwrap(), 1);

    harness.unit_of_work.schedule_update(
        &article,
        [("title".to_string(), FieldChange::new(Some(Value::from("new")), Some(Value::from("newer"))))],
    );
    articles.update(&article).await.unwrap();

    assert_eq!(
        harness.store.documents("articles").await,
        vec![doc! { "_id": id, "title": "newer", "v": 2_i64 }]
    );
    assert_eq!(article.get("version"), Some(Value::from(2_i64)));
}

#[tokio::test]
async fn fresh_upserts_keep_the_in_memory_version() {
    let harness = harness();
    let mut articles = harness.persister("Article");
    let id = ObjectId::new();
    let article = EntityRef::new(
        Record::new("Article")
            .with("id", id)
            .with("title", "draft")
            .with("version", 3_i64),
    );

    articles.add_upsert(&article);
    articles.execute_upserts().await.unwrap();

    assert_eq!(
        harness.store.documents("articles").await,
        vec![doc! { "_id": id, "title": "draft", "v": 3_i64 }]
    );
    assert_eq!(article.get("version"), Some(Value::from(3_i64)));
}

#[tokio::test]
async fn versioned_updates_check_and_advance_the_version() {
    let harness = harness();
    let articles = harness.persister("Article");
    let id = ObjectId::new();
    harness
        .store
        .seed("articles", [doc! { "_id": id, "title": "a", "v": 3_i64 }])
        .await;
    let article = EntityRef::new(
        Record::new("Article")
            .with("id", id)
            .with("title", "b")
            .with("version", 3_i64),
    );
    harness.unit_of_work.schedule_update(
        &article,
        [("title".to_string(), FieldChange::new(Some(Value::from("a")), Some(Value::from("b"))))],
    );

    articles.update(&article).await.unwrap();

    let StoreOperation::UpdateOne { criteria, .. } = &harness.store.writes()[0] else {
        panic!("expected an update");
    };
    assert_eq!(criteria, &doc! { "_id": id, "v": 3_i64, "lk": { "$exists": false } });
    assert_eq!(
        harness.store.documents("articles").await,
        vec![doc! { "_id": id, "title": "b", "v": 4_i64 }]
    );
    assert_eq!(article.get("version"), Some(Value::from(4_i64)));
}

#[tokio::test]
async fn stale_versions_conflict() {
    let harness = harness();
    let articles = harness.persister("Article");
    let id = ObjectId::new();
    harness
        .store
        .seed("articles", [doc! { "_id": id, "title": "a", "v": 5_i64 }])
        .await;
    let article = EntityRef::new(Record::new("Article").with("id", id).with("version", 3_i64));
    harness.unit_of_work.schedule_update(
        &article,
        [("title".to_string(), FieldChange::new(None, Some(Value::from("b"))))],
    );

    let err = articles.update(&article).await.unwrap_err();

    assert!(matches!(err, MapperError::LockConflict { ref entity_type, .. } if entity_type == "Article"));
    assert_eq!(article.get("version"), Some(Value::from(3_i64)));
    assert_eq!(harness.store.documents("articles").await[0].get_str("title").unwrap(), "a");
}

#[tokio::test]
async fn locks_are_stored_and_block_loads_and_deletes() {
    let harness = harness();
    let articles = harness.persister("Article");
    let id = ObjectId::new();
    harness
        .store
        .seed("articles", [doc! { "_id": id, "v": 1_i64 }])
        .await;
    let article = EntityRef::new(Record::new("Article").with("id", id).with("version", 1_i64));

    articles.lock(&article, LockMode::PessimisticWrite).await.unwrap();
    assert_eq!(harness.store.documents("articles").await[0].get_i32("lk").unwrap(), 4);
    assert_eq!(article.get("lock"), Some(Value::from(4)));

    let err = articles.load_by_id(id).await.unwrap_err();
    assert!(matches!(err, MapperError::LockConflict { .. }));

    let err = articles.delete(&article).await.unwrap_err();
    assert!(matches!(err, MapperError::LockConflict { .. }));

    articles.unlock(&article).await.unwrap();
    assert_eq!(article.get("lock"), None);
    articles.delete(&article).await.unwrap();
    assert!(harness.store.documents("articles").await.is_empty());
}

#[tokio::test]
async fn updates_release_a_held_lock() {
    let harness = harness();
    let articles = harness.persister("Article");
    let id = ObjectId::new();
    harness
        .store
        .seed("articles", [doc! { "_id": id, "title": "a", "v": 1_i64, "lk": 2 }])
        .await;
    let article = EntityRef::new(
        Record::new("Article")
            .with("id", id)
            .with("title", "b")
            .with("version", 1_i64)
            .with("lock", 2),
    );
    harness.unit_of_work.schedule_update(
        &article,
        [("title".to_string(), FieldChange::new(Some(Value::from("a")), Some(Value::from("b"))))],
    );

    articles.update(&article).await.unwrap();

    assert_eq!(
        harness.store.documents("articles").await,
        vec![doc! { "_id": id, "title": "b", "v": 2_i64 }]
    );
    assert_eq!(article.get("lock"), None);
}

#[tokio::test]
async fn missing_shard_keys_never_reach_storage() {
    let harness = harness();
    let mut orders = harness.persister("Order");
    let customer = user(ObjectId::new(), "Ada");
    let order = EntityRef::new(
        Record::new("Order")
            .with("id", ObjectId::new())
            .with("customer", customer),
    );

    orders.add_insert(&order);
    let err = orders.execute_inserts().await.unwrap_err();

    assert!(matches!(
        err,
        MapperError::ShardKey(ShardKeyViolation::Missing { ref field, .. }) if field == "region"
    ));
    assert!(harness.store.operations().is_empty());
    assert!(orders.pending().is_queued_for_insert(&order));
}

#[tokio::test]
async fn shard_keys_join_the_point_query() {
    let harness = harness();
    let orders = harness.persister("Order");
    let id = ObjectId::new();
    let customer_id = ObjectId::new();
    let order = EntityRef::new(
        Record::new("Order")
            .with("id", id)
            .with("region", "eu")
            .with("customer", user(customer_id, "Ada")),
    );

    orders.delete(&order).await.unwrap();

    assert_eq!(
        harness.store.writes(),
        vec![StoreOperation::DeleteOne {
            collection: "orders".into(),
            criteria: doc! { "_id": id, "region": "eu", "customer.id": customer_id },
        }]
    );
}

#[tokio::test]
async fn changed_shard_keys_are_rejected() {
    let harness = harness();
    let orders = harness.persister("Order");
    let order = EntityRef::new(
        Record::new("Order")
            .with("id", ObjectId::new())
            .with("region", "us")
            .with("customer", user(ObjectId::new(), "Ada")),
    );
    harness.unit_of_work.schedule_update(
        &order,
        [("region".to_string(), FieldChange::new(Some(Value::from("eu")), Some(Value::from("us"))))],
    );

    let err = orders.update(&order).await.unwrap_err();

    assert!(matches!(err, MapperError::ShardKey(ShardKeyViolation::Immutable { .. })));
    assert!(harness.store.operations().is_empty());
}

#[tokio::test]
async fn failed_batches_discard_the_queue() {
    let harness = harness();
    let mut users = harness.persister("User");
    users.add_insert(&user(ObjectId::new(), "Ada"));
    users.add_insert(&user(ObjectId::new(), "Bob"));
    harness
        .store
        .fail_next_write(StorageError::other("connection reset"));

    let err = users.execute_inserts().await.unwrap_err();

    assert_eq!(err.storage_kind(), Some(StorageErrorKind::Other));
    assert!(users.pending().inserts().is_empty());
    assert!(harness.store.documents("users").await.is_empty());
}

#[tokio::test]
async fn failed_upserts_leave_the_queue() {
    let harness = harness();
    let mut users = harness.persister("User");
    let first = user(ObjectId::new(), "Ada");
    let second = user(ObjectId::new(), "Bob");
    users.add_upsert(&first);
    users.add_upsert(&second);
    harness
        .store
        .fail_next_write(StorageError::other("connection reset"));

    assert!(users.execute_upserts().await.is_err());
    assert!(!users.pending().is_queued_for_upsert(&first));
    assert!(users.pending().is_queued_for_upsert(&second));

    users.execute_upserts().await.unwrap();
    assert!(users.pending().is_empty());
    assert_eq!(harness.store.documents("users").await.len(), 1);
}

#[tokio::test]
async fn collection_deletions_run_before_updates() {
    let harness = harness();
    let mut users = harness.persister("User");
    let ada = user(ObjectId::new(), "Ada");
    let mapping = users.mapping().clone();
    let favorites = CollectionRef::new(ada.clone(), mapping.field("favorites").unwrap().clone(), None);
    let addresses = CollectionRef::new(ada.clone(), mapping.field("addresses").unwrap().clone(), None);
    addresses.push(EntityRef::new(Record::new("Address").with("city", "Oslo")));

    harness.unit_of_work.schedule_collection_update(&addresses);
    harness.unit_of_work.schedule_collection_deletion(&favorites);
    harness.unit_of_work.mark_visited(&addresses);

    users.add_insert(&ada);
    users.execute_inserts().await.unwrap();

    let calls = harness.collections.calls();
    assert_eq!(
        calls
            .iter()
            .map(|call| (call.write, call.field.as_str()))
            .collect::<Vec<_>>(),
        vec![(CollectionWrite::Delete, "favorites"), (CollectionWrite::Update, "addresses")]
    );
    assert_eq!(calls[1].inserted, 1);
    assert!(addresses.insert_diff().is_empty());
}

#[tokio::test]
async fn collection_changes_need_a_collection_persister() {
    let store = InMemoryStore::new();
    let registry = common::registry();
    let unit_of_work = std::sync::Arc::new(docmapper::memory::MemoryUnitOfWork::new());
    let manager = DocumentManager::builder()
        .metadata(registry.clone())
        .backend(store)
        .unit_of_work(unit_of_work.clone())
        .hydrator(docmapper::memory::RecordHydrator::with_metadata(registry))
        .build()
        .unwrap();
    let users = manager.persister("User").unwrap();
    let ada = user(ObjectId::new(), "Ada");
    let addresses = CollectionRef::new(ada.clone(), users.mapping().field("addresses").unwrap().clone(), None);
    unit_of_work.schedule_collection_update(&addresses);
    unit_of_work.schedule_update(
        &ada,
        [("name".to_string(), FieldChange::new(Some(Value::from("A")), Some(Value::from("Ada"))))],
    );

    let err = users.update(&ada).await.unwrap_err();

    assert!(matches!(err, MapperError::Configuration(_)));
}

#[tokio::test]
async fn unmanaged_identifier_comes_from_the_unit_of_work() {
    let harness = harness();
    let users = harness.persister("User");
    let id = ObjectId::new();
    harness.store.seed("users", [doc! { "_id": id, "n": "A" }]).await;
    let ada = EntityRef::new(Record::new("User").with("name", "Ada"));
    harness.unit_of_work.set_identifier(&ada, id);
    harness.unit_of_work.schedule_update(
        &ada,
        [("name".to_string(), FieldChange::new(Some(Value::from("A")), Some(Value::from("Ada"))))],
    );

    users.update(&ada).await.unwrap();

    assert_eq!(
        harness.store.documents("users").await,
        vec![doc! { "_id": Bson::ObjectId(id), "n": "Ada" }]
    );
}
