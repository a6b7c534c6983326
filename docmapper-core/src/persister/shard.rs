//! Shard-key validation and point queries.

use bson::{Bson, Document};

use crate::{
    entity::EntityRef,
    error::{MapperError, MapperResult, ShardKeyViolation},
    mapping::{ClassMapping, FieldMapping, IDENTIFIER_STORAGE_NAME},
    store::DocumentManager,
    value::Value,
};

/// Validates the shard key of a sharded class and folds it into point queries.
///
/// Every single-document write of a sharded class must name the full shard key,
/// and a managed entity may never change it. Unsharded classes pass through
/// untouched.
pub struct ShardKeyGuard<'a> {
    manager: &'a DocumentManager,
    mapping: &'a ClassMapping,
}

impl<'a> ShardKeyGuard<'a> {
    pub fn new(manager: &'a DocumentManager, mapping: &'a ClassMapping) -> Self {
        Self { manager, mapping }
    }

    /// Storage criteria matching the shard key of `entity`; empty when unsharded.
    ///
    /// # Errors
    ///
    /// * [`ShardKeyViolation::Immutable`] when a scheduled update changes a key field
    /// * [`ShardKeyViolation::Missing`] when the entity has no value for a key field
    pub fn shard_key_query(&self, entity: &EntityRef) -> MapperResult<Document> {
        let mut query = Document::new();

        for key in &self.mapping.shard_key {
            let field = self.mapping.field_by_storage_name(key).ok_or_else(|| {
                MapperError::MappingConfiguration(format!(
                    "{}: shard key field \"{key}\" is not mapped",
                    self.mapping.name
                ))
            })?;

            let value = self.guard(entity, field)?;

            match value {
                Value::Entity(target) if field.is_reference_one() => {
                    let compiler = self.manager.compiler();
                    for (path, part) in self
                        .manager
                        .references()
                        .encode(key, &target, field, false)?
                    {
                        query.insert(path, compiler.storage_value(None, part));
                    }
                }
                value => {
                    query.insert(
                        key.clone(),
                        self.manager
                            .compiler()
                            .storage_value(Some(field.type_tag), value),
                    );
                }
            }
        }

        Ok(query)
    }

    /// `{_id: <identifier>}` plus the shard key of `entity`.
    ///
    /// # Errors
    ///
    /// Returns [`MapperError::InvalidDocument`] when `entity` has no identifier, and the
    /// errors of [`shard_key_query`](Self::shard_key_query).
    pub fn query_for_entity(&self, entity: &EntityRef) -> MapperResult<Document> {
        let identifier = self
            .manager
            .storage_identifier(entity, self.mapping)
            .ok_or_else(|| {
                MapperError::InvalidDocument(format!("{} has no identifier", self.mapping.name))
            })?;

        let mut query = Document::new();
        query.insert(IDENTIFIER_STORAGE_NAME, identifier);
        for (key, value) in self.shard_key_query(entity)? {
            query.insert(key, value);
        }

        Ok(query)
    }

    fn guard(&self, entity: &EntityRef, field: &FieldMapping) -> MapperResult<Value> {
        let unit_of_work = self.manager.unit_of_work();
        if unit_of_work.is_scheduled_for_update(entity)
            && unit_of_work
                .change_set(entity)
                .get(&field.name)
                .is_some_and(|change| change.is_changed())
        {
            return Err(ShardKeyViolation::Immutable {
                field: field.name.clone(),
                entity_type: self.mapping.name.clone(),
            }
            .into());
        }

        entity
            .get(&field.name)
            .filter(|value| !matches!(value, Value::Bson(Bson::Null)))
            .ok_or_else(|| {
                ShardKeyViolation::Missing {
                    field: field.name.clone(),
                    entity_type: self.mapping.name.clone(),
                }
                .into()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        entity::Record,
        persister::testing::{manager, manager_with},
        tracker::FieldChange,
    };
    use bson::{doc, oid::ObjectId};

    #[test]
    fn unsharded_types_have_an_empty_shard_query() {
        let manager = manager();
        let users = manager.class_mapping("User").unwrap();
        let user = EntityRef::new(Record::new("User").with("id", ObjectId::new()));

        assert!(ShardKeyGuard::new(&manager, &users).shard_key_query(&user).unwrap().is_empty());
    }

    #[test]
    fn point_queries_include_scalar_and_reference_keys() {
        let manager = manager();
        let orders = manager.class_mapping("Order").unwrap();
        let id = ObjectId::new();
        let customer = ObjectId::new();
        let order = EntityRef::new(
            Record::new("Order")
                .with("id", id)
                .with("region", "eu")
                .with("customer", EntityRef::new(Record::new("User").with("id", customer))),
        );

        let query = ShardKeyGuard::new(&manager, &orders)
            .query_for_entity(&order)
            .unwrap();

        assert_eq!(query, doc! { "_id": id, "region": "eu", "customer.id": customer });
    }

    #[test]
    fn missing_keys_are_rejected() {
        let manager = manager();
        let orders = manager.class_mapping("Order").unwrap();
        let order = EntityRef::new(Record::new("Order").with("id", ObjectId::new()));

        let err = ShardKeyGuard::new(&manager, &orders)
            .shard_key_query(&order)
            .unwrap_err();

        assert!(matches!(
            err,
            MapperError::ShardKey(ShardKeyViolation::Missing { ref field, .. }) if field == "region"
        ));
    }

    #[test]
    fn changed_keys_are_rejected_on_update() {
        let (manager, unit_of_work) = manager_with();
        let orders = manager.class_mapping("Order").unwrap();
        let order = EntityRef::new(Record::new("Order").with("id", ObjectId::new()).with("region", "us"));
        unit_of_work.schedule_update(
            &order,
            [("region".to_string(), FieldChange::new(Some(Value::from("eu")), Some(Value::from("us"))))],
        );

        let err = ShardKeyGuard::new(&manager, &orders)
            .shard_key_query(&order)
            .unwrap_err();

        assert!(matches!(err, MapperError::ShardKey(ShardKeyViolation::Immutable { .. })));
    }
}
