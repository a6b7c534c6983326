//! Document building: entities to insert documents and update mutations.

use bson::{Bson, Document};

use crate::{
    entity::EntityRef,
    error::{MapperError, MapperResult},
    mapping::{ClassMapping, FieldMapping, IDENTIFIER_STORAGE_NAME},
    mutation::Mutation,
    store::DocumentManager,
    value::Value,
};

/// Builds the storage form of entities.
///
/// Version fields are left to the concurrency guard. Child collections of an
/// existing document are written by the [`CollectionPersister`](crate::collection::CollectionPersister),
/// so update and upsert mutations skip to-many associations.
pub trait DocumentBuilder: Send + Sync {
    /// The full document stored for a new entity.
    fn insert_document(
        &self,
        manager: &DocumentManager,
        mapping: &ClassMapping,
        entity: &EntityRef,
    ) -> MapperResult<Document>;

    /// `$set`/`$unset` buckets for the changed fields of a managed entity.
    fn update_mutation(
        &self,
        manager: &DocumentManager,
        mapping: &ClassMapping,
        entity: &EntityRef,
    ) -> MapperResult<Mutation>;

    /// `$set` of every stored field of an entity that may or may not exist yet.
    fn upsert_mutation(
        &self,
        manager: &DocumentManager,
        mapping: &ClassMapping,
        entity: &EntityRef,
    ) -> MapperResult<Mutation>;

    /// The sub-document stored for an embedded entity.
    fn embedded_document(&self, manager: &DocumentManager, entity: &EntityRef) -> MapperResult<Document>;
}

/// Builds documents from class mappings.
#[derive(Debug, Default, Clone, Copy)]
pub struct MappedDocumentBuilder;

impl MappedDocumentBuilder {
    fn mapped_document(
        &self,
        manager: &DocumentManager,
        mapping: &ClassMapping,
        entity: &EntityRef,
    ) -> MapperResult<Document> {
        let version = mapping.version.as_ref().map(|version| version.field.as_str());
        let mut document = Document::new();

        for field in &mapping.fields {
            if !field.is_owning_side() || Some(field.name.as_str()) == version {
                continue;
            }
            let Some(value) = entity.get(&field.name).filter(|value| !value.is_null()) else {
                continue;
            };
            document.insert(field.storage_name.clone(), self.field_value(manager, mapping, field, value)?);
        }

        if let Some(discriminator) = &mapping.discriminator {
            let value = discriminator
                .value
                .clone()
                .or_else(|| discriminator.value_for(&mapping.name).map(String::from));
            if let Some(value) = value {
                if !document.contains_key(&discriminator.field) {
                    document.insert(discriminator.field.clone(), value);
                }
            }
        }

        Ok(document)
    }

    fn field_value(
        &self,
        manager: &DocumentManager,
        mapping: &ClassMapping,
        field: &FieldMapping,
        value: Value,
    ) -> MapperResult<Bson> {
        let compiler = manager.compiler();

        if field.identifier {
            return Ok(compiler.identifier_value(value, mapping));
        }

        if !field.is_association() {
            return Ok(compiler.storage_value(Some(field.type_tag), value));
        }

        match value {
            Value::Entity(target) => self.association_value(manager, field, &target),
            Value::Array(items) => items
                .into_iter()
                .map(|item| self.field_value(manager, mapping, field, item))
                .collect::<MapperResult<Vec<_>>>()
                .map(Bson::Array),
            Value::Map(entries) => {
                let mut document = Document::new();
                for (key, item) in entries {
                    document.insert(key, self.field_value(manager, mapping, field, item)?);
                }
                Ok(Bson::Document(document))
            }
            other => Ok(compiler.storage_value(None, other)),
        }
    }

    fn association_value(
        &self,
        manager: &DocumentManager,
        field: &FieldMapping,
        target: &EntityRef,
    ) -> MapperResult<Bson> {
        if field.embedded {
            return self
                .embedded_document(manager, target)
                .map(Bson::Document);
        }

        manager.references().render(target, field)
    }
}

impl DocumentBuilder for MappedDocumentBuilder {
    fn insert_document(
        &self,
        manager: &DocumentManager,
        mapping: &ClassMapping,
        entity: &EntityRef,
    ) -> MapperResult<Document> {
        self.mapped_document(manager, mapping, entity)
    }

    fn update_mutation(
        &self,
        manager: &DocumentManager,
        mapping: &ClassMapping,
        entity: &EntityRef,
    ) -> MapperResult<Mutation> {
        let version = mapping.version.as_ref().map(|version| version.field.as_str());
        let lock = mapping.lock_field.as_deref();
        let mut mutation = Mutation::new();

        for (name, change) in manager.unit_of_work().change_set(entity) {
            let Some(field) = mapping.field(&name) else {
                continue;
            };
            if field.identifier
                || !field.is_owning_side()
                || (field.is_association() && field.is_many())
                || Some(name.as_str()) == version
                || Some(name.as_str()) == lock
                || !change.is_changed()
            {
                continue;
            }

            match change.new.filter(|value| !value.is_null()) {
                Some(value) => {
                    let stored = self.field_value(manager, mapping, field, value)?;
                    mutation.set(field.storage_name.clone(), stored);
                }
                None => mutation.unset(field.storage_name.clone()),
            }
        }

        Ok(mutation)
    }

    fn upsert_mutation(
        &self,
        manager: &DocumentManager,
        mapping: &ClassMapping,
        entity: &EntityRef,
    ) -> MapperResult<Mutation> {
        let mut document = self.mapped_document(manager, mapping, entity)?;
        for field in &mapping.fields {
            if field.is_association() && field.is_many() {
                document.remove(&field.storage_name);
            }
        }

        if document.is_empty() {
            return Ok(Mutation::new());
        }

        Ok(Mutation::replace_fields(document))
    }

    fn embedded_document(&self, manager: &DocumentManager, entity: &EntityRef) -> MapperResult<Document> {
        let entity_type = entity.entity_type();
        match manager.metadata().class_mapping(&entity_type) {
            Some(mapping) => self.mapped_document(manager, &mapping, entity),
            None => match manager.compiler().storage_value(None, Value::Entity(entity.clone())) {
                Bson::Document(document) => Ok(document),
                other => Err(MapperError::InvalidDocument(format!(
                    "embedded {entity_type} is stored as {other}, not as a document"
                ))),
            },
        }
    }
}

/// Identifier stored in an insert document, if the entity already has one.
pub(crate) fn document_identifier(document: &Document) -> Option<&Bson> {
    document
        .get(IDENTIFIER_STORAGE_NAME)
        .filter(|identifier| !matches!(identifier, Bson::Null))
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
    fn insert_documents_encode_every_owning_field() {
        let manager = manager();
        let posts = manager.class_mapping("Post").unwrap();
        let id = ObjectId::new();
        let author = ObjectId::new();
        let reviewer = ObjectId::new();
        let post = EntityRef::new(
            Record::new("Post")
                .with("id", id.to_hex())
                .with("title", "Hello")
                .with("author", EntityRef::new(Record::new("User").with("id", author)))
                .with(
                    "reviewers",
                    vec![Value::from(EntityRef::new(Record::new("User").with("id", reviewer)))],
                )
                .with("comments", vec![Value::from(EntityRef::new(Record::new("Comment").with("body", "hi")))]),
        );

        let document = MappedDocumentBuilder
            .insert_document(&manager, &posts, &post)
            .unwrap();

        assert_eq!(
            document,
            doc! {
                "_id": id,
                "title": "Hello",
                "author": { "$ref": "users", "$id": author },
                "reviewers": [reviewer],
                "comments": [{ "body": "hi" }],
            }
        );
    }

    #[test]
    fn update_mutations_follow_the_change_set() {
        let (manager, unit_of_work) = manager_with();
        let users = manager.class_mapping("User").unwrap();
        let user = EntityRef::new(Record::new("User").with("id", ObjectId::new()).with("name", "b"));
        unit_of_work.schedule_update(
            &user,
            [
                ("name".to_string(), FieldChange::new(Some(Value::from("a")), Some(Value::from("b")))),
                ("age".to_string(), FieldChange::new(Some(Value::from(3)), None)),
                ("addresses".to_string(), FieldChange::new(None, Some(Value::Array(Vec::new())))),
            ],
        );

        let mutation = MappedDocumentBuilder
            .update_mutation(&manager, &users, &user)
            .unwrap();

        assert_eq!(
            mutation.into_document(),
            doc! { "$set": { "n": "b" }, "$unset": { "a": true } }
        );
    }

    #[test]
    fn discriminated_types_store_their_value() {
        let manager = manager();
        let employees = manager.class_mapping("Employee").unwrap();
        let employee = EntityRef::new(Record::new("Employee").with("id", 1).with("name", "x"));

        let document = MappedDocumentBuilder
            .insert_document(&manager, &employees, &employee)
            .unwrap();

        assert_eq!(document.get_str("type").unwrap(), "employee");
    }
}
