//! Reference encoding.

use bson::{Bson, Document, doc};

use crate::{
    entity::EntityRef,
    error::{MapperError, MapperResult},
    mapping::{FieldMapping, ReferenceStorage},
    store::DocumentManager,
    value::Value,
};

/// A reference to a managed entity, independent of how it is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    pub target_type: String,
    pub collection: String,
    /// Storage-native identifier of the target.
    pub identifier: Bson,
    /// Database name, required by [`ReferenceStorage::DbRefWithDb`].
    pub database: Option<String>,
    /// Discriminator field and value of the target, if its hierarchy has one.
    pub discriminator: Option<(String, Bson)>,
}

impl Reference {
    /// Renders the reference in the layout of `storage`.
    pub fn render(&self, storage: ReferenceStorage) -> Bson {
        let mut document = match storage {
            ReferenceStorage::Id => return self.identifier.clone(),
            ReferenceStorage::Ref => doc! { "id": self.identifier.clone() },
            ReferenceStorage::DbRef => doc! {
                "$ref": self.collection.clone(),
                "$id": self.identifier.clone(),
            },
            ReferenceStorage::DbRefWithDb => doc! {
                "$ref": self.collection.clone(),
                "$id": self.identifier.clone(),
                "$db": self.database.clone().map(Bson::String).unwrap_or(Bson::Null),
            },
        };

        if let Some((field, value)) = &self.discriminator {
            document.insert(field.clone(), value.clone());
        }

        Bson::Document(document)
    }
}

/// Encodes entity references according to a field's reference storage policy.
pub struct ReferenceEncoder<'a> {
    manager: &'a DocumentManager,
}

impl<'a> ReferenceEncoder<'a> {
    pub fn new(manager: &'a DocumentManager) -> Self {
        Self { manager }
    }

    /// Describes a reference to `target` held by the field `field`.
    ///
    /// # Errors
    ///
    /// * [`MapperError::UnresolvedReferenceTarget`] when `target`'s type is not mapped
    /// * [`MapperError::InvalidDocument`] when `target` has no identifier yet
    /// * [`MapperError::Configuration`] when a fully qualified reference is requested
    ///   without a configured database name
    /// * [`MapperError::MappingConfiguration`] when the target's hierarchy has a
    ///   discriminator but the target has no value in it
    pub fn reference(&self, target: &EntityRef, field: &FieldMapping) -> MapperResult<Reference> {
        let target_type = target.entity_type();
        let mapping = self.manager.class_mapping(&target_type)?;

        let identifier = self
            .manager
            .storage_identifier(target, &mapping)
            .ok_or_else(|| {
                MapperError::InvalidDocument(format!(
                    "cannot reference {target_type} through \"{}\": the target has no identifier",
                    field.name
                ))
            })?;

        let database = match field.storage {
            ReferenceStorage::DbRefWithDb => Some(
                self.manager
                    .database()
                    .ok_or_else(|| {
                        MapperError::Configuration(format!(
                            "field \"{}\" stores fully qualified references but no database is configured",
                            field.name
                        ))
                    })?
                    .to_string(),
            ),
            _ => None,
        };

        let discriminator = match &mapping.discriminator {
            Some(discriminator) => {
                let value = discriminator
                    .value
                    .clone()
                    .or_else(|| discriminator.value_for(&target_type).map(String::from))
                    .ok_or_else(|| {
                        MapperError::MappingConfiguration(format!(
                            "{target_type} has no discriminator value"
                        ))
                    })?;
                Some((discriminator.field.clone(), Bson::String(value)))
            }
            None => None,
        };

        Ok(Reference {
            target_type,
            collection: mapping.collection.clone(),
            identifier,
            database,
            discriminator,
        })
    }

    /// The stored form of a reference to `target` through `field`.
    pub fn render(&self, target: &EntityRef, field: &FieldMapping) -> MapperResult<Bson> {
        Ok(self.reference(target, field)?.render(field.storage))
    }

    /// Encodes a reference to `target` stored under `name`.
    ///
    /// Insert documents and bare-identifier references produce one pair holding the
    /// whole reference. Queries against structured references match only the
    /// identifying sub-fields; a pinned target type drops `$ref` and `$db`.
    pub fn encode(
        &self,
        name: &str,
        target: &EntityRef,
        field: &FieldMapping,
        for_insert: bool,
    ) -> MapperResult<Vec<(String, Value)>> {
        let reference = self.reference(target, field)?;

        if for_insert || field.storage == ReferenceStorage::Id {
            return Ok(vec![(name.to_string(), Value::Bson(reference.render(field.storage)))]);
        }

        let keys: &[&str] = match (field.storage, field.target.is_some()) {
            (ReferenceStorage::Ref, _) => &["id"],
            (ReferenceStorage::DbRef | ReferenceStorage::DbRefWithDb, true) => &["$id"],
            (ReferenceStorage::DbRef, false) => &["$ref", "$id"],
            (ReferenceStorage::DbRefWithDb, false) => &["$ref", "$id", "$db"],
            (ReferenceStorage::Id, _) => &[],
        };

        let rendered = match reference.render(field.storage) {
            Bson::Document(document) => document,
            _ => Document::new(),
        };
        let retained = keys
            .iter()
            .filter_map(|key| rendered.get(*key).map(|value| (key.to_string(), value.clone())))
            .collect::<Document>();

        if field.is_many() {
            return Ok(vec![(
                name.to_string(),
                Value::Bson(Bson::Document(doc! { "$elemMatch": retained })),
            )]);
        }

        Ok(retained
            .into_iter()
            .map(|(key, value)| (format!("{name}.{key}"), Value::Bson(value)))
            .collect())
    }
}
