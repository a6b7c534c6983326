//! Class mapping metadata.
//!
//! A [`ClassMapping`] describes how one entity type is laid out in storage: its
//! collection, identifier, field encodings, versioning, locking, sharding and
//! polymorphism. Mappings are immutable once registered and are shared through
//! [`Arc`]. The [`MappingRegistry`] is the default [`MetadataProvider`].

use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt, str::FromStr, sync::Arc};

use crate::error::{MapperError, MapperResult};

/// Storage name of every identifier field.
pub const IDENTIFIER_STORAGE_NAME: &str = "_id";

/// Storage value type of a field, used to pick the storage value conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeTag {
    /// Object identifier; hex strings are converted to `ObjectId`.
    Id,
    /// UUID; strings are converted to UUID binaries.
    Uuid,
    String,
    Int,
    Float,
    Bool,
    /// Date; RFC 3339 strings and epoch milliseconds are converted to BSON dates.
    Date,
    /// Free-form sub-document, never traversed by the path resolver.
    Hash,
    /// Stored as given.
    #[default]
    Raw,
}

/// How many targets an association holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    #[default]
    One,
    Many,
}

/// How a reference to another entity is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ReferenceStorage {
    /// The bare target identifier.
    #[default]
    Id,
    /// `{id: <identifier>}`.
    Ref,
    /// `{$ref: <collection>, $id: <identifier>}`.
    DbRef,
    /// `{$ref: <collection>, $id: <identifier>, $db: <database>}`.
    DbRefWithDb,
}

impl ReferenceStorage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceStorage::Id => "id",
            ReferenceStorage::Ref => "ref",
            ReferenceStorage::DbRef => "db_ref",
            ReferenceStorage::DbRefWithDb => "db_ref_with_db",
        }
    }

    /// Storage path of the target identifier inside a reference stored under `field`.
    pub fn identifier_path(&self, field: &str) -> String {
        match self {
            ReferenceStorage::Id => field.to_string(),
            ReferenceStorage::Ref => format!("{field}.id"),
            ReferenceStorage::DbRef | ReferenceStorage::DbRefWithDb => format!("{field}.$id"),
        }
    }

    pub fn is_db_ref(&self) -> bool {
        matches!(self, ReferenceStorage::DbRef | ReferenceStorage::DbRefWithDb)
    }
}

impl FromStr for ReferenceStorage {
    type Err = MapperError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "id" => Ok(ReferenceStorage::Id),
            "ref" => Ok(ReferenceStorage::Ref),
            "db_ref" | "dbRef" => Ok(ReferenceStorage::DbRef),
            "db_ref_with_db" | "dbRefWithDb" => Ok(ReferenceStorage::DbRefWithDb),
            other => Err(MapperError::MappingConfiguration(format!(
                "unknown reference storage policy \"{other}\""
            ))),
        }
    }
}

impl TryFrom<String> for ReferenceStorage {
    type Error = MapperError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ReferenceStorage> for String {
    fn from(value: ReferenceStorage) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ReferenceStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage layout of a to-many association.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionStrategy {
    /// Stored as a BSON array.
    #[default]
    List,
    /// Stored as a sub-document keyed by element key.
    Hash,
}

/// Kind of the optimistic-concurrency version field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionKind {
    Counter,
    Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionField {
    /// Entity field name of the version.
    pub field: String,
    pub kind: VersionKind,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Discriminator {
    /// Storage field holding the discriminator value.
    pub field: String,
    /// Stored value -> entity type name.
    #[serde(default)]
    pub map: Vec<(String, String)>,
    /// This type's own value.
    #[serde(default)]
    pub value: Option<String>,
    /// Value assumed for documents without a discriminator.
    #[serde(default)]
    pub default_value: Option<String>,
}

impl Discriminator {
    /// Stored value registered for `type_name`.
    pub fn value_for(&self, type_name: &str) -> Option<&str> {
        self.map
            .iter()
            .find(|(_, class)| class == type_name)
            .map(|(value, _)| value.as_str())
    }

    /// Entity type registered for a stored value.
    pub fn type_for(&self, value: &str) -> Option<&str> {
        self.map
            .iter()
            .find(|(stored, _)| stored == value)
            .map(|(_, class)| class.as_str())
    }
}

/// Encoding rule of one entity field.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Entity field name.
    pub name: String,
    /// Storage field name; defaults to `name`.
    #[serde(default)]
    pub storage_name: String,
    #[serde(default)]
    pub type_tag: TypeTag,
    #[serde(default)]
    pub identifier: bool,
    #[serde(default)]
    pub embedded: bool,
    #[serde(default)]
    pub reference: bool,
    #[serde(default)]
    pub cardinality: Cardinality,
    #[serde(default)]
    pub storage: ReferenceStorage,
    #[serde(default)]
    pub strategy: CollectionStrategy,
    /// Statically pinned target type of an association.
    #[serde(default)]
    pub target: Option<String>,
    /// Field of the target type holding the owning side of this inverse reference.
    #[serde(default)]
    pub mapped_by: Option<String>,
    /// Repository method that loads this collection.
    #[serde(default)]
    pub repository_method: Option<String>,
    /// Sort applied when loading the collection, as (entity field, direction).
    #[serde(default)]
    pub sort: Vec<(String, i32)>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub skip: Option<u64>,
    /// Reference fields of loaded targets to prime in one query per type.
    #[serde(default)]
    pub prime: Vec<String>,
    /// Extra criteria (property space, as a BSON document) applied when loading.
    #[serde(default)]
    pub criteria: Option<bson::Document>,
}

impl FieldMapping {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self { storage_name: name.clone(), name, ..Default::default() }
    }

    pub fn identifier(name: impl Into<String>) -> Self {
        Self {
            storage_name: IDENTIFIER_STORAGE_NAME.to_string(),
            identifier: true,
            type_tag: TypeTag::Id,
            ..Self::new(name)
        }
    }

    pub fn stored_as(mut self, storage_name: impl Into<String>) -> Self {
        self.storage_name = storage_name.into();
        self
    }

    pub fn typed(mut self, type_tag: TypeTag) -> Self {
        self.type_tag = type_tag;
        self
    }

    pub fn reference_one(mut self, target: Option<&str>, storage: ReferenceStorage) -> Self {
        self.reference = true;
        self.cardinality = Cardinality::One;
        self.storage = storage;
        self.target = target.map(String::from);
        self
    }

    pub fn reference_many(mut self, target: Option<&str>, storage: ReferenceStorage) -> Self {
        self.reference = true;
        self.cardinality = Cardinality::Many;
        self.storage = storage;
        self.target = target.map(String::from);
        self
    }

    pub fn embed_one(mut self, target: &str) -> Self {
        self.embedded = true;
        self.cardinality = Cardinality::One;
        self.target = Some(target.to_string());
        self
    }

    pub fn embed_many(mut self, target: &str) -> Self {
        self.embedded = true;
        self.cardinality = Cardinality::Many;
        self.target = Some(target.to_string());
        self
    }

    pub fn with_strategy(mut self, strategy: CollectionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn mapped_by(mut self, field: &str) -> Self {
        self.mapped_by = Some(field.to_string());
        self
    }

    pub fn with_repository_method(mut self, method: &str) -> Self {
        self.repository_method = Some(method.to_string());
        self
    }

    pub fn with_sort(mut self, field: &str, direction: i32) -> Self {
        self.sort.push((field.to_string(), direction));
        self
    }

    pub fn with_prime(mut self, field: &str) -> Self {
        self.prime.push(field.to_string());
        self
    }

    pub fn is_association(&self) -> bool {
        self.embedded || self.reference
    }

    pub fn is_many(&self) -> bool {
        self.cardinality == Cardinality::Many
    }

    pub fn is_reference_one(&self) -> bool {
        self.reference && self.cardinality == Cardinality::One
    }

    pub fn is_owning_side(&self) -> bool {
        self.mapped_by.is_none() && self.repository_method.is_none()
    }
}

/// Per-entity mapping metadata.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ClassMapping {
    /// Entity type name.
    pub name: String,
    /// Storage collection name.
    pub collection: String,
    /// Ordered field mappings, including the identifier.
    pub fields: Vec<FieldMapping>,
    #[serde(default)]
    pub version: Option<VersionField>,
    /// Entity field name of the lock field.
    #[serde(default)]
    pub lock_field: Option<String>,
    /// Storage field names forming the shard key, in key order.
    #[serde(default)]
    pub shard_key: Vec<String>,
    #[serde(default)]
    pub discriminator: Option<Discriminator>,
    /// Names of registered subclasses.
    #[serde(default)]
    pub subclasses: Vec<String>,
    /// Embedded document types have no collection and no identifier.
    #[serde(default)]
    pub embedded: bool,
}

impl ClassMapping {
    pub fn new(name: impl Into<String>, collection: impl Into<String>) -> Self {
        Self { name: name.into(), collection: collection.into(), ..Default::default() }
    }

    pub fn with_field(mut self, field: FieldMapping) -> Self {
        self.fields.push(field);
        self
    }

    pub fn versioned(mut self, field: &str, kind: VersionKind) -> Self {
        self.version = Some(VersionField { field: field.to_string(), kind });
        self
    }

    pub fn lockable(mut self, field: &str) -> Self {
        self.lock_field = Some(field.to_string());
        self
    }

    pub fn sharded(mut self, keys: &[&str]) -> Self {
        self.shard_key = keys.iter().map(|key| key.to_string()).collect();
        self
    }

    pub fn with_discriminator(mut self, discriminator: Discriminator) -> Self {
        self.discriminator = Some(discriminator);
        self
    }

    pub fn with_subclass(mut self, name: &str) -> Self {
        self.subclasses.push(name.to_string());
        self
    }

    /// Marks this mapping as an embedded document type.
    pub fn embedded(mut self) -> Self {
        self.embedded = true;
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldMapping> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn field_by_storage_name(&self, storage_name: &str) -> Option<&FieldMapping> {
        self.fields
            .iter()
            .find(|field| field.storage_name == storage_name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    pub fn identifier(&self) -> Option<&FieldMapping> {
        self.fields.iter().find(|field| field.identifier)
    }

    pub fn identifier_name(&self) -> Option<&str> {
        self.identifier().map(|field| field.name.as_str())
    }

    pub fn identifier_type(&self) -> TypeTag {
        self.identifier()
            .map(|field| field.type_tag)
            .unwrap_or(TypeTag::Id)
    }

    pub fn is_identifier(&self, name: &str) -> bool {
        self.field(name).is_some_and(|field| field.identifier)
    }

    pub fn is_versioned(&self) -> bool {
        self.version.is_some()
    }

    pub fn is_lockable(&self) -> bool {
        self.lock_field.is_some()
    }

    pub fn is_sharded(&self) -> bool {
        !self.shard_key.is_empty()
    }

    /// Storage name of the version field.
    pub fn version_storage_name(&self) -> Option<&str> {
        let version = self.version.as_ref()?;
        self.field(&version.field)
            .map(|field| field.storage_name.as_str())
    }

    /// Storage name of the lock field.
    pub fn lock_storage_name(&self) -> Option<&str> {
        let lock = self.lock_field.as_deref()?;
        self.field(lock)
            .map(|field| field.storage_name.as_str())
    }

    /// Fills defaulted storage names and checks internal consistency.
    pub fn validate(mut self) -> MapperResult<Self> {
        for field in &mut self.fields {
            if field.identifier {
                field.storage_name = IDENTIFIER_STORAGE_NAME.to_string();
            } else if field.storage_name.is_empty() {
                field.storage_name = field.name.clone();
            }
        }

        if !self.embedded && self.identifier().is_none() {
            return Err(self.invalid("no identifier field"));
        }
        if let Some(version) = &self.version {
            if !self.has_field(&version.field) {
                return Err(self.invalid(&format!("version field \"{}\" is not mapped", version.field)));
            }
        }
        if let Some(lock) = &self.lock_field {
            if !self.has_field(lock) {
                return Err(self.invalid(&format!("lock field \"{lock}\" is not mapped")));
            }
        }
        for key in &self.shard_key {
            if self.field_by_storage_name(key).is_none() {
                return Err(self.invalid(&format!("shard key field \"{key}\" is not mapped")));
            }
        }
        for field in &self.fields {
            if field.embedded && field.reference {
                return Err(self.invalid(&format!("field \"{}\" is both embedded and a reference", field.name)));
            }
        }

        Ok(self)
    }

    fn invalid(&self, reason: &str) -> MapperError {
        MapperError::MappingConfiguration(format!("{}: {reason}", self.name))
    }
}

/// Supplies class mappings by entity type name.
pub trait MetadataProvider: Send + Sync {
    fn class_mapping(&self, type_name: &str) -> Option<Arc<ClassMapping>>;

    /// Like [`class_mapping`](Self::class_mapping), failing with
    /// [`MapperError::UnresolvedReferenceTarget`] for unmapped types.
    fn require(&self, type_name: &str) -> MapperResult<Arc<ClassMapping>> {
        self.class_mapping(type_name)
            .ok_or_else(|| MapperError::UnresolvedReferenceTarget(type_name.to_string()))
    }

    /// Finds the mapping stored in `collection`, preferring the hierarchy root.
    fn class_for_collection(&self, collection: &str) -> Option<Arc<ClassMapping>>;
}

/// In-process registry of validated class mappings.
#[derive(Debug, Default, Clone)]
pub struct MappingRegistry {
    mappings: HashMap<String, Arc<ClassMapping>>,
    order: Vec<String>,
}

impl MappingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and registers a mapping. Re-registering a type replaces it.
    pub fn register(&mut self, mapping: ClassMapping) -> MapperResult<()> {
        let mapping = mapping.validate()?;
        if !self.mappings.contains_key(&mapping.name) {
            self.order.push(mapping.name.clone());
        }
        self.mappings
            .insert(mapping.name.clone(), Arc::new(mapping));

        Ok(())
    }

    pub fn with(mut self, mapping: ClassMapping) -> MapperResult<Self> {
        self.register(mapping)?;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

impl MetadataProvider for MappingRegistry {
    fn class_mapping(&self, type_name: &str) -> Option<Arc<ClassMapping>> {
        self.mappings.get(type_name).cloned()
    }

    fn class_for_collection(&self, collection: &str) -> Option<Arc<ClassMapping>> {
        let candidates = self
            .order
            .iter()
            .filter_map(|name| self.mappings.get(name))
            .filter(|mapping| mapping.collection == collection)
            .collect::<Vec<_>>();

        candidates
            .iter()
            .find(|mapping| {
                !candidates
                    .iter()
                    .any(|other| other.subclasses.contains(&mapping.name))
            })
            .or_else(|| candidates.first())
            .map(|mapping| Arc::clone(mapping))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_storage_policy_is_a_configuration_error() {
        let err = serde_json::from_str::<FieldMapping>(
            r#"{ "name": "author", "reference": true, "storage": "pointer" }"#,
        )
        .unwrap_err();

        assert!(err.to_string().contains("unknown reference storage policy"));
    }

    #[test]
    fn validation_fills_storage_names() {
        let mapping = ClassMapping::new("User", "users")
            .with_field(FieldMapping { name: "id".into(), identifier: true, ..Default::default() })
            .with_field(FieldMapping { name: "name".into(), ..Default::default() })
            .validate()
            .unwrap();

        assert_eq!(mapping.field("id").unwrap().storage_name, "_id");
        assert_eq!(mapping.field("name").unwrap().storage_name, "name");
    }

    #[test]
    fn validation_rejects_unmapped_version_field() {
        let err = ClassMapping::new("User", "users")
            .with_field(FieldMapping::identifier("id"))
            .versioned("version", VersionKind::Counter)
            .validate()
            .unwrap_err();

        assert!(matches!(err, MapperError::MappingConfiguration(_)));
    }

    #[test]
    fn collection_lookup_prefers_the_hierarchy_root() {
        let registry = MappingRegistry::new()
            .with(ClassMapping::new("Manager", "people").with_field(FieldMapping::identifier("id")))
            .unwrap()
            .with(
                ClassMapping::new("Person", "people")
                    .with_field(FieldMapping::identifier("id"))
                    .with_subclass("Manager"),
            )
            .unwrap();

        assert_eq!(registry.class_for_collection("people").unwrap().name, "Person");
    }
}
