//! Reads: single and multi-document loads, refresh and child-collection loading.

use bson::{Bson, Document, doc};
use futures::TryStreamExt;
use std::{cmp::Ordering, sync::Arc};
use tracing::debug;

use crate::{
    backend::{DocumentCursor, FindOptions},
    collection::{CollectionRef, element_value},
    entity::EntityRef,
    error::{MapperError, MapperResult},
    filter::{inject_discriminator, merge_criteria},
    hydrate::Hints,
    mapping::{ClassMapping, CollectionStrategy, FieldMapping, IDENTIFIER_STORAGE_NAME, ReferenceStorage},
    persister::{DocumentPersister, LockMode},
    repository::RepositoryResult,
    value::{Criteria, Value},
};

/// Options of [`DocumentPersister::load`].
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Property-space sort.
    pub sort: Option<Criteria>,
    pub hints: Hints,
    /// Lock acquired on the loaded entity.
    pub lock_mode: Option<LockMode>,
}

impl LoadOptions {
    pub fn sorted(sort: Criteria) -> Self {
        Self { sort: Some(sort), ..Default::default() }
    }

    pub fn with_hints(mut self, hints: Hints) -> Self {
        self.hints = hints;
        self
    }

    pub fn with_lock(mut self, mode: LockMode) -> Self {
        self.lock_mode = Some(mode);
        self
    }
}

impl DocumentPersister {
    /// Joins the compiled filter criteria of this type to `criteria`.
    pub fn inject_filter(&self, criteria: Document) -> MapperResult<Document> {
        Ok(merge_criteria([criteria, self.filter_document(&self.mapping)?]))
    }

    /// Compiles `criteria` and constrains it by discriminator and filters.
    pub fn prepare_query(&self, criteria: &Criteria) -> MapperResult<Document> {
        let compiled = self.compile_query(criteria)?;
        self.inject_filter(self.inject_discriminator(compiled))
    }

    /// Finds the raw document of the first match.
    ///
    /// # Errors
    ///
    /// Returns [`MapperError::LockConflict`] when the match is exclusively locked.
    pub async fn load_document(
        &self,
        criteria: &Criteria,
        sort: Option<&Criteria>,
    ) -> MapperResult<Option<Document>> {
        let query = self.prepare_query(criteria)?;
        let mut options = FindOptions::default();
        if let Some(sort) = sort {
            options.sort = Some(self.compile_sort(sort)?);
        }

        debug!(target: "docmapper::load", entity_type = %self.mapping.name, query = %query, "loading document");

        let document = self
            .manager
            .backend()
            .find_one(query, options, &self.mapping.collection)
            .await?;

        if let (Some(document), Some(lock)) = (&document, self.mapping.lock_storage_name()) {
            let exclusive = match document.get(lock) {
                Some(Bson::Int32(mode)) => *mode == LockMode::PessimisticWrite.as_i32(),
                Some(Bson::Int64(mode)) => *mode == i64::from(LockMode::PessimisticWrite.as_i32()),
                _ => false,
            };
            if exclusive {
                return Err(MapperError::lock_conflict(
                    &self.mapping.name,
                    document.get(IDENTIFIER_STORAGE_NAME),
                ));
            }
        }

        Ok(document)
    }

    /// Loads and hydrates the first match, then acquires `options.lock_mode`.
    pub async fn load(&self, criteria: &Criteria, options: LoadOptions) -> MapperResult<Option<EntityRef>> {
        let Some(document) = self.load_document(criteria, options.sort.as_ref()).await? else {
            return Ok(None);
        };

        let entity = self.hydrate_as(&self.mapping, &document, options.hints)?;

        if let Some(mode) = options.lock_mode.filter(|mode| *mode != LockMode::None) {
            self.lock(&entity, mode).await?;
        }

        Ok(Some(entity))
    }

    /// Loads the entity with identifier `id`.
    pub async fn load_by_id(&self, id: impl Into<Value>) -> MapperResult<Option<EntityRef>> {
        let criteria = Criteria::new().with(IDENTIFIER_STORAGE_NAME, id);
        self.load(&criteria, LoadOptions::default()).await
    }

    /// Returns a cursor over the raw documents of every match.
    pub async fn load_all(
        &self,
        criteria: &Criteria,
        sort: Option<&Criteria>,
        limit: Option<i64>,
        skip: Option<u64>,
    ) -> MapperResult<DocumentCursor> {
        let query = self.prepare_query(criteria)?;
        let mut options = FindOptions::default();
        if let Some(sort) = sort {
            options.sort = Some(self.compile_sort(sort)?);
        }
        options.limit = limit;
        options.skip = skip;

        self.manager
            .backend()
            .find(query, options, &self.mapping.collection)
            .await
    }

    /// `true` when the document of `entity` is stored.
    pub async fn exists(&self, entity: &EntityRef) -> MapperResult<bool> {
        let query = self.query_for_entity(entity)?;

        Ok(self
            .manager
            .backend()
            .find_one(query, FindOptions::default(), &self.mapping.collection)
            .await?
            .is_some())
    }

    /// Overwrites `entity` with its stored document.
    ///
    /// # Errors
    ///
    /// Returns [`MapperError::DocumentNotFound`] when the document no longer exists or
    /// is hidden by a filter.
    pub async fn refresh(&self, entity: &EntityRef) -> MapperResult<()> {
        let point = self.query_for_entity(entity)?;
        let identifier = point.get(IDENTIFIER_STORAGE_NAME).cloned();
        let query = self.inject_filter(self.inject_discriminator(point))?;

        let document = self
            .manager
            .backend()
            .find_one(query, FindOptions::default(), &self.mapping.collection)
            .await?
            .ok_or_else(|| {
                MapperError::DocumentNotFound(
                    self.mapping.name.clone(),
                    identifier
                        .as_ref()
                        .map(ToString::to_string)
                        .unwrap_or_default(),
                )
            })?;

        let mapping = self.resolve_subclass(&self.mapping, &document);
        self.manager
            .hydrator()
            .hydrate(&mapping, Some(entity), &document, &Hints::refresh())?;
        self.manager
            .unit_of_work()
            .register_managed(entity, identifier, &document);

        Ok(())
    }

    /// Loads the elements of a child collection.
    ///
    /// The strategy follows the association: embedded documents are hydrated in place,
    /// owning-side references are resolved by identifier, inverse-side references are
    /// queried by their back-reference and repository-backed collections delegate to
    /// the target type's repository. The loaded elements are also written to the
    /// owner's field.
    pub async fn load_collection(&self, collection: &CollectionRef) -> MapperResult<()> {
        let field = collection.field_mapping();
        let hints = collection.hints();

        let entries = if field.embedded {
            self.load_embedded(collection, &field, hints)?
        } else if let Some(method) = &field.repository_method {
            self.load_with_repository(collection, &field, method, hints)
                .await?
        } else if field.mapped_by.is_some() {
            self.load_inverse_side(collection, &field, hints).await?
        } else {
            self.load_owning_side(collection, &field, hints).await?
        };

        debug!(
            target: "docmapper::load",
            owner = %self.mapping.name,
            field = %field.name,
            count = entries.len(),
            "loaded collection"
        );

        collection
            .owner()
            .set(&field.name, Some(element_value(&entries)));
        collection.fill(entries);

        Ok(())
    }

    fn load_embedded(
        &self,
        collection: &CollectionRef,
        field: &FieldMapping,
        hints: Hints,
    ) -> MapperResult<Vec<(Option<String>, EntityRef)>> {
        let target = self.target_of(field)?;
        let mut entries = Vec::new();

        for (key, raw) in collection.raw_entries() {
            let Bson::Document(document) = raw else {
                return Err(MapperError::InvalidDocument(format!(
                    "embedded element of \"{}\" is not a document",
                    field.name
                )));
            };
            let mapping = self.resolve_subclass(&target, &document);
            let entity = self
                .manager
                .hydrator()
                .hydrate(&mapping, None, &document, &hints)?;
            if !hints.read_only {
                self.manager
                    .unit_of_work()
                    .register_managed(&entity, None, &document);
            }
            entries.push((key, entity));
        }

        Ok(entries)
    }

    async fn load_owning_side(
        &self,
        collection: &CollectionRef,
        field: &FieldMapping,
        hints: Hints,
    ) -> MapperResult<Vec<(Option<String>, EntityRef)>> {
        let sorted = !field.sort.is_empty();
        let unit_of_work = self.manager.unit_of_work();

        let mut slots = Vec::<(Option<String>, Arc<ClassMapping>, Bson)>::new();
        let mut groups = Vec::<(Arc<ClassMapping>, Vec<Bson>)>::new();
        for (key, raw) in collection.raw_entries() {
            let (class, identifier) = self.reference_target(field, &raw)?;
            let known = !sorted && unit_of_work.get_by_id(&class.name, &identifier).is_some();
            if !known {
                match groups.iter_mut().find(|(group, _)| group.name == class.name) {
                    Some((_, ids)) => ids.push(identifier.clone()),
                    None => groups.push((class.clone(), vec![identifier.clone()])),
                }
            }
            slots.push((key, class, identifier));
        }

        let merge = sorted && groups.len() > 1;
        let mut loaded = Vec::<(String, Bson, EntityRef, Vec<(Bson, i32)>)>::new();
        for (class, ids) in groups {
            let order = if merge {
                self.field_options(field, &class)?.sort.unwrap_or_default()
            } else {
                Document::new()
            };
            let documents = self.query_by_ids(&class, ids, field).await?;
            for document in documents {
                let identifier = document
                    .get(IDENTIFIER_STORAGE_NAME)
                    .cloned()
                    .unwrap_or(Bson::Null);
                let entity = self.hydrate_as(&class, &document, hints)?;
                loaded.push((class.name.clone(), identifier, entity, sort_key(&document, &order)));
            }
        }

        if sorted {
            // Each target type was sorted by its own query; interleave them.
            if merge {
                loaded.sort_by(|left, right| compare_sort_keys(&left.3, &right.3));
            }
            return Ok(loaded
                .into_iter()
                .map(|(class, identifier, entity, _)| {
                    let key = slots
                        .iter()
                        .find(|(_, slot, id)| slot.name == class && *id == identifier)
                        .and_then(|(key, _, _)| key.clone());
                    (key, entity)
                })
                .collect());
        }

        Ok(slots
            .into_iter()
            .filter_map(|(key, class, identifier)| {
                loaded
                    .iter()
                    .find(|(loaded_class, id, _, _)| *loaded_class == class.name && *id == identifier)
                    .map(|(_, _, entity, _)| entity.clone())
                    .or_else(|| unit_of_work.get_by_id(&class.name, &identifier))
                    .map(|entity| (key, entity))
            })
            .collect())
    }

    async fn load_inverse_side(
        &self,
        collection: &CollectionRef,
        field: &FieldMapping,
        hints: Hints,
    ) -> MapperResult<Vec<(Option<String>, EntityRef)>> {
        let target = self.target_of(field)?;
        let mapped_by = field.mapped_by.as_deref().unwrap_or_default();
        let back_reference = target.field(mapped_by).ok_or_else(|| {
            MapperError::MappingConfiguration(format!(
                "{}.{} is mapped by {}.{mapped_by}, which is not mapped",
                self.mapping.name, field.name, target.name
            ))
        })?;

        let owner = collection.owner();
        let owner_id = self
            .manager
            .storage_identifier(&owner, &self.mapping)
            .ok_or_else(|| {
                MapperError::InvalidDocument(format!("{} has no identifier", self.mapping.name))
            })?;

        let mut criteria = Document::new();
        criteria.insert(
            back_reference
                .storage
                .identifier_path(&back_reference.storage_name),
            owner_id,
        );
        let criteria = merge_criteria([
            criteria,
            self.filter_document(&target)?,
            self.field_criteria(field, &target)?,
        ]);
        let criteria = inject_discriminator(criteria, &target, self.manager.metadata());

        let documents = self
            .manager
            .backend()
            .find(criteria, self.field_options(field, &target)?, &target.collection)
            .await?
            .try_collect::<Vec<_>>()
            .await?;

        let entries = documents
            .iter()
            .map(|document| Ok((None, self.hydrate_as(&target, document, hints)?)))
            .collect::<MapperResult<Vec<_>>>()?;

        self.prime(&target, field, &documents, &entries, hints)
            .await?;

        Ok(entries)
    }

    async fn load_with_repository(
        &self,
        collection: &CollectionRef,
        field: &FieldMapping,
        method: &str,
        hints: Hints,
    ) -> MapperResult<Vec<(Option<String>, EntityRef)>> {
        let target = self.target_of(field)?;
        let repository = self.manager.repository(&target.name).ok_or_else(|| {
            MapperError::Configuration(format!("no repository registered for {}", target.name))
        })?;

        let RepositoryResult::Cursor(cursor) = repository.call(method, &collection.owner()).await? else {
            return Err(MapperError::RepositoryContractViolation {
                entity_type: target.name.clone(),
                method: method.to_string(),
            });
        };
        let documents = cursor.try_collect::<Vec<_>>().await?;

        let hashed = field.strategy == CollectionStrategy::Hash;
        let entries = documents
            .iter()
            .enumerate()
            .map(|(index, document)| {
                let key = hashed.then(|| index.to_string());
                Ok((key, self.hydrate_as(&target, document, hints)?))
            })
            .collect::<MapperResult<Vec<_>>>()?;

        self.prime(&target, field, &documents, &entries, hints)
            .await?;

        Ok(entries)
    }

    /// Loads the targets of the primed reference fields in one query per type and
    /// links them into the loaded entities.
    async fn prime(
        &self,
        target: &ClassMapping,
        field: &FieldMapping,
        documents: &[Document],
        entries: &[(Option<String>, EntityRef)],
        hints: Hints,
    ) -> MapperResult<()> {
        for name in &field.prime {
            let reference = target
                .field(name)
                .filter(|reference| reference.reference)
                .ok_or_else(|| {
                    MapperError::MappingConfiguration(format!("{}.{name} is not a reference and cannot be primed", target.name))
                })?;

            let mut per_document = Vec::<Vec<(Arc<ClassMapping>, Bson)>>::new();
            let mut groups = Vec::<(Arc<ClassMapping>, Vec<Bson>)>::new();
            for document in documents {
                let raws = match document.get(&reference.storage_name) {
                    Some(Bson::Array(items)) if reference.is_many() => items.clone(),
                    Some(Bson::Document(items)) if reference.is_many() => items.values().cloned().collect(),
                    Some(Bson::Null) | None => Vec::new(),
                    Some(raw) => vec![raw.clone()],
                };

                let mut targets = Vec::new();
                for raw in raws {
                    let (class, identifier) = self.reference_target(reference, &raw)?;
                    let known = self
                        .manager
                        .unit_of_work()
                        .get_by_id(&class.name, &identifier)
                        .is_some();
                    if !known {
                        match groups.iter_mut().find(|(group, _)| group.name == class.name) {
                            Some((_, ids)) if !ids.contains(&identifier) => ids.push(identifier.clone()),
                            Some(_) => {}
                            None => groups.push((class.clone(), vec![identifier.clone()])),
                        }
                    }
                    targets.push((class, identifier));
                }
                per_document.push(targets);
            }

            let mut primed = Vec::<(String, Bson, EntityRef)>::new();
            for (class, ids) in groups {
                debug!(target: "docmapper::load", field = %name, entity_type = %class.name, count = ids.len(), "priming references");

                let query = merge_criteria([
                    doc! { "_id": { "$in": ids } },
                    self.filter_document(&class)?,
                ]);
                let documents = self
                    .manager
                    .backend()
                    .find(query, FindOptions::default(), &class.collection)
                    .await?
                    .try_collect::<Vec<_>>()
                    .await?;
                for document in documents {
                    let identifier = document
                        .get(IDENTIFIER_STORAGE_NAME)
                        .cloned()
                        .unwrap_or(Bson::Null);
                    primed.push((class.name.clone(), identifier, self.hydrate_as(&class, &document, hints)?));
                }
            }

            for ((_, entity), targets) in entries.iter().zip(per_document) {
                let resolved = targets
                    .into_iter()
                    .filter_map(|(class, identifier)| {
                        primed
                            .iter()
                            .find(|(primed_class, id, _)| *primed_class == class.name && *id == identifier)
                            .map(|(_, _, entity)| entity.clone())
                            .or_else(|| {
                                self.manager
                                    .unit_of_work()
                                    .get_by_id(&class.name, &identifier)
                            })
                    })
                    .map(Value::Entity)
                    .collect::<Vec<_>>();

                if reference.is_many() {
                    entity.set(&reference.name, Some(Value::Array(resolved)));
                } else if let Some(target) = resolved.into_iter().next() {
                    entity.set(&reference.name, Some(target));
                }
            }
        }

        Ok(())
    }

    async fn query_by_ids(
        &self,
        class: &ClassMapping,
        ids: Vec<Bson>,
        field: &FieldMapping,
    ) -> MapperResult<Vec<Document>> {
        let criteria = merge_criteria([
            doc! { "_id": { "$in": ids } },
            self.filter_document(class)?,
            self.field_criteria(field, class)?,
        ]);

        self.manager
            .backend()
            .find(criteria, self.field_options(field, class)?, &class.collection)
            .await?
            .try_collect()
            .await
    }

    /// Hydrates `document` as `mapping` (or the subclass its discriminator names),
    /// consulting and feeding the identity map.
    pub(crate) fn hydrate_as(
        &self,
        mapping: &Arc<ClassMapping>,
        document: &Document,
        hints: Hints,
    ) -> MapperResult<EntityRef> {
        let mapping = self.resolve_subclass(mapping, document);
        let identifier = document.get(IDENTIFIER_STORAGE_NAME).cloned();
        let unit_of_work = self.manager.unit_of_work();

        let existing = identifier
            .as_ref()
            .and_then(|identifier| unit_of_work.get_by_id(&mapping.name, identifier));
        if let Some(existing) = &existing {
            if !hints.refresh {
                return Ok(existing.clone());
            }
        }

        let entity = self
            .manager
            .hydrator()
            .hydrate(&mapping, existing.as_ref(), document, &hints)?;
        if !hints.read_only {
            unit_of_work.register_managed(&entity, identifier, document);
        }

        Ok(entity)
    }

    fn resolve_subclass(&self, mapping: &Arc<ClassMapping>, document: &Document) -> Arc<ClassMapping> {
        let Some(discriminator) = &mapping.discriminator else {
            return mapping.clone();
        };

        document
            .get_str(&discriminator.field)
            .ok()
            .or(discriminator.default_value.as_deref())
            .and_then(|value| discriminator.type_for(value))
            .and_then(|type_name| self.manager.metadata().class_mapping(type_name))
            .unwrap_or_else(|| mapping.clone())
    }

    /// Target type and storage identifier of a stored reference.
    fn reference_target(&self, field: &FieldMapping, raw: &Bson) -> MapperResult<(Arc<ClassMapping>, Bson)> {
        let stored = raw.as_document();
        let identifier = match (field.storage, stored) {
            (ReferenceStorage::Id, _) => Some(raw.clone()),
            (ReferenceStorage::Ref, Some(stored)) => stored.get("id").cloned(),
            (ReferenceStorage::DbRef | ReferenceStorage::DbRefWithDb, Some(stored)) => stored.get("$id").cloned(),
            _ => None,
        }
        .ok_or_else(|| {
            MapperError::InvalidDocument(format!(
                "\"{}\" holds {raw}, which is not a {} reference",
                field.name, field.storage
            ))
        })?;

        let pinned = match &field.target {
            Some(target) => Some(self.manager.class_mapping(target)?),
            None => None,
        };
        let class = match (pinned, stored) {
            (Some(pinned), Some(stored)) => {
                let discriminated = pinned.discriminator.as_ref().and_then(|discriminator| {
                    let value = stored.get_str(&discriminator.field).ok()?;
                    self.manager
                        .metadata()
                        .class_mapping(discriminator.type_for(value)?)
                });
                discriminated.unwrap_or(pinned)
            }
            (Some(pinned), None) => pinned,
            (None, stored) => stored
                .and_then(|stored| stored.get_str("$ref").ok())
                .and_then(|collection| self.manager.metadata().class_for_collection(collection))
                .ok_or_else(|| {
                    MapperError::UnresolvedReferenceTarget(format!("{}.{}", self.mapping.name, field.name))
                })?,
        };

        Ok((class, identifier))
    }

    fn target_of(&self, field: &FieldMapping) -> MapperResult<Arc<ClassMapping>> {
        let target = field.target.as_deref().ok_or_else(|| {
            MapperError::MappingConfiguration(format!(
                "{}.{} has no target type",
                self.mapping.name, field.name
            ))
        })?;
        self.manager.class_mapping(target)
    }

    fn filter_document(&self, mapping: &ClassMapping) -> MapperResult<Document> {
        match self.manager.filters().filter_criteria(mapping) {
            Some(criteria) if !criteria.is_empty() => self
                .manager
                .compiler()
                .compile(&criteria, mapping, false),
            _ => Ok(Document::new()),
        }
    }

    fn field_criteria(&self, field: &FieldMapping, target: &ClassMapping) -> MapperResult<Document> {
        match &field.criteria {
            Some(criteria) => self
                .manager
                .compiler()
                .compile(&Criteria::from(criteria.clone()), target, false),
            None => Ok(Document::new()),
        }
    }

    fn field_options(&self, field: &FieldMapping, target: &ClassMapping) -> MapperResult<FindOptions> {
        let mut options = FindOptions::default();
        if !field.sort.is_empty() {
            let sort = field
                .sort
                .iter()
                .map(|(name, direction)| (name.clone(), Value::from(*direction)))
                .collect::<Criteria>();
            options.sort = Some(self.manager.compiler().compile_sort(&sort, target)?);
        }
        options.limit = field.limit;
        options.skip = field.skip;

        Ok(options)
    }
}

/// The values `document` holds for each compiled sort field, with their direction.
fn sort_key(document: &Document, order: &Document) -> Vec<(Bson, i32)> {
    order
        .iter()
        .map(|(path, direction)| {
            let value = path
                .split('.')
                .try_fold(Bson::Document(document.clone()), |current, segment| match current {
                    Bson::Document(mut inner) => inner.remove(segment),
                    _ => None,
                })
                .unwrap_or(Bson::Null);
            let direction = match direction {
                Bson::Int32(-1) | Bson::Int64(-1) => -1,
                Bson::Double(number) if *number < 0.0 => -1,
                _ => 1,
            };
            (value, direction)
        })
        .collect()
}

fn compare_sort_keys(left: &[(Bson, i32)], right: &[(Bson, i32)]) -> Ordering {
    for ((left, direction), (right, _)) in left.iter().zip(right) {
        let ordering = compare_values(left, right);
        if ordering != Ordering::Equal {
            return if *direction < 0 { ordering.reverse() } else { ordering };
        }
    }
    Ordering::Equal
}

/// Orders values by type first (nulls, numbers, strings, then the rest), then by value.
fn compare_values(left: &Bson, right: &Bson) -> Ordering {
    match (left, right) {
        (Bson::String(left), Bson::String(right)) => left.cmp(right),
        (Bson::Boolean(left), Bson::Boolean(right)) => left.cmp(right),
        (Bson::ObjectId(left), Bson::ObjectId(right)) => left.cmp(right),
        (Bson::DateTime(left), Bson::DateTime(right)) => left.cmp(right),
        _ => match (number(left), number(right)) {
            (Some(left), Some(right)) => left.total_cmp(&right),
            _ => type_rank(left).cmp(&type_rank(right)),
        },
    }
}

fn number(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(number) => Some(f64::from(*number)),
        Bson::Int64(number) => Some(*number as f64),
        Bson::Double(number) => Some(*number),
        _ => None,
    }
}

fn type_rank(value: &Bson) -> u8 {
    match value {
        Bson::Null | Bson::Undefined => 0,
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) => 1,
        Bson::String(_) | Bson::Symbol(_) => 2,
        Bson::Document(_) => 3,
        Bson::Array(_) => 4,
        Bson::ObjectId(_) => 5,
        Bson::Boolean(_) => 6,
        Bson::DateTime(_) => 7,
        _ => 8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_keys_follow_paths_and_directions() {
        let document = doc! { "t": "b", "addr": { "c": "Oslo" } };

        let key = sort_key(&document, &doc! { "addr.c": 1, "t": -1, "missing": 1 });

        assert_eq!(
            key,
            vec![(Bson::from("Oslo"), 1), (Bson::from("b"), -1), (Bson::Null, 1)]
        );
    }

    #[test]
    fn sort_keys_compare_by_type_then_value() {
        let ascending = |value: Bson| vec![(value, 1)];

        assert_eq!(compare_sort_keys(&ascending(Bson::Null), &ascending(Bson::Int32(0))), Ordering::Less);
        assert_eq!(
            compare_sort_keys(&ascending(Bson::Int32(2)), &ascending(Bson::Double(1.5))),
            Ordering::Greater
        );
        assert_eq!(
            compare_sort_keys(&ascending(Bson::Int64(9)), &ascending(Bson::from("a"))),
            Ordering::Less
        );
        assert_eq!(
            compare_sort_keys(&[(Bson::from("a"), -1)], &[(Bson::from("b"), -1)]),
            Ordering::Greater
        );
    }
}
