//! Hydration into [`Record`] entities.

use bson::{Bson, Document};
use std::{fmt, sync::Arc};

use docmapper_core::{
    entity::{EntityRef, Record},
    error::MapperResult,
    hydrate::{Hints, Hydrator},
    mapping::{Cardinality, ClassMapping, MetadataProvider},
    value::Value,
};

/// Hydrates documents into [`Record`]s keyed by entity field name.
///
/// Storage keys without a field mapping are skipped. Single embedded documents are
/// hydrated into nested records when the hydrator knows the mappings; references
/// and to-many associations keep their stored form until a collection load
/// replaces them.
#[derive(Default, Clone)]
pub struct RecordHydrator {
    metadata: Option<Arc<dyn MetadataProvider>>,
}

impl RecordHydrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables hydration of single embedded documents through `metadata`.
    pub fn with_metadata(metadata: impl MetadataProvider + 'static) -> Self {
        Self { metadata: Some(Arc::new(metadata)) }
    }

    fn field_value(&self, mapping: &ClassMapping, name: &str, stored: &Bson, hints: &Hints) -> MapperResult<Value> {
        let Some(field) = mapping.field(name) else {
            return Ok(Value::from(stored.clone()));
        };

        let embedded = match (&self.metadata, &field.target, stored) {
            (Some(metadata), Some(target), Bson::Document(document))
                if field.embedded && field.cardinality == Cardinality::One =>
            {
                metadata
                    .class_mapping(target)
                    .map(|target| (target, document))
            },
            _ => None,
        };

        match embedded {
            Some((target, document)) => Ok(Value::Entity(self.hydrate(&target, None, document, hints)?)),
            None => Ok(Value::from(stored.clone())),
        }
    }
}

impl fmt::Debug for RecordHydrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordHydrator")
            .field("embedded", &self.metadata.is_some())
            .finish()
    }
}

impl Hydrator for RecordHydrator {
    fn hydrate(
        &self,
        mapping: &ClassMapping,
        target: Option<&EntityRef>,
        document: &Document,
        hints: &Hints,
    ) -> MapperResult<EntityRef> {
        let entity = target
            .cloned()
            .unwrap_or_else(|| EntityRef::new(Record::new(mapping.name.clone())));

        for field in &mapping.fields {
            match document.get(&field.storage_name) {
                Some(Bson::Null) | None => {
                    if target.is_some() {
                        entity.set(&field.name, None);
                    }
                },
                Some(stored) => {
                    let value = self.field_value(mapping, &field.name, stored, hints)?;
                    entity.set(&field.name, Some(value));
                },
            }
        }

        Ok(entity)
    }
}
