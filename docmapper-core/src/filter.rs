//! Criteria augmentation: polymorphism constraints and collaborator-supplied filters.

use bson::{Bson, Document, doc};

use crate::{
    mapping::{ClassMapping, MetadataProvider},
    value::{Criteria, Value},
};

/// Supplies tenant or soft-delete style criteria per entity type.
///
/// Returned criteria are in property space; the persister compiles them and joins
/// them to the query with `$and`.
pub trait FilterSource: Send + Sync {
    fn filter_criteria(&self, mapping: &ClassMapping) -> Option<Criteria>;
}

/// A filter source that never filters.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoFilters;

impl FilterSource for NoFilters {
    fn filter_criteria(&self, _mapping: &ClassMapping) -> Option<Criteria> {
        None
    }
}

/// A fixed set of filters, registered per entity type or for every type.
#[derive(Debug, Default, Clone)]
pub struct StaticFilters {
    filters: Vec<(Option<String>, Criteria)>,
}

impl StaticFilters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies `criteria` to `type_name` only.
    pub fn with(mut self, type_name: &str, criteria: Criteria) -> Self {
        self.filters.push((Some(type_name.to_string()), criteria));
        self
    }

    /// Applies `criteria` to every entity type.
    pub fn global(mut self, criteria: Criteria) -> Self {
        self.filters.push((None, criteria));
        self
    }
}

impl FilterSource for StaticFilters {
    fn filter_criteria(&self, mapping: &ClassMapping) -> Option<Criteria> {
        let mut matching = self
            .filters
            .iter()
            .filter(|(type_name, criteria)| {
                !criteria.is_empty()
                    && type_name
                        .as_deref()
                        .is_none_or(|type_name| type_name == mapping.name)
            })
            .map(|(_, criteria)| criteria.clone())
            .collect::<Vec<_>>();

        match matching.len() {
            0 => None,
            1 => matching.pop(),
            _ => Some(Criteria::new().with(
                "$and",
                matching.into_iter().map(Value::from).collect::<Vec<_>>(),
            )),
        }
    }
}

/// Joins storage-space criteria with `$and`, dropping empty parts.
pub fn merge_criteria(parts: impl IntoIterator<Item = Document>) -> Document {
    let mut parts = parts
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>();

    match parts.len() {
        0 => Document::new(),
        1 => parts.pop().unwrap_or_default(),
        _ => doc! { "$and": parts },
    }
}

/// Stored discriminator values selecting `mapping` and its subclasses.
///
/// `Null` is included when the hierarchy's default value is among them, so documents
/// stored without a discriminator still match.
pub fn discriminator_values(mapping: &ClassMapping, metadata: &dyn MetadataProvider) -> Vec<Bson> {
    let Some(discriminator) = &mapping.discriminator else {
        return Vec::new();
    };

    let mut values = Vec::<String>::new();
    if let Some(own) = &discriminator.value {
        values.push(own.clone());
    }

    let mut pending = mapping.subclasses.iter().rev().cloned().collect::<Vec<_>>();
    let mut seen = Vec::<String>::new();
    while let Some(subclass) = pending.pop() {
        if seen.contains(&subclass) {
            continue;
        }
        if let Some(value) = discriminator.value_for(&subclass) {
            if !values.iter().any(|existing| existing == value) {
                values.push(value.to_string());
            }
        }
        if let Some(sub_mapping) = metadata.class_mapping(&subclass) {
            pending.extend(sub_mapping.subclasses.iter().rev().cloned());
        }
        seen.push(subclass);
    }

    let include_null = discriminator
        .default_value
        .as_ref()
        .is_some_and(|default| values.contains(default));

    let mut values = values.into_iter().map(Bson::String).collect::<Vec<_>>();
    if include_null {
        values.push(Bson::Null);
    }

    values
}

/// Constrains compiled criteria to the discriminator values of `mapping`.
///
/// No-op without a discriminator or when the criteria already constrain the field,
/// which also makes repeated injection idempotent.
pub fn inject_discriminator(
    mut criteria: Document,
    mapping: &ClassMapping,
    metadata: &dyn MetadataProvider,
) -> Document {
    let Some(discriminator) = &mapping.discriminator else {
        return criteria;
    };
    if criteria.contains_key(&discriminator.field) {
        return criteria;
    }

    let mut values = discriminator_values(mapping, metadata);
    match values.len() {
        0 => {}
        1 => {
            let value = values.remove(0);
            criteria.insert(discriminator.field.clone(), value);
        }
        _ => {
            criteria.insert(discriminator.field.clone(), doc! { "$in": values });
        }
    }

    criteria
}
