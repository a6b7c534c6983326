//! Property path resolution.
//!
//! Maps one property path (and the value compared against it) to the storage
//! path(s) and values the compiler emits.

use tracing::debug;

use crate::{
    error::{MapperError, MapperResult},
    mapping::{ClassMapping, CollectionStrategy, FieldMapping, IDENTIFIER_STORAGE_NAME, ReferenceStorage, TypeTag},
    persister::compile::QueryCompiler,
    value::{Value, is_operator},
};

/// Maximum number of segments a dotted path is split into.
const MAX_SEGMENTS: usize = 4;

/// Positional placeholder of array updates and projections.
const POSITIONAL: &str = "$";

impl QueryCompiler<'_> {
    /// Resolves `path` against `mapping`.
    ///
    /// # Arguments
    ///
    /// * `path` - Property path, possibly dotted
    /// * `value` - Value compared against or written to the path
    /// * `mapping` - Mapping of the type the path starts at
    /// * `prepare_value` - Convert identifiers and encode entities; when `false`
    ///   only the path is translated
    /// * `for_insert` - Encode references whole instead of decomposing them
    ///
    /// # Returns
    ///
    /// One `(storage path, value)` pair, or several when a structured reference is
    /// decomposed into its sub-fields.
    pub fn resolve(
        &self,
        path: &str,
        value: Value,
        mapping: &ClassMapping,
        prepare_value: bool,
        for_insert: bool,
    ) -> MapperResult<Vec<(String, Value)>> {
        if let Some(field) = mapping.field(path).filter(|field| !field.identifier) {
            return self.resolve_field(field, value, prepare_value, for_insert);
        }

        if path == IDENTIFIER_STORAGE_NAME || mapping.is_identifier(path) {
            let value = if prepare_value {
                self.prepare_identifier(value, mapping)
            } else {
                value
            };
            return Ok(vec![(IDENTIFIER_STORAGE_NAME.to_string(), value)]);
        }

        if !path.contains('.') {
            return Ok(vec![(path.to_string(), value)]);
        }

        self.resolve_dotted(path, value, mapping, prepare_value)
    }

    fn resolve_field(
        &self,
        field: &FieldMapping,
        value: Value,
        prepare_value: bool,
        for_insert: bool,
    ) -> MapperResult<Vec<(String, Value)>> {
        let name = field.storage_name.clone();
        if !prepare_value {
            return Ok(vec![(name, value)]);
        }

        if let Value::Entity(entity) = &value {
            if field.embedded {
                let document = self
                    .manager
                    .document_builder()
                    .embedded_document(self.manager, entity)?;
                return Ok(vec![(name, Value::Bson(document.into()))]);
            }

            if field.reference {
                match self
                    .manager
                    .references()
                    .encode(&name, entity, field, for_insert)
                {
                    Ok(parts) => return Ok(parts),
                    Err(MapperError::UnresolvedReferenceTarget(target)) => {
                        debug!(
                            target: "docmapper::persister",
                            field = %field.name,
                            target = %target,
                            "reference target is not mapped, passing value through"
                        );
                        return Ok(vec![(name, value)]);
                    }
                    Err(err) => return Err(err),
                }
            }
        }

        if !field.reference || field.storage != ReferenceStorage::Id || value.is_empty() {
            return Ok(vec![(name, value)]);
        }

        let value = match self.target_mapping(field) {
            Some(target) => self.prepare_identifier(value, &target),
            None => value,
        };

        Ok(vec![(name, value)])
    }

    fn resolve_dotted(
        &self,
        path: &str,
        value: Value,
        mapping: &ClassMapping,
        prepare_value: bool,
    ) -> MapperResult<Vec<(String, Value)>> {
        let segments = path.splitn(MAX_SEGMENTS, '.').collect::<Vec<_>>();

        let Some(field) = mapping.field(segments[0]) else {
            return Ok(vec![(path.to_string(), value)]);
        };
        let head = field.storage_name.as_str();

        if !field.is_association() && matches!(field.type_tag, TypeTag::Hash | TypeTag::Raw) {
            let rest = segments[1..].join(".");
            return Ok(vec![(format!("{head}.{rest}"), value)]);
        }

        let (mut field_name, property, prefix, next) = if field.is_many()
            && field.strategy == CollectionStrategy::Hash
            && segments.len() > 2
        {
            (
                format!("{head}.{}.{}", segments[1], segments[2]),
                segments[2],
                format!("{}.", segments[1]),
                segments[3..].join("."),
            )
        } else if segments[1] != POSITIONAL {
            (
                format!("{head}.{}", segments[1]),
                segments[1],
                String::new(),
                segments[2..].join("."),
            )
        } else if segments.len() > 2 {
            (
                format!("{head}.{POSITIONAL}.{}", segments[2]),
                segments[2],
                format!("{POSITIONAL}."),
                segments[3..].join("."),
            )
        } else {
            return Ok(vec![(format!("{head}.{POSITIONAL}"), value)]);
        };

        let Some(target) = self.target_mapping(field) else {
            return Ok(vec![(append_path(field_name, &next), value)]);
        };
        let Some(target_field) = target.field(property) else {
            return Ok(vec![(append_path(field_name, &next), value)]);
        };

        if target_field.identifier {
            field_name = if field.reference {
                field.storage.identifier_path(head)
            } else {
                format!("{head}.{prefix}{}", target_field.storage_name)
            };

            let value = if prepare_value {
                self.prepare_identifier(value, &target)
            } else {
                value
            };
            return Ok(vec![(field_name, value)]);
        }

        field_name = format!("{head}.{prefix}{}", target_field.storage_name);
        if next.is_empty() {
            return Ok(vec![(field_name, value)]);
        }

        let nested = if target_field.reference {
            let next = if !is_operator(&next) && target_field.storage.is_db_ref() {
                format!("{POSITIONAL}{next}")
            } else {
                next
            };
            vec![(next, value)]
        } else {
            match self.target_mapping(target_field) {
                Some(next_target) => self.resolve(&next, value, &next_target, prepare_value, false)?,
                None => vec![(next, value)],
            }
        };

        Ok(nested
            .into_iter()
            .map(|(path, value)| (format!("{field_name}.{path}"), value))
            .collect())
    }

    fn target_mapping(&self, field: &FieldMapping) -> Option<std::sync::Arc<ClassMapping>> {
        let target = field.target.as_deref()?;
        self.manager.metadata().class_mapping(target)
    }
}

fn append_path(field_name: String, next: &str) -> String {
    if next.is_empty() {
        field_name
    } else {
        format!("{field_name}.{next}")
    }
}
