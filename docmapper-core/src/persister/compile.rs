//! Criteria compilation from property space to storage space.

use bson::{Bson, Document};

use crate::{
    error::MapperResult,
    mapping::{ClassMapping, TypeTag},
    store::DocumentManager,
    value::{Criteria, Value, has_operators, has_reference_fields},
};

/// Logical operators whose members are criteria of their own.
const LOGICAL_OPERATORS: [&str; 3] = ["$and", "$or", "$nor"];

/// Operators whose operands never get typed conversion.
const UNCONVERTED_OPERATORS: [&str; 5] = ["$exists", "$type", "$mod", "$size", "$currentDate"];

/// Operators whose operands are lists of identifiers.
const LIST_OPERATORS: [&str; 3] = ["$in", "$nin", "$all"];

/// Compiles property-space criteria, paths and values against class mappings.
///
/// Every method is pure: mappings are only read and new documents are returned.
pub struct QueryCompiler<'a> {
    pub(crate) manager: &'a DocumentManager,
}

impl<'a> QueryCompiler<'a> {
    pub fn new(manager: &'a DocumentManager) -> Self {
        Self { manager }
    }

    /// Compiles `criteria` against `mapping`.
    ///
    /// `for_insert` renders references whole instead of decomposing them into
    /// queryable sub-fields.
    pub fn compile(
        &self,
        criteria: &Criteria,
        mapping: &ClassMapping,
        for_insert: bool,
    ) -> MapperResult<Document> {
        let mut compiled = Document::new();

        for (key, value) in criteria.iter() {
            if LOGICAL_OPERATORS.contains(&key) {
                if let Value::Array(members) = value {
                    let mut prepared = Vec::with_capacity(members.len());
                    for member in members {
                        prepared.push(match member {
                            Value::Map(member) => Bson::Document(self.compile(member, mapping, for_insert)?),
                            other => self.storage_value(None, other.clone()),
                        });
                    }
                    compiled.insert(key, prepared);
                    continue;
                }
            }

            if key.starts_with('$') {
                if let Value::Map(nested) = value {
                    compiled.insert(key, self.compile(nested, mapping, for_insert)?);
                    continue;
                }
            }

            let type_tag = mapping
                .field(key)
                .filter(|field| !field.is_association())
                .map(|field| field.type_tag);

            for (path, prepared) in self.resolve(key, value.clone(), mapping, true, for_insert)? {
                compiled.insert(path, self.storage_value(type_tag, prepared));
            }
        }

        Ok(compiled)
    }

    /// Storage name of the property path `path`.
    pub fn compile_field_name(&self, path: &str, mapping: &ClassMapping) -> MapperResult<String> {
        Ok(self
            .resolve(path, Value::null(), mapping, false, false)?
            .into_iter()
            .next()
            .map(|(name, _)| name)
            .unwrap_or_else(|| path.to_string()))
    }

    /// Compiles a sort specification. `"desc"` and `-1` sort descending, any other
    /// direction ascending; map values (such as `{$meta: "textScore"}`) pass through.
    pub fn compile_sort(&self, sort: &Criteria, mapping: &ClassMapping) -> MapperResult<Document> {
        let mut compiled = Document::new();

        for (path, direction) in sort.iter() {
            let name = self.compile_field_name(path, mapping)?;
            match direction {
                Value::Map(_) => {
                    compiled.insert(name, self.storage_value(None, direction.clone()));
                }
                other => {
                    compiled.insert(name, sort_direction(other));
                }
            }
        }

        Ok(compiled)
    }

    /// Converts a resolved value to storage form.
    ///
    /// Maps keep their keys; operands of `$exists`, `$type`, `$mod`, `$size` and
    /// `$currentDate` are not typed. Mapped entities become their storage identifier,
    /// unmapped ones their raw field document.
    pub fn storage_value(&self, type_tag: Option<TypeTag>, value: Value) -> Bson {
        match value {
            Value::Bson(value) => self.manager.converter().to_storage(type_tag, value),
            Value::Array(items) => Bson::Array(
                items
                    .into_iter()
                    .map(|item| self.storage_value(type_tag, item))
                    .collect(),
            ),
            Value::Map(map) => {
                let mut document = Document::new();
                for (key, item) in map {
                    let tag = if UNCONVERTED_OPERATORS.contains(&key.as_str()) {
                        None
                    } else {
                        type_tag
                    };
                    document.insert(key, self.storage_value(tag, item));
                }
                Bson::Document(document)
            }
            Value::Entity(entity) => match self.manager.metadata().class_mapping(&entity.entity_type()) {
                Some(mapping) => self
                    .manager
                    .storage_identifier(&entity, &mapping)
                    .unwrap_or(Bson::Null),
                None => {
                    let names = entity.read().field_names();
                    let mut document = Document::new();
                    for name in names {
                        if let Some(value) = entity.get(&name) {
                            document.insert(name, self.storage_value(None, value));
                        }
                    }
                    Bson::Document(document)
                }
            },
        }
    }

    /// Converts an identifier value of `mapping` to storage form.
    ///
    /// Entities become their own identifier; structured references keep `$ref` and `$db`.
    pub fn identifier_value(&self, value: Value, mapping: &ClassMapping) -> Bson {
        match value {
            Value::Entity(entity) => {
                let target = self
                    .manager
                    .metadata()
                    .class_mapping(&entity.entity_type());
                let target = target.as_deref().unwrap_or(mapping);
                self.manager
                    .storage_identifier(&entity, target)
                    .unwrap_or(Bson::Null)
            }
            Value::Array(items) => Bson::Array(
                items
                    .into_iter()
                    .map(|item| self.identifier_value(item, mapping))
                    .collect(),
            ),
            Value::Map(map) => {
                let mut document = Document::new();
                for (key, item) in map {
                    let converted = if key == "$ref" || key == "$db" {
                        self.storage_value(None, item)
                    } else {
                        self.identifier_value(item, mapping)
                    };
                    document.insert(key, converted);
                }
                Bson::Document(document)
            }
            Value::Bson(value) => self
                .manager
                .converter()
                .to_storage(Some(mapping.identifier_type()), value),
        }
    }

    /// Prepares a value compared against an identifier of `mapping`.
    ///
    /// Bare values and structured references convert directly; operator maps convert
    /// each operand through [`identifier_expression`](Self::identifier_expression).
    pub(crate) fn prepare_identifier(&self, value: Value, mapping: &ClassMapping) -> Value {
        if has_operators(&value) && !has_reference_fields(&value) {
            if let Value::Map(expression) = value {
                return Value::Map(self.identifier_expression(expression, mapping));
            }
        }

        Value::Bson(self.identifier_value(value, mapping))
    }

    /// Converts the operands of an operator expression over identifiers.
    ///
    /// `$in`, `$nin` and `$all` convert element-wise, `$not` recurses, and operands of
    /// `$exists`, `$type`, `$mod` and `$size` are left alone.
    pub fn identifier_expression(&self, expression: Criteria, mapping: &ClassMapping) -> Criteria {
        expression
            .into_iter()
            .map(|(operator, operand)| {
                let prepared = match (operator.as_str(), operand) {
                    (op, operand) if UNCONVERTED_OPERATORS.contains(&op) => operand,
                    (op, Value::Array(items)) if LIST_OPERATORS.contains(&op) => Value::Array(
                        items
                            .into_iter()
                            .map(|item| Value::Bson(self.identifier_value(item, mapping)))
                            .collect(),
                    ),
                    (op, operand) if LIST_OPERATORS.contains(&op) => operand,
                    ("$not", Value::Map(nested)) => Value::Map(self.identifier_expression(nested, mapping)),
                    (_, operand) => Value::Bson(self.identifier_value(operand, mapping)),
                };
                (operator, prepared)
            })
            .collect()
    }
}

fn sort_direction(direction: &Value) -> i32 {
    let descending = match direction {
        Value::Bson(Bson::String(text)) => {
            let text = text.to_lowercase();
            text == "desc" || text == "-1"
        }
        Value::Bson(Bson::Int32(number)) => *number == -1,
        Value::Bson(Bson::Int64(number)) => *number == -1,
        Value::Bson(Bson::Double(number)) => *number == -1.0,
        _ => false,
    };

    if descending { -1 } else { 1 }
}
