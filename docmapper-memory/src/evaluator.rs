//! Criteria evaluation for in-memory document filtering.
//!
//! This module interprets compiled storage-space criteria (`$and`, `$in`,
//! `$elemMatch`, dotted paths into arrays, ...) against BSON documents, and orders
//! documents by a storage-space sort specification.

use std::{cmp::Ordering, collections::HashMap};
use bson::{Bson, Document, datetime::DateTime, oid::ObjectId};

use docmapper_core::{
    error::{MapperResult, StorageError},
    value::REFERENCE_KEYS,
};


/// Type-erased, comparable representation of BSON values.
///
/// Numeric types are normalized to f64 so `Int32(1)`, `Int64(1)` and `Double(1.0)`
/// compare equal, the way storage engines compare them.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    /// Null value (also used for BSON types without an ordering of their own)
    Null,
    /// Boolean value
    Bool(bool),
    /// Numeric value (all integers and floats normalized to f64)
    Number(f64),
    /// DateTime value
    DateTime(DateTime),
    /// Object identifier
    ObjectId(ObjectId),
    /// String value
    String(&'a str),
    /// Array of comparable values
    Array(Vec<Comparable<'a>>),
    /// Map/Object of comparable values
    Map(HashMap<&'a str, Comparable<'a>>),
}

impl<'a> Comparable<'a> {
    /// Rank of the value's type in the cross-type sort order.
    fn rank(&self) -> u8 {
        match self {
            Comparable::Null => 0,
            Comparable::Number(_) => 1,
            Comparable::String(_) => 2,
            Comparable::Map(_) => 3,
            Comparable::Array(_) => 4,
            Comparable::ObjectId(_) => 5,
            Comparable::Bool(_) => 6,
            Comparable::DateTime(_) => 7,
        }
    }

    /// Total order used for sorting: same-type values by value, others by type rank.
    pub(crate) fn total_cmp(&self, other: &Self) -> Ordering {
        self.partial_cmp(other)
            .unwrap_or_else(|| self.rank().cmp(&other.rank()))
    }
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(*value as f64),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::ObjectId(value) => Comparable::ObjectId(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::Array(arr) => Comparable::Array(
                arr
                    .iter()
                    .map(Comparable::from)
                    .collect::<Vec<_>>()
            ),
            Bson::Document(doc) => Comparable::Map(
                doc
                    .iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect::<HashMap<_, _>>()
            ),
            _ => Comparable::Null,
        }
    }
}

impl<'a> PartialEq for Comparable<'a> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl<'a> PartialOrd for Comparable<'a> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => Some(Ordering::Equal),
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}


/// Matches one document against storage-space criteria.
pub(crate) struct DocumentEvaluator<'a> {
    document: &'a Document,
}

impl<'a> DocumentEvaluator<'a> {
    pub fn new(document: &'a Document) -> Self {
        Self { document }
    }

    /// Evaluates `criteria` against the document.
    ///
    /// # Errors
    ///
    /// Returns a storage error for unknown operators and malformed operands.
    pub fn matches(&self, criteria: &Document) -> MapperResult<bool> {
        for (key, condition) in criteria {
            let matched = match key.as_str() {
                "$and" => {
                    let mut all = true;
                    for clause in clauses(key, condition)? {
                        if !self.matches(clause)? {
                            all = false;
                            break;
                        }
                    }
                    all
                },
                "$or" => self.any_clause(key, condition)?,
                "$nor" => !self.any_clause(key, condition)?,
                operator if operator.starts_with('$') => return Err(unknown_operator(operator)),
                path => field_matches(&resolve(self.document, path), condition)?,
            };

            if !matched {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn any_clause(&self, key: &str, condition: &Bson) -> MapperResult<bool> {
        for clause in clauses(key, condition)? {
            if self.matches(clause)? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Keeps the documents matching `criteria`, in their original order.
    pub fn filter_documents(
        documents: impl IntoIterator<Item = &'a Document>,
        criteria: &Document,
    ) -> MapperResult<Vec<Document>> {
        let mut matched = Vec::new();

        for document in documents {
            if DocumentEvaluator::new(document).matches(criteria)? {
                matched.push(document.clone());
            }
        }

        Ok(matched)
    }

    /// Sorts `documents` in place by a `{path: 1 | -1}` specification.
    pub fn sort_documents(documents: &mut [Document], sort: &Document) {
        let keys = sort
            .iter()
            .map(|(path, direction)| {
                let descending = match direction {
                    Bson::Int32(value) => *value < 0,
                    Bson::Int64(value) => *value < 0,
                    Bson::Double(value) => *value < 0.0,
                    Bson::String(value) => value.eq_ignore_ascii_case("desc"),
                    _ => false,
                };
                (path.as_str(), descending)
            })
            .collect::<Vec<_>>();

        documents.sort_by(|a, b| {
            for (path, descending) in &keys {
                let left = resolve(a, path).into_iter().next();
                let right = resolve(b, path).into_iter().next();
                let ordering = Comparable::from(left.as_ref().unwrap_or(&Bson::Null))
                    .total_cmp(&Comparable::from(right.as_ref().unwrap_or(&Bson::Null)));

                let ordering = if *descending { ordering.reverse() } else { ordering };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }

            Ordering::Equal
        });
    }
}

fn clauses<'d>(key: &str, condition: &'d Bson) -> MapperResult<Vec<&'d Document>> {
    let Bson::Array(items) = condition else {
        return Err(bad_operand(key, "an array"));
    };

    items
        .iter()
        .map(|item| item.as_document().ok_or_else(|| bad_operand(key, "an array of documents")))
        .collect()
}

/// Every value stored under the dotted `path` of `document`.
pub(crate) fn resolve(document: &Document, path: &str) -> Vec<Bson> {
    let segments = path.split('.').collect::<Vec<_>>();
    let Some((head, rest)) = segments.split_first() else {
        return Vec::new();
    };

    document
        .get(*head)
        .map(|value| lookup(value, rest))
        .unwrap_or_default()
}

/// Every value reachable through `path`, fanning out into arrays.
fn lookup(value: &Bson, path: &[&str]) -> Vec<Bson> {
    let Some((head, rest)) = path.split_first() else {
        return vec![value.clone()];
    };

    match value {
        Bson::Document(document) => document
            .get(*head)
            .map(|child| lookup(child, rest))
            .unwrap_or_default(),
        Bson::Array(items) => {
            if let Ok(index) = head.parse::<usize>() {
                if let Some(item) = items.get(index) {
                    return lookup(item, rest);
                }
            }
            items
                .iter()
                .filter(|item| matches!(item, Bson::Document(_)))
                .flat_map(|item| lookup(item, path))
                .collect()
        },
        _ => Vec::new(),
    }
}

/// `true` when `condition` is an operator expression rather than a literal sub-document.
fn is_operator_expression(condition: &Bson) -> bool {
    match condition {
        Bson::Document(document) => has_operator_keys(document),
        _ => false,
    }
}

fn has_operator_keys(document: &Document) -> bool {
    document
        .keys()
        .next()
        .is_some_and(|key| key.starts_with('$') && !REFERENCE_KEYS.contains(&key.as_str()))
}

fn field_matches(candidates: &[Bson], condition: &Bson) -> MapperResult<bool> {
    if !is_operator_expression(condition) {
        return Ok(equals_any(candidates, condition));
    }

    let Bson::Document(operators) = condition else {
        return Ok(false);
    };

    for (operator, operand) in operators {
        if !operator_matches(candidates, operator, operand)? {
            return Ok(false);
        }
    }

    Ok(true)
}

fn operator_matches(candidates: &[Bson], operator: &str, operand: &Bson) -> MapperResult<bool> {
    Ok(match operator {
        "$eq" => equals_any(candidates, operand),
        "$ne" => !equals_any(candidates, operand),
        "$gt" => compares(candidates, operand, |ordering| ordering == Ordering::Greater),
        "$gte" => compares(candidates, operand, |ordering| ordering != Ordering::Less),
        "$lt" => compares(candidates, operand, |ordering| ordering == Ordering::Less),
        "$lte" => compares(candidates, operand, |ordering| ordering != Ordering::Greater),
        "$in" => {
            let Bson::Array(values) = operand else {
                return Err(bad_operand(operator, "an array"));
            };
            values
                .iter()
                .any(|value| equals_any(candidates, value))
        },
        "$nin" => {
            let Bson::Array(values) = operand else {
                return Err(bad_operand(operator, "an array"));
            };
            !values
                .iter()
                .any(|value| equals_any(candidates, value))
        },
        "$all" => {
            let Bson::Array(values) = operand else {
                return Err(bad_operand(operator, "an array"));
            };
            !values.is_empty()
                && values
                    .iter()
                    .all(|value| equals_any(candidates, value))
        },
        "$exists" => {
            let should_exist = match operand {
                Bson::Boolean(flag) => *flag,
                Bson::Int32(value) => *value != 0,
                Bson::Int64(value) => *value != 0,
                _ => true,
            };
            candidates.is_empty() != should_exist
        },
        "$size" => {
            let size = match operand {
                Bson::Int32(value) => i64::from(*value),
                Bson::Int64(value) => *value,
                _ => return Err(bad_operand(operator, "an integer")),
            };
            candidates
                .iter()
                .any(|candidate| matches!(candidate, Bson::Array(items) if items.len() as i64 == size))
        },
        "$not" => !field_matches(candidates, operand)?,
        "$elemMatch" => {
            let Bson::Document(criteria) = operand else {
                return Err(bad_operand(operator, "a document"));
            };
            let mut found = false;
            for candidate in candidates {
                let Bson::Array(items) = candidate else {
                    continue;
                };
                for item in items {
                    if element_matches(item, criteria)? {
                        found = true;
                        break;
                    }
                }
                if found {
                    break;
                }
            }
            found
        },
        other => return Err(unknown_operator(other)),
    })
}

fn element_matches(item: &Bson, criteria: &Document) -> MapperResult<bool> {
    if has_operator_keys(criteria) {
        for (operator, operand) in criteria {
            if !operator_matches(std::slice::from_ref(item), operator, operand)? {
                return Ok(false);
            }
        }
        return Ok(true);
    }

    match item {
        Bson::Document(document) => DocumentEvaluator::new(document).matches(criteria),
        _ => Ok(false),
    }
}

/// Equality with array-element matching; a missing field equals null.
fn equals_any(candidates: &[Bson], value: &Bson) -> bool {
    if candidates.is_empty() {
        return matches!(value, Bson::Null);
    }

    let expected = Comparable::from(value);
    candidates.iter().any(|candidate| {
        if Comparable::from(candidate) == expected {
            return true;
        }
        match candidate {
            Bson::Array(items) => items
                .iter()
                .any(|item| Comparable::from(item) == expected),
            _ => false,
        }
    })
}

fn compares(candidates: &[Bson], operand: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
    let expected = Comparable::from(operand);
    let check = |value: &Bson| {
        Comparable::from(value)
            .partial_cmp(&expected)
            .is_some_and(&accept)
    };

    candidates.iter().any(|candidate| match candidate {
        Bson::Array(items) => items.iter().any(&check),
        other => check(other),
    })
}

fn unknown_operator(operator: &str) -> docmapper_core::error::MapperError {
    StorageError::other(format!("unknown operator: {operator}")).into()
}

fn bad_operand(operator: &str, expected: &str) -> docmapper_core::error::MapperError {
    StorageError::other(format!("{operator} needs {expected}")).into()
}


#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn matches(document: Document, criteria: Document) -> bool {
        DocumentEvaluator::new(&document)
            .matches(&criteria)
            .unwrap()
    }

    #[test]
    fn numbers_compare_across_widths() {
        assert!(matches(doc! { "v": 3_i64 }, doc! { "v": 3 }));
        assert!(matches(doc! { "v": 3 }, doc! { "v": { "$gte": 2.5 } }));
        assert!(!matches(doc! { "v": 3 }, doc! { "v": { "$lt": 3 } }));
    }

    #[test]
    fn dotted_paths_fan_out_into_arrays() {
        let post = doc! { "comments": [{ "author": { "$ref": "users", "$id": 1 } }, { "author": { "$ref": "users", "$id": 2 } }] };

        assert!(matches(post.clone(), doc! { "comments.author.$id": 2 }));
        assert!(!matches(post.clone(), doc! { "comments.author.$id": 3 }));
        assert!(matches(post, doc! { "comments.0.author.$id": 1 }));
    }

    #[test]
    fn reference_documents_are_literals() {
        let post = doc! { "author": { "$ref": "users", "$id": 7 } };

        assert!(matches(post.clone(), doc! { "author": { "$ref": "users", "$id": 7 } }));
        assert!(!matches(post, doc! { "author": { "$ref": "users", "$id": 8 } }));
    }

    #[test]
    fn element_match_and_logical_operators() {
        let post = doc! { "reviewers": [{ "id": 1 }, { "id": 2 }], "type": "employee" };

        assert!(matches(post.clone(), doc! { "reviewers": { "$elemMatch": { "id": 2 } } }));
        assert!(matches(post.clone(), doc! { "$or": [{ "type": "person" }, { "type": "employee" }] }));
        assert!(matches(post.clone(), doc! { "$and": [{ "type": { "$in": ["employee", null] } }, { "missing": { "$exists": false } }] }));
        assert!(!matches(post, doc! { "$nor": [{ "type": "employee" }] }));
    }

    #[test]
    fn missing_fields_equal_null() {
        assert!(matches(doc! { "a": 1 }, doc! { "type": { "$in": ["person", null] } }));
        assert!(matches(doc! { "a": 1 }, doc! { "lk": { "$exists": false } }));
    }

    #[test]
    fn unknown_operators_fail() {
        let result = DocumentEvaluator::new(&doc! { "a": 1 }).matches(&doc! { "a": { "$regex": "x" } });

        assert!(result.is_err());
    }

    #[test]
    fn sorting_honours_direction_and_mixed_types() {
        let mut documents = vec![doc! { "n": 2 }, doc! { "n": "x" }, doc! {}, doc! { "n": 1 }];

        DocumentEvaluator::sort_documents(&mut documents, &doc! { "n": -1 });

        assert_eq!(documents, vec![doc! { "n": "x" }, doc! { "n": 2 }, doc! { "n": 1 }, doc! {}]);
    }
}
