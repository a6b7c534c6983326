//! Update operator buckets.

use bson::{Bson, Document};

/// A single-document mutation made of `$set`, `$unset` and `$inc` buckets.
///
/// `None` means the bucket is absent; `Some` of an empty document is a present but
/// empty bucket, which some storage versions require for a no-op upsert.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mutation {
    pub set: Option<Document>,
    pub unset: Option<Document>,
    pub inc: Option<Document>,
}

impl Mutation {
    pub fn new() -> Self {
        Self::default()
    }

    /// A mutation holding only a `$set` bucket.
    pub fn replace_fields(fields: Document) -> Self {
        Self { set: Some(fields), ..Default::default() }
    }

    /// `{$set: {}}`.
    pub fn empty_set() -> Self {
        Self::replace_fields(Document::new())
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Bson>) {
        self.set
            .get_or_insert_with(Document::new)
            .insert(field.into(), value.into());
    }

    pub fn unset(&mut self, field: impl Into<String>) {
        self.unset
            .get_or_insert_with(Document::new)
            .insert(field.into(), true);
    }

    pub fn inc(&mut self, field: impl Into<String>, by: impl Into<Bson>) {
        self.inc
            .get_or_insert_with(Document::new)
            .insert(field.into(), by.into());
    }

    /// Removes `fields` from the `$set` and `$inc` buckets.
    pub fn strip_fields<'a>(&mut self, fields: impl IntoIterator<Item = &'a str>) {
        for field in fields {
            if let Some(set) = self.set.as_mut() {
                set.remove(field);
            }
            if let Some(inc) = self.inc.as_mut() {
                inc.remove(field);
            }
        }
    }

    /// Drops every present but empty bucket.
    pub fn prune_empty(&mut self) {
        for bucket in [&mut self.set, &mut self.unset, &mut self.inc] {
            if bucket.as_ref().is_some_and(Document::is_empty) {
                *bucket = None;
            }
        }
    }

    /// `true` when no bucket is present.
    pub fn is_empty(&self) -> bool {
        self.set.is_none() && self.unset.is_none() && self.inc.is_none()
    }

    pub fn into_document(self) -> Document {
        let mut document = Document::new();

        if let Some(set) = self.set {
            document.insert("$set", set);
        }
        if let Some(unset) = self.unset {
            document.insert("$unset", unset);
        }
        if let Some(inc) = self.inc {
            document.insert("$inc", inc);
        }

        document
    }
}
