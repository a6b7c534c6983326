//! Optimistic concurrency: version and lock field transitions.

use bson::{Bson, Document, doc};

use crate::{
    convert,
    entity::EntityRef,
    mapping::{ClassMapping, FieldMapping, VersionKind},
    mutation::Mutation,
    store::DocumentManager,
    value::Value,
};

/// Lock modes, stored in the lock field as their numeric value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LockMode {
    #[default]
    None = 0,
    Optimistic = 1,
    PessimisticRead = 2,
    PessimisticWrite = 4,
}

impl LockMode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// `true` for the exclusive lock that blocks every other reader.
    pub fn is_exclusive(self) -> bool {
        self == LockMode::PessimisticWrite
    }
}

/// A version value to write back to an entity once its write is confirmed.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionTransition {
    /// Entity field name of the version.
    pub field: String,
    pub next: Value,
}

/// Computes the version and lock parts of writes against one class mapping.
pub struct ConcurrencyGuard<'a> {
    manager: &'a DocumentManager,
    mapping: &'a ClassMapping,
}

impl<'a> ConcurrencyGuard<'a> {
    pub fn new(manager: &'a DocumentManager, mapping: &'a ClassMapping) -> Self {
        Self { manager, mapping }
    }

    /// `true` when writes of this type are version- or lock-guarded.
    pub fn is_guarded(&self) -> bool {
        self.mapping.is_versioned() || self.mapping.is_lockable()
    }

    /// Writes the initial version into an insert document.
    pub fn insert_version(&self, entity: &EntityRef, document: &mut Document) -> Option<VersionTransition> {
        let (kind, field) = self.version_field()?;

        let next = match kind {
            VersionKind::Counter => Bson::Int64(counter(entity.get(&field.name).as_ref()).max(1)),
            VersionKind::Timestamp => Bson::DateTime(convert::now()),
        };
        document.insert(field.storage_name.clone(), self.to_storage(field, next.clone()));

        Some(VersionTransition { field: field.name.clone(), next: Value::Bson(next) })
    }

    /// Adds the version match to `criteria` and the version bump to `mutation`.
    pub fn guard_update(
        &self,
        entity: &EntityRef,
        criteria: &mut Document,
        mutation: &mut Mutation,
    ) -> Option<VersionTransition> {
        let (kind, field) = self.version_field()?;

        let current = entity
            .get(&field.name)
            .and_then(|value| value.as_bson().cloned())
            .map(|value| self.to_storage(field, value))
            .unwrap_or(Bson::Null);
        criteria.insert(field.storage_name.clone(), current);

        let next = match kind {
            VersionKind::Counter => {
                mutation.inc(field.storage_name.clone(), 1_i64);
                Bson::Int64(counter(entity.get(&field.name).as_ref()) + 1)
            }
            VersionKind::Timestamp => self.set_timestamp(field, mutation),
        };

        Some(VersionTransition { field: field.name.clone(), next: Value::Bson(next) })
    }

    /// Sets the version in `mutation`, leaving the criteria alone.
    ///
    /// Upsert criteria carry no version match, so counters are written outright
    /// as `max(1, current)` instead of incremented.
    pub fn guard_upsert(&self, entity: &EntityRef, mutation: &mut Mutation) -> Option<VersionTransition> {
        let (kind, field) = self.version_field()?;

        let next = match kind {
            VersionKind::Counter => {
                let next = Bson::Int64(counter(entity.get(&field.name).as_ref()).max(1));
                mutation.set(field.storage_name.clone(), self.to_storage(field, next.clone()));
                next
            }
            VersionKind::Timestamp => self.set_timestamp(field, mutation),
        };

        Some(VersionTransition { field: field.name.clone(), next: Value::Bson(next) })
    }

    /// Releases an in-memory lock through `mutation`, or requires the stored document
    /// to be unlocked.
    ///
    /// # Returns
    ///
    /// `true` when the write releases the lock.
    pub fn guard_lock(&self, entity: &EntityRef, criteria: &mut Document, mutation: &mut Mutation) -> bool {
        let Some(field) = self.lock_field() else {
            return false;
        };

        if is_locked(entity.get(&field.name).as_ref()) {
            mutation.unset(field.storage_name.clone());
            true
        } else {
            criteria.insert(field.storage_name.clone(), doc! { "$exists": false });
            false
        }
    }

    /// Requires the stored document to be unlocked.
    pub fn require_unlocked(&self, criteria: &mut Document) {
        if let Some(field) = self.lock_field() {
            criteria.insert(field.storage_name.clone(), doc! { "$exists": false });
        }
    }

    /// Writes confirmed transitions back to the entity.
    pub fn advance(&self, entity: &EntityRef, transition: Option<VersionTransition>, released_lock: bool) {
        if let Some(transition) = transition {
            entity.set(&transition.field, Some(transition.next));
        }
        if released_lock {
            if let Some(field) = self.lock_field() {
                entity.set(&field.name, None);
            }
        }
    }

    fn set_timestamp(&self, field: &FieldMapping, mutation: &mut Mutation) -> Bson {
        let next = Bson::DateTime(convert::now());
        mutation.set(field.storage_name.clone(), self.to_storage(field, next.clone()));
        next
    }

    fn version_field(&self) -> Option<(VersionKind, &'a FieldMapping)> {
        let version = self.mapping.version.as_ref()?;
        Some((version.kind, self.mapping.field(&version.field)?))
    }

    fn lock_field(&self) -> Option<&'a FieldMapping> {
        self.mapping.field(self.mapping.lock_field.as_deref()?)
    }

    fn to_storage(&self, field: &FieldMapping, value: Bson) -> Bson {
        self.manager
            .converter()
            .to_storage(Some(field.type_tag), value)
    }
}

fn counter(value: Option<&Value>) -> i64 {
    match value.and_then(Value::as_bson) {
        Some(Bson::Int32(number)) => i64::from(*number),
        Some(Bson::Int64(number)) => *number,
        Some(Bson::Double(number)) => *number as i64,
        _ => 0,
    }
}

fn is_locked(value: Option<&Value>) -> bool {
    match value.and_then(Value::as_bson) {
        None | Some(Bson::Null) => false,
        Some(Bson::Int32(number)) => *number != 0,
        Some(Bson::Int64(number)) => *number != 0,
        Some(Bson::Boolean(locked)) => *locked,
        Some(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{entity::Record, persister::testing::manager};

    #[test]
    fn counters_start_at_one_and_increment() {
        let manager = manager();
        let articles = manager.class_mapping("Article").unwrap();
        let guard = ConcurrencyGuard::new(&manager, &articles);
        let article = EntityRef::new(Record::new("Article").with("version", 3_i64));

        let mut document = Document::new();
        let fresh = EntityRef::new(Record::new("Article"));
        let initial = guard.insert_version(&fresh, &mut document).unwrap();
        assert_eq!(document, doc! { "v": 1_i64 });
        assert_eq!(initial.next, Value::from(1_i64));

        let mut criteria = doc! { "_id": 1 };
        let mut mutation = Mutation::new();
        let next = guard.guard_update(&article, &mut criteria, &mut mutation);

        assert_eq!(criteria, doc! { "_id": 1, "v": 3_i64 });
        assert_eq!(mutation.into_document(), doc! { "$inc": { "v": 1_i64 } });
        assert_eq!(next.unwrap().next, Value::from(4_i64));
    }

    #[test]
    fn timestamps_are_set_not_incremented() {
        let manager = manager();
        let events = manager.class_mapping("Event").unwrap();
        let guard = ConcurrencyGuard::new(&manager, &events);
        let seen = convert::now();
        let event = EntityRef::new(Record::new("Event").with("updated", seen));

        let mut criteria = Document::new();
        let mut mutation = Mutation::new();
        guard.guard_update(&event, &mut criteria, &mut mutation);

        assert_eq!(criteria, doc! { "ts": seen });
        assert!(mutation.set.unwrap().get_datetime("ts").is_ok());
        assert!(mutation.inc.is_none());
    }

    #[test]
    fn locked_entities_release_the_lock() {
        let manager = manager();
        let articles = manager.class_mapping("Article").unwrap();
        let guard = ConcurrencyGuard::new(&manager, &articles);

        let locked = EntityRef::new(Record::new("Article").with("lock", LockMode::PessimisticRead.as_i32()));
        let mut criteria = Document::new();
        let mut mutation = Mutation::new();
        assert!(guard.guard_lock(&locked, &mut criteria, &mut mutation));
        assert_eq!(mutation.into_document(), doc! { "$unset": { "lk": true } });
        assert!(criteria.is_empty());

        let unlocked = EntityRef::new(Record::new("Article"));
        let mut criteria = Document::new();
        let mut mutation = Mutation::new();
        assert!(!guard.guard_lock(&unlocked, &mut criteria, &mut mutation));
        assert_eq!(criteria, doc! { "lk": { "$exists": false } });
        assert!(mutation.is_empty());
    }

    #[test]
    fn upserts_set_the_counter_outright() {
        let manager = manager();
        let articles = manager.class_mapping("Article").unwrap();
        let guard = ConcurrencyGuard::new(&manager, &articles);

        let fresh = EntityRef::new(Record::new("Article"));
        let mut mutation = Mutation::new();
        let initial = guard.guard_upsert(&fresh, &mut mutation).unwrap();
        assert_eq!(mutation.into_document(), doc! { "$set": { "v": 1_i64 } });
        assert_eq!(initial.next, Value::from(1_i64));

        let seen = EntityRef::new(Record::new("Article").with("version", 3_i64));
        let mut mutation = Mutation::new();
        let kept = guard.guard_upsert(&seen, &mut mutation).unwrap();
        assert_eq!(mutation.into_document(), doc! { "$set": { "v": 3_i64 } });
        assert_eq!(kept.next, Value::from(3_i64));
    }

    #[test]
    fn advancing_writes_back_the_next_version() {
        let manager = manager();
        let articles = manager.class_mapping("Article").unwrap();
        let guard = ConcurrencyGuard::new(&manager, &articles);
        let article = EntityRef::new(Record::new("Article").with("version", 1_i64).with("lock", 1));

        let transition = guard.guard_update(&article, &mut Document::new(), &mut Mutation::new());
        guard.advance(&article, transition, true);

        assert_eq!(article.get("version"), Some(Value::from(2_i64)));
        assert_eq!(article.get("lock"), None);
    }
}
