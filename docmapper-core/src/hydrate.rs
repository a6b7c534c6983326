//! Document hydration interface.

use bson::Document;

use crate::{entity::EntityRef, error::MapperResult, mapping::ClassMapping};

/// Flags passed along with a hydration request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Hints {
    /// Loaded entities are not registered with the unit of work.
    pub read_only: bool,
    /// Re-hydrate entities already present in the identity map.
    pub refresh: bool,
}

impl Hints {
    pub fn read_only() -> Self {
        Self { read_only: true, ..Default::default() }
    }

    pub fn refresh() -> Self {
        Self { refresh: true, ..Default::default() }
    }
}

/// Turns raw storage documents into entities.
pub trait Hydrator: Send + Sync {
    /// Hydrates `document` as an instance of `mapping`.
    ///
    /// When `target` is given its fields are overwritten and the same handle is
    /// returned; otherwise a new entity is created.
    fn hydrate(
        &self,
        mapping: &ClassMapping,
        target: Option<&EntityRef>,
        document: &Document,
        hints: &Hints,
    ) -> MapperResult<EntityRef>;
}
