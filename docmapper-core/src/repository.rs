//! Repository interface for repository-driven collection loading.

use async_trait::async_trait;
use bson::Bson;

use crate::{backend::DocumentCursor, entity::EntityRef, error::MapperResult};

/// Outcome of a repository lookup.
pub enum RepositoryResult {
    /// A lazy sequence of raw documents of the repository's entity type.
    Cursor(DocumentCursor),
    /// Any non-sequence result.
    Value(Bson),
}

impl std::fmt::Debug for RepositoryResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepositoryResult::Cursor(_) => f.write_str("Cursor(..)"),
            RepositoryResult::Value(value) => f.debug_tuple("Value").field(value).finish(),
        }
    }
}

/// Named lookups of one entity type, invoked by collections mapped with a repository method.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Runs the lookup `method` for the collection owned by `owner`.
    async fn call(&self, method: &str, owner: &EntityRef) -> MapperResult<RepositoryResult>;
}
