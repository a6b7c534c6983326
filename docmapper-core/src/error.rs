//! Error types and result types for mapper operations.
//!
//! Every fallible operation in this crate returns [`MapperResult<T>`]. The variants
//! mirror the failure classes of the persistence protocol: configuration defects,
//! unresolved reference targets, optimistic-concurrency conflicts, shard-key
//! violations, storage failures and repository contract violations.

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Classification of a failure reported by a storage backend.
///
/// Backends translate their driver-specific errors into one of these kinds so the
/// persister can make retry decisions without inspecting error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    /// The write attempted to modify the identifier field of an existing document.
    ImmutableIdentifier,
    /// The write violated a unique index (including a duplicate `_id`).
    DuplicateKey,
    /// The update document was rejected as malformed (for example an empty modifier).
    InvalidMutation,
    /// Any other backend failure.
    Other,
}

/// A failure reported by a [`StoreBackend`](crate::backend::StoreBackend).
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct StorageError {
    /// Structured classification of the failure.
    pub kind: StorageErrorKind,
    /// The backend's own description of the failure.
    pub message: String,
}

impl StorageError {
    pub fn new(kind: StorageErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(StorageErrorKind::Other, message)
    }
}

/// Violations detected by the shard-key guard.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ShardKeyViolation {
    /// The entity has no value for a shard-key field.
    #[error("shard key field \"{field}\" is missing for {entity_type}")]
    Missing { field: String, entity_type: String },
    /// A scheduled update changes the value of a shard-key field.
    #[error("shard key field \"{field}\" of {entity_type} cannot be changed")]
    Immutable { field: String, entity_type: String },
}

/// Represents all possible errors that can occur while compiling queries or
/// executing the persistence protocol.
#[derive(Error, Debug)]
pub enum MapperError {
    /// Serialization/deserialization error when converting between document formats (BSON, JSON).
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Error during store initialization or connection setup.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// The mapper was assembled without a collaborator an operation requires.
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// A class mapping is invalid (unknown reference storage policy, unmapped version field, ...).
    #[error("Mapping configuration error: {0}")]
    MappingConfiguration(String),
    /// The metadata provider has no mapping for the referenced type.
    #[error("No class mapping registered for type \"{0}\"")]
    UnresolvedReferenceTarget(String),
    /// A version- or lock-guarded write matched nothing, or a loaded document is exclusively locked.
    #[error("Lock conflict on {entity_type} {identifier}")]
    LockConflict { entity_type: String, identifier: String },
    /// A shard-key field is missing or was changed.
    #[error("Shard key violation: {0}")]
    ShardKey(#[from] ShardKeyViolation),
    /// The storage backend rejected a read or write.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    /// A repository-backed collection loader returned something other than a cursor.
    #[error("Repository method \"{method}\" on {entity_type} must return a cursor")]
    RepositoryContractViolation { entity_type: String, method: String },
    /// A document expected to exist was not found.
    #[error("No {0} document found for {1}")]
    DocumentNotFound(String, String),
    /// The document or entity violates structural expectations.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
}

impl MapperError {
    /// Returns the storage error kind when this is a storage failure.
    pub fn storage_kind(&self) -> Option<StorageErrorKind> {
        match self {
            MapperError::Storage(err) => Some(err.kind),
            _ => None,
        }
    }

    pub(crate) fn lock_conflict(entity_type: &str, identifier: Option<&bson::Bson>) -> Self {
        MapperError::LockConflict {
            entity_type: entity_type.to_string(),
            identifier: identifier
                .map(ToString::to_string)
                .unwrap_or_else(|| "<unidentified>".to_string()),
        }
    }
}

/// A specialized `Result` type for mapper operations.
pub type MapperResult<T> = Result<T, MapperError>;

impl From<BsonError> for MapperError {
    fn from(err: BsonError) -> Self {
        MapperError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for MapperError {
    fn from(err: SerdeJsonError) -> Self {
        MapperError::Serialization(err.to_string())
    }
}
