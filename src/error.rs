//! Error types for the collection store.

use thiserror::Error;

/// Main error type for store operations.
///
/// Every variant is a precondition violation on the caller's side. A failed
/// operation never leaves a collection partially mutated.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Item is required to have an ID (of type string)")]
    MissingId,

    #[error("Duplicate ID found: {0}")]
    DuplicateId(String),

    #[error("ID was not found: {0}")]
    IdNotFound(String),

    #[error("Invalid values: {0}")]
    InvalidValues(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Collection already exists: {0}")]
    CollectionExists(String),

    #[error("Collection {0} holds a different record type")]
    CollectionTypeMismatch(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
