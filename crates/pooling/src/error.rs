//! Error types for pooling and result reshaping
//!
//! Everything here except [`PoolingError::Store`] signals a mistake in query
//! construction. Store failures are passed through untouched.

use std::error::Error as StdError;
use std::sync::Arc;

use crate::entity::KeyValue;

/// Result type alias for pooling operations
pub type PoolingResult<T> = Result<T, PoolingError>;

/// Error types for pooling, mapping and pipeline evaluation
#[derive(Debug, Clone, thiserror::Error)]
pub enum PoolingError {
    #[error("Unknown relationship path '{path}' on '{entity}': no relation named '{segment}'")]
    UnknownPath {
        entity: String,
        path: String,
        segment: String,
    },

    #[error("Unknown entity type '{0}'")]
    UnknownEntity(String),

    #[error("Invalid relation '{path}': {reason}")]
    InvalidRelation { path: String, reason: String },

    #[error("Unsupported query: {0}")]
    UnsupportedQuery(String),

    #[error("No '{entity}' with key {key} in the pool built for '{path}'")]
    PoolMiss {
        entity: String,
        key: KeyValue,
        path: String,
    },

    #[error("Relation '{relation}' is not loaded on '{entity}'")]
    RelationNotLoaded { entity: String, relation: String },

    #[error("Row for '{0}' has no usable primary key")]
    MissingPrimaryKey(String),

    #[error("Record not found in '{0}'")]
    NotFound(String),

    #[error("Expected exactly one '{entity}' but found {count}")]
    MultipleResults { entity: String, count: usize },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Store error: {0}")]
    Store(#[source] Arc<dyn StdError + Send + Sync>),
}

impl PoolingError {
    /// Wrap a failure raised by the underlying store
    pub fn store<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        PoolingError::Store(Arc::new(err))
    }

    pub(crate) fn invalid_relation(path: &str, reason: impl Into<String>) -> Self {
        PoolingError::InvalidRelation {
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    /// True for errors caused by the store rather than by query construction
    pub fn is_store_error(&self) -> bool {
        matches!(self, PoolingError::Store(_))
    }
}

impl From<serde_json::Error> for PoolingError {
    fn from(err: serde_json::Error) -> Self {
        PoolingError::Serialization(err.to_string())
    }
}
