//! Error types for the RelDB engine.

use crate::entity::Key;
use thiserror::Error;

/// Result type for engine operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// A single declared-rule violation reported by entity validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// The violating field.
    pub field: String,
    /// Human-readable description of the violation.
    pub message: String,
}

impl Violation {
    /// Creates a violation for `field` with the given message.
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// All violations for one entity that failed validation during a save
/// cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    /// The entity's type name.
    pub entity_type: &'static str,
    /// The entity's key.
    pub key: Key,
    /// The violations reported for the entity.
    pub violations: Vec<Violation>,
}

/// Errors that can occur in RelDB engine operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Table store error.
    #[error("storage error: {0}")]
    Storage(#[from] reldb_storage::StorageError),

    /// An entity type or relationship is misdeclared.
    ///
    /// Schema errors are construction-time failures raised while
    /// building a context, never at runtime.
    #[error("schema error: {message}")]
    Schema {
        /// Description of the misdeclaration.
        message: String,
    },

    /// The relationship declarations close a dependency loop.
    ///
    /// The save cycle that detected the loop performed no writes.
    #[error("dependency cycle: {path}")]
    Cycle {
        /// The full cycle path, type names joined by arrows.
        path: String,
    },

    /// One or more entities failed validation during a save cycle.
    ///
    /// The failed entities were not persisted; independent entities in
    /// the same cycle were.
    #[error("validation failed for {} entities", failures.len())]
    Validation {
        /// The per-entity failure batch.
        failures: Vec<ValidationFailure>,
    },

    /// A lookup the caller expected to succeed found nothing.
    #[error("entity not found: {entity_type} with key '{key}'")]
    NotFound {
        /// The entity type searched.
        entity_type: String,
        /// The key that was not found.
        key: String,
    },

    /// An unrecognized comparison operator token in a query condition.
    #[error("unsupported operator: {token:?}")]
    UnsupportedOperator {
        /// The offending token.
        token: String,
    },

    /// A new entity's key already exists in the backing table.
    #[error("duplicate key: {entity_type} with key '{key}' already exists")]
    DuplicateKey {
        /// The entity type.
        entity_type: String,
        /// The conflicting key.
        key: String,
    },

    /// An operation referenced an entity type never registered with the
    /// context.
    #[error("unknown entity type: {name}")]
    UnknownType {
        /// The unregistered type name.
        name: String,
    },

    /// A stored record could not be decoded into its entity type.
    #[error("invalid record for {entity_type}: {message}")]
    InvalidRecord {
        /// The entity type being decoded.
        entity_type: String,
        /// Description of the decode failure.
        message: String,
    },
}

impl CoreError {
    /// Creates a schema error.
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Creates a cycle error from the offending path.
    pub fn cycle(path: impl Into<String>) -> Self {
        Self::Cycle { path: path.into() }
    }

    /// Creates a not-found error.
    pub fn not_found(entity_type: impl Into<String>, key: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            key: key.into(),
        }
    }

    /// Creates an unsupported-operator error.
    pub fn unsupported_operator(token: impl Into<String>) -> Self {
        Self::UnsupportedOperator {
            token: token.into(),
        }
    }

    /// Creates a duplicate-key error.
    pub fn duplicate_key(entity_type: impl Into<String>, key: impl Into<String>) -> Self {
        Self::DuplicateKey {
            entity_type: entity_type.into(),
            key: key.into(),
        }
    }

    /// Creates an unknown-type error.
    pub fn unknown_type(name: impl Into<String>) -> Self {
        Self::UnknownType { name: name.into() }
    }

    /// Creates an invalid-record error.
    pub fn invalid_record(entity_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidRecord {
            entity_type: entity_type.into(),
            message: message.into(),
        }
    }
}
