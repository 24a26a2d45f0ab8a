//! Error types for orgclone.

use thiserror::Error;
use uuid::Uuid;

use crate::models::{RecordId, RowErrorKind};

/// Result type alias using orgclone's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for orgclone operations.
///
/// Only pre-flight conditions and broken internal invariants surface as an
/// `Error` from a clone job. Per-row insert failures are data, carried by
/// [`InsertError`] into the clone report.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// An entity type was requested that was never registered
    #[error("Unknown entity type: {0}")]
    UnknownEntityType(String),

    /// The hard foreign-key graph contains a cycle
    #[error("Cyclic dependency between entity types: {}", .0.join(", "))]
    CyclicDependency(Vec<String>),

    /// The schema registry declaration is inconsistent
    #[error("Invalid registry: {0}")]
    InvalidRegistry(String),

    /// Organization does not exist
    #[error("Organization not found: {0}")]
    OrganizationNotFound(Uuid),

    /// Source and target organization are the same
    #[error("Source and target organization are identical: {0}")]
    SameOrganization(Uuid),

    /// A type was cloned before one of its hard dependencies completed
    #[error("Ordering violation: {entity_type} cloned before {depends_on} completed")]
    OrderingViolation {
        entity_type: String,
        depends_on: String,
    },

    /// A source id was mapped twice within one job
    #[error("Duplicate id mapping for {entity_type} source id {source_id}")]
    DuplicateMapping {
        entity_type: String,
        source_id: RecordId,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for the conditions that abort a clone job before any write.
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            Error::UnknownEntityType(_)
                | Error::CyclicDependency(_)
                | Error::InvalidRegistry(_)
                | Error::OrganizationNotFound(_)
                | Error::SameOrganization(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// A single row insert rejected by the target store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct InsertError {
    pub kind: RowErrorKind,
    pub message: String,
}

impl InsertError {
    pub fn new(kind: RowErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(RowErrorKind::Validation, message)
    }

    pub fn foreign_key(message: impl Into<String>) -> Self {
        Self::new(RowErrorKind::ForeignKey, message)
    }

    pub fn duplicate(message: impl Into<String>) -> Self {
        Self::new(RowErrorKind::Duplicate, message)
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::new(RowErrorKind::Store, message)
    }
}
