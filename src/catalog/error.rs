//! Catalog errors.

use thiserror::Error;

/// Result type for catalog operations.
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Catalog lookup and definition errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("index not found: {0}")]
    IndexNotFound(String),

    #[error("relation already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("duplicate column: {0}")]
    DuplicateColumn(String),

    #[error("column '{column}' not found in {relation}")]
    ColumnNotFound { relation: String, column: String },

    #[error("invalid partitioning for {relation}: {reason}")]
    InvalidPartitioning { relation: String, reason: String },

    #[error("no partition leader registered for {0}")]
    NoPartitionLeader(String),
}
