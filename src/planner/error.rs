//! Planning errors.

use thiserror::Error;

use crate::catalog::CatalogError;
use crate::sql::ParseError;

/// Result type for planning operations.
pub type PlanResult<T> = Result<T, PlanError>;

/// Query planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("column not found: {0}")]
    ColumnNotFound(String),

    #[error("ambiguous column: {0}")]
    AmbiguousColumn(String),

    #[error("invalid join condition: {0}")]
    InvalidJoin(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("index {index} is not an index of {table}")]
    InvalidHint { table: String, index: String },
}
