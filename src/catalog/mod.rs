//! Relation metadata consumed by the index rule.
//!
//! The catalog knows every base table and the index relations derived from
//! it. The colocation oracle knows which partitioned relations share a
//! partition leader. Both are read-only from the optimizer's point of view.

mod colocation;
mod error;
mod manager;
mod types;

pub use colocation::{ColocationOracle, LeaderId, PartitionLeaders};
pub use error::{CatalogError, CatalogResult};
pub use manager::{Catalog, IndexCatalog};
pub use types::{ColumnDef, DataType, Relation, RelationKind, TableIdentifier, DEFAULT_SCHEMA};
