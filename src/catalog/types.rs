//! Relation and column definitions.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::{CatalogError, CatalogResult};

/// Schema used for names that carry no explicit schema.
pub const DEFAULT_SCHEMA: &str = "app";

/// Column data types known to the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// Text/string data (VARCHAR in SQL).
    Text,
    /// Integer numbers (BIGINT in SQL).
    Integer,
    /// Floating point numbers (DOUBLE in SQL).
    Float,
    /// Boolean values.
    Boolean,
    /// Timestamps.
    Timestamp,
}

impl DataType {
    /// Get the SQL name for this type.
    pub fn sql_name(&self) -> &'static str {
        match self {
            DataType::Text => "TEXT",
            DataType::Integer => "BIGINT",
            DataType::Float => "DOUBLE",
            DataType::Boolean => "BOOLEAN",
            DataType::Timestamp => "TIMESTAMP",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql_name())
    }
}

/// A column of a stored relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// Data type.
    pub data_type: DataType,
    /// Whether the column accepts nulls.
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

impl ColumnDef {
    /// Create a new nullable column definition.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
        }
    }

    /// Mark the column NOT NULL.
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

impl fmt::Display for ColumnDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.data_type)?;
        if !self.nullable {
            write!(f, " NOT NULL")?;
        }
        Ok(())
    }
}

/// Canonical, lower-cased `schema.table` identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableIdentifier {
    pub schema: String,
    pub table: String,
}

impl TableIdentifier {
    pub fn new(schema: impl AsRef<str>, table: impl AsRef<str>) -> Self {
        Self {
            schema: schema.as_ref().to_lowercase(),
            table: table.as_ref().to_lowercase(),
        }
    }

    /// Parse `table` or `schema.table`.
    pub fn parse(name: &str) -> CatalogResult<Self> {
        let parts: Vec<&str> = name.trim().split('.').map(str::trim).collect();
        match parts.as_slice() {
            [table] if !table.is_empty() => Ok(Self::new(DEFAULT_SCHEMA, table)),
            [schema, table] if !schema.is_empty() && !table.is_empty() => {
                Ok(Self::new(schema, table))
            }
            _ => Err(CatalogError::InvalidIdentifier(name.to_string())),
        }
    }
}

impl fmt::Display for TableIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// What a relation is with respect to indexing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// A regular partitioned column table.
    Base,
    /// A secondary index derived from exactly one base table.
    Index { base: TableIdentifier },
}

/// The resolved physical target of a table reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub ident: TableIdentifier,
    pub columns: Vec<ColumnDef>,
    /// Columns that decide which partition a row lands in, in order.
    #[serde(default)]
    pub partition_columns: Vec<String>,
    pub kind: RelationKind,
}

impl Relation {
    pub fn is_base(&self) -> bool {
        matches!(self.kind, RelationKind::Base)
    }

    pub fn is_index(&self) -> bool {
        matches!(self.kind, RelationKind::Index { .. })
    }

    /// The base table this relation stores rows of. A base table is its own
    /// base.
    pub fn base_table(&self) -> &TableIdentifier {
        match &self.kind {
            RelationKind::Base => &self.ident,
            RelationKind::Index { base } => base,
        }
    }

    /// Whether this relation is an index derived from `base`.
    pub fn is_index_of(&self, base: &TableIdentifier) -> bool {
        matches!(&self.kind, RelationKind::Index { base: b } if b == base)
    }

    pub fn is_partitioned(&self) -> bool {
        !self.partition_columns.is_empty()
    }

    /// Qualifier attached to the columns a scan of this relation produces.
    ///
    /// An index answers for its base table, so its columns carry the base
    /// table's name.
    pub fn scan_qualifier(&self) -> &str {
        &self.base_table().table
    }

    pub fn get_column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            RelationKind::Base => write!(f, "{}", self.ident)?,
            RelationKind::Index { base } => write!(f, "{} (index on {})", self.ident, base)?,
        }
        if self.is_partitioned() {
            write!(f, " PARTITION BY ({})", self.partition_columns.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_parse() {
        let id = TableIdentifier::parse("Orders").unwrap();
        assert_eq!(id, TableIdentifier::new("app", "orders"));
        assert_eq!(id.to_string(), "app.orders");

        let id = TableIdentifier::parse("Sales.Orders").unwrap();
        assert_eq!(id.schema, "sales");
        assert_eq!(id.table, "orders");

        assert!(TableIdentifier::parse("").is_err());
        assert!(TableIdentifier::parse("a.b.c").is_err());
        assert!(TableIdentifier::parse("a.").is_err());
    }

    #[test]
    fn test_index_scan_qualifier() {
        let base = TableIdentifier::new("app", "orders");
        let index = Relation {
            ident: TableIdentifier::new("app", "orders_by_cust"),
            columns: vec![ColumnDef::new("cust_id", DataType::Integer)],
            partition_columns: vec!["cust_id".into()],
            kind: RelationKind::Index { base: base.clone() },
        };
        assert!(index.is_index());
        assert!(index.is_index_of(&base));
        assert_eq!(index.base_table(), &base);
        assert_eq!(index.scan_qualifier(), "orders");
        assert!(index.get_column("CUST_ID").is_some());
    }
}
