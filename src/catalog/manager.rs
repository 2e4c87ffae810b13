//! In-memory catalog of base tables and their index relations.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;

use super::error::{CatalogError, CatalogResult};
use super::types::{ColumnDef, Relation, RelationKind, TableIdentifier};

/// Metadata lookups the index rule needs.
///
/// Implementations must tolerate concurrent readers; compilations of
/// different queries share one catalog.
pub trait IndexCatalog: Send + Sync {
    /// Resolve a possibly schema-qualified name to its relation.
    fn resolve(&self, name: &str) -> CatalogResult<Arc<Relation>>;

    /// Identifiers of the index relations derived from `base`, in name order.
    fn dependents(&self, base: &TableIdentifier) -> Vec<TableIdentifier>;

    /// The index relations derived from `base`, in name order. Dependents
    /// that no longer resolve are skipped.
    fn dependent_relations(&self, base: &TableIdentifier) -> Vec<Arc<Relation>> {
        self.dependents(base)
            .iter()
            .filter_map(|ident| self.resolve(&ident.to_string()).ok())
            .collect()
    }
}

#[derive(Default)]
struct CatalogState {
    relations: BTreeMap<TableIdentifier, Arc<Relation>>,
    dependents: BTreeMap<TableIdentifier, BTreeSet<TableIdentifier>>,
}

/// The catalog keeps relation definitions in memory behind a read/write lock.
#[derive(Default)]
pub struct Catalog {
    state: RwLock<CatalogState>,
}

impl Catalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Define a base table.
    pub fn create_table(
        &self,
        name: &str,
        columns: Vec<ColumnDef>,
        partition_columns: &[&str],
    ) -> CatalogResult<Arc<Relation>> {
        let ident = TableIdentifier::parse(name)?;
        validate_columns(&ident, &columns)?;
        let partition_columns = canonical_partitioning(&ident, &columns, partition_columns)?;

        let relation = Arc::new(Relation {
            ident: ident.clone(),
            columns,
            partition_columns,
            kind: RelationKind::Base,
        });

        let mut state = self.state.write();
        if state.relations.contains_key(&ident) {
            return Err(CatalogError::AlreadyExists(ident.to_string()));
        }
        state.relations.insert(ident, relation.clone());
        Ok(relation)
    }

    /// Define an index over `base`. The index stores a subset of the base
    /// table's columns and may be partitioned differently.
    pub fn create_index(
        &self,
        name: &str,
        base: &str,
        columns: &[&str],
        partition_columns: &[&str],
    ) -> CatalogResult<Arc<Relation>> {
        let ident = TableIdentifier::parse(name)?;
        let base_ident = TableIdentifier::parse(base)?;

        let mut state = self.state.write();
        let base_rel = state
            .relations
            .get(&base_ident)
            .filter(|r| r.is_base())
            .cloned()
            .ok_or_else(|| CatalogError::TableNotFound(base_ident.to_string()))?;
        if state.relations.contains_key(&ident) {
            return Err(CatalogError::AlreadyExists(ident.to_string()));
        }

        let index_columns = columns
            .iter()
            .map(|name| {
                base_rel.get_column(name).cloned().ok_or_else(|| {
                    CatalogError::ColumnNotFound {
                        relation: base_ident.to_string(),
                        column: name.to_string(),
                    }
                })
            })
            .collect::<CatalogResult<Vec<_>>>()?;
        validate_columns(&ident, &index_columns)?;
        let partition_columns = canonical_partitioning(&ident, &index_columns, partition_columns)?;

        let relation = Arc::new(Relation {
            ident: ident.clone(),
            columns: index_columns,
            partition_columns,
            kind: RelationKind::Index {
                base: base_ident.clone(),
            },
        });
        state.relations.insert(ident.clone(), relation.clone());
        state.dependents.entry(base_ident).or_default().insert(ident);
        Ok(relation)
    }

    /// Drop an index relation.
    pub fn drop_index(&self, name: &str) -> CatalogResult<()> {
        let ident = TableIdentifier::parse(name)?;
        let mut state = self.state.write();
        let base = match state.relations.get(&ident).map(|r| r.kind.clone()) {
            Some(RelationKind::Index { base }) => base,
            _ => return Err(CatalogError::IndexNotFound(ident.to_string())),
        };
        state.relations.remove(&ident);
        if let Some(deps) = state.dependents.get_mut(&base) {
            deps.remove(&ident);
        }
        Ok(())
    }

    /// Drop a base table together with every index derived from it.
    pub fn drop_table(&self, name: &str) -> CatalogResult<()> {
        let ident = TableIdentifier::parse(name)?;
        let mut state = self.state.write();
        if !state.relations.get(&ident).is_some_and(|r| r.is_base()) {
            return Err(CatalogError::TableNotFound(ident.to_string()));
        }
        state.relations.remove(&ident);
        for dep in state.dependents.remove(&ident).unwrap_or_default() {
            state.relations.remove(&dep);
        }
        Ok(())
    }

    /// Check if a relation exists.
    pub fn table_exists(&self, name: &str) -> bool {
        TableIdentifier::parse(name)
            .map(|ident| self.state.read().relations.contains_key(&ident))
            .unwrap_or(false)
    }

    /// List all base tables.
    pub fn list_tables(&self) -> Vec<TableIdentifier> {
        self.state
            .read()
            .relations
            .values()
            .filter(|r| r.is_base())
            .map(|r| r.ident.clone())
            .collect()
    }
}

impl IndexCatalog for Catalog {
    fn resolve(&self, name: &str) -> CatalogResult<Arc<Relation>> {
        let ident = TableIdentifier::parse(name)?;
        self.state
            .read()
            .relations
            .get(&ident)
            .cloned()
            .ok_or_else(|| CatalogError::TableNotFound(ident.to_string()))
    }

    fn dependents(&self, base: &TableIdentifier) -> Vec<TableIdentifier> {
        self.state
            .read()
            .dependents
            .get(base)
            .map(|deps| deps.iter().cloned().collect())
            .unwrap_or_default()
    }
}

fn validate_columns(ident: &TableIdentifier, columns: &[ColumnDef]) -> CatalogResult<()> {
    if columns.is_empty() {
        return Err(CatalogError::InvalidIdentifier(format!("{} has no columns", ident)));
    }
    let mut seen = HashSet::new();
    for col in columns {
        if !seen.insert(col.name.to_lowercase()) {
            return Err(CatalogError::DuplicateColumn(col.name.clone()));
        }
    }
    Ok(())
}

/// Map requested partition columns onto the relation's own column spelling.
fn canonical_partitioning(
    ident: &TableIdentifier,
    columns: &[ColumnDef],
    partition_columns: &[&str],
) -> CatalogResult<Vec<String>> {
    let mut seen = HashSet::new();
    partition_columns
        .iter()
        .map(|name| {
            let col = columns
                .iter()
                .find(|c| c.name.eq_ignore_ascii_case(name))
                .ok_or_else(|| CatalogError::InvalidPartitioning {
                    relation: ident.to_string(),
                    reason: format!("partition column '{}' is not a column", name),
                })?;
            if !seen.insert(col.name.to_lowercase()) {
                return Err(CatalogError::InvalidPartitioning {
                    relation: ident.to_string(),
                    reason: format!("partition column '{}' listed twice", name),
                });
            }
            Ok(col.name.clone())
        })
        .collect()
}
