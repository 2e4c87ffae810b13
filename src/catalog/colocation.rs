//! Partition colocation lookups.

use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::error::{CatalogError, CatalogResult};
use super::types::{Relation, TableIdentifier};

/// Identity of the relation whose partitions lead a colocation group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaderId(pub String);

impl LeaderId {
    /// The leader identity a partitioned table has before it is colocated
    /// with anything: its own region path.
    pub fn of(table: &TableIdentifier) -> Self {
        LeaderId(format!("/{}/{}", table.schema, table.table).to_uppercase())
    }
}

impl fmt::Display for LeaderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reports whether two partitioned relations place corresponding partitions
/// on the same nodes.
pub trait ColocationOracle: Send + Sync {
    /// Partition leader of `table`, or `None` when the oracle cannot classify
    /// it.
    fn partition_leader(&self, table: &TableIdentifier) -> Option<LeaderId>;

    /// Two relations are colocated iff both are partitioned and report the
    /// same leader. Unknown leaders are never colocated.
    fn is_colocated(&self, left: &Relation, right: &Relation) -> bool {
        if !left.is_partitioned() || !right.is_partitioned() {
            return false;
        }
        match (
            self.partition_leader(&left.ident),
            self.partition_leader(&right.ident),
        ) {
            (Some(l), Some(r)) => l == r,
            _ => false,
        }
    }
}

/// In-memory registry of partition leaders.
#[derive(Default)]
pub struct PartitionLeaders {
    leaders: RwLock<HashMap<TableIdentifier, LeaderId>>,
}

impl PartitionLeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `table` as leading its own colocation group.
    pub fn register(&self, table: &TableIdentifier) -> LeaderId {
        let leader = LeaderId::of(table);
        self.leaders.write().insert(table.clone(), leader.clone());
        leader
    }

    /// Place `table` in the colocation group of `with`.
    pub fn colocate(&self, table: &TableIdentifier, with: &TableIdentifier) -> CatalogResult<LeaderId> {
        let mut leaders = self.leaders.write();
        let leader = leaders
            .get(with)
            .cloned()
            .ok_or_else(|| CatalogError::NoPartitionLeader(with.to_string()))?;
        leaders.insert(table.clone(), leader.clone());
        Ok(leader)
    }

    /// Forget everything known about `table`.
    pub fn remove(&self, table: &TableIdentifier) -> Option<LeaderId> {
        self.leaders.write().remove(table)
    }
}

impl ColocationOracle for PartitionLeaders {
    fn partition_leader(&self, table: &TableIdentifier) -> Option<LeaderId> {
        self.leaders.read().get(table).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnDef, DataType, RelationKind};

    fn relation(name: &str, partition_columns: &[&str]) -> Relation {
        Relation {
            ident: TableIdentifier::new("app", name),
            columns: vec![ColumnDef::new("id", DataType::Integer)],
            partition_columns: partition_columns.iter().map(|c| c.to_string()).collect(),
            kind: RelationKind::Base,
        }
    }

    #[test]
    fn test_colocated_tables() {
        let leaders = PartitionLeaders::new();
        let orders = relation("orders", &["id"]);
        let items = relation("items", &["id"]);
        let other = relation("other", &["id"]);

        leaders.register(&orders.ident);
        leaders.colocate(&items.ident, &orders.ident).unwrap();
        leaders.register(&other.ident);

        assert_eq!(
            leaders.partition_leader(&items.ident),
            Some(LeaderId("/APP/ORDERS".into()))
        );
        assert!(leaders.is_colocated(&orders, &items));
        assert!(leaders.is_colocated(&items, &orders));
        assert!(!leaders.is_colocated(&orders, &other));
    }

    #[test]
    fn test_unknown_leader_is_not_colocated() {
        let leaders = PartitionLeaders::new();
        let a = relation("a", &["id"]);
        let b = relation("b", &["id"]);
        leaders.register(&a.ident);
        assert!(!leaders.is_colocated(&a, &b));
        assert!(!leaders.is_colocated(&b, &b));
    }

    #[test]
    fn test_unpartitioned_is_not_colocated() {
        let leaders = PartitionLeaders::new();
        let a = relation("a", &[]);
        leaders.register(&a.ident);
        assert!(!leaders.is_colocated(&a, &a));
    }

    #[test]
    fn test_colocate_requires_leader() {
        let leaders = PartitionLeaders::new();
        let result = leaders.colocate(
            &TableIdentifier::new("app", "a"),
            &TableIdentifier::new("app", "b"),
        );
        assert!(matches!(result, Err(CatalogError::NoPartitionLeader(_))));
    }
}
