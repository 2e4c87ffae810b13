//! Catalog and leader registry populated for index rule tests.

use std::sync::Arc;

use crate::catalog::{
    Catalog, ColocationOracle, ColumnDef, DataType, IndexCatalog, PartitionLeaders, Relation,
    TableIdentifier,
};
use crate::config::SessionConfig;
use crate::index::IndexRule;
use crate::planner::{LogicalPlan, QueryPlanner};

pub(crate) struct World {
    pub catalog: Arc<Catalog>,
    pub leaders: Arc<PartitionLeaders>,
}

impl World {
    /// No relations, no leaders.
    pub fn empty() -> Self {
        Self {
            catalog: Arc::new(Catalog::new()),
            leaders: Arc::new(PartitionLeaders::new()),
        }
    }

    /// Orders and customers with a handful of indexes.
    ///
    /// `orders_by_cust` shares a leader with `customers`; every other
    /// partitioned relation leads its own group.
    pub fn new() -> Self {
        Self::empty()
            .table(
                "orders",
                &["id", "cust_id", "status", "region", "amount"],
                &["id"],
            )
            .table("customers", &["id", "name", "region"], &["id"])
            .table("notes", &["id", "body"], &[])
            .index("orders_by_cust", "orders", &["id", "cust_id", "status"], &["cust_id"])
            .index("orders_by_status", "orders", &["id", "status", "region"], &["status"])
            .index(
                "orders_by_status_region",
                "orders",
                &["id", "status", "region"],
                &["status", "region"],
            )
            .index("customers_by_region", "customers", &["id", "name", "region"], &["region"])
            .leader("orders")
            .leader("customers")
            .leader("orders_by_status")
            .leader("orders_by_status_region")
            .leader("customers_by_region")
            .colocate("orders_by_cust", "customers")
    }

    pub fn table(self, name: &str, columns: &[&str], partition_columns: &[&str]) -> Self {
        let columns = columns
            .iter()
            .map(|c| ColumnDef::new(*c, DataType::Integer))
            .collect();
        self.catalog
            .create_table(name, columns, partition_columns)
            .unwrap();
        self
    }

    pub fn index(self, name: &str, base: &str, columns: &[&str], partition_columns: &[&str]) -> Self {
        self.catalog
            .create_index(name, base, columns, partition_columns)
            .unwrap();
        self
    }

    pub fn leader(self, name: &str) -> Self {
        self.leaders.register(&ident(name));
        self
    }

    pub fn colocate(self, name: &str, with: &str) -> Self {
        self.leaders.colocate(&ident(name), &ident(with)).unwrap();
        self
    }

    pub fn relation(&self, name: &str) -> Arc<Relation> {
        self.catalog.resolve(name).unwrap()
    }

    pub fn planner(&self) -> QueryPlanner {
        QueryPlanner::new(self.catalog.clone())
    }

    /// Bound, unoptimized plan of `sql`.
    pub fn plan(&self, sql: &str) -> LogicalPlan {
        self.planner().plan_sql(sql).unwrap()
    }

    pub fn rule(&self, session: SessionConfig) -> IndexRule {
        let catalog: Arc<dyn IndexCatalog> = self.catalog.clone();
        let oracle: Arc<dyn ColocationOracle> = self.leaders.clone();
        IndexRule::new(catalog, oracle, session)
    }
}

fn ident(name: &str) -> TableIdentifier {
    TableIdentifier::parse(name).unwrap()
}

/// Names of the relations a plan scans, left to right.
pub(crate) fn scans(plan: &LogicalPlan) -> Vec<String> {
    plan.relations()
        .iter()
        .map(|r| r.ident.table.clone())
        .collect()
}
