//! indexopt - index substitution for a distributed SQL optimizer
//!
//! Binds SELECT queries against a catalog of partitioned base tables and
//! their index relations, runs a small rule-based optimizer, and swaps base
//! table scans for index scans where a hint, a colocated join or a filter on
//! the partition columns makes an index the better source.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use indexopt::catalog::{Catalog, ColumnDef, DataType, PartitionLeaders};
//! use indexopt::config::SessionConfig;
//! use indexopt::index::session_planner;
//!
//! let catalog = Arc::new(Catalog::new());
//! let columns = vec![
//!     ColumnDef::new("id", DataType::Integer),
//!     ColumnDef::new("status", DataType::Text),
//! ];
//! catalog.create_table("orders", columns, &["id"]).unwrap();
//! catalog
//!     .create_index("orders_by_status", "orders", &["id", "status"], &["status"])
//!     .unwrap();
//!
//! let planner = session_planner(catalog, Arc::new(PartitionLeaders::new()), SessionConfig::new());
//! let explain = planner
//!     .explain("SELECT id FROM orders WHERE status = 'open'")
//!     .unwrap();
//! assert!(explain.contains("orders_by_status"));
//! ```

pub mod catalog;
pub mod config;
pub mod index;
pub mod planner;
pub mod sql;
