//! Query planning and optimization.
//!
//! The planner binds SQL to logical plans whose nodes and attributes carry
//! stable ids, and rewrites them with a rule-based optimizer.

mod error;
mod expr;
mod logical;
mod optimizer;
mod planner;

pub use error::{PlanError, PlanResult};
pub use expr::{ColumnRef, Expr, ExprId, Resolver};
pub use logical::{
    AggregateExpr, AggregateFunction, EquiJoin, JoinType, LogicalPlan, NodeId, ProjectItem,
    SortDirection, SortSpec,
};
pub use optimizer::{
    ConstantFolding, LimitPushdown, OptimizationRule, Optimizer, PlanRule, PredicatePushdown,
    ProjectionMerge,
};
pub use planner::QueryPlanner;
