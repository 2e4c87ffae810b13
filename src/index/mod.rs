//! Index substitution.
//!
//! Replaces scans of base tables with scans of their index relations when an
//! index hint asks for it, when a join's keys line up with the partitioning of
//! two colocated relations, or when a filter pins every partition column of an
//! index. Column references above a substituted scan are rebound afterwards.

mod colocation;
mod hints;
mod predicate;
mod replace;
mod rule;

#[cfg(test)]
mod fixtures;

pub use colocation::{Candidate, ColocationMatcher};
pub use hints::{HintKey, HintMap, HintResolver};
pub use predicate::{column_groups, PredicateMatcher};
pub use replace::{reconcile, refresh, Conflict, Replacement, ReplacementMap, ReplacementSource};
pub use rule::{session_planner, IndexRule};
