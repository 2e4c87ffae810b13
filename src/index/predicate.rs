//! Index selection for filtered scans.
//!
//! Comparisons against plain columns are grouped by the qualifier of the
//! column. An index of the table a group refers to qualifies when the group
//! names every one of its partition columns; the qualifying index with the
//! most partition columns is chosen.

use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, trace};

use super::replace::{refresh, ReplacementMap, ReplacementSource};
use crate::catalog::{IndexCatalog, Relation};
use crate::planner::{ColumnRef, Expr, ExprId, LogicalPlan, Resolver};

/// Columns compared against by a filter, grouped by qualifier in order of
/// first use.
pub fn column_groups(predicate: &Expr) -> Vec<(&str, Vec<&ColumnRef>)> {
    let mut seen: HashSet<ExprId> = HashSet::new();
    let mut groups: Vec<(&str, Vec<&ColumnRef>)> = Vec::new();

    for term in predicate.split_conjunction() {
        let Expr::BinaryOp { left, op, .. } = term else {
            continue;
        };
        if !op.is_comparison() {
            continue;
        }
        let Expr::Column(col) = left.as_ref() else {
            continue;
        };
        let Some(qualifier) = col.qualifier.as_deref() else {
            continue;
        };
        if !seen.insert(col.id) {
            continue;
        }
        match groups.iter_mut().find(|(q, _)| *q == qualifier) {
            Some((_, cols)) => cols.push(col),
            None => groups.push((qualifier, vec![col])),
        }
    }
    groups
}

/// A table reference below a filter together with its indexes.
struct Target<'p> {
    owner: &'p LogicalPlan,
    alias: Option<&'p str>,
    relation: &'p Arc<Relation>,
    indexes: Vec<Arc<Relation>>,
}

pub struct PredicateMatcher<'a> {
    catalog: &'a dyn IndexCatalog,
    resolver: Resolver,
}

impl<'a> PredicateMatcher<'a> {
    pub fn new(catalog: &'a dyn IndexCatalog, resolver: Resolver) -> Self {
        Self { catalog, resolver }
    }

    /// Propose replacements for the tables `filter` constrains.
    pub fn match_filter(&self, filter: &LogicalPlan, map: &mut ReplacementMap) {
        let LogicalPlan::Filter {
            input, predicate, ..
        } = filter
        else {
            return;
        };

        let groups = column_groups(predicate);
        if groups.is_empty() {
            return;
        }
        let targets = self.targets(input);

        for (qualifier, columns) in groups {
            let Some(target) = targets.iter().find(|t| self.names(t, qualifier)) else {
                trace!("no indexed table answers to {}", qualifier);
                continue;
            };

            let mut best: Option<&Arc<Relation>> = None;
            for index in &target.indexes {
                if !covers(index, &columns) {
                    trace!("{} partitioning not covered by filter on {}", index.ident, qualifier);
                    continue;
                }
                if best.map_or(true, |b| index.partition_columns.len() > b.partition_columns.len()) {
                    best = Some(index);
                }
            }

            if let Some(index) = best {
                debug!(
                    "filter on {} selects {} for {}",
                    qualifier, index.ident, target.relation.ident
                );
                if let Some(replacement) = refresh(target.owner, index) {
                    map.push(target.owner, replacement, ReplacementSource::Predicate);
                }
            }
        }
    }

    /// Indexed base tables directly below a filter, looking through joins.
    fn targets<'p>(&self, input: &'p LogicalPlan) -> Vec<Target<'p>> {
        let mut targets = Vec::new();
        let mut stack = vec![input];
        while let Some(node) = stack.pop() {
            if let LogicalPlan::Join { left, right, .. } = node {
                stack.push(right.as_ref());
                stack.push(left.as_ref());
                continue;
            }
            let LogicalPlan::TableRef { relation, .. } = node.strip_aliases() else {
                continue;
            };
            if !relation.is_base() {
                continue;
            }
            let indexes = self.catalog.dependent_relations(&relation.ident);
            if indexes.is_empty() {
                continue;
            }
            let alias = match node {
                LogicalPlan::SubqueryAlias { alias, .. } => Some(alias.as_str()),
                _ => None,
            };
            targets.push(Target {
                owner: node,
                alias,
                relation,
                indexes,
            });
        }
        targets
    }

    /// An alias answers to its own name; a bare table to its name, with or
    /// without the schema.
    fn names(&self, target: &Target<'_>, qualifier: &str) -> bool {
        match target.alias {
            Some(alias) => self.resolver.equal(alias, qualifier),
            None => {
                let ident = &target.relation.ident;
                self.resolver.equal(&ident.table, qualifier)
                    || self.resolver.equal(&ident.to_string(), qualifier)
            }
        }
    }
}

/// Every partition column of `index` is among `columns`.
fn covers(index: &Relation, columns: &[&ColumnRef]) -> bool {
    index.is_partitioned()
        && index
            .partition_columns
            .iter()
            .all(|p| columns.iter().any(|c| c.name.eq_ignore_ascii_case(p)))
}
