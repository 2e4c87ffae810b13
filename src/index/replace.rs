//! Replacement bookkeeping and the two rewrite passes that apply it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use log::{debug, warn};

use crate::catalog::{Relation, TableIdentifier};
use crate::planner::{LogicalPlan, NodeId, PlanResult, Resolver};

/// Which matcher proposed a replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplacementSource {
    Hint,
    Colocation,
    Predicate,
}

impl fmt::Display for ReplacementSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplacementSource::Hint => write!(f, "hint"),
            ReplacementSource::Colocation => write!(f, "colocation"),
            ReplacementSource::Predicate => write!(f, "predicate"),
        }
    }
}

/// Swap the node `target` for `plan`.
#[derive(Debug, Clone)]
pub struct Replacement {
    pub target: NodeId,
    pub plan: LogicalPlan,
    pub source: ReplacementSource,
}

impl Replacement {
    /// The relation the replacement scans.
    pub fn relation(&self) -> Option<&TableIdentifier> {
        scanned(&self.plan)
    }
}

/// A node that more than one distinct replacement was proposed for.
#[derive(Debug, Clone, PartialEq)]
pub struct Conflict {
    pub target: NodeId,
    pub candidates: Vec<(ReplacementSource, Option<TableIdentifier>)>,
}

/// Replacements gathered for one plan. Entries are keyed by node id, so
/// structurally identical subtrees at different positions stay distinct.
#[derive(Debug, Default)]
pub struct ReplacementMap {
    entries: Vec<Replacement>,
}

impl ReplacementMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, target: &LogicalPlan, plan: LogicalPlan, source: ReplacementSource) {
        self.entries.push(Replacement {
            target: target.id(),
            plan,
            source,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Targets with more than one distinct replacement. Entries that rebuild
    /// the same alias chain over the same relation count as one.
    pub fn conflicts(&self) -> Vec<Conflict> {
        let mut conflicts = Vec::new();
        for (target, group) in self.grouped() {
            let mut distinct: Vec<&Replacement> = Vec::new();
            for r in group {
                if !distinct.iter().any(|d| same_shape(&d.plan, &r.plan)) {
                    distinct.push(r);
                }
            }
            if distinct.len() > 1 {
                conflicts.push(Conflict {
                    target,
                    candidates: distinct
                        .iter()
                        .map(|r| (r.source, r.relation().cloned()))
                        .collect(),
                });
            }
        }
        conflicts
    }

    /// Entries grouped by target, in order of first appearance.
    fn grouped(&self) -> Vec<(NodeId, Vec<&Replacement>)> {
        let mut groups: Vec<(NodeId, Vec<&Replacement>)> = Vec::new();
        for entry in &self.entries {
            match groups.iter_mut().find(|(id, _)| *id == entry.target) {
                Some((_, group)) => group.push(entry),
                None => groups.push((entry.target, vec![entry])),
            }
        }
        groups
    }

    /// One replacement per target. Conflicting targets are left out and
    /// keep their original relation.
    fn settled(&self) -> HashMap<NodeId, &LogicalPlan> {
        let conflicts = self.conflicts();
        for conflict in &conflicts {
            warn!(
                "conflicting index replacements for node {}: {:?}; keeping the original relation",
                conflict.target, conflict.candidates
            );
        }
        self.grouped()
            .into_iter()
            .filter(|(target, _)| !conflicts.iter().any(|c| c.target == *target))
            .filter_map(|(target, group)| group.first().map(|r| (target, &r.plan)))
            .collect()
    }

    /// Substitute every settled target, bottom-up. Nodes without an entry
    /// are kept as they are.
    pub fn apply(&self, plan: LogicalPlan) -> PlanResult<LogicalPlan> {
        let settled = self.settled();
        if settled.is_empty() {
            return Ok(plan);
        }
        plan.transform_up(&mut |node| {
            Ok(match settled.get(&node.id()) {
                Some(replacement) => {
                    debug!(
                        "substituting {} for {}",
                        scanned(replacement).map_or_else(|| "?".to_string(), |i| i.to_string()),
                        scanned(&node).map_or_else(|| "?".to_string(), |i| i.to_string()),
                    );
                    (*replacement).clone()
                }
                None => node,
            })
        })
    }
}

/// Rebind the column references of every node against what its children now
/// produce. A reference that cannot be rebound keeps its original binding.
pub fn reconcile(plan: LogicalPlan, resolver: Resolver) -> PlanResult<LogicalPlan> {
    plan.transform_up(&mut |node| {
        let id = node.id();
        let (node, unresolved) = node.resolve_references(resolver);
        for col in unresolved {
            warn!(
                "could not re-resolve {} in node {}; keeping the original reference",
                col, id
            );
        }
        Ok(node)
    })
}

/// Rebuild `fragment` so that it scans `relation`, keeping its alias chain.
/// Returns `None` when the fragment already scans `relation`, or is not a
/// (possibly aliased) table reference at all.
pub fn refresh(fragment: &LogicalPlan, relation: &Arc<Relation>) -> Option<LogicalPlan> {
    match fragment.strip_aliases() {
        LogicalPlan::TableRef { relation: current, .. } if current.ident != relation.ident => {
            Some(rebuild(fragment, relation))
        }
        _ => None,
    }
}

fn rebuild(fragment: &LogicalPlan, relation: &Arc<Relation>) -> LogicalPlan {
    match fragment {
        LogicalPlan::SubqueryAlias { alias, input, .. } => {
            LogicalPlan::subquery_alias(alias.clone(), rebuild(input, relation))
        }
        _ => LogicalPlan::table_ref(relation.clone()),
    }
}

fn scanned(plan: &LogicalPlan) -> Option<&TableIdentifier> {
    match plan.strip_aliases() {
        LogicalPlan::TableRef { relation, .. } => Some(&relation.ident),
        _ => None,
    }
}

fn alias_chain(plan: &LogicalPlan) -> Vec<&str> {
    let mut chain = Vec::new();
    let mut current = plan;
    while let LogicalPlan::SubqueryAlias { alias, input, .. } = current {
        chain.push(alias.as_str());
        current = input;
    }
    chain
}

fn same_shape(a: &LogicalPlan, b: &LogicalPlan) -> bool {
    alias_chain(a) == alias_chain(b) && scanned(a) == scanned(b)
}
