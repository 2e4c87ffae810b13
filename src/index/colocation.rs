//! Index selection for equi-joins.
//!
//! Each side of a join contributes its base tables and their indexes as
//! candidates. A pair of candidates qualifies when the oracle reports them
//! colocated and the join keys pair up every partition column of both. The
//! pair with the most partition columns wins; earlier pairs win ties.

use std::sync::Arc;

use log::{debug, trace};

use super::replace::{refresh, ReplacementMap, ReplacementSource};
use crate::catalog::{ColocationOracle, IndexCatalog, Relation};
use crate::planner::{EquiJoin, LogicalPlan};

/// A relation one join side could read, and the node that would read it.
#[derive(Debug, Clone)]
pub struct Candidate<'p> {
    pub owner: &'p LogicalPlan,
    pub relation: Arc<Relation>,
}

pub struct ColocationMatcher<'a> {
    catalog: &'a dyn IndexCatalog,
    oracle: &'a dyn ColocationOracle,
}

impl<'a> ColocationMatcher<'a> {
    pub fn new(catalog: &'a dyn IndexCatalog, oracle: &'a dyn ColocationOracle) -> Self {
        Self { catalog, oracle }
    }

    /// Base tables with indexes reachable from `side`, each followed by its
    /// indexes in name order. Table references are found through aliases;
    /// any other node is searched through its children.
    pub fn candidates<'p>(&self, side: &'p LogicalPlan) -> Vec<Candidate<'p>> {
        let mut found = Vec::new();
        let mut stack = vec![side];
        while let Some(node) = stack.pop() {
            match node.strip_aliases() {
                LogicalPlan::TableRef { relation, .. } if relation.is_base() => {
                    let indexes = self.catalog.dependent_relations(&relation.ident);
                    if indexes.is_empty() {
                        continue;
                    }
                    found.push(Candidate {
                        owner: node,
                        relation: relation.clone(),
                    });
                    found.extend(indexes.into_iter().map(|relation| Candidate {
                        owner: node,
                        relation,
                    }));
                }
                stripped => stack.extend(stripped.children().into_iter().rev()),
            }
        }
        found
    }

    /// Propose replacements for both sides of `join`.
    pub fn match_join(&self, join: &EquiJoin<'_>, map: &mut ReplacementMap) {
        let left = self.candidates(join.left);
        let right = self.candidates(join.right);
        if left.is_empty() || right.is_empty() {
            trace!("join side without indexed tables; no colocation candidates");
            return;
        }

        let mut keys = Vec::with_capacity(join.left_keys.len());
        for (l, r) in join.left_keys.iter().zip(&join.right_keys) {
            match (l.underlying_column(), r.underlying_column()) {
                (Some(lc), Some(rc)) => keys.push((lc.name.as_str(), rc.name.as_str())),
                _ => {
                    trace!("join key {} = {} is not a column", l, r);
                    return;
                }
            }
        }

        let mut best: Option<(usize, &Candidate<'_>, &Candidate<'_>)> = None;
        for lc in &left {
            for rc in &right {
                if !self.oracle.is_colocated(&lc.relation, &rc.relation) {
                    trace!("{} and {} are not colocated", lc.relation.ident, rc.relation.ident);
                    continue;
                }
                let score = coverage(&lc.relation, &rc.relation, &keys);
                if score == 0 {
                    trace!(
                        "join keys do not cover the partitioning of {} and {}",
                        lc.relation.ident,
                        rc.relation.ident
                    );
                    continue;
                }
                if best.map_or(true, |(s, _, _)| score > s) {
                    best = Some((score, lc, rc));
                }
            }
        }

        let Some((score, lc, rc)) = best else {
            return;
        };
        debug!(
            "colocated join on {} partition column(s): {} with {}",
            score, lc.relation.ident, rc.relation.ident
        );
        for chosen in [lc, rc] {
            if let Some(replacement) = refresh(chosen.owner, &chosen.relation) {
                map.push(chosen.owner, replacement, ReplacementSource::Colocation);
            }
        }
    }
}

/// Number of partition columns when the join keys pair every partition
/// column of `left` with one of `right` and the other way round, else zero.
/// Key pairs are matched in either orientation; names compare without case.
fn coverage(left: &Relation, right: &Relation, keys: &[(&str, &str)]) -> usize {
    let lp = &left.partition_columns;
    let rp = &right.partition_columns;
    if lp.is_empty() || lp.len() != rp.len() {
        return 0;
    }

    let paired = |a: &str, b: &str| {
        keys.iter().any(|(k1, k2)| {
            (k1.eq_ignore_ascii_case(a) && k2.eq_ignore_ascii_case(b))
                || (k2.eq_ignore_ascii_case(a) && k1.eq_ignore_ascii_case(b))
        })
    };
    let left_covered = lp.iter().all(|l| rp.iter().any(|r| paired(l, r)));
    let right_covered = rp.iter().all(|r| lp.iter().any(|l| paired(l, r)));

    if left_covered && right_covered {
        lp.len()
    } else {
        0
    }
}
