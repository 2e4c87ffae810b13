//! The index substitution rule.
//!
//! With index hints in the session, only hints are honored. Otherwise the
//! rule looks for colocated equi-joins and for filters that pin every
//! partition column of an index, then substitutes the chosen indexes and
//! rebinds the column references above them.

use std::sync::Arc;

use log::{debug, trace};

use super::colocation::ColocationMatcher;
use super::hints::HintResolver;
use super::predicate::PredicateMatcher;
use super::replace::{reconcile, refresh, ReplacementMap};
use crate::catalog::{ColocationOracle, IndexCatalog, Relation};
use crate::config::SessionConfig;
use crate::planner::{LogicalPlan, Optimizer, PlanResult, PlanRule, QueryPlanner};

pub struct IndexRule {
    catalog: Arc<dyn IndexCatalog>,
    oracle: Arc<dyn ColocationOracle>,
    session: SessionConfig,
    optimizer: Optimizer,
}

impl IndexRule {
    pub fn new(
        catalog: Arc<dyn IndexCatalog>,
        oracle: Arc<dyn ColocationOracle>,
        session: SessionConfig,
    ) -> Self {
        let optimizer = Optimizer::new().with_max_iterations(session.optimizer_max_iterations);
        Self {
            catalog,
            oracle,
            session,
            optimizer,
        }
    }

    /// Every replacement proposed for `plan`, keyed by nodes of `plan`.
    ///
    /// Joins and filters are matched on an optimized copy so that filters sit
    /// next to the tables they constrain. The optimizer keeps node ids, so
    /// the targets found there are nodes of `plan` as well.
    pub fn replacements(&self, plan: &LogicalPlan) -> PlanResult<ReplacementMap> {
        let resolver = self.session.resolver();
        let mut map = ReplacementMap::new();

        if self.session.has_hints() {
            let hints = HintResolver::new(self.catalog.as_ref()).resolve(&self.session.hints)?;
            debug!("resolved {} index hint(s); skipping automatic matching", hints.len());
            hints.collect(plan, resolver, &mut map)?;
            return Ok(map);
        }

        let optimized = self.optimizer.rewrite(plan.clone())?;
        let colocation = ColocationMatcher::new(self.catalog.as_ref(), self.oracle.as_ref());
        let predicate = PredicateMatcher::new(self.catalog.as_ref(), resolver);

        for node in optimized.nodes() {
            if let Some(join) = node.as_equi_join() {
                colocation.match_join(&join, &mut map);
            }
            if let LogicalPlan::Filter { .. } = node {
                predicate.match_filter(node, &mut map);
            }
        }
        Ok(map)
    }

    /// Substitute indexes into `plan`. A plan nothing applies to is returned
    /// unchanged.
    pub fn apply(&self, plan: &LogicalPlan) -> PlanResult<LogicalPlan> {
        let map = self.replacements(plan)?;
        if map.is_empty() {
            trace!("no index replacements for plan {}", plan.id());
            return Ok(plan.clone());
        }
        debug!("{} index replacement(s) proposed", map.len());
        let substituted = map.apply(plan.clone())?;
        reconcile(substituted, self.session.resolver())
    }

    /// Point the table reference under `fragment` at `relation`, or `None`
    /// when it already reads it.
    pub fn refresh(&self, fragment: &LogicalPlan, relation: &Arc<Relation>) -> Option<LogicalPlan> {
        refresh(fragment, relation)
    }
}

impl PlanRule for IndexRule {
    fn name(&self) -> &str {
        "IndexRule"
    }

    fn apply(&self, plan: &LogicalPlan) -> PlanResult<LogicalPlan> {
        IndexRule::apply(self, plan)
    }
}

/// A planner for one session: the default node rules followed by index
/// substitution.
pub fn session_planner(
    catalog: Arc<dyn IndexCatalog>,
    oracle: Arc<dyn ColocationOracle>,
    session: SessionConfig,
) -> QueryPlanner {
    let resolver = session.resolver();
    let mut optimizer = Optimizer::new().with_max_iterations(session.optimizer_max_iterations);
    optimizer.add_plan_rule(Box::new(IndexRule::new(catalog.clone(), oracle, session)));
    QueryPlanner::with_optimizer(catalog, optimizer).with_resolver(resolver)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogError, IndexCatalog};
    use crate::index::fixtures::{scans, World};
    use crate::planner::{PlanError, ProjectItem};

    /// Every column a node reads is produced by one of its children.
    fn assert_bound(plan: &LogicalPlan) {
        for node in plan.nodes() {
            let produced: Vec<_> = node
                .children()
                .iter()
                .flat_map(|c| c.output_ids())
                .collect();
            for col in node.references() {
                assert!(
                    produced.contains(&col.id),
                    "{} is not produced below\n{}",
                    col,
                    node
                );
            }
        }
    }

    fn project_items(plan: &LogicalPlan) -> &[ProjectItem] {
        match plan {
            LogicalPlan::Project { items, .. } => items,
            other => panic!("expected a projection, got\n{}", other),
        }
    }

    #[test]
    fn test_no_candidates_is_identity() {
        let world = World::new();
        let rule = world.rule(SessionConfig::new());
        for sql in [
            "SELECT * FROM notes WHERE notes.id = 1",
            "SELECT o.id FROM orders o WHERE o.amount > 10",
            "SELECT * FROM orders o INNER JOIN notes n ON o.id = n.id",
        ] {
            let plan = world.plan(sql);
            assert_eq!(rule.apply(&plan).unwrap(), plan, "{}", sql);
        }
    }

    #[test]
    fn test_unmatched_hint_is_identity() {
        let world = World::new();
        let rule = world.rule(SessionConfig::new().with_hint("zz", "orders_by_status"));
        let plan = world.plan("SELECT o.status FROM orders o");
        assert_eq!(rule.apply(&plan).unwrap(), plan);
    }

    #[test]
    fn test_hint_takes_precedence() {
        let world = World::new();
        let sql = "SELECT * FROM orders INNER JOIN customers ON orders.cust_id = customers.id";
        let plan = world.plan(sql);

        let automatic = world.rule(SessionConfig::new()).apply(&plan).unwrap();
        assert_eq!(scans(&automatic), vec!["orders_by_cust", "customers"]);

        let hinted = world
            .rule(SessionConfig::new().with_hint("orders", "orders_by_status"))
            .apply(&plan)
            .unwrap();
        assert_eq!(scans(&hinted), vec!["orders_by_status", "customers"]);
    }

    #[test]
    fn test_hints_are_exclusive() {
        let world = World::new();
        let plan = world.plan(
            "SELECT * FROM orders INNER JOIN customers ON orders.cust_id = customers.id",
        );
        let rewritten = world
            .rule(SessionConfig::new().with_hint("customers", "customers_by_region"))
            .apply(&plan)
            .unwrap();
        assert_eq!(scans(&rewritten), vec!["orders", "customers_by_region"]);
    }

    #[test]
    fn test_hint_replaces_every_unaliased_occurrence() {
        let world = World::new();
        let plan = world.plan(
            "SELECT * FROM orders INNER JOIN (SELECT id FROM orders) t ON orders.id = t.id",
        );
        let rewritten = world
            .rule(SessionConfig::new().with_hint("orders", "orders_by_cust"))
            .apply(&plan)
            .unwrap();
        assert_eq!(scans(&rewritten), vec!["orders_by_cust", "orders_by_cust"]);
        assert_bound(&rewritten);
    }

    #[test]
    fn test_unknown_hinted_index_fails() {
        let world = World::new();
        let plan = world.plan("SELECT * FROM orders");
        let result = world
            .rule(SessionConfig::new().with_hint("orders", "orders_by_nothing"))
            .apply(&plan);
        assert!(matches!(
            result,
            Err(PlanError::Catalog(CatalogError::TableNotFound(_)))
        ));
    }

    #[test]
    fn test_hint_for_foreign_index_fails() {
        let world = World::new();
        let plan = world.plan("SELECT * FROM orders");
        let result = world
            .rule(SessionConfig::new().with_hint("orders", "customers_by_region"))
            .apply(&plan);
        assert!(matches!(result, Err(PlanError::InvalidHint { .. })));
    }

    #[test]
    fn test_most_specific_covering_index() {
        let world = World::new();
        let plan = world.plan(
            "SELECT o.id FROM orders o WHERE o.status = 'open' AND o.region = 'eu' AND o.id > 3",
        );
        let rewritten = world.rule(SessionConfig::new()).apply(&plan).unwrap();
        assert_eq!(scans(&rewritten), vec!["orders_by_status_region"]);
        assert_bound(&rewritten);
    }

    #[test]
    fn test_colocated_join_rewrites_and_rebinds() {
        let world = World::new();
        let plan = world.plan(
            "SELECT o.status, c.name FROM orders o INNER JOIN customers c ON o.cust_id = c.id",
        );
        let rewritten = world.rule(SessionConfig::new()).apply(&plan).unwrap();
        assert_eq!(scans(&rewritten), vec!["orders_by_cust", "customers"]);
        assert_bound(&rewritten);

        let names: Vec<String> = project_items(&rewritten)
            .iter()
            .map(|item| item.output().to_string())
            .collect();
        assert!(names[0].starts_with("o.status#"));
        assert!(names[1].starts_with("c.name#"));
    }

    #[test]
    fn test_join_key_sides_are_symmetric() {
        let world = World::new();
        let rule = world.rule(SessionConfig::new());
        let forward = world.plan("SELECT * FROM orders o INNER JOIN customers c ON o.cust_id = c.id");
        let backward = world.plan("SELECT * FROM orders o INNER JOIN customers c ON c.id = o.cust_id");
        assert_eq!(
            scans(&rule.apply(&forward).unwrap()),
            scans(&rule.apply(&backward).unwrap())
        );
    }

    #[test]
    fn test_missing_column_keeps_original_reference() {
        let world = World::new();
        // orders_by_status has no amount column.
        let plan = world.plan("SELECT orders.amount FROM orders");
        let rewritten = world
            .rule(SessionConfig::new().with_hint("orders", "orders_by_status"))
            .apply(&plan)
            .unwrap();
        assert_eq!(scans(&rewritten), vec!["orders_by_status"]);
        assert_eq!(project_items(&rewritten), project_items(&plan));
    }

    #[test]
    fn test_conflicting_matches_keep_base_table() {
        let world = World::new();
        let plan = world.plan(
            "SELECT * FROM orders o INNER JOIN customers c ON o.cust_id = c.id WHERE o.status = 'x'",
        );
        let rule = world.rule(SessionConfig::new());

        let map = rule.replacements(&plan).unwrap();
        let conflicts = map.conflicts();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].candidates.len(), 2);

        let rewritten = rule.apply(&plan).unwrap();
        assert_eq!(scans(&rewritten), vec!["orders", "customers"]);
    }

    #[test]
    fn test_self_join_sides_are_distinct_targets() {
        let world = World::new();
        let plan = world.plan(
            "SELECT * FROM orders a INNER JOIN orders b ON a.id = b.id WHERE a.status = 'x'",
        );
        let rewritten = world.rule(SessionConfig::new()).apply(&plan).unwrap();
        assert_eq!(scans(&rewritten), vec!["orders_by_status", "orders"]);
        assert_bound(&rewritten);
    }

    #[test]
    fn test_refresh() {
        let world = World::new();
        let rule = world.rule(SessionConfig::new());
        let plan = world.plan("SELECT * FROM orders o");
        let fragment = plan.strip_aliases();
        let aliased = plan
            .nodes()
            .into_iter()
            .find(|n| matches!(n, LogicalPlan::SubqueryAlias { .. }))
            .unwrap();

        assert!(rule.refresh(aliased, &world.relation("orders")).is_none());
        assert!(rule.refresh(fragment, &world.relation("orders")).is_none());

        let refreshed = rule.refresh(aliased, &world.relation("orders_by_cust")).unwrap();
        assert!(matches!(&refreshed, LogicalPlan::SubqueryAlias { alias, .. } if alias == "o"));
        assert_eq!(scans(&refreshed), vec!["orders_by_cust"]);
    }

    #[test]
    fn test_alias_and_table_hints_agree() {
        let world = World::new();
        let by_alias = world
            .rule(SessionConfig::new().with_hint("o", "orders_by_status"))
            .apply(&world.plan("SELECT o.status FROM orders o"))
            .unwrap();
        let by_table = world
            .rule(SessionConfig::new().with_hint("orders", "orders_by_status"))
            .apply(&world.plan("SELECT orders.status FROM orders"))
            .unwrap();
        assert_eq!(scans(&by_alias), scans(&by_table));
        assert_bound(&by_alias);
        assert_bound(&by_table);
    }

    #[test]
    fn test_rule_is_stable() {
        let world = World::new();
        let rule = world.rule(SessionConfig::new());
        let plan = world.plan("SELECT o.id FROM orders o WHERE o.status = 'open'");
        let once = rule.apply(&plan).unwrap();
        let twice = rule.apply(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_session_planner_explain() {
        let world = World::new();
        let catalog: Arc<dyn IndexCatalog> = world.catalog.clone();
        let oracle: Arc<dyn ColocationOracle> = world.leaders.clone();
        let planner = session_planner(catalog, oracle, SessionConfig::new());

        let explain = planner
            .explain("SELECT o.id, c.name FROM orders o INNER JOIN customers c ON o.cust_id = c.id")
            .unwrap();
        assert!(explain.starts_with("=== Logical Plan ==="));
        assert!(explain.contains("TableRef: app.orders_by_cust"));
        assert!(explain.contains("TableRef: app.customers PARTITION BY (id)"));
    }

    #[test]
    fn test_session_planner_from_settings() {
        let world = World::new();
        let session = SessionConfig::from_pairs([
            ("use_index.orders", "orders_by_status"),
            ("optimizer.max_iterations", "4"),
        ])
        .unwrap();
        let catalog: Arc<dyn IndexCatalog> = world.catalog.clone();
        let oracle: Arc<dyn ColocationOracle> = world.leaders.clone();
        let planner = session_planner(catalog, oracle, session);

        let sql = crate::sql::Parser::parse("SELECT orders.status FROM orders WHERE orders.id = 1").unwrap();
        let plan = planner.plan(&sql).unwrap();
        assert_eq!(scans(&plan), vec!["orders_by_status"]);
        assert_bound(&plan);
    }

    #[test]
    fn test_plan_rule_name() {
        let world = World::new();
        let rule = world.rule(SessionConfig::new());
        assert_eq!(PlanRule::name(&rule), "IndexRule");
    }
}
