//! Explicit index hints.
//!
//! A hint names a table or an alias and the index to read instead. Targets
//! that resolve to a base table are keyed by the table's identifier; anything
//! else is kept as an alias so derived tables can be hinted too.

use std::fmt;
use std::sync::Arc;

use log::{debug, trace};

use super::replace::{refresh, ReplacementMap, ReplacementSource};
use crate::catalog::{IndexCatalog, Relation, TableIdentifier};
use crate::config::IndexHint;
use crate::planner::{LogicalPlan, PlanError, PlanResult, Resolver};

/// What a hint applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HintKey {
    /// Unaliased references to a base table.
    Table(TableIdentifier),
    /// Subquery aliases with this name.
    Alias(String),
}

impl fmt::Display for HintKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HintKey::Table(ident) => write!(f, "{}", ident),
            HintKey::Alias(alias) => write!(f, "alias {}", alias),
        }
    }
}

/// Resolved hints. A later hint for the same key overrides an earlier one.
#[derive(Debug, Default)]
pub struct HintMap {
    entries: Vec<(HintKey, Arc<Relation>)>,
}

impl HintMap {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    fn insert(&mut self, key: HintKey, index: Arc<Relation>) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = index,
            None => self.entries.push((key, index)),
        }
    }

    pub fn for_table(&self, table: &TableIdentifier) -> Option<&Arc<Relation>> {
        self.entries.iter().find_map(|(key, index)| match key {
            HintKey::Table(t) if t == table => Some(index),
            _ => None,
        })
    }

    pub fn for_alias(&self, alias: &str, resolver: Resolver) -> Option<&Arc<Relation>> {
        self.entries.iter().rev().find_map(|(key, index)| match key {
            HintKey::Alias(a) if resolver.equal(a, alias) => Some(index),
            _ => None,
        })
    }

    /// Propose a replacement for every table reference or alias of `plan` a
    /// hint applies to.
    pub fn collect(
        &self,
        plan: &LogicalPlan,
        resolver: Resolver,
        map: &mut ReplacementMap,
    ) -> PlanResult<()> {
        // (node, directly under an alias)
        let mut stack = vec![(plan, false)];
        while let Some((node, aliased)) = stack.pop() {
            match node {
                LogicalPlan::SubqueryAlias { alias, input, .. } => {
                    if let Some(index) = self.for_alias(alias, resolver) {
                        self.hint_alias(node, alias, index, map)?;
                    }
                    stack.push((input.as_ref(), true));
                }
                LogicalPlan::TableRef { relation, .. } if !aliased && relation.is_base() => {
                    if let Some(index) = self.for_table(&relation.ident) {
                        if let Some(replacement) = refresh(node, index) {
                            debug!("hint: {} -> {}", relation.ident, index.ident);
                            map.push(node, replacement, ReplacementSource::Hint);
                        }
                    }
                }
                _ => stack.extend(node.children().into_iter().rev().map(|c| (c, false))),
            }
        }
        Ok(())
    }

    fn hint_alias(
        &self,
        node: &LogicalPlan,
        alias: &str,
        index: &Arc<Relation>,
        map: &mut ReplacementMap,
    ) -> PlanResult<()> {
        let LogicalPlan::TableRef { relation, .. } = node.strip_aliases() else {
            trace!("hinted alias {} does not name a table", alias);
            return Ok(());
        };
        if !relation.is_base() {
            return Ok(());
        }
        if !index.is_index_of(&relation.ident) {
            return Err(PlanError::InvalidHint {
                table: alias.to_string(),
                index: index.ident.to_string(),
            });
        }
        if let Some(replacement) = refresh(node, index) {
            debug!("hint: alias {} -> {}", alias, index.ident);
            map.push(node, replacement, ReplacementSource::Hint);
        }
        Ok(())
    }
}

/// Turns session hints into a [`HintMap`] through the catalog.
pub struct HintResolver<'a> {
    catalog: &'a dyn IndexCatalog,
}

impl<'a> HintResolver<'a> {
    pub fn new(catalog: &'a dyn IndexCatalog) -> Self {
        Self { catalog }
    }

    /// Fails when a hinted index does not resolve, is not an index, or is
    /// not derived from the hinted table.
    pub fn resolve(&self, hints: &[IndexHint]) -> PlanResult<HintMap> {
        let mut resolved = HintMap::default();
        for hint in hints {
            let index = self.catalog.resolve(&hint.index)?;
            if !index.is_index() {
                return Err(PlanError::InvalidHint {
                    table: hint.target.clone(),
                    index: index.ident.to_string(),
                });
            }

            let key = match self.catalog.resolve(&hint.target) {
                Ok(table) if table.is_base() => {
                    if !index.is_index_of(&table.ident) {
                        return Err(PlanError::InvalidHint {
                            table: table.ident.to_string(),
                            index: index.ident.to_string(),
                        });
                    }
                    HintKey::Table(table.ident.clone())
                }
                _ => HintKey::Alias(hint.target.clone()),
            };
            debug!("index hint {} -> {}", key, index.ident);
            resolved.insert(key, index);
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogError;
    use crate::index::fixtures::{scans, World};

    fn hint(target: &str, index: &str) -> IndexHint {
        IndexHint {
            target: target.into(),
            index: index.into(),
        }
    }

    #[test]
    fn test_resolve_table_and_alias_keys() {
        let world = World::new();
        let resolver = HintResolver::new(world.catalog.as_ref());
        let map = resolver
            .resolve(&[
                hint("Orders", "orders_by_cust"),
                hint("o2", "app.orders_by_status"),
            ])
            .unwrap();

        assert_eq!(map.len(), 2);
        let orders = TableIdentifier::new("app", "orders");
        assert_eq!(map.for_table(&orders).unwrap().ident.table, "orders_by_cust");
        assert_eq!(
            map.for_alias("O2", Resolver::CaseInsensitive).unwrap().ident.table,
            "orders_by_status"
        );
        assert!(map.for_alias("O2", Resolver::CaseSensitive).is_none());
    }

    #[test]
    fn test_later_hint_overrides() {
        let world = World::new();
        let map = HintResolver::new(world.catalog.as_ref())
            .resolve(&[hint("orders", "orders_by_cust"), hint("orders", "orders_by_status")])
            .unwrap();
        assert_eq!(map.len(), 1);
        let orders = TableIdentifier::new("app", "orders");
        assert_eq!(map.for_table(&orders).unwrap().ident.table, "orders_by_status");
    }

    #[test]
    fn test_unknown_index_is_resolution_error() {
        let world = World::new();
        let result = HintResolver::new(world.catalog.as_ref()).resolve(&[hint("orders", "nope")]);
        assert!(matches!(
            result,
            Err(PlanError::Catalog(CatalogError::TableNotFound(_)))
        ));
    }

    #[test]
    fn test_index_of_other_table_is_rejected() {
        let world = World::new();
        let result = HintResolver::new(world.catalog.as_ref())
            .resolve(&[hint("customers", "orders_by_cust")]);
        assert!(matches!(result, Err(PlanError::InvalidHint { .. })));

        let result = HintResolver::new(world.catalog.as_ref()).resolve(&[hint("orders", "customers")]);
        assert!(matches!(result, Err(PlanError::InvalidHint { .. })));
    }

    #[test]
    fn test_collect_unaliased_table_only() {
        let world = World::new();
        let map = HintResolver::new(world.catalog.as_ref())
            .resolve(&[hint("orders", "orders_by_cust")])
            .unwrap();
        let plan = world.plan(
            "SELECT * FROM orders INNER JOIN orders o ON orders.id = o.id",
        );

        let mut replacements = ReplacementMap::new();
        map.collect(&plan, Resolver::CaseInsensitive, &mut replacements)
            .unwrap();
        assert_eq!(replacements.len(), 1);

        let rewritten = replacements.apply(plan).unwrap();
        assert_eq!(scans(&rewritten), vec!["orders_by_cust", "orders"]);
    }

    #[test]
    fn test_collect_alias() {
        let world = World::new();
        let map = HintResolver::new(world.catalog.as_ref())
            .resolve(&[hint("o", "orders_by_status")])
            .unwrap();
        let plan = world.plan("SELECT o.status FROM orders o");

        let mut replacements = ReplacementMap::new();
        map.collect(&plan, Resolver::CaseInsensitive, &mut replacements)
            .unwrap();
        let rewritten = replacements.apply(plan).unwrap();
        assert_eq!(scans(&rewritten), vec!["orders_by_status"]);
        assert!(rewritten
            .nodes()
            .iter()
            .any(|n| matches!(n, LogicalPlan::SubqueryAlias { alias, .. } if alias == "o")));
    }

    #[test]
    fn test_alias_over_wrong_table() {
        let world = World::new();
        let map = HintResolver::new(world.catalog.as_ref())
            .resolve(&[hint("c", "orders_by_status")])
            .unwrap();
        let plan = world.plan("SELECT c.name FROM customers c");

        let mut replacements = ReplacementMap::new();
        let result = map.collect(&plan, Resolver::CaseInsensitive, &mut replacements);
        assert!(matches!(result, Err(PlanError::InvalidHint { .. })));
    }

    #[test]
    fn test_alias_without_match_is_ignored() {
        let world = World::new();
        let map = HintResolver::new(world.catalog.as_ref())
            .resolve(&[hint("zz", "orders_by_status")])
            .unwrap();
        let plan = world.plan("SELECT o.status FROM orders o");

        let mut replacements = ReplacementMap::new();
        map.collect(&plan, Resolver::CaseInsensitive, &mut replacements)
            .unwrap();
        assert!(replacements.is_empty());
    }
}
