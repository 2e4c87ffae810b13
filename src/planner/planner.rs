//! Query planner - binds the SQL AST to logical plans.
//!
//! The planner is the entry point for query optimization.

use std::sync::Arc;

use super::error::{PlanError, PlanResult};
use super::expr::{ColumnRef, Expr, Resolver};
use super::logical::{
    AggregateExpr, AggregateFunction, JoinType, LogicalPlan, ProjectItem, SortDirection, SortSpec,
};
use super::optimizer::Optimizer;
use crate::catalog::IndexCatalog;
use crate::sql::{self, FromItem, OrderBy, Parser, Select, SelectItem, Statement, TableSource};

/// The query planner.
pub struct QueryPlanner {
    catalog: Arc<dyn IndexCatalog>,
    optimizer: Optimizer,
    resolver: Resolver,
}

impl QueryPlanner {
    /// Create a new query planner.
    pub fn new(catalog: Arc<dyn IndexCatalog>) -> Self {
        Self::with_optimizer(catalog, Optimizer::new())
    }

    /// Create a planner with a custom optimizer.
    pub fn with_optimizer(catalog: Arc<dyn IndexCatalog>, optimizer: Optimizer) -> Self {
        Self {
            catalog,
            optimizer,
            resolver: Resolver::default(),
        }
    }

    /// Set the identifier comparison policy used when binding columns.
    pub fn with_resolver(mut self, resolver: Resolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Plan and optimize a SQL statement.
    pub fn plan(&self, stmt: &Statement) -> PlanResult<LogicalPlan> {
        match stmt {
            Statement::Select(select) | Statement::Explain(select) => {
                let logical = self.plan_select(select)?;
                self.optimize(logical)
            }
        }
    }

    /// Parse and bind a query without optimizing it.
    pub fn plan_sql(&self, sql: &str) -> PlanResult<LogicalPlan> {
        let select = Parser::parse_select(sql)?;
        self.plan_select(&select)
    }

    /// Run the optimizer over a bound plan.
    pub fn optimize(&self, plan: LogicalPlan) -> PlanResult<LogicalPlan> {
        self.optimizer.optimize(plan)
    }

    /// Render the optimized plan of a query.
    pub fn explain(&self, sql: &str) -> PlanResult<String> {
        let stmt = Parser::parse(sql)?;
        let plan = self.plan(&stmt)?;
        Ok(format!("=== Logical Plan ===\n{}", plan))
    }

    /// Create a logical plan for a SELECT statement.
    pub fn plan_select(&self, select: &Select) -> PlanResult<LogicalPlan> {
        let mut plan = self.plan_from(&select.from)?;

        // Add WHERE filter.
        if let Some(ref selection) = select.selection {
            let predicate = self.bind_expr(selection, &plan.output())?;
            plan = LogicalPlan::filter(plan, predicate);
        }

        if !select.group_by.is_empty() || select.projection.iter().any(is_aggregate_item) {
            plan = self.plan_aggregate(plan, select)?;
        } else if !is_star_only(&select.projection) {
            let scope = plan.output();
            let mut items = Vec::new();
            for (i, item) in select.projection.iter().enumerate() {
                match item {
                    SelectItem::Wildcard => {
                        items.extend(scope.iter().cloned().map(ProjectItem::Column));
                    }
                    SelectItem::Expr { expr, alias } => {
                        items.push(self.project_item(expr, alias.as_deref(), i, &scope)?);
                    }
                }
            }
            plan = LogicalPlan::project(plan, items);
        }

        if select.distinct {
            plan = LogicalPlan::distinct(plan);
        }

        // Add ORDER BY.
        if !select.order_by.is_empty() {
            plan = self.plan_sort(plan, &select.order_by)?;
        }

        // Add LIMIT/OFFSET.
        if select.limit.is_some() || select.offset.is_some() {
            plan = LogicalPlan::limit(plan, select.limit.unwrap_or(usize::MAX), select.offset);
        }

        Ok(plan)
    }

    fn plan_from(&self, from: &[FromItem]) -> PlanResult<LogicalPlan> {
        let mut items = from.iter();
        let first = items
            .next()
            .ok_or_else(|| PlanError::Unsupported("SELECT without FROM".into()))?;

        let mut plan = self.plan_from_item(first)?;
        for item in items {
            let right = self.plan_from_item(item)?;
            plan = LogicalPlan::join(plan, right, JoinType::Cross, None);
        }
        Ok(plan)
    }

    fn plan_from_item(&self, item: &FromItem) -> PlanResult<LogicalPlan> {
        let mut plan = self.plan_source(&item.source)?;

        for join in &item.joins {
            let right = self.plan_source(&join.source)?;
            let on = match join.on {
                Some(ref cond) => {
                    let mut scope = plan.output();
                    scope.extend(right.output());
                    Some(self.bind_expr(cond, &scope)?)
                }
                None => None,
            };
            if on.is_none() && join.join_type != JoinType::Cross {
                return Err(PlanError::InvalidJoin(format!(
                    "{} JOIN requires an ON condition",
                    join.join_type
                )));
            }
            plan = LogicalPlan::join(plan, right, join.join_type, on);
        }

        Ok(plan)
    }

    fn plan_source(&self, source: &TableSource) -> PlanResult<LogicalPlan> {
        match source {
            TableSource::Table { name, alias } => {
                let relation = self.catalog.resolve(name)?;
                let scan = LogicalPlan::table_ref(relation);
                Ok(match alias {
                    Some(alias) => LogicalPlan::subquery_alias(alias.clone(), scan),
                    None => scan,
                })
            }
            TableSource::Derived { subquery, alias } => {
                let plan = self.plan_select(subquery)?;
                Ok(LogicalPlan::subquery_alias(alias.clone(), plan))
            }
        }
    }

    fn plan_aggregate(&self, input: LogicalPlan, select: &Select) -> PlanResult<LogicalPlan> {
        enum Pending<'a> {
            Aggregate(ColumnRef),
            Expr(&'a sql::Expr, Option<&'a str>),
        }

        let scope = input.output();
        let group_by = select
            .group_by
            .iter()
            .map(|e| self.bind_expr(e, &scope))
            .collect::<PlanResult<Vec<_>>>()?;

        let mut aggregates = Vec::new();
        let mut pending = Vec::new();
        for (i, item) in select.projection.iter().enumerate() {
            let SelectItem::Expr { expr, alias } = item else {
                return Err(PlanError::Unsupported(
                    "SELECT * in an aggregate query".into(),
                ));
            };
            match expr {
                sql::Expr::Function { name, args } => {
                    if let Some(function) = AggregateFunction::from_name(name) {
                        let arg = match args.as_slice() {
                            [] => None,
                            [arg] => Some(self.bind_expr(arg, &scope)?),
                            _ => {
                                return Err(PlanError::Unsupported(format!(
                                    "{} takes a single argument",
                                    function
                                )))
                            }
                        };
                        let name = alias
                            .clone()
                            .unwrap_or_else(|| format!("{}_{}", name.to_lowercase(), i));
                        let output = ColumnRef::new(name, None);
                        aggregates.push(AggregateExpr {
                            function,
                            arg,
                            output: output.clone(),
                        });
                        pending.push(Pending::Aggregate(output));
                        continue;
                    }
                    pending.push(Pending::Expr(expr, alias.as_deref()));
                }
                _ => pending.push(Pending::Expr(expr, alias.as_deref())),
            }
        }

        let plan = LogicalPlan::aggregate(input, group_by, aggregates);
        let scope = plan.output();
        let mut items = Vec::new();
        for (i, p) in pending.into_iter().enumerate() {
            items.push(match p {
                Pending::Aggregate(output) => ProjectItem::Column(output),
                Pending::Expr(expr, alias) => self.project_item(expr, alias, i, &scope)?,
            });
        }
        Ok(LogicalPlan::project(plan, items))
    }

    fn project_item(
        &self,
        expr: &sql::Expr,
        alias: Option<&str>,
        position: usize,
        scope: &[ColumnRef],
    ) -> PlanResult<ProjectItem> {
        let bound = self.bind_expr(expr, scope)?;
        Ok(match (bound, alias) {
            (Expr::Column(c), None) => ProjectItem::Column(c),
            (Expr::Column(c), Some(a)) if self.resolver.equal(&c.name, a) => ProjectItem::Column(c),
            (bound, alias) => {
                let name = alias
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("_c{}", position));
                ProjectItem::Expr {
                    expr: bound,
                    output: ColumnRef::new(name, None),
                }
            }
        })
    }

    /// ORDER BY binds against the query's output first. A column the output
    /// does not carry may still be sorted on below a plain projection.
    fn plan_sort(&self, plan: LogicalPlan, order_by: &[OrderBy]) -> PlanResult<LogicalPlan> {
        match self.bind_order(order_by, &plan.output()) {
            Ok(order) => Ok(LogicalPlan::sort(plan, order)),
            Err(PlanError::ColumnNotFound(name)) => match plan {
                LogicalPlan::Project { id, input, items }
                    if !matches!(input.as_ref(), LogicalPlan::Aggregate { .. }) =>
                {
                    let order = self.bind_order(order_by, &input.output())?;
                    Ok(LogicalPlan::Project {
                        id,
                        input: Box::new(LogicalPlan::sort(*input, order)),
                        items,
                    })
                }
                _ => Err(PlanError::ColumnNotFound(name)),
            },
            Err(e) => Err(e),
        }
    }

    fn bind_order(&self, order_by: &[OrderBy], scope: &[ColumnRef]) -> PlanResult<Vec<SortSpec>> {
        order_by
            .iter()
            .map(|item| {
                Ok(SortSpec {
                    expr: self.bind_expr(&item.expr, scope)?,
                    direction: if item.ascending {
                        SortDirection::Ascending
                    } else {
                        SortDirection::Descending
                    },
                    nulls_first: item.nulls_first,
                })
            })
            .collect()
    }

    fn bind_column(&self, parts: &[String], scope: &[ColumnRef]) -> PlanResult<ColumnRef> {
        let (qualifier, name) = match parts {
            [name] => (None, name),
            [qualifier, name] | [_, qualifier, name] => (Some(qualifier.as_str()), name),
            _ => {
                return Err(PlanError::Unsupported(format!(
                    "column reference {}",
                    parts.join(".")
                )))
            }
        };

        match self.resolver.lookup(qualifier, name, scope).as_slice() {
            [] => Err(PlanError::ColumnNotFound(parts.join("."))),
            [found] => Ok((*found).clone()),
            _ => Err(PlanError::AmbiguousColumn(parts.join("."))),
        }
    }

    fn bind_expr(&self, expr: &sql::Expr, scope: &[ColumnRef]) -> PlanResult<Expr> {
        let bind = |e: &sql::Expr| self.bind_expr(e, scope).map(Box::new);
        Ok(match expr {
            sql::Expr::Identifier(parts) => Expr::Column(self.bind_column(parts, scope)?),
            sql::Expr::Literal(value) => Expr::Literal(value.clone()),
            sql::Expr::BinaryOp { left, op, right } => Expr::BinaryOp {
                left: bind(left)?,
                op: *op,
                right: bind(right)?,
            },
            sql::Expr::UnaryOp { op, expr } => Expr::UnaryOp {
                op: *op,
                expr: bind(expr)?,
            },
            sql::Expr::IsNull { expr, negated } => Expr::IsNull {
                expr: bind(expr)?,
                negated: *negated,
            },
            sql::Expr::InList {
                expr,
                list,
                negated,
            } => Expr::InList {
                expr: bind(expr)?,
                list: list
                    .iter()
                    .map(|e| self.bind_expr(e, scope))
                    .collect::<PlanResult<Vec<_>>>()?,
                negated: *negated,
            },
            sql::Expr::Between {
                expr,
                low,
                high,
                negated,
            } => Expr::Between {
                expr: bind(expr)?,
                low: bind(low)?,
                high: bind(high)?,
                negated: *negated,
            },
            sql::Expr::Like {
                expr,
                pattern,
                negated,
            } => Expr::Like {
                expr: bind(expr)?,
                pattern: pattern.clone(),
                negated: *negated,
            },
            sql::Expr::Function { name, args } => {
                if AggregateFunction::from_name(name).is_some() {
                    return Err(PlanError::Unsupported(format!(
                        "aggregate {} outside the SELECT list",
                        name
                    )));
                }
                Expr::Function {
                    name: name.clone(),
                    args: args
                        .iter()
                        .map(|e| self.bind_expr(e, scope))
                        .collect::<PlanResult<Vec<_>>>()?,
                }
            }
            sql::Expr::Nested(inner) => Expr::Nested(bind(inner)?),
        })
    }
}

fn is_star_only(items: &[SelectItem]) -> bool {
    items.len() == 1 && matches!(&items[0], SelectItem::Wildcard)
}

fn is_aggregate_item(item: &SelectItem) -> bool {
    matches!(
        item,
        SelectItem::Expr {
            expr: sql::Expr::Function { name, .. },
            ..
        } if AggregateFunction::from_name(name).is_some()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, CatalogError, ColumnDef, DataType};

    fn setup() -> QueryPlanner {
        let catalog = Catalog::new();
        catalog
            .create_table(
                "users",
                vec![
                    ColumnDef::new("id", DataType::Integer).not_null(),
                    ColumnDef::new("name", DataType::Text),
                    ColumnDef::new("age", DataType::Integer),
                ],
                &["id"],
            )
            .unwrap();
        catalog
            .create_table(
                "orders",
                vec![
                    ColumnDef::new("id", DataType::Integer).not_null(),
                    ColumnDef::new("user_id", DataType::Integer),
                    ColumnDef::new("total", DataType::Float),
                ],
                &["user_id"],
            )
            .unwrap();
        QueryPlanner::new(Arc::new(catalog))
    }

    #[test]
    fn test_plan_simple_select() {
        let planner = setup();

        let plan = planner.plan_sql("SELECT * FROM users").unwrap();

        assert!(matches!(plan, LogicalPlan::TableRef { .. }));
        assert_eq!(plan.output().len(), 3);
    }

    #[test]
    fn test_plan_select_with_where() {
        let planner = setup();

        let plan = planner.plan_sql("SELECT name FROM users WHERE age > 21").unwrap();

        let LogicalPlan::Project { input, items, .. } = &plan else {
            panic!("expected projection, got {}", plan);
        };
        assert_eq!(items.len(), 1);
        assert!(matches!(input.as_ref(), LogicalPlan::Filter { .. }));
    }

    #[test]
    fn test_plan_alias_and_join() {
        let planner = setup();

        let plan = planner
            .plan_sql("SELECT u.name, o.total FROM users u INNER JOIN orders o ON u.id = o.user_id")
            .unwrap();

        let join = plan.children()[0];
        let equi = join.as_equi_join().unwrap();
        assert_eq!(equi.join_type, JoinType::Inner);
        assert!(matches!(equi.left, LogicalPlan::SubqueryAlias { alias, .. } if alias == "u"));
        assert_eq!(
            equi.right_keys[0].underlying_column().unwrap().name,
            "user_id"
        );
    }

    #[test]
    fn test_unaliased_table_qualifier() {
        let planner = setup();
        assert!(planner
            .plan_sql("SELECT users.name FROM users WHERE app.users.age > 1")
            .is_ok());
    }

    #[test]
    fn test_derived_table() {
        let planner = setup();

        let plan = planner
            .plan_sql("SELECT t.name FROM (SELECT name, age FROM users) AS t WHERE t.age > 3")
            .unwrap();
        assert!(plan
            .nodes()
            .iter()
            .any(|n| matches!(n, LogicalPlan::SubqueryAlias { alias, .. } if alias == "t")));
    }

    #[test]
    fn test_column_not_found() {
        let planner = setup();
        let result = planner.plan_sql("SELECT nope FROM users");
        assert!(matches!(result, Err(PlanError::ColumnNotFound(_))));
    }

    #[test]
    fn test_ambiguous_column() {
        let planner = setup();
        let result = planner.plan_sql("SELECT id FROM users, orders");
        assert!(matches!(result, Err(PlanError::AmbiguousColumn(_))));
    }

    #[test]
    fn test_case_sensitive_binding() {
        let planner = setup().with_resolver(Resolver::CaseSensitive);
        let result = planner.plan_sql("SELECT NAME FROM users");
        assert!(matches!(result, Err(PlanError::ColumnNotFound(_))));

        let planner = setup();
        assert!(planner.plan_sql("SELECT NAME FROM users").is_ok());
    }

    #[test]
    fn test_table_not_found() {
        let planner = setup();

        let result = planner.plan_sql("SELECT * FROM nonexistent");

        assert!(matches!(
            result,
            Err(PlanError::Catalog(CatalogError::TableNotFound(_)))
        ));
    }

    #[test]
    fn test_plan_aggregate() {
        let planner = setup();

        let plan = planner
            .plan_sql("SELECT user_id, COUNT(*) AS n, SUM(total) FROM orders GROUP BY user_id")
            .unwrap();

        let names: Vec<String> = plan.output().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["user_id", "n", "sum_2"]);
        let LogicalPlan::Aggregate { aggregates, .. } = plan.children()[0] else {
            panic!("expected aggregate");
        };
        assert_eq!(aggregates.len(), 2);
        assert!(aggregates[0].arg.is_none());
    }

    #[test]
    fn test_plan_order_by_hidden_column() {
        let planner = setup();

        let plan = planner
            .plan_sql("SELECT name FROM users ORDER BY age DESC LIMIT 5")
            .unwrap();

        let LogicalPlan::Limit { input, limit, .. } = &plan else {
            panic!("expected limit, got {}", plan);
        };
        assert_eq!(*limit, 5);
        assert!(matches!(input.as_ref(), LogicalPlan::Project { .. }));
        assert!(matches!(input.children()[0], LogicalPlan::Sort { .. }));
    }

    #[test]
    fn test_join_without_condition() {
        let planner = setup();
        let plan = planner.plan_sql("SELECT * FROM users CROSS JOIN orders").unwrap();
        assert!(matches!(
            plan,
            LogicalPlan::Join {
                join_type: JoinType::Cross,
                ..
            }
        ));
    }

    #[test]
    fn test_optimize_pushes_filter() {
        let planner = setup();
        let stmt = Parser::parse("SELECT u.name FROM users u WHERE u.age > 21").unwrap();
        let plan = planner.plan(&stmt).unwrap();
        assert!(matches!(plan, LogicalPlan::Project { .. }));
        assert!(matches!(plan.children()[0], LogicalPlan::Filter { .. }));
    }

    #[test]
    fn test_explain() {
        let planner = setup();

        let explanation = planner
            .explain("EXPLAIN SELECT * FROM users WHERE age > 21 ORDER BY name LIMIT 5")
            .unwrap();

        assert!(explanation.contains("Logical Plan"));
        assert!(explanation.contains("TableRef: app.users"));
        assert!(explanation.contains("Sort:"));
    }
}
