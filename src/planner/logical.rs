//! Logical query plan representation.
//!
//! Logical plans represent *what* the query does, not *how* it will be executed.
//! Every node carries a [`NodeId`] that survives cloning, so a node found in an
//! optimized copy of a plan can be located again in the original.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::error::PlanResult;
use super::expr::{BinaryOperator, ColumnRef, Expr, ExprId, Resolver};
use crate::catalog::Relation;

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity tag of a plan node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    pub fn next() -> Self {
        NodeId(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Join types supported by the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinType::Inner => write!(f, "INNER"),
            JoinType::Left => write!(f, "LEFT"),
            JoinType::Right => write!(f, "RIGHT"),
            JoinType::Full => write!(f, "FULL"),
            JoinType::Cross => write!(f, "CROSS"),
        }
    }
}

/// Aggregate function types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunction {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_uppercase().as_str() {
            "COUNT" => Some(AggregateFunction::Count),
            "SUM" => Some(AggregateFunction::Sum),
            "AVG" => Some(AggregateFunction::Avg),
            "MIN" => Some(AggregateFunction::Min),
            "MAX" => Some(AggregateFunction::Max),
            _ => None,
        }
    }
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregateFunction::Count => write!(f, "COUNT"),
            AggregateFunction::Sum => write!(f, "SUM"),
            AggregateFunction::Avg => write!(f, "AVG"),
            AggregateFunction::Min => write!(f, "MIN"),
            AggregateFunction::Max => write!(f, "MAX"),
        }
    }
}

/// An aggregate expression and the attribute it produces.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateExpr {
    pub function: AggregateFunction,
    /// `None` for `COUNT(*)`.
    pub arg: Option<Expr>,
    pub output: ColumnRef,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// Sort specification.
#[derive(Debug, Clone, PartialEq)]
pub struct SortSpec {
    pub expr: Expr,
    pub direction: SortDirection,
    pub nulls_first: bool,
}

/// An item of a projection.
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectItem {
    /// Pass an input attribute through.
    Column(ColumnRef),
    /// Compute a new attribute.
    Expr { expr: Expr, output: ColumnRef },
}

impl ProjectItem {
    pub fn output(&self) -> ColumnRef {
        match self {
            ProjectItem::Column(c) => c.clone(),
            ProjectItem::Expr { output, .. } => output.clone(),
        }
    }
}

impl fmt::Display for ProjectItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProjectItem::Column(c) => write!(f, "{}", c),
            ProjectItem::Expr { expr, output } => write!(f, "{} AS {}", expr, output),
        }
    }
}

/// Logical query plan.
///
/// This is a tree structure representing the logical operations of a query.
/// Each node transforms its input(s) in some way.
#[derive(Debug, Clone, PartialEq)]
pub enum LogicalPlan {
    /// Read a resolved relation, either a base table or an index.
    TableRef {
        id: NodeId,
        relation: Arc<Relation>,
        output: Vec<ColumnRef>,
    },

    /// Name a subtree.
    SubqueryAlias {
        id: NodeId,
        alias: String,
        input: Box<LogicalPlan>,
    },

    /// Filter rows based on a predicate.
    Filter {
        id: NodeId,
        input: Box<LogicalPlan>,
        predicate: Expr,
    },

    /// Project specific columns.
    Project {
        id: NodeId,
        input: Box<LogicalPlan>,
        items: Vec<ProjectItem>,
    },

    /// Join two inputs.
    Join {
        id: NodeId,
        left: Box<LogicalPlan>,
        right: Box<LogicalPlan>,
        join_type: JoinType,
        on: Option<Expr>,
    },

    /// Sort by expressions.
    Sort {
        id: NodeId,
        input: Box<LogicalPlan>,
        order: Vec<SortSpec>,
    },

    /// Limit number of rows.
    Limit {
        id: NodeId,
        input: Box<LogicalPlan>,
        limit: usize,
        offset: Option<usize>,
    },

    /// Group by with aggregates.
    Aggregate {
        id: NodeId,
        input: Box<LogicalPlan>,
        group_by: Vec<Expr>,
        aggregates: Vec<AggregateExpr>,
    },

    /// Remove duplicate rows.
    Distinct { id: NodeId, input: Box<LogicalPlan> },

    /// Return no rows.
    Empty { id: NodeId, output: Vec<ColumnRef> },
}

/// An equi-join recognised in a plan: key pairs plus the two inputs.
#[derive(Debug)]
pub struct EquiJoin<'a> {
    pub join_type: JoinType,
    pub left_keys: Vec<&'a Expr>,
    pub right_keys: Vec<&'a Expr>,
    pub left: &'a LogicalPlan,
    pub right: &'a LogicalPlan,
}

impl LogicalPlan {
    /// Scan of `relation` with freshly allocated attributes.
    pub fn table_ref(relation: Arc<Relation>) -> Self {
        let qualifier = relation.scan_qualifier().to_string();
        let output = relation
            .columns
            .iter()
            .map(|c| ColumnRef::new(c.name.clone(), Some(qualifier.clone())))
            .collect();
        LogicalPlan::TableRef {
            id: NodeId::next(),
            relation,
            output,
        }
    }

    pub fn subquery_alias(alias: impl Into<String>, input: LogicalPlan) -> Self {
        LogicalPlan::SubqueryAlias {
            id: NodeId::next(),
            alias: alias.into(),
            input: Box::new(input),
        }
    }

    pub fn filter(input: LogicalPlan, predicate: Expr) -> Self {
        LogicalPlan::Filter {
            id: NodeId::next(),
            input: Box::new(input),
            predicate,
        }
    }

    pub fn project(input: LogicalPlan, items: Vec<ProjectItem>) -> Self {
        LogicalPlan::Project {
            id: NodeId::next(),
            input: Box::new(input),
            items,
        }
    }

    pub fn join(left: LogicalPlan, right: LogicalPlan, join_type: JoinType, on: Option<Expr>) -> Self {
        LogicalPlan::Join {
            id: NodeId::next(),
            left: Box::new(left),
            right: Box::new(right),
            join_type,
            on,
        }
    }

    pub fn sort(input: LogicalPlan, order: Vec<SortSpec>) -> Self {
        LogicalPlan::Sort {
            id: NodeId::next(),
            input: Box::new(input),
            order,
        }
    }

    pub fn limit(input: LogicalPlan, limit: usize, offset: Option<usize>) -> Self {
        LogicalPlan::Limit {
            id: NodeId::next(),
            input: Box::new(input),
            limit,
            offset,
        }
    }

    pub fn aggregate(input: LogicalPlan, group_by: Vec<Expr>, aggregates: Vec<AggregateExpr>) -> Self {
        LogicalPlan::Aggregate {
            id: NodeId::next(),
            input: Box::new(input),
            group_by,
            aggregates,
        }
    }

    pub fn distinct(input: LogicalPlan) -> Self {
        LogicalPlan::Distinct {
            id: NodeId::next(),
            input: Box::new(input),
        }
    }

    pub fn empty(output: Vec<ColumnRef>) -> Self {
        LogicalPlan::Empty {
            id: NodeId::next(),
            output,
        }
    }

    pub fn id(&self) -> NodeId {
        match self {
            LogicalPlan::TableRef { id, .. }
            | LogicalPlan::SubqueryAlias { id, .. }
            | LogicalPlan::Filter { id, .. }
            | LogicalPlan::Project { id, .. }
            | LogicalPlan::Join { id, .. }
            | LogicalPlan::Sort { id, .. }
            | LogicalPlan::Limit { id, .. }
            | LogicalPlan::Aggregate { id, .. }
            | LogicalPlan::Distinct { id, .. }
            | LogicalPlan::Empty { id, .. } => *id,
        }
    }

    pub fn children(&self) -> Vec<&LogicalPlan> {
        match self {
            LogicalPlan::SubqueryAlias { input, .. }
            | LogicalPlan::Filter { input, .. }
            | LogicalPlan::Project { input, .. }
            | LogicalPlan::Sort { input, .. }
            | LogicalPlan::Limit { input, .. }
            | LogicalPlan::Aggregate { input, .. }
            | LogicalPlan::Distinct { input, .. } => vec![input.as_ref()],
            LogicalPlan::Join { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            LogicalPlan::TableRef { .. } | LogicalPlan::Empty { .. } => Vec::new(),
        }
    }

    /// All nodes of the tree in pre-order.
    pub fn nodes(&self) -> Vec<&LogicalPlan> {
        let mut nodes = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            nodes.push(node);
            stack.extend(node.children().into_iter().rev());
        }
        nodes
    }

    /// Relations scanned by this plan, left to right.
    pub fn relations(&self) -> Vec<&Arc<Relation>> {
        self.nodes()
            .into_iter()
            .filter_map(|node| match node {
                LogicalPlan::TableRef { relation, .. } => Some(relation),
                _ => None,
            })
            .collect()
    }

    /// The node beneath any chain of subquery aliases.
    pub fn strip_aliases(&self) -> &LogicalPlan {
        let mut current = self;
        while let LogicalPlan::SubqueryAlias { input, .. } = current {
            current = input;
        }
        current
    }

    /// The attributes this node produces.
    pub fn output(&self) -> Vec<ColumnRef> {
        match self {
            LogicalPlan::TableRef { output, .. } | LogicalPlan::Empty { output, .. } => output.clone(),
            LogicalPlan::SubqueryAlias { alias, input, .. } => input
                .output()
                .iter()
                .map(|c| c.with_qualifier(Some(alias.clone())))
                .collect(),
            LogicalPlan::Filter { input, .. }
            | LogicalPlan::Sort { input, .. }
            | LogicalPlan::Limit { input, .. }
            | LogicalPlan::Distinct { input, .. } => input.output(),
            LogicalPlan::Project { items, .. } => items.iter().map(ProjectItem::output).collect(),
            LogicalPlan::Join { left, right, .. } => {
                let mut cols = left.output();
                cols.extend(right.output());
                cols
            }
            LogicalPlan::Aggregate {
                group_by,
                aggregates,
                ..
            } => {
                let mut cols: Vec<ColumnRef> = group_by
                    .iter()
                    .filter_map(|e| e.underlying_column().cloned())
                    .collect();
                cols.extend(aggregates.iter().map(|a| a.output.clone()));
                cols
            }
        }
    }

    pub fn output_ids(&self) -> HashSet<ExprId> {
        self.output().iter().map(|c| c.id).collect()
    }

    /// Expressions held directly by this node.
    pub fn expressions(&self) -> Vec<&Expr> {
        match self {
            LogicalPlan::Filter { predicate, .. } => vec![predicate],
            LogicalPlan::Join { on, .. } => on.iter().collect(),
            LogicalPlan::Project { items, .. } => items
                .iter()
                .filter_map(|item| match item {
                    ProjectItem::Expr { expr, .. } => Some(expr),
                    ProjectItem::Column(_) => None,
                })
                .collect(),
            LogicalPlan::Sort { order, .. } => order.iter().map(|s| &s.expr).collect(),
            LogicalPlan::Aggregate {
                group_by,
                aggregates,
                ..
            } => group_by
                .iter()
                .chain(aggregates.iter().filter_map(|a| a.arg.as_ref()))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Column references held directly by this node, including pass-through
    /// projections.
    pub fn references(&self) -> Vec<ColumnRef> {
        let mut refs: Vec<ColumnRef> = self
            .expressions()
            .into_iter()
            .flat_map(|e| e.column_refs())
            .cloned()
            .collect();
        if let LogicalPlan::Project { items, .. } = self {
            refs.extend(items.iter().filter_map(|item| match item {
                ProjectItem::Column(c) => Some(c.clone()),
                ProjectItem::Expr { .. } => None,
            }));
        }
        refs
    }

    /// Rebuild this node with each child replaced by `f(child)`. The node keeps
    /// its id.
    pub fn map_children<F>(self, mut f: F) -> PlanResult<LogicalPlan>
    where
        F: FnMut(LogicalPlan) -> PlanResult<LogicalPlan>,
    {
        Ok(match self {
            LogicalPlan::SubqueryAlias { id, alias, input } => LogicalPlan::SubqueryAlias {
                id,
                alias,
                input: Box::new(f(*input)?),
            },
            LogicalPlan::Filter {
                id,
                input,
                predicate,
            } => LogicalPlan::Filter {
                id,
                input: Box::new(f(*input)?),
                predicate,
            },
            LogicalPlan::Project { id, input, items } => LogicalPlan::Project {
                id,
                input: Box::new(f(*input)?),
                items,
            },
            LogicalPlan::Join {
                id,
                left,
                right,
                join_type,
                on,
            } => LogicalPlan::Join {
                id,
                left: Box::new(f(*left)?),
                right: Box::new(f(*right)?),
                join_type,
                on,
            },
            LogicalPlan::Sort { id, input, order } => LogicalPlan::Sort {
                id,
                input: Box::new(f(*input)?),
                order,
            },
            LogicalPlan::Limit {
                id,
                input,
                limit,
                offset,
            } => LogicalPlan::Limit {
                id,
                input: Box::new(f(*input)?),
                limit,
                offset,
            },
            LogicalPlan::Aggregate {
                id,
                input,
                group_by,
                aggregates,
            } => LogicalPlan::Aggregate {
                id,
                input: Box::new(f(*input)?),
                group_by,
                aggregates,
            },
            LogicalPlan::Distinct { id, input } => LogicalPlan::Distinct {
                id,
                input: Box::new(f(*input)?),
            },
            leaf @ (LogicalPlan::TableRef { .. } | LogicalPlan::Empty { .. }) => leaf,
        })
    }

    /// Rewrite the tree bottom-up: children first, then `f` on the rebuilt
    /// node.
    pub fn transform_up<F>(self, f: &mut F) -> PlanResult<LogicalPlan>
    where
        F: FnMut(LogicalPlan) -> PlanResult<LogicalPlan>,
    {
        let node = self.map_children(|child| child.transform_up(f))?;
        f(node)
    }

    /// Rewrite the expressions held directly by this node.
    pub fn map_expressions<F>(self, f: &mut F) -> LogicalPlan
    where
        F: FnMut(Expr) -> Expr,
    {
        match self {
            LogicalPlan::Filter {
                id,
                input,
                predicate,
            } => LogicalPlan::Filter {
                id,
                input,
                predicate: f(predicate),
            },
            LogicalPlan::Join {
                id,
                left,
                right,
                join_type,
                on,
            } => LogicalPlan::Join {
                id,
                left,
                right,
                join_type,
                on: on.map(&mut *f),
            },
            LogicalPlan::Project { id, input, items } => LogicalPlan::Project {
                id,
                input,
                items: items
                    .into_iter()
                    .map(|item| match item {
                        ProjectItem::Column(c) => match f(Expr::Column(c.clone())) {
                            Expr::Column(mapped) => ProjectItem::Column(mapped),
                            expr => ProjectItem::Expr { expr, output: c },
                        },
                        ProjectItem::Expr { expr, output } => ProjectItem::Expr {
                            expr: f(expr),
                            output,
                        },
                    })
                    .collect(),
            },
            LogicalPlan::Sort { id, input, order } => LogicalPlan::Sort {
                id,
                input,
                order: order
                    .into_iter()
                    .map(|s| SortSpec {
                        expr: f(s.expr),
                        ..s
                    })
                    .collect(),
            },
            LogicalPlan::Aggregate {
                id,
                input,
                group_by,
                aggregates,
            } => LogicalPlan::Aggregate {
                id,
                input,
                group_by: group_by.into_iter().map(&mut *f).collect(),
                aggregates: aggregates
                    .into_iter()
                    .map(|a| AggregateExpr {
                        arg: a.arg.map(&mut *f),
                        ..a
                    })
                    .collect(),
            },
            other => other,
        }
    }

    /// Rebind the column references of this node against its children's
    /// output. A reference whose id is still produced is kept; otherwise the
    /// unique attribute matching its qualifier and name replaces it. References
    /// that match nothing, or more than one attribute, are kept unchanged and
    /// returned alongside the plan.
    pub fn resolve_references(self, resolver: Resolver) -> (LogicalPlan, Vec<ColumnRef>) {
        let available: Vec<ColumnRef> = self.children().iter().flat_map(|c| c.output()).collect();
        let ids: HashSet<ExprId> = available.iter().map(|c| c.id).collect();
        let mut unresolved = Vec::new();

        let plan = self.map_expressions(&mut |expr| {
            expr.map_columns(&mut |col| {
                if ids.contains(&col.id) {
                    return col;
                }
                match resolver
                    .lookup(col.qualifier.as_deref(), &col.name, &available)
                    .as_slice()
                {
                    [found] => (*found).clone(),
                    _ => {
                        unresolved.push(col.clone());
                        col
                    }
                }
            })
        });
        (plan, unresolved)
    }

    /// Recognise a join whose condition contains equalities between the two
    /// inputs. Conjuncts that are not such equalities are ignored.
    pub fn as_equi_join(&self) -> Option<EquiJoin<'_>> {
        let LogicalPlan::Join {
            left,
            right,
            join_type,
            on: Some(on),
            ..
        } = self
        else {
            return None;
        };

        let left_ids = left.output_ids();
        let right_ids = right.output_ids();
        let mut left_keys = Vec::new();
        let mut right_keys = Vec::new();

        for term in on.split_conjunction() {
            let Expr::BinaryOp {
                left: l,
                op: BinaryOperator::Eq,
                right: r,
            } = term
            else {
                continue;
            };
            if l.column_refs().is_empty() || r.column_refs().is_empty() {
                continue;
            }
            if l.references_only(&left_ids) && r.references_only(&right_ids) {
                left_keys.push(l.as_ref());
                right_keys.push(r.as_ref());
            } else if l.references_only(&right_ids) && r.references_only(&left_ids) {
                left_keys.push(r.as_ref());
                right_keys.push(l.as_ref());
            }
        }

        if left_keys.is_empty() {
            return None;
        }
        Some(EquiJoin {
            join_type: *join_type,
            left_keys,
            right_keys,
            left: left.as_ref(),
            right: right.as_ref(),
        })
    }
}

impl fmt::Display for LogicalPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.format_indent(f, 0)
    }
}

fn join_display<T: fmt::Display>(items: &[T]) -> String {
    items.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(", ")
}

impl LogicalPlan {
    fn format_indent(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        let pad = "  ".repeat(indent);
        match self {
            LogicalPlan::TableRef { relation, output, .. } => {
                writeln!(f, "{}TableRef: {} [{}]", pad, relation, join_display(output))
            }
            LogicalPlan::SubqueryAlias { alias, input, .. } => {
                writeln!(f, "{}SubqueryAlias: {}", pad, alias)?;
                input.format_indent(f, indent + 1)
            }
            LogicalPlan::Filter {
                input, predicate, ..
            } => {
                writeln!(f, "{}Filter: {}", pad, predicate)?;
                input.format_indent(f, indent + 1)
            }
            LogicalPlan::Project { input, items, .. } => {
                writeln!(f, "{}Project: [{}]", pad, join_display(items))?;
                input.format_indent(f, indent + 1)
            }
            LogicalPlan::Join {
                left,
                right,
                join_type,
                on,
                ..
            } => {
                write!(f, "{}Join: {}", pad, join_type)?;
                if let Some(cond) = on {
                    write!(f, " ON {}", cond)?;
                }
                writeln!(f)?;
                left.format_indent(f, indent + 1)?;
                right.format_indent(f, indent + 1)
            }
            LogicalPlan::Sort { input, order, .. } => {
                let ord: Vec<String> = order
                    .iter()
                    .map(|s| match s.direction {
                        SortDirection::Ascending => format!("{} ASC", s.expr),
                        SortDirection::Descending => format!("{} DESC", s.expr),
                    })
                    .collect();
                writeln!(f, "{}Sort: [{}]", pad, ord.join(", "))?;
                input.format_indent(f, indent + 1)
            }
            LogicalPlan::Limit {
                input,
                limit,
                offset,
                ..
            } => {
                write!(f, "{}Limit: {}", pad, limit)?;
                if let Some(o) = offset {
                    write!(f, " OFFSET {}", o)?;
                }
                writeln!(f)?;
                input.format_indent(f, indent + 1)
            }
            LogicalPlan::Aggregate {
                input,
                group_by,
                aggregates,
                ..
            } => {
                let aggs: Vec<String> = aggregates
                    .iter()
                    .map(|a| match &a.arg {
                        Some(arg) => format!("{}({}) AS {}", a.function, arg, a.output),
                        None => format!("{}(*) AS {}", a.function, a.output),
                    })
                    .collect();
                writeln!(
                    f,
                    "{}Aggregate: group=[{}], aggs=[{}]",
                    pad,
                    join_display(group_by),
                    aggs.join(", ")
                )?;
                input.format_indent(f, indent + 1)
            }
            LogicalPlan::Distinct { input, .. } => {
                writeln!(f, "{}Distinct", pad)?;
                input.format_indent(f, indent + 1)
            }
            LogicalPlan::Empty { output, .. } => {
                writeln!(f, "{}Empty: [{}]", pad, join_display(output))
            }
        }
    }
}
