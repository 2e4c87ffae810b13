//! Bound expressions and the attributes they reference.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

pub use crate::sql::{BinaryOperator, LiteralValue, UnaryOperator};

static NEXT_EXPR_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of an attribute. Two column references denote the same value iff
/// their ids are equal, whatever their names or qualifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(u64);

impl ExprId {
    /// Allocate a process-wide unique id.
    pub fn next() -> Self {
        ExprId(NEXT_EXPR_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ExprId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A column produced by a plan node, or a reference to one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    pub id: ExprId,
    pub name: String,
    pub qualifier: Option<String>,
}

impl ColumnRef {
    /// A new attribute with a fresh id.
    pub fn new(name: impl Into<String>, qualifier: Option<String>) -> Self {
        Self {
            id: ExprId::next(),
            name: name.into(),
            qualifier,
        }
    }

    /// The same attribute seen through a different qualifier.
    pub fn with_qualifier(&self, qualifier: Option<String>) -> Self {
        Self {
            id: self.id,
            name: self.name.clone(),
            qualifier,
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref q) = self.qualifier {
            write!(f, "{}.", q)?;
        }
        write!(f, "{}{}", self.name, self.id)
    }
}

/// Identifier comparison policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Resolver {
    CaseSensitive,
    #[default]
    CaseInsensitive,
}

impl Resolver {
    pub fn equal(&self, a: &str, b: &str) -> bool {
        match self {
            Resolver::CaseSensitive => a == b,
            Resolver::CaseInsensitive => a.eq_ignore_ascii_case(b),
        }
    }

    /// Attributes of `attrs` that `qualifier.name` can refer to, one per id.
    /// An unqualified name matches regardless of qualifier.
    pub fn lookup<'a>(
        &self,
        qualifier: Option<&str>,
        name: &str,
        attrs: &'a [ColumnRef],
    ) -> Vec<&'a ColumnRef> {
        let mut seen = HashSet::new();
        attrs
            .iter()
            .filter(|attr| self.equal(&attr.name, name))
            .filter(|attr| match qualifier {
                None => true,
                Some(q) => attr.qualifier.as_deref().is_some_and(|aq| self.equal(aq, q)),
            })
            .filter(|attr| seen.insert(attr.id))
            .collect()
    }
}

/// Expression bound to the attributes of a plan.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column(ColumnRef),
    Literal(LiteralValue),
    BinaryOp {
        left: Box<Expr>,
        op: BinaryOperator,
        right: Box<Expr>,
    },
    UnaryOp {
        op: UnaryOperator,
        expr: Box<Expr>,
    },
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    InList {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        negated: bool,
    },
    Like {
        expr: Box<Expr>,
        pattern: String,
        negated: bool,
    },
    Function {
        name: String,
        args: Vec<Expr>,
    },
    Nested(Box<Expr>),
}

impl Expr {
    pub fn column(col: &ColumnRef) -> Expr {
        Expr::Column(col.clone())
    }

    pub fn binary(left: Expr, op: BinaryOperator, right: Expr) -> Expr {
        Expr::BinaryOp {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    pub fn equals(left: Expr, right: Expr) -> Expr {
        Expr::binary(left, BinaryOperator::Eq, right)
    }

    pub fn and(left: Expr, right: Expr) -> Expr {
        Expr::binary(left, BinaryOperator::And, right)
    }

    /// Top-level AND-separated terms. Parentheses around an AND are looked
    /// through.
    pub fn split_conjunction(&self) -> Vec<&Expr> {
        let mut terms = Vec::new();
        let mut stack = vec![self];
        while let Some(expr) = stack.pop() {
            match expr {
                Expr::BinaryOp {
                    left,
                    op: BinaryOperator::And,
                    right,
                } => {
                    stack.push(right);
                    stack.push(left);
                }
                Expr::Nested(inner)
                    if matches!(
                        inner.as_ref(),
                        Expr::BinaryOp {
                            op: BinaryOperator::And,
                            ..
                        }
                    ) =>
                {
                    stack.push(inner);
                }
                other => terms.push(other),
            }
        }
        terms
    }

    /// AND the terms together; `None` when there are none.
    pub fn conjunction(terms: Vec<Expr>) -> Option<Expr> {
        terms.into_iter().reduce(Expr::and)
    }

    /// The column an expression is a thin wrapper around, if any.
    pub fn underlying_column(&self) -> Option<&ColumnRef> {
        match self {
            Expr::Column(c) => Some(c),
            Expr::Nested(inner) => inner.underlying_column(),
            _ => None,
        }
    }

    /// Every column referenced anywhere in the expression.
    pub fn column_refs(&self) -> Vec<&ColumnRef> {
        let mut refs = Vec::new();
        self.collect_column_refs(&mut refs);
        refs
    }

    fn collect_column_refs<'a>(&'a self, refs: &mut Vec<&'a ColumnRef>) {
        match self {
            Expr::Column(c) => refs.push(c),
            Expr::Literal(_) => {}
            Expr::BinaryOp { left, right, .. } => {
                left.collect_column_refs(refs);
                right.collect_column_refs(refs);
            }
            Expr::UnaryOp { expr, .. }
            | Expr::IsNull { expr, .. }
            | Expr::Like { expr, .. }
            | Expr::Nested(expr) => expr.collect_column_refs(refs),
            Expr::InList { expr, list, .. } => {
                expr.collect_column_refs(refs);
                list.iter().for_each(|e| e.collect_column_refs(refs));
            }
            Expr::Between { expr, low, high, .. } => {
                expr.collect_column_refs(refs);
                low.collect_column_refs(refs);
                high.collect_column_refs(refs);
            }
            Expr::Function { args, .. } => args.iter().for_each(|e| e.collect_column_refs(refs)),
        }
    }

    /// Whether every referenced column has an id in `ids`.
    pub fn references_only(&self, ids: &HashSet<ExprId>) -> bool {
        self.column_refs().iter().all(|c| ids.contains(&c.id))
    }

    /// Rewrite every column reference.
    pub fn map_columns<F>(self, f: &mut F) -> Expr
    where
        F: FnMut(ColumnRef) -> ColumnRef,
    {
        match self {
            Expr::Column(c) => Expr::Column(f(c)),
            Expr::Literal(v) => Expr::Literal(v),
            Expr::BinaryOp { left, op, right } => Expr::BinaryOp {
                left: Box::new(left.map_columns(f)),
                op,
                right: Box::new(right.map_columns(f)),
            },
            Expr::UnaryOp { op, expr } => Expr::UnaryOp {
                op,
                expr: Box::new(expr.map_columns(f)),
            },
            Expr::IsNull { expr, negated } => Expr::IsNull {
                expr: Box::new(expr.map_columns(f)),
                negated,
            },
            Expr::InList { expr, list, negated } => Expr::InList {
                expr: Box::new(expr.map_columns(f)),
                list: list.into_iter().map(|e| e.map_columns(f)).collect(),
                negated,
            },
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => Expr::Between {
                expr: Box::new(expr.map_columns(f)),
                low: Box::new(low.map_columns(f)),
                high: Box::new(high.map_columns(f)),
                negated,
            },
            Expr::Like {
                expr,
                pattern,
                negated,
            } => Expr::Like {
                expr: Box::new(expr.map_columns(f)),
                pattern,
                negated,
            },
            Expr::Function { name, args } => Expr::Function {
                name,
                args: args.into_iter().map(|e| e.map_columns(f)).collect(),
            },
            Expr::Nested(inner) => Expr::Nested(Box::new(inner.map_columns(f))),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column(c) => write!(f, "{}", c),
            Expr::Literal(v) => write!(f, "{}", v),
            Expr::BinaryOp { left, op, right } => write!(f, "{} {} {}", left, op, right),
            Expr::UnaryOp { op, expr } => write!(f, "{}{}", op, expr),
            Expr::IsNull { expr, negated } => {
                write!(f, "{} IS {}NULL", expr, if *negated { "NOT " } else { "" })
            }
            Expr::InList { expr, list, negated } => {
                let items: Vec<String> = list.iter().map(|e| e.to_string()).collect();
                write!(
                    f,
                    "{} {}IN ({})",
                    expr,
                    if *negated { "NOT " } else { "" },
                    items.join(", ")
                )
            }
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => write!(
                f,
                "{} {}BETWEEN {} AND {}",
                expr,
                if *negated { "NOT " } else { "" },
                low,
                high
            ),
            Expr::Like {
                expr,
                pattern,
                negated,
            } => write!(
                f,
                "{} {}LIKE '{}'",
                expr,
                if *negated { "NOT " } else { "" },
                pattern
            ),
            Expr::Function { name, args } => {
                let items: Vec<String> = args.iter().map(|e| e.to_string()).collect();
                write!(f, "{}({})", name, items.join(", "))
            }
            Expr::Nested(inner) => write!(f, "({})", inner),
        }
    }
}
