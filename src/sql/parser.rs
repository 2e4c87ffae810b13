//! SQL parser implementation.
//!
//! Converts SQL strings to our internal AST using sqlparser.

use sqlparser::ast as sp;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser as SqlParser;

use super::ast::*;
use super::error::{ParseError, ParseResult};

/// SQL parser for SELECT queries.
pub struct Parser;

impl Parser {
    /// Parse a SQL string into a statement.
    pub fn parse(sql: &str) -> ParseResult<Statement> {
        let sql = sql.trim();
        if sql.is_empty() {
            return Err(ParseError::EmptyQuery);
        }

        let dialect = GenericDialect {};
        let statements = SqlParser::parse_sql(&dialect, sql)?;

        if statements.is_empty() {
            return Err(ParseError::EmptyQuery);
        }
        if statements.len() > 1 {
            return Err(ParseError::MultipleStatements);
        }

        Self::convert_statement(&statements[0])
    }

    /// Parse a SQL string that must be a plain SELECT.
    pub fn parse_select(sql: &str) -> ParseResult<Select> {
        match Self::parse(sql)? {
            Statement::Select(select) => Ok(select),
            Statement::Explain(_) => Err(ParseError::UnsupportedStatement(
                "expected SELECT, found EXPLAIN".into(),
            )),
        }
    }

    fn convert_statement(stmt: &sp::Statement) -> ParseResult<Statement> {
        match stmt {
            sp::Statement::Query(query) => Ok(Statement::Select(Self::convert_query(query)?)),
            sp::Statement::Explain { statement, .. } => match statement.as_ref() {
                sp::Statement::Query(query) => Ok(Statement::Explain(Self::convert_query(query)?)),
                other => Err(ParseError::UnsupportedStatement(format!(
                    "EXPLAIN {}",
                    other
                ))),
            },
            other => Err(ParseError::UnsupportedStatement(format!("{}", other))),
        }
    }

    fn convert_query(query: &sp::Query) -> ParseResult<Select> {
        if query.with.is_some() {
            return Err(ParseError::UnsupportedStatement("WITH clause".into()));
        }

        let select = match query.body.as_ref() {
            sp::SetExpr::Select(s) => s,
            other => {
                return Err(ParseError::UnsupportedStatement(format!(
                    "Unsupported query type: {}",
                    other
                )))
            }
        };

        if select.having.is_some() {
            return Err(ParseError::UnsupportedStatement("HAVING clause".into()));
        }

        let distinct = match &select.distinct {
            None => false,
            Some(sp::Distinct::Distinct) => true,
            Some(other) => {
                return Err(ParseError::UnsupportedStatement(format!("{}", other)));
            }
        };

        // FROM clause
        if select.from.is_empty() {
            return Err(ParseError::MissingClause("FROM".into()));
        }
        let from = select
            .from
            .iter()
            .map(Self::convert_from_item)
            .collect::<ParseResult<Vec<_>>>()?;

        // SELECT list
        let projection = Self::convert_projection(&select.projection)?;

        // WHERE clause
        let selection = select
            .selection
            .as_ref()
            .map(Self::convert_expr)
            .transpose()?;

        // GROUP BY
        let group_by = match &select.group_by {
            sp::GroupByExpr::Expressions(exprs, _) => exprs
                .iter()
                .map(Self::convert_expr)
                .collect::<ParseResult<Vec<_>>>()?,
            sp::GroupByExpr::All(_) => {
                return Err(ParseError::UnsupportedStatement("GROUP BY ALL".into()))
            }
        };

        // ORDER BY
        let order_by = query
            .order_by
            .as_ref()
            .map(Self::extract_order_by_exprs)
            .transpose()?
            .unwrap_or_default();

        // LIMIT
        let limit = query.limit.as_ref().and_then(Self::expr_to_usize);

        // OFFSET
        let offset = query
            .offset
            .as_ref()
            .and_then(|o| Self::expr_to_usize(&o.value));

        Ok(Select {
            projection,
            from,
            selection,
            group_by,
            order_by,
            limit,
            offset,
            distinct,
        })
    }

    fn convert_from_item(item: &sp::TableWithJoins) -> ParseResult<FromItem> {
        let source = Self::convert_table_factor(&item.relation)?;
        let joins = item
            .joins
            .iter()
            .map(Self::convert_join)
            .collect::<ParseResult<Vec<_>>>()?;
        Ok(FromItem { source, joins })
    }

    fn convert_table_factor(factor: &sp::TableFactor) -> ParseResult<TableSource> {
        match factor {
            sp::TableFactor::Table { name, alias, .. } => Ok(TableSource::Table {
                name: Self::extract_table_name(name)?,
                alias: alias.as_ref().map(|a| a.name.value.clone()),
            }),
            sp::TableFactor::Derived { subquery, alias, .. } => {
                let alias = alias
                    .as_ref()
                    .map(|a| a.name.value.clone())
                    .ok_or(ParseError::MissingAlias)?;
                Ok(TableSource::Derived {
                    subquery: Box::new(Self::convert_query(subquery)?),
                    alias,
                })
            }
            other => Err(ParseError::UnsupportedStatement(format!(
                "Unsupported FROM clause: {}",
                other
            ))),
        }
    }

    fn convert_join(join: &sp::Join) -> ParseResult<JoinClause> {
        let source = Self::convert_table_factor(&join.relation)?;
        let (join_type, constraint) = match &join.join_operator {
            sp::JoinOperator::Inner(c) => (JoinType::Inner, Some(c)),
            sp::JoinOperator::LeftOuter(c) => (JoinType::Left, Some(c)),
            sp::JoinOperator::RightOuter(c) => (JoinType::Right, Some(c)),
            sp::JoinOperator::FullOuter(c) => (JoinType::Full, Some(c)),
            sp::JoinOperator::CrossJoin => (JoinType::Cross, None),
            other => {
                return Err(ParseError::UnsupportedStatement(format!(
                    "join operator {:?}; spell joins as INNER JOIN, LEFT OUTER JOIN, \
                     RIGHT OUTER JOIN, FULL OUTER JOIN or CROSS JOIN",
                    other
                )))
            }
        };

        let on = match constraint {
            Some(sp::JoinConstraint::On(expr)) => Some(Self::convert_expr(expr)?),
            Some(sp::JoinConstraint::None) | None => None,
            Some(other) => {
                return Err(ParseError::UnsupportedStatement(format!(
                    "join constraint {:?}",
                    other
                )))
            }
        };

        Ok(JoinClause {
            source,
            join_type,
            on,
        })
    }

    fn convert_projection(items: &[sp::SelectItem]) -> ParseResult<Vec<SelectItem>> {
        items
            .iter()
            .map(|item| match item {
                sp::SelectItem::Wildcard(_) => Ok(SelectItem::Wildcard),
                sp::SelectItem::UnnamedExpr(expr) => Ok(SelectItem::Expr {
                    expr: Self::convert_expr(expr)?,
                    alias: None,
                }),
                sp::SelectItem::ExprWithAlias { expr, alias } => Ok(SelectItem::Expr {
                    expr: Self::convert_expr(expr)?,
                    alias: Some(alias.value.clone()),
                }),
                sp::SelectItem::QualifiedWildcard(name, _) => {
                    Err(ParseError::UnsupportedExpression(format!(
                        "Qualified wildcard: {:?}",
                        name
                    )))
                }
            })
            .collect()
    }

    fn extract_order_by_exprs(ob: &sp::OrderBy) -> ParseResult<Vec<OrderBy>> {
        match &ob.kind {
            sp::OrderByKind::All(_) => Ok(vec![]),
            sp::OrderByKind::Expressions(exprs) => {
                exprs.iter().map(Self::convert_order_by_expr).collect()
            }
        }
    }

    fn convert_order_by_expr(expr: &sp::OrderByExpr) -> ParseResult<OrderBy> {
        let ascending = expr.options.asc.unwrap_or(true);
        Ok(OrderBy {
            expr: Self::convert_expr(&expr.expr)?,
            ascending,
            nulls_first: expr.options.nulls_first.unwrap_or(!ascending),
        })
    }

    fn convert_expr(expr: &sp::Expr) -> ParseResult<Expr> {
        match expr {
            sp::Expr::Identifier(id) => Ok(Expr::Identifier(vec![id.value.clone()])),

            sp::Expr::CompoundIdentifier(parts) => {
                if parts.is_empty() {
                    return Err(ParseError::InvalidIdentifier(
                        "empty compound identifier".into(),
                    ));
                }
                Ok(Expr::Identifier(
                    parts.iter().map(|p| p.value.clone()).collect(),
                ))
            }

            sp::Expr::Value(v) => Ok(Expr::Literal(Self::convert_value(v)?)),

            sp::Expr::BinaryOp { left, op, right } => {
                let l = Self::convert_expr(left)?;
                let r = Self::convert_expr(right)?;
                let o = Self::convert_binary_op(op)?;
                Ok(Expr::BinaryOp {
                    left: Box::new(l),
                    op: o,
                    right: Box::new(r),
                })
            }

            sp::Expr::UnaryOp { op, expr } => {
                let e = Self::convert_expr(expr)?;
                let o = Self::convert_unary_op(op)?;
                Ok(Expr::UnaryOp {
                    op: o,
                    expr: Box::new(e),
                })
            }

            sp::Expr::IsNull(e) => Ok(Expr::IsNull {
                expr: Box::new(Self::convert_expr(e)?),
                negated: false,
            }),

            sp::Expr::IsNotNull(e) => Ok(Expr::IsNull {
                expr: Box::new(Self::convert_expr(e)?),
                negated: true,
            }),

            sp::Expr::InList { expr, list, negated } => {
                let e = Self::convert_expr(expr)?;
                let items = list
                    .iter()
                    .map(Self::convert_expr)
                    .collect::<ParseResult<Vec<_>>>()?;
                Ok(Expr::InList {
                    expr: Box::new(e),
                    list: items,
                    negated: *negated,
                })
            }

            sp::Expr::Between { expr, low, high, negated } => Ok(Expr::Between {
                expr: Box::new(Self::convert_expr(expr)?),
                low: Box::new(Self::convert_expr(low)?),
                high: Box::new(Self::convert_expr(high)?),
                negated: *negated,
            }),

            sp::Expr::Like { expr, pattern, negated, .. } => Ok(Expr::Like {
                expr: Box::new(Self::convert_expr(expr)?),
                pattern: Self::extract_string_from_expr(pattern)?,
                negated: *negated,
            }),

            sp::Expr::Function(f) => {
                let name = f.name.to_string();
                let args = match &f.args {
                    sp::FunctionArguments::List(list) => list
                        .args
                        .iter()
                        .filter_map(|arg| match arg {
                            sp::FunctionArg::Unnamed(sp::FunctionArgExpr::Expr(e)) => {
                                Some(Self::convert_expr(e))
                            }
                            _ => None,
                        })
                        .collect::<ParseResult<Vec<_>>>()?,
                    _ => vec![],
                };
                Ok(Expr::Function { name, args })
            }

            sp::Expr::Nested(inner) => Ok(Expr::Nested(Box::new(Self::convert_expr(inner)?))),

            other => Err(ParseError::UnsupportedExpression(format!("{}", other))),
        }
    }

    fn convert_value(v: &sp::ValueWithSpan) -> ParseResult<LiteralValue> {
        match &v.value {
            sp::Value::Null => Ok(LiteralValue::Null),
            sp::Value::Boolean(b) => Ok(LiteralValue::Boolean(*b)),
            sp::Value::Number(s, _) => {
                if let Ok(i) = s.parse::<i64>() {
                    Ok(LiteralValue::Integer(i))
                } else if let Ok(f) = s.parse::<f64>() {
                    Ok(LiteralValue::Float(f))
                } else {
                    Err(ParseError::UnsupportedExpression(format!("Invalid number: {}", s)))
                }
            }
            sp::Value::SingleQuotedString(s) => Ok(LiteralValue::String(s.clone())),
            sp::Value::DoubleQuotedString(s) => Ok(LiteralValue::String(s.clone())),
            other => Err(ParseError::UnsupportedExpression(format!(
                "Unsupported value: {}",
                other
            ))),
        }
    }

    fn extract_string_from_expr(expr: &sp::Expr) -> ParseResult<String> {
        match expr {
            sp::Expr::Value(v) => match &v.value {
                sp::Value::SingleQuotedString(s) => Ok(s.clone()),
                sp::Value::DoubleQuotedString(s) => Ok(s.clone()),
                _ => Err(ParseError::UnsupportedExpression("expected string".into())),
            },
            _ => Err(ParseError::UnsupportedExpression(
                "expected string literal".into(),
            )),
        }
    }

    fn convert_binary_op(op: &sp::BinaryOperator) -> ParseResult<BinaryOperator> {
        match op {
            sp::BinaryOperator::Eq => Ok(BinaryOperator::Eq),
            sp::BinaryOperator::NotEq => Ok(BinaryOperator::NotEq),
            sp::BinaryOperator::Lt => Ok(BinaryOperator::Lt),
            sp::BinaryOperator::LtEq => Ok(BinaryOperator::LtEq),
            sp::BinaryOperator::Gt => Ok(BinaryOperator::Gt),
            sp::BinaryOperator::GtEq => Ok(BinaryOperator::GtEq),
            sp::BinaryOperator::And => Ok(BinaryOperator::And),
            sp::BinaryOperator::Or => Ok(BinaryOperator::Or),
            sp::BinaryOperator::Plus => Ok(BinaryOperator::Plus),
            sp::BinaryOperator::Minus => Ok(BinaryOperator::Minus),
            sp::BinaryOperator::Multiply => Ok(BinaryOperator::Multiply),
            sp::BinaryOperator::Divide => Ok(BinaryOperator::Divide),
            sp::BinaryOperator::Modulo => Ok(BinaryOperator::Modulo),
            sp::BinaryOperator::StringConcat => Ok(BinaryOperator::Concat),
            other => Err(ParseError::UnsupportedExpression(format!(
                "Unsupported operator: {}",
                other
            ))),
        }
    }

    fn convert_unary_op(op: &sp::UnaryOperator) -> ParseResult<UnaryOperator> {
        match op {
            sp::UnaryOperator::Not => Ok(UnaryOperator::Not),
            sp::UnaryOperator::Minus => Ok(UnaryOperator::Minus),
            sp::UnaryOperator::Plus => Ok(UnaryOperator::Plus),
            other => Err(ParseError::UnsupportedExpression(format!(
                "Unsupported unary operator: {}",
                other
            ))),
        }
    }

    /// Keep the schema qualifier; the catalog canonicalizes names.
    fn extract_table_name(name: &sp::ObjectName) -> ParseResult<String> {
        let parts: Vec<String> = name
            .0
            .iter()
            .map(|p| {
                p.as_ident()
                    .map(|id| id.value.clone())
                    .unwrap_or_else(|| p.to_string())
            })
            .collect();
        if parts.is_empty() {
            return Err(ParseError::InvalidIdentifier("empty table name".into()));
        }
        Ok(parts.join("."))
    }

    fn expr_to_usize(expr: &sp::Expr) -> Option<usize> {
        match expr {
            sp::Expr::Value(v) => match &v.value {
                sp::Value::Number(s, _) => s.parse().ok(),
                _ => None,
            },
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn select(sql: &str) -> Select {
        Parser::parse_select(sql).unwrap()
    }

    #[test]
    fn test_parse_select_all() {
        let s = select("SELECT * FROM users");
        assert_eq!(s.from.len(), 1);
        assert_eq!(
            s.from[0].source,
            TableSource::Table {
                name: "users".into(),
                alias: None
            }
        );
        assert_eq!(s.projection, vec![SelectItem::Wildcard]);
        assert!(s.selection.is_none());
        assert!(!s.distinct);
    }

    #[test]
    fn test_parse_qualified_columns_and_alias() {
        let s = select("SELECT u.id, u.name AS n FROM app.users u");
        assert_eq!(
            s.from[0].source,
            TableSource::Table {
                name: "app.users".into(),
                alias: Some("u".into())
            }
        );
        assert_eq!(
            s.projection[0],
            SelectItem::Expr {
                expr: Expr::Identifier(vec!["u".into(), "id".into()]),
                alias: None
            }
        );
        assert!(matches!(
            &s.projection[1],
            SelectItem::Expr { alias: Some(a), .. } if a == "n"
        ));
    }

    #[test]
    fn test_parse_select_where() {
        let s = select("SELECT * FROM users WHERE age > 21");
        match s.selection.unwrap() {
            Expr::BinaryOp { left, op, right } => {
                assert_eq!(*left, Expr::Identifier(vec!["age".into()]));
                assert_eq!(op, BinaryOperator::Gt);
                assert_eq!(*right, Expr::Literal(LiteralValue::Integer(21)));
            }
            other => panic!("Expected BinaryOp, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_joins() {
        let s = select(
            "SELECT * FROM orders o INNER JOIN items i ON o.id = i.order_id \
             LEFT OUTER JOIN customers c ON o.cust_id = c.id CROSS JOIN regions",
        );
        let joins = &s.from[0].joins;
        assert_eq!(joins.len(), 3);
        assert_eq!(joins[0].join_type, JoinType::Inner);
        assert!(joins[0].on.is_some());
        assert_eq!(joins[1].join_type, JoinType::Left);
        assert_eq!(joins[1].source.alias(), Some("c"));
        assert_eq!(joins[2].join_type, JoinType::Cross);
        assert!(joins[2].on.is_none());
    }

    #[test]
    fn test_parse_comma_join() {
        let s = select("SELECT * FROM a, b WHERE a.x = b.x");
        assert_eq!(s.from.len(), 2);
    }

    #[test]
    fn test_parse_derived_table() {
        let s = select("SELECT t.id FROM (SELECT id FROM users WHERE id > 1) t");
        match &s.from[0].source {
            TableSource::Derived { subquery, alias } => {
                assert_eq!(alias, "t");
                assert!(subquery.selection.is_some());
            }
            other => panic!("Expected derived table, got {:?}", other),
        }
    }

    #[test]
    fn test_derived_table_requires_alias() {
        let result = Parser::parse("SELECT * FROM (SELECT id FROM users)");
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_group_order_limit() {
        let s = select(
            "SELECT status, COUNT(*) FROM orders GROUP BY status \
             ORDER BY status DESC LIMIT 10 OFFSET 5",
        );
        assert_eq!(s.group_by, vec![Expr::Identifier(vec!["status".into()])]);
        assert!(matches!(
            &s.projection[1],
            SelectItem::Expr { expr: Expr::Function { name, args }, .. }
                if name.eq_ignore_ascii_case("count") && args.is_empty()
        ));
        assert_eq!(s.order_by.len(), 1);
        assert!(!s.order_by[0].ascending);
        assert_eq!(s.limit, Some(10));
        assert_eq!(s.offset, Some(5));
    }

    #[test]
    fn test_parse_distinct() {
        assert!(select("SELECT DISTINCT status FROM orders").distinct);
    }

    #[test]
    fn test_parse_explain() {
        assert!(matches!(
            Parser::parse("EXPLAIN SELECT * FROM users").unwrap(),
            Statement::Explain(_)
        ));
        assert!(Parser::parse_select("EXPLAIN SELECT * FROM users").is_err());
    }

    #[test]
    fn test_parse_in_list_between_like() {
        let s = select(
            "SELECT * FROM users WHERE status IN ('a', 'b') AND age BETWEEN 18 AND 65 \
             AND name LIKE 'A%'",
        );
        assert!(s.selection.is_some());
    }

    #[test]
    fn test_unsupported_statement() {
        assert!(matches!(
            Parser::parse("DELETE FROM users").unwrap_err(),
            ParseError::UnsupportedStatement(_)
        ));
    }

    #[test]
    fn test_missing_from() {
        assert!(matches!(
            Parser::parse("SELECT 1").unwrap_err(),
            ParseError::MissingClause(_)
        ));
    }

    #[test]
    fn test_empty_query() {
        assert!(matches!(Parser::parse("").unwrap_err(), ParseError::EmptyQuery));
        assert!(matches!(Parser::parse("   ").unwrap_err(), ParseError::EmptyQuery));
    }

    #[test]
    fn test_multiple_statements() {
        assert!(matches!(
            Parser::parse("SELECT * FROM a; SELECT * FROM b").unwrap_err(),
            ParseError::MultipleStatements
        ));
    }
}
