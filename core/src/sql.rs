//! Structured SELECT fragments rendered to parameterized SQL.
//!
//! Builders assemble a [`SelectQuery`] instead of concatenating strings; only
//! [`SelectQuery::render`] produces SQL text. Parameters are positional (`?`)
//! and are collected in the order their placeholders appear in the text.

use crate::error::{EngineError, EngineResult};
use crate::query::{FilterCondition, LogicalOp};
use rusqlite::types::Value as SqlValue;

#[derive(Debug, Clone, PartialEq)]
pub struct SelectItem {
    pub expr: String,
    pub alias: Option<String>,
}

impl SelectItem {
    pub fn aliased(expr: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            expr: expr.into(),
            alias: Some(alias.into()),
        }
    }

    pub fn bare(expr: impl Into<String>) -> Self {
        Self {
            expr: expr.into(),
            alias: None,
        }
    }
}

/// A boolean SQL condition and the values bound to its placeholders.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Predicate {
    pub fn new(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// `expr IN (?, ?, ...)`. An empty list yields a predicate that is never true.
    pub fn in_list(expr: &str, values: &[String]) -> Self {
        if values.is_empty() {
            return Self::new("0 = 1", vec![]);
        }
        let placeholders = vec!["?"; values.len()].join(", ");
        Self::new(
            format!("{expr} IN ({placeholders})"),
            values.iter().map(|v| SqlValue::Text(v.clone())).collect(),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderItem {
    pub expr: String,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    Table(String),
    /// Members joined with `UNION ALL` (or `UNION` when `distinct`), exposed
    /// under `alias`.
    Union {
        members: Vec<SelectQuery>,
        alias: String,
        distinct: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    pub distinct: bool,
    pub select: Vec<SelectItem>,
    pub from: Source,
    pub predicates: Vec<Predicate>,
    pub group_by: Vec<String>,
    pub order_by: Vec<OrderItem>,
    pub limit: Option<usize>,
}

impl SelectQuery {
    pub fn from_table(table: &str) -> Self {
        Self {
            distinct: false,
            select: Vec::new(),
            from: Source::Table(table.to_string()),
            predicates: Vec::new(),
            group_by: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        }
    }

    pub fn render(&self) -> (String, Vec<SqlValue>) {
        let mut sql = String::new();
        let mut params = Vec::new();
        self.render_into(&mut sql, &mut params);
        (sql, params)
    }

    fn render_into(&self, sql: &mut String, params: &mut Vec<SqlValue>) {
        sql.push_str("SELECT ");
        if self.distinct {
            sql.push_str("DISTINCT ");
        }
        if self.select.is_empty() {
            sql.push('1');
        } else {
            let items: Vec<String> = self
                .select
                .iter()
                .map(|s| match &s.alias {
                    Some(alias) => format!("{} AS {alias}", s.expr),
                    None => s.expr.clone(),
                })
                .collect();
            sql.push_str(&items.join(", "));
        }

        sql.push_str(" FROM ");
        match &self.from {
            Source::Table(table) => sql.push_str(table),
            Source::Union {
                members,
                alias,
                distinct,
            } => {
                let joiner = if *distinct { " UNION " } else { " UNION ALL " };
                sql.push('(');
                for (i, member) in members.iter().enumerate() {
                    if i > 0 {
                        sql.push_str(joiner);
                    }
                    // SQLite rejects parenthesized compound members, so each
                    // member is wrapped as a subquery instead.
                    sql.push_str("SELECT * FROM (");
                    member.render_into(sql, params);
                    sql.push(')');
                }
                sql.push_str(") ");
                sql.push_str(alias);
            }
        }

        if !self.predicates.is_empty() {
            sql.push_str(" WHERE ");
            for (i, p) in self.predicates.iter().enumerate() {
                if i > 0 {
                    sql.push_str(" AND ");
                }
                sql.push_str(&p.sql);
                params.extend(p.params.iter().cloned());
            }
        }

        if !self.group_by.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&self.group_by.join(", "));
        }

        if !self.order_by.is_empty() {
            let items: Vec<String> = self
                .order_by
                .iter()
                .map(|o| match o.direction {
                    SortDirection::Asc => format!("{} ASC", o.expr),
                    SortDirection::Desc => format!("{} DESC", o.expr),
                })
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&items.join(", "));
        }

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
    }

    /// Output column names, in select order.
    pub fn column_names(&self) -> Vec<String> {
        self.select
            .iter()
            .map(|s| s.alias.clone().unwrap_or_else(|| s.expr.clone()))
            .collect()
    }
}

/// One filter resolved to the SQL expression it compares.
#[derive(Debug, Clone)]
pub struct FilterTerm<'a> {
    pub expr: String,
    pub condition: FilterCondition,
    pub value: &'a str,
    pub logical_op: LogicalOp,
}

/// Fold filters into one parenthesized predicate. Each filter after the first
/// is joined by its own logical operator; `None` when there are no filters.
pub fn fold_filters(terms: &[FilterTerm<'_>]) -> EngineResult<Option<Predicate>> {
    if terms.is_empty() {
        return Ok(None);
    }
    let mut sql = String::from("(");
    let mut params = Vec::with_capacity(terms.len());
    for (i, term) in terms.iter().enumerate() {
        if i > 0 {
            sql.push(' ');
            sql.push_str(term.logical_op.as_sql());
            sql.push(' ');
        }
        let expr = &term.expr;
        match term.condition {
            FilterCondition::Equals => {
                sql.push_str(&format!("{expr} = ?"));
                params.push(SqlValue::Text(term.value.to_string()));
            }
            FilterCondition::NotEquals => {
                sql.push_str(&format!("{expr} != ?"));
                params.push(SqlValue::Text(term.value.to_string()));
            }
            FilterCondition::Contains => {
                sql.push_str(&format!("{expr} LIKE ?"));
                params.push(SqlValue::Text(format!("%{}%", term.value)));
            }
            FilterCondition::NotContains => {
                sql.push_str(&format!("{expr} NOT LIKE ?"));
                params.push(SqlValue::Text(format!("%{}%", term.value)));
            }
            FilterCondition::GreaterThan | FilterCondition::LessThan => {
                let number: f64 = term.value.trim().parse().map_err(|_| {
                    EngineError::InvalidQuery(format!(
                        "'{}' is not a number for a numeric comparison",
                        term.value
                    ))
                })?;
                let op = if term.condition == FilterCondition::GreaterThan { ">" } else { "<" };
                sql.push_str(&format!("CAST({expr} AS REAL) {op} ?"));
                params.push(SqlValue::Real(number));
            }
        }
    }
    sql.push(')');
    Ok(Some(Predicate::new(sql, params)))
}
