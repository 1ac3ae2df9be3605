//! Dialect-free query fragments
//!
//! The persistence core describes every read and write with these types and
//! hands them to a query runner, which either evaluates them directly or
//! renders them for its store.

use crate::model::{EntityIdentity, EntityMetadata, Generation, Row, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Column reference; `alias` is `None` for single-table statements
    Column {
        alias: Option<String>,
        name: String,
    },
    Literal(Value),
    Compare {
        op: CompareOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Inclusive range test
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
    },
    /// String prefix test: `haystack` starts with `prefix`
    StartsWith {
        haystack: Box<Expr>,
        prefix: Box<Expr>,
    },
    In {
        expr: Box<Expr>,
        values: Vec<Value>,
    },
    IsNull(Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
    Case {
        when: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    /// Scalar sub-query: first column of the first row, null when empty
    Subquery(Box<SelectQuery>),
}

impl Expr {
    pub fn col(alias: &str, name: &str) -> Self {
        Expr::Column {
            alias: Some(alias.to_string()),
            name: name.to_string(),
        }
    }

    pub fn bare(name: &str) -> Self {
        Expr::Column {
            alias: None,
            name: name.to_string(),
        }
    }

    pub fn lit(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    pub fn compare(op: CompareOp, left: Expr, right: Expr) -> Self {
        Expr::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn eq(left: Expr, right: Expr) -> Self {
        Self::compare(CompareOp::Eq, left, right)
    }

    pub fn between(expr: Expr, low: Expr, high: Expr) -> Self {
        Expr::Between {
            expr: Box::new(expr),
            low: Box::new(low),
            high: Box::new(high),
        }
    }

    pub fn starts_with(haystack: Expr, prefix: Expr) -> Self {
        Expr::StartsWith {
            haystack: Box::new(haystack),
            prefix: Box::new(prefix),
        }
    }

    pub fn is_null(expr: Expr) -> Self {
        Expr::IsNull(Box::new(expr))
    }

    pub fn not(expr: Expr) -> Self {
        Expr::Not(Box::new(expr))
    }

    pub fn add(left: Expr, right: Expr) -> Self {
        Expr::Add(Box::new(left), Box::new(right))
    }

    pub fn case(when: Expr, then: Expr, otherwise: Expr) -> Self {
        Expr::Case {
            when: Box::new(when),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        }
    }

    pub fn subquery(query: SelectQuery) -> Self {
        Expr::Subquery(Box::new(query))
    }

    /// Conjunction that collapses single-element lists
    pub fn all(mut exprs: Vec<Expr>) -> Self {
        if exprs.len() == 1 {
            exprs.remove(0)
        } else {
            Expr::And(exprs)
        }
    }

    /// Disjunction that collapses single-element lists
    pub fn any(mut exprs: Vec<Expr>) -> Self {
        if exprs.len() == 1 {
            exprs.remove(0)
        } else {
            Expr::Or(exprs)
        }
    }
}

/// Equality on every primary column of `metadata`
pub fn identity_criteria(
    metadata: &EntityMetadata,
    identity: &EntityIdentity,
    alias: Option<&str>,
) -> Expr {
    let parts = metadata
        .primary_columns()
        .into_iter()
        .zip(identity.values())
        .map(|(column, value)| {
            let col = match alias {
                Some(alias) => Expr::col(alias, &column.storage),
                None => Expr::bare(&column.storage),
            };
            Expr::eq(col, Expr::Literal(value.clone()))
        })
        .collect();
    Expr::all(parts)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub table: String,
    pub alias: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub kind: JoinKind,
    pub table: TableRef,
    pub on: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    /// Every column of one alias, returned under bare column names
    All(String),
    /// Selected `(alias, column)` pairs, returned under bare column names
    Columns(Vec<(String, String)>),
    /// A single row with a `count` column
    Count,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub expr: Expr,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    pub from: TableRef,
    pub joins: Vec<Join>,
    pub filter: Option<Expr>,
    pub projection: Projection,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl SelectQuery {
    /// `SELECT alias.* FROM table alias`
    pub fn from(table: &str, alias: &str) -> Self {
        Self {
            from: TableRef {
                table: table.to_string(),
                alias: alias.to_string(),
            },
            joins: Vec::new(),
            filter: None,
            projection: Projection::All(alias.to_string()),
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    pub fn alias(&self) -> &str {
        &self.from.alias
    }

    pub fn inner_join(mut self, table: &str, alias: &str, on: Expr) -> Self {
        self.joins.push(Join {
            kind: JoinKind::Inner,
            table: TableRef {
                table: table.to_string(),
                alias: alias.to_string(),
            },
            on,
        });
        self
    }

    /// Add a filter, AND-ed with any existing one
    pub fn filter(mut self, expr: Expr) -> Self {
        self.filter = Some(match self.filter.take() {
            None => expr,
            Some(Expr::And(mut parts)) => {
                parts.push(expr);
                Expr::And(parts)
            }
            Some(existing) => Expr::And(vec![existing, expr]),
        });
        self
    }

    pub fn project(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    pub fn order_by(mut self, expr: Expr, descending: bool) -> Self {
        self.order_by.push(OrderBy { expr, descending });
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Same fragment projected to a row count
    pub fn into_count(mut self) -> Self {
        self.projection = Projection::Count;
        self.order_by.clear();
        self.limit = None;
        self.offset = None;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub column: String,
    pub value: Expr,
}

impl Assignment {
    pub fn new(column: impl Into<String>, value: Expr) -> Self {
        Self {
            column: column.into(),
            value,
        }
    }

    pub fn value(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, Expr::Literal(value.into()))
    }
}

/// A column the store fills on insert when no value is supplied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedColumn {
    pub column: String,
    pub generation: Generation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertStatement {
    pub table: String,
    pub values: Row,
    /// Store-generated columns to hand back (auto increment, defaults)
    pub returning: Vec<GeneratedColumn>,
}

impl InsertStatement {
    pub fn new(table: impl Into<String>, values: Row) -> Self {
        Self {
            table: table.into(),
            values,
            returning: Vec::new(),
        }
    }

    pub fn returning(mut self, column: impl Into<String>, generation: Generation) -> Self {
        self.returning.push(GeneratedColumn {
            column: column.into(),
            generation,
        });
        self
    }
}

/// Values produced by the store for an inserted row, by column
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertResult {
    pub generated: Row,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStatement {
    pub table: String,
    pub assignments: Vec<Assignment>,
    pub criteria: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStatement {
    pub table: String,
    pub criteria: Expr,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ColumnDescriptor, ColumnType, Generation};

    #[test]
    fn test_filter_chains_into_conjunction() {
        let query = SelectQuery::from("post", "p")
            .filter(Expr::eq(Expr::col("p", "a"), Expr::lit(1)))
            .filter(Expr::eq(Expr::col("p", "b"), Expr::lit(2)))
            .filter(Expr::eq(Expr::col("p", "c"), Expr::lit(3)));
        match query.filter {
            Some(Expr::And(parts)) => assert_eq!(parts.len(), 3),
            other => panic!("expected conjunction, got {:?}", other),
        }
    }

    #[test]
    fn test_identity_criteria_covers_composite_keys() {
        let meta = EntityMetadata::builder("Membership")
            .column(ColumnDescriptor::primary("group_id", ColumnType::Int, Generation::None))
            .column(ColumnDescriptor::primary("user_id", ColumnType::Int, Generation::None))
            .build();
        let identity = EntityIdentity::new(vec![Value::Int(1), Value::Int(2)]);
        let expr = identity_criteria(&meta, &identity, None);
        assert_eq!(
            expr,
            Expr::And(vec![
                Expr::eq(Expr::bare("group_id"), Expr::lit(1)),
                Expr::eq(Expr::bare("user_id"), Expr::lit(2)),
            ])
        );
    }

    #[test]
    fn test_into_count_drops_paging() {
        let query = SelectQuery::from("post", "p").limit(5).offset(10).into_count();
        assert_eq!(query.projection, Projection::Count);
        assert_eq!(query.limit, None);
        assert_eq!(query.offset, None);
    }
}
