//! Query AST to SQLite SQL
//!
//! Identifiers are double-quoted and every literal becomes a positional `?`
//! parameter, except `NULL` which is inlined.

use chrono::SecondsFormat;
use rusqlite::types::{Value as SqlValue, ValueRef};
use strata_core::model::Value;
use strata_core::query::{
    CompareOp, DeleteStatement, Expr, InsertStatement, JoinKind, Projection, SelectQuery,
    UpdateStatement,
};

#[derive(Debug, Default, PartialEq)]
pub(crate) struct Rendered {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

pub(crate) fn select(query: &SelectQuery) -> Rendered {
    let mut out = Rendered::default();
    out.select(query);
    out
}

pub(crate) fn insert(statement: &InsertStatement) -> Rendered {
    let mut out = Rendered::default();
    out.sql.push_str("INSERT INTO ");
    out.ident(&statement.table);
    if statement.values.is_empty() {
        out.sql.push_str(" DEFAULT VALUES");
    } else {
        out.sql.push_str(" (");
        for (i, column) in statement.values.keys().enumerate() {
            if i > 0 {
                out.sql.push_str(", ");
            }
            out.ident(column);
        }
        out.sql.push_str(") VALUES (");
        for (i, value) in statement.values.values().enumerate() {
            if i > 0 {
                out.sql.push_str(", ");
            }
            out.param(value);
        }
        out.sql.push(')');
    }
    if !statement.returning.is_empty() {
        out.sql.push_str(" RETURNING ");
        for (i, column) in statement.returning.iter().enumerate() {
            if i > 0 {
                out.sql.push_str(", ");
            }
            out.ident(&column.column);
        }
    }
    out
}

pub(crate) fn update(statement: &UpdateStatement) -> Rendered {
    let mut out = Rendered::default();
    out.sql.push_str("UPDATE ");
    out.ident(&statement.table);
    out.sql.push_str(" SET ");
    for (i, assignment) in statement.assignments.iter().enumerate() {
        if i > 0 {
            out.sql.push_str(", ");
        }
        out.ident(&assignment.column);
        out.sql.push_str(" = ");
        out.expr(&assignment.value);
    }
    out.sql.push_str(" WHERE ");
    out.expr(&statement.criteria);
    out
}

pub(crate) fn delete(statement: &DeleteStatement) -> Rendered {
    let mut out = Rendered::default();
    out.sql.push_str("DELETE FROM ");
    out.ident(&statement.table);
    out.sql.push_str(" WHERE ");
    out.expr(&statement.criteria);
    out
}

pub(crate) fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(v) => SqlValue::Integer(i64::from(*v)),
        Value::Int(v) => SqlValue::Integer(*v),
        Value::Float(v) => SqlValue::Real(*v),
        Value::Uuid(v) => SqlValue::Text(v.to_string()),
        Value::Timestamp(v) => SqlValue::Text(v.to_rfc3339_opts(SecondsFormat::Micros, true)),
        Value::Text(v) => SqlValue::Text(v.clone()),
        Value::Json(v) => SqlValue::Text(v.to_string()),
    }
}

/// Raw stored value; callers coerce it with the column type
pub(crate) fn from_sql_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Int(v),
        ValueRef::Real(v) => Value::Float(v),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Value::Text(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

impl Rendered {
    fn ident(&mut self, name: &str) {
        self.sql.push('"');
        self.sql.push_str(&name.replace('"', "\"\""));
        self.sql.push('"');
    }

    fn param(&mut self, value: &Value) {
        if value.is_null() {
            self.sql.push_str("NULL");
        } else {
            self.sql.push('?');
            self.params.push(to_sql_value(value));
        }
    }

    fn list(&mut self, parts: &[Expr], separator: &str, empty: &str) {
        if parts.is_empty() {
            self.sql.push_str(empty);
            return;
        }
        self.sql.push('(');
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                self.sql.push_str(separator);
            }
            self.expr(part);
        }
        self.sql.push(')');
    }

    fn expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Column { alias, name } => {
                if let Some(alias) = alias {
                    self.ident(alias);
                    self.sql.push('.');
                }
                self.ident(name);
            }
            Expr::Literal(value) => self.param(value),
            Expr::Compare { op, left, right } => {
                self.sql.push('(');
                self.expr(left);
                self.sql.push_str(match op {
                    CompareOp::Eq => " = ",
                    CompareOp::NotEq => " <> ",
                    CompareOp::Lt => " < ",
                    CompareOp::Lte => " <= ",
                    CompareOp::Gt => " > ",
                    CompareOp::Gte => " >= ",
                });
                self.expr(right);
                self.sql.push(')');
            }
            Expr::Between { expr, low, high } => {
                self.sql.push('(');
                self.expr(expr);
                self.sql.push_str(" BETWEEN ");
                self.expr(low);
                self.sql.push_str(" AND ");
                self.expr(high);
                self.sql.push(')');
            }
            Expr::StartsWith { haystack, prefix } => {
                self.sql.push_str("(substr(");
                self.expr(haystack);
                self.sql.push_str(", 1, length(");
                self.expr(prefix);
                self.sql.push_str(")) = ");
                self.expr(prefix);
                self.sql.push(')');
            }
            Expr::In { expr, values } => {
                if values.is_empty() {
                    self.sql.push_str("(1 = 0)");
                    return;
                }
                self.sql.push('(');
                self.expr(expr);
                self.sql.push_str(" IN (");
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        self.sql.push_str(", ");
                    }
                    self.param(value);
                }
                self.sql.push_str("))");
            }
            Expr::IsNull(expr) => {
                self.sql.push('(');
                self.expr(expr);
                self.sql.push_str(" IS NULL)");
            }
            Expr::And(parts) => self.list(parts, " AND ", "1"),
            Expr::Or(parts) => self.list(parts, " OR ", "0"),
            Expr::Not(expr) => {
                self.sql.push_str("(NOT ");
                self.expr(expr);
                self.sql.push(')');
            }
            Expr::Add(left, right) => {
                self.sql.push('(');
                self.expr(left);
                self.sql.push_str(" + ");
                self.expr(right);
                self.sql.push(')');
            }
            Expr::Case {
                when,
                then,
                otherwise,
            } => {
                self.sql.push_str("(CASE WHEN ");
                self.expr(when);
                self.sql.push_str(" THEN ");
                self.expr(then);
                self.sql.push_str(" ELSE ");
                self.expr(otherwise);
                self.sql.push_str(" END)");
            }
            Expr::Subquery(query) => {
                self.sql.push('(');
                self.select(query);
                self.sql.push(')');
            }
        }
    }

    fn select(&mut self, query: &SelectQuery) {
        self.sql.push_str("SELECT ");
        match &query.projection {
            Projection::All(alias) => {
                self.ident(alias);
                self.sql.push_str(".*");
            }
            Projection::Columns(columns) => {
                for (i, (alias, column)) in columns.iter().enumerate() {
                    if i > 0 {
                        self.sql.push_str(", ");
                    }
                    self.ident(alias);
                    self.sql.push('.');
                    self.ident(column);
                    self.sql.push_str(" AS ");
                    self.ident(column);
                }
            }
            Projection::Count => self.sql.push_str("COUNT(*) AS \"count\""),
        }

        self.sql.push_str(" FROM ");
        self.ident(&query.from.table);
        self.sql.push(' ');
        self.ident(&query.from.alias);

        for join in &query.joins {
            self.sql.push_str(match join.kind {
                JoinKind::Inner => " INNER JOIN ",
                JoinKind::Left => " LEFT JOIN ",
            });
            self.ident(&join.table.table);
            self.sql.push(' ');
            self.ident(&join.table.alias);
            self.sql.push_str(" ON ");
            self.expr(&join.on);
        }

        if let Some(filter) = &query.filter {
            self.sql.push_str(" WHERE ");
            self.expr(filter);
        }

        for (i, order) in query.order_by.iter().enumerate() {
            self.sql.push_str(if i == 0 { " ORDER BY " } else { ", " });
            self.expr(&order.expr);
            self.sql
                .push_str(if order.descending { " DESC" } else { " ASC" });
        }

        match (query.limit, query.offset) {
            (Some(limit), offset) => {
                self.sql.push_str(&format!(" LIMIT {}", limit));
                if let Some(offset) = offset {
                    self.sql.push_str(&format!(" OFFSET {}", offset));
                }
            }
            (None, Some(offset)) => self.sql.push_str(&format!(" LIMIT -1 OFFSET {}", offset)),
            (None, None) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::model::{Generation, Row};
    use strata_core::query::Assignment;

    #[test]
    fn test_select_with_join_filter_and_paging() {
        let query = SelectQuery::from("category", "treeEntity")
            .inner_join(
                "category_closure",
                "treeClosure",
                Expr::eq(
                    Expr::col("treeClosure", "descendant_id"),
                    Expr::col("treeEntity", "id"),
                ),
            )
            .filter(Expr::eq(Expr::col("treeClosure", "ancestor_id"), Expr::lit(7)))
            .order_by(Expr::col("treeEntity", "id"), false)
            .offset(5);

        let rendered = select(&query);

        assert_eq!(
            rendered.sql,
            "SELECT \"treeEntity\".* FROM \"category\" \"treeEntity\" \
             INNER JOIN \"category_closure\" \"treeClosure\" \
             ON (\"treeClosure\".\"descendant_id\" = \"treeEntity\".\"id\") \
             WHERE (\"treeClosure\".\"ancestor_id\" = ?) \
             ORDER BY \"treeEntity\".\"id\" ASC LIMIT -1 OFFSET 5"
        );
        assert_eq!(rendered.params, vec![SqlValue::Integer(7)]);
    }

    #[test]
    fn test_empty_boolean_lists() {
        let query = SelectQuery::from("post", "post")
            .filter(Expr::Or(vec![]))
            .into_count();
        let rendered = select(&query);
        assert_eq!(
            rendered.sql,
            "SELECT COUNT(*) AS \"count\" FROM \"post\" \"post\" WHERE 0"
        );

        let in_list = Expr::In {
            expr: Box::new(Expr::bare("id")),
            values: vec![],
        };
        let mut out = Rendered::default();
        out.expr(&in_list);
        assert_eq!(out.sql, "(1 = 0)");
    }

    #[test]
    fn test_prefix_match_repeats_prefix() {
        let mut out = Rendered::default();
        out.expr(&Expr::starts_with(Expr::bare("mpath"), Expr::lit("1.2.")));
        assert_eq!(out.sql, "(substr(\"mpath\", 1, length(?)) = ?)");
        assert_eq!(out.params.len(), 2);
    }

    #[test]
    fn test_insert_returning_generated_columns() {
        let values: Row = [("title".to_string(), Value::from("Hello"))].into();
        let statement = InsertStatement::new("post", values)
            .returning("id", Generation::Increment)
            .returning("created_at", Generation::Custom("CURRENT_TIMESTAMP".to_string()));

        let rendered = insert(&statement);

        assert_eq!(
            rendered.sql,
            "INSERT INTO \"post\" (\"title\") VALUES (?) RETURNING \"id\", \"created_at\""
        );
        assert_eq!(rendered.params, vec![SqlValue::Text("Hello".to_string())]);
    }

    #[test]
    fn test_insert_without_values_uses_defaults() {
        let rendered = insert(&InsertStatement::new("counter", Row::new()));
        assert_eq!(rendered.sql, "INSERT INTO \"counter\" DEFAULT VALUES");
    }

    #[test]
    fn test_update_and_delete() {
        let statement = UpdateStatement {
            table: "post".to_string(),
            assignments: vec![
                Assignment::value("title", "New"),
                Assignment::new("version", Expr::add(Expr::bare("version"), Expr::lit(1))),
            ],
            criteria: Expr::eq(Expr::bare("id"), Expr::lit(3)),
        };
        assert_eq!(
            update(&statement).sql,
            "UPDATE \"post\" SET \"title\" = ?, \"version\" = (\"version\" + ?) WHERE (\"id\" = ?)"
        );

        let statement = DeleteStatement {
            table: "post".to_string(),
            criteria: Expr::is_null(Expr::bare("deleted_at")),
        };
        assert_eq!(
            delete(&statement).sql,
            "DELETE FROM \"post\" WHERE (\"deleted_at\" IS NULL)"
        );
    }

    #[test]
    fn test_value_mapping() {
        assert_eq!(to_sql_value(&Value::Bool(true)), SqlValue::Integer(1));
        assert_eq!(to_sql_value(&Value::Null), SqlValue::Null);
        assert_eq!(
            from_sql_value(ValueRef::Text(b"abc")),
            Value::Text("abc".to_string())
        );
        assert_eq!(from_sql_value(ValueRef::Integer(4)), Value::Int(4));
    }
}
