//! Query AST evaluation over in-memory tables
//!
//! SQL three-valued logic is kept: comparisons involving null yield null and
//! filters only keep rows whose predicate is true.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::Utc;
use strata_core::errors::{Result, StrataError};
use strata_core::model::{Generation, Row, Value};
use strata_core::query::{
    CompareOp, DeleteStatement, Expr, InsertResult, InsertStatement, JoinKind, Projection,
    SelectQuery, UpdateStatement,
};
use uuid::Uuid;

static EMPTY_ROW: Row = Row::new();

#[derive(Debug, Clone, Default)]
pub(crate) struct Table {
    pub rows: Vec<Row>,
    /// Last value handed out per auto-increment column
    pub counters: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Database {
    pub tables: BTreeMap<String, Table>,
}

/// Rows bound to their aliases for one candidate result row
type Scope<'a> = Vec<(&'a str, &'a Row)>;

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(v) => *v,
        Value::Int(v) => *v != 0,
        _ => false,
    }
}

impl Database {
    fn rows(&self, table: &str) -> &[Row] {
        self.tables
            .get(table)
            .map(|t| t.rows.as_slice())
            .unwrap_or(&[])
    }

    pub fn select<'a>(&'a self, query: &'a SelectQuery) -> Result<Vec<Row>> {
        let mut scopes: Vec<Scope<'a>> = self
            .rows(&query.from.table)
            .iter()
            .map(|row| vec![(query.from.alias.as_str(), row)])
            .collect();

        for join in &query.joins {
            let rows = self.rows(&join.table.table);
            let mut joined = Vec::new();
            for scope in scopes {
                let mut matched = false;
                for row in rows {
                    let mut candidate = scope.clone();
                    candidate.push((join.table.alias.as_str(), row));
                    if truthy(&self.eval(&candidate, &join.on)?) {
                        matched = true;
                        joined.push(candidate);
                    }
                }
                if !matched && join.kind == JoinKind::Left {
                    let mut candidate = scope;
                    candidate.push((join.table.alias.as_str(), &EMPTY_ROW));
                    joined.push(candidate);
                }
            }
            scopes = joined;
        }

        if let Some(filter) = &query.filter {
            let mut kept = Vec::with_capacity(scopes.len());
            for scope in scopes {
                if truthy(&self.eval(&scope, filter)?) {
                    kept.push(scope);
                }
            }
            scopes = kept;
        }

        if query.projection == Projection::Count {
            let count = Value::Int(scopes.len() as i64);
            return Ok(vec![Row::from([("count".to_string(), count)])]);
        }

        if !query.order_by.is_empty() {
            let mut keyed = Vec::with_capacity(scopes.len());
            for scope in scopes {
                let keys = query
                    .order_by
                    .iter()
                    .map(|order| self.eval(&scope, &order.expr))
                    .collect::<Result<Vec<_>>>()?;
                keyed.push((keys, scope));
            }
            keyed.sort_by(|(a, _), (b, _)| {
                for ((left, right), order) in a.iter().zip(b).zip(&query.order_by) {
                    let ordering = if order.descending {
                        right.cmp(left)
                    } else {
                        left.cmp(right)
                    };
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                Ordering::Equal
            });
            scopes = keyed.into_iter().map(|(_, scope)| scope).collect();
        }

        let offset = query.offset.unwrap_or(0) as usize;
        let limit = query.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        scopes
            .iter()
            .skip(offset)
            .take(limit)
            .map(|scope| project(scope, &query.projection))
            .collect()
    }

    pub fn insert(&mut self, statement: &InsertStatement) -> Result<InsertResult> {
        let table = self.tables.entry(statement.table.clone()).or_default();
        let mut row = statement.values.clone();
        let mut generated = Row::new();

        for column in &statement.returning {
            let value = match row.get(&column.column) {
                Some(value) if !value.is_null() => value.clone(),
                _ => {
                    let value = match &column.generation {
                        Generation::Increment => {
                            let highest = table
                                .rows
                                .iter()
                                .filter_map(|r| r.get(&column.column).and_then(Value::as_i64))
                                .max()
                                .unwrap_or(0);
                            let counter = table.counters.entry(column.column.clone()).or_insert(0);
                            *counter = (*counter).max(highest) + 1;
                            Value::Int(*counter)
                        }
                        Generation::Uuid => Value::Uuid(Uuid::new_v4()),
                        Generation::Custom(expression) => default_value(expression),
                        Generation::None => Value::Null,
                    };
                    row.insert(column.column.clone(), value.clone());
                    value
                }
            };
            generated.insert(column.column.clone(), value);
        }

        table.rows.push(row);
        Ok(InsertResult { generated })
    }

    pub fn update(&mut self, statement: &UpdateStatement) -> Result<u64> {
        let mut pending = Vec::new();
        for (index, row) in self.rows(&statement.table).iter().enumerate() {
            let scope = vec![(statement.table.as_str(), row)];
            if !truthy(&self.eval(&scope, &statement.criteria)?) {
                continue;
            }
            let values = statement
                .assignments
                .iter()
                .map(|a| Ok((a.column.clone(), self.eval(&scope, &a.value)?)))
                .collect::<Result<Vec<_>>>()?;
            pending.push((index, values));
        }

        let affected = pending.len() as u64;
        if let Some(table) = self.tables.get_mut(&statement.table) {
            for (index, values) in pending {
                table.rows[index].extend(values);
            }
        }
        Ok(affected)
    }

    pub fn delete(&mut self, statement: &DeleteStatement) -> Result<u64> {
        let mut keep = Vec::new();
        for row in self.rows(&statement.table) {
            let scope = vec![(statement.table.as_str(), row)];
            keep.push(!truthy(&self.eval(&scope, &statement.criteria)?));
        }

        let affected = keep.iter().filter(|k| !**k).count() as u64;
        if let Some(table) = self.tables.get_mut(&statement.table) {
            let mut flags = keep.into_iter();
            table.rows.retain(|_| flags.next().unwrap_or(true));
        }
        Ok(affected)
    }

    fn eval(&self, scope: &[(&str, &Row)], expr: &Expr) -> Result<Value> {
        Ok(match expr {
            Expr::Column { alias, name } => {
                let row = match alias {
                    Some(alias) => scope.iter().find(|(a, _)| a == alias),
                    None => scope.first(),
                };
                match row {
                    Some((_, row)) => row.get(name).cloned().unwrap_or(Value::Null),
                    None => {
                        return Err(StrataError::Internal {
                            message: format!("unknown alias {:?} for column {}", alias, name),
                        })
                    }
                }
            }
            Expr::Literal(value) => value.clone(),
            Expr::Compare { op, left, right } => {
                compare(*op, self.eval(scope, left)?, self.eval(scope, right)?)
            }
            Expr::Between { expr, low, high } => {
                let value = self.eval(scope, expr)?;
                let low = self.eval(scope, low)?;
                let high = self.eval(scope, high)?;
                if value.is_null() || low.is_null() || high.is_null() {
                    Value::Null
                } else {
                    Value::Bool(low <= value && value <= high)
                }
            }
            Expr::StartsWith { haystack, prefix } => {
                let haystack = self.eval(scope, haystack)?;
                let prefix = self.eval(scope, prefix)?;
                if haystack.is_null() || prefix.is_null() {
                    Value::Null
                } else {
                    Value::Bool(
                        haystack
                            .to_plain_string()
                            .starts_with(&prefix.to_plain_string()),
                    )
                }
            }
            Expr::In { expr, values } => {
                let value = self.eval(scope, expr)?;
                if value.is_null() {
                    Value::Null
                } else {
                    Value::Bool(values.contains(&value))
                }
            }
            Expr::IsNull(expr) => Value::Bool(self.eval(scope, expr)?.is_null()),
            Expr::And(parts) => {
                let mut unknown = false;
                for part in parts {
                    let value = self.eval(scope, part)?;
                    if value.is_null() {
                        unknown = true;
                    } else if !truthy(&value) {
                        return Ok(Value::Bool(false));
                    }
                }
                if unknown {
                    Value::Null
                } else {
                    Value::Bool(true)
                }
            }
            Expr::Or(parts) => {
                let mut unknown = false;
                for part in parts {
                    let value = self.eval(scope, part)?;
                    if value.is_null() {
                        unknown = true;
                    } else if truthy(&value) {
                        return Ok(Value::Bool(true));
                    }
                }
                if unknown {
                    Value::Null
                } else {
                    Value::Bool(false)
                }
            }
            Expr::Not(expr) => match self.eval(scope, expr)? {
                Value::Null => Value::Null,
                value => Value::Bool(!truthy(&value)),
            },
            Expr::Add(left, right) => add(self.eval(scope, left)?, self.eval(scope, right)?),
            Expr::Case {
                when,
                then,
                otherwise,
            } => {
                if truthy(&self.eval(scope, when)?) {
                    self.eval(scope, then)?
                } else {
                    self.eval(scope, otherwise)?
                }
            }
            Expr::Subquery(query) => self
                .select(query)?
                .first()
                .and_then(|row| row.values().next().cloned())
                .unwrap_or(Value::Null),
        })
    }
}

fn project(scope: &[(&str, &Row)], projection: &Projection) -> Result<Row> {
    let lookup = |alias: &str| {
        scope
            .iter()
            .find(|(a, _)| *a == alias)
            .map(|(_, row)| *row)
            .ok_or_else(|| StrataError::Internal {
                message: format!("unknown alias {} in projection", alias),
            })
    };
    match projection {
        Projection::All(alias) => Ok(lookup(alias)?.clone()),
        Projection::Columns(columns) => {
            let mut row = Row::new();
            for (alias, column) in columns {
                let value = lookup(alias)?.get(column).cloned().unwrap_or(Value::Null);
                row.insert(column.clone(), value);
            }
            Ok(row)
        }
        Projection::Count => Ok(Row::new()),
    }
}

fn compare(op: CompareOp, left: Value, right: Value) -> Value {
    if left.is_null() || right.is_null() {
        return Value::Null;
    }
    let ordering = left.cmp(&right);
    Value::Bool(match op {
        CompareOp::Eq => ordering == Ordering::Equal,
        CompareOp::NotEq => ordering != Ordering::Equal,
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::Lte => ordering != Ordering::Greater,
        CompareOp::Gt => ordering == Ordering::Greater,
        CompareOp::Gte => ordering != Ordering::Less,
    })
}

fn add(left: Value, right: Value) -> Value {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => a.checked_add(b).map(Value::Int).unwrap_or(Value::Null),
        (Value::Float(a), Value::Float(b)) => Value::Float(a + b),
        (Value::Int(a), Value::Float(b)) => Value::Float(a as f64 + b),
        (Value::Float(a), Value::Int(b)) => Value::Float(a + b as f64),
        _ => Value::Null,
    }
}

/// Value of a store-side default expression
fn default_value(expression: &str) -> Value {
    match expression.trim().to_ascii_lowercase().as_str() {
        "current_timestamp" | "now()" => Value::Timestamp(Utc::now()),
        "uuid()" | "gen_random_uuid()" => Value::Uuid(Uuid::new_v4()),
        "null" => Value::Null,
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        other => match other.parse::<i64>() {
            Ok(v) => Value::Int(v),
            Err(_) => Value::Text(expression.trim().trim_matches('\'').to_string()),
        },
    }
}
