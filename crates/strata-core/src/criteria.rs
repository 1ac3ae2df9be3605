//! Find criteria
//!
//! `FindInput` is the tagged input of repository lookups: either full
//! `FindOptions` or a bare `Condition`. Conditions name entity properties and
//! are translated to storage names against the entity metadata.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, StrataError};
use crate::model::{ColumnRole, EntityMetadata, Value};
use crate::query::{Expr, SelectQuery};

/// Property-based filter
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Every property equals its value; `Value::Null` matches null
    Equals(BTreeMap<String, Value>),
    And(Vec<Condition>),
    Or(Vec<Condition>),
}

impl Condition {
    pub fn eq(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::Equals(BTreeMap::from([(property.into(), value.into())]))
    }

    /// Add another equality, AND-ed with the existing ones
    pub fn and(self, property: impl Into<String>, value: impl Into<Value>) -> Self {
        match self {
            Condition::Equals(mut map) => {
                map.insert(property.into(), value.into());
                Condition::Equals(map)
            }
            other => Condition::And(vec![other, Condition::eq(property, value)]),
        }
    }

    /// A condition that constrains nothing
    pub fn is_empty(&self) -> bool {
        match self {
            Condition::Equals(map) => map.is_empty(),
            Condition::And(parts) | Condition::Or(parts) => parts.iter().all(Condition::is_empty),
        }
    }

    /// Translate to a predicate over `alias`
    ///
    /// Properties may name a column or an owning to-one relation with a single
    /// join column (matched against the related identity value).
    ///
    /// # Errors
    ///
    /// `UnknownProperty` when a property is neither.
    pub fn to_expr(&self, metadata: &EntityMetadata, alias: &str) -> Result<Expr> {
        match self {
            Condition::Equals(map) => {
                let mut parts = Vec::with_capacity(map.len());
                for (property, value) in map {
                    let column = Expr::col(alias, &storage_name(metadata, property)?);
                    parts.push(if value.is_null() {
                        Expr::is_null(column)
                    } else {
                        Expr::eq(column, Expr::Literal(value.clone()))
                    });
                }
                Ok(Expr::all(parts))
            }
            Condition::And(parts) => Ok(Expr::all(
                parts
                    .iter()
                    .filter(|p| !p.is_empty())
                    .map(|p| p.to_expr(metadata, alias))
                    .collect::<Result<Vec<_>>>()?,
            )),
            Condition::Or(parts) => Ok(Expr::any(
                parts
                    .iter()
                    .filter(|p| !p.is_empty())
                    .map(|p| p.to_expr(metadata, alias))
                    .collect::<Result<Vec<_>>>()?,
            )),
        }
    }
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Condition::Equals(map) => {
                let parts: Vec<String> = map
                    .iter()
                    .map(|(property, value)| match value {
                        Value::Text(text) => format!("{}: {:?}", property, text),
                        other => format!("{}: {}", property, other.to_plain_string()),
                    })
                    .collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
            Condition::And(parts) | Condition::Or(parts) => {
                let joiner = if matches!(self, Condition::And(_)) {
                    " AND "
                } else {
                    " OR "
                };
                let parts: Vec<String> = parts.iter().map(|p| format!("({})", p)).collect();
                f.write_str(&parts.join(joiner))
            }
        }
    }
}

fn storage_name(metadata: &EntityMetadata, property: &str) -> Result<String> {
    if let Some(column) = metadata.column(property) {
        return Ok(column.storage.clone());
    }
    match metadata.relation(property) {
        Some(relation) if relation.holds_foreign_key() && relation.join_columns.len() == 1 => {
            Ok(relation.join_columns[0].name.clone())
        }
        _ => Err(StrataError::UnknownProperty {
            target: metadata.target().to_string(),
            property: property.to_string(),
        }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub where_: Option<Condition>,
    pub order: Vec<(String, SortDirection)>,
    pub skip: Option<u64>,
    pub take: Option<u64>,
    /// Include soft-deleted rows
    pub with_deleted: bool,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn where_(mut self, condition: Condition) -> Self {
        self.where_ = Some(condition);
        self
    }

    pub fn order_by(mut self, property: impl Into<String>, direction: SortDirection) -> Self {
        self.order.push((property.into(), direction));
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn take(mut self, take: u64) -> Self {
        self.take = Some(take);
        self
    }

    pub fn with_deleted(mut self) -> Self {
        self.with_deleted = true;
        self
    }

    /// Select fragment over the entity table aliased by its table name
    ///
    /// Soft-deleted rows are excluded unless `with_deleted` is set.
    ///
    /// # Errors
    ///
    /// `UnknownProperty` for conditions or orderings naming unknown properties.
    pub fn to_query(&self, metadata: &EntityMetadata) -> Result<SelectQuery> {
        let alias = metadata.table();
        let mut query = SelectQuery::from(metadata.table(), alias);

        if let Some(condition) = self.where_.as_ref().filter(|c| !c.is_empty()) {
            query = query.filter(condition.to_expr(metadata, alias)?);
        }
        if !self.with_deleted {
            if let Some(column) = metadata.column_with_role(ColumnRole::DeleteDate) {
                query = query.filter(Expr::is_null(Expr::col(alias, &column.storage)));
            }
        }
        for (property, direction) in &self.order {
            let storage = storage_name(metadata, property)?;
            query = query.order_by(Expr::col(alias, &storage), *direction == SortDirection::Desc);
        }
        if let Some(skip) = self.skip {
            query = query.offset(skip);
        }
        if let Some(take) = self.take {
            query = query.limit(take);
        }
        Ok(query)
    }

    /// Text form of the filter for diagnostics
    pub fn describe(&self) -> String {
        match &self.where_ {
            Some(condition) => condition.to_string(),
            None => "{}".to_string(),
        }
    }
}

/// Tagged lookup input
#[derive(Debug, Clone, PartialEq)]
pub enum FindInput {
    Options(FindOptions),
    Where(Condition),
}

impl FindInput {
    pub fn into_options(self) -> FindOptions {
        match self {
            FindInput::Options(options) => options,
            FindInput::Where(condition) => FindOptions::new().where_(condition),
        }
    }
}

impl From<FindOptions> for FindInput {
    fn from(options: FindOptions) -> Self {
        FindInput::Options(options)
    }
}

impl From<Condition> for FindInput {
    fn from(condition: Condition) -> Self {
        FindInput::Where(condition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ColumnDescriptor, ColumnType, Generation, RelationDescriptor};

    fn post() -> EntityMetadata {
        EntityMetadata::builder("Post")
            .column(ColumnDescriptor::primary("id", ColumnType::Int, Generation::Increment))
            .column(ColumnDescriptor::new("title", ColumnType::Text).storage("post_title"))
            .column(
                ColumnDescriptor::new("deletedAt", ColumnType::Timestamp)
                    .storage("deleted_at")
                    .nullable()
                    .role(ColumnRole::DeleteDate),
            )
            .relation(RelationDescriptor::many_to_one("author", "User"))
            .build()
    }

    #[test]
    fn test_condition_maps_properties_to_storage() {
        let meta = post();
        let expr = Condition::eq("title", "cats").to_expr(&meta, "p").unwrap();
        assert_eq!(expr, Expr::eq(Expr::col("p", "post_title"), Expr::lit("cats")));
    }

    #[test]
    fn test_condition_on_relation_uses_join_column() {
        let meta = post();
        let expr = Condition::eq("author", 5).to_expr(&meta, "p").unwrap();
        assert_eq!(expr, Expr::eq(Expr::col("p", "author_id"), Expr::lit(5)));
    }

    #[test]
    fn test_unknown_property_is_rejected() {
        let meta = post();
        let err = Condition::eq("body", "x").to_expr(&meta, "p").unwrap_err();
        assert!(matches!(err, StrataError::UnknownProperty { property, .. } if property == "body"));
    }

    #[test]
    fn test_empty_conditions() {
        assert!(Condition::Equals(BTreeMap::new()).is_empty());
        assert!(Condition::And(vec![]).is_empty());
        assert!(!Condition::eq("id", 1).is_empty());
    }

    #[test]
    fn test_query_excludes_soft_deleted_by_default() {
        let meta = post();
        let query = FindOptions::new().to_query(&meta).unwrap();
        assert_eq!(
            query.filter,
            Some(Expr::is_null(Expr::col("post", "deleted_at")))
        );
        let query = FindOptions::new().with_deleted().to_query(&meta).unwrap();
        assert_eq!(query.filter, None);
    }

    #[test]
    fn test_paging_and_order() {
        let meta = post();
        let query = FindOptions::new()
            .order_by("title", SortDirection::Desc)
            .skip(2)
            .take(3)
            .to_query(&meta)
            .unwrap();
        assert_eq!(query.order_by.len(), 1);
        assert!(query.order_by[0].descending);
        assert_eq!(query.offset, Some(2));
        assert_eq!(query.limit, Some(3));
    }

    #[test]
    fn test_display_quotes_text() {
        let condition = Condition::eq("title", "How to buy a pig");
        assert_eq!(condition.to_string(), "{title: \"How to buy a pig\"}");
    }

    #[test]
    fn test_where_input_becomes_options() {
        let options = FindInput::from(Condition::eq("id", 1)).into_options();
        assert_eq!(options.where_, Some(Condition::eq("id", 1)));
    }
}
