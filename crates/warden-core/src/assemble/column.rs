//! Column expression resolution.
//!
//! A selected column may be a plain field, a function-wrapped field such as
//! `year(date_created)`, or a related-row count. Function names dispatch
//! through a pluggable per-dialect [`FunctionTable`]; the table maps names
//! to handlers that render the storage dialect's expression text. Unknown
//! names are a hard error, not a silent pass-through.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use warden_types::filter::strip_function;
use warden_types::schema::{FieldType, SchemaOverview};

use crate::error::{Error, Result};
use crate::relations::{get_relation, relation_kind, RelationKind};

/// A rendered column expression plus its output alias.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnExpr {
    /// Dialect expression text.
    pub sql: String,
    /// Output alias; defaults to the requested field reference.
    pub alias: String,
}

/// Related-side details handed to aggregate handlers.
#[derive(Debug, Clone, Copy)]
pub struct RelatedArgs<'a> {
    /// The "many" collection being aggregated.
    pub collection: &'a str,
    /// Foreign key on the many side pointing at the parent.
    pub foreign_key: &'a str,
    /// Primary key of the parent table.
    pub parent_primary_key: &'a str,
}

/// Arguments a function handler renders from.
#[derive(Debug, Clone, Copy)]
pub struct FunctionArgs<'a> {
    /// Table the parent row comes from.
    pub table: &'a str,
    /// Bare field name inside the wrapper.
    pub field: &'a str,
    /// Set when the wrapped field is a one-to-many alias (`count`).
    pub related: Option<RelatedArgs<'a>>,
}

/// Handler rendering one function's dialect expression.
pub type FunctionHandler = fn(&FunctionArgs<'_>) -> String;

/// Dialect map from function name to rendering handler.
pub struct FunctionTable {
    handlers: HashMap<String, FunctionHandler>,
}

impl FunctionTable {
    /// An empty table; every function name is unknown.
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register (or replace) a handler for a function name.
    pub fn register(mut self, name: impl Into<String>, handler: FunctionHandler) -> Self {
        self.handlers.insert(name.into(), handler);
        self
    }

    /// Look up a handler by name.
    pub fn get(&self, name: &str) -> Option<FunctionHandler> {
        self.handlers.get(name).copied()
    }
}

impl Default for FunctionTable {
    fn default() -> Self {
        default_dialect()
    }
}

/// The stock ANSI-flavored dialect table.
pub fn default_dialect() -> FunctionTable {
    fn date_part(part: &str, args: &FunctionArgs<'_>) -> String {
        format!("EXTRACT({part} FROM \"{}\".\"{}\")", args.table, args.field)
    }

    FunctionTable::empty()
        .register("year", |args| date_part("YEAR", args))
        .register("month", |args| date_part("MONTH", args))
        .register("week", |args| date_part("WEEK", args))
        .register("day", |args| date_part("DAY", args))
        .register("weekday", |args| date_part("DOW", args))
        .register("hour", |args| date_part("HOUR", args))
        .register("minute", |args| date_part("MINUTE", args))
        .register("second", |args| date_part("SECOND", args))
        .register("json", |args| {
            format!("JSON_EXTRACT(\"{}\".\"{}\", '$')", args.table, args.field)
        })
        .register("count", |args| {
            // Validation guarantees related is present for count.
            match args.related {
                Some(rel) => format!(
                    "(SELECT COUNT(*) FROM \"{}\" WHERE \"{}\".\"{}\" = \"{}\".\"{}\")",
                    rel.collection, rel.collection, rel.foreign_key, args.table, rel.parent_primary_key
                ),
                None => String::new(),
            }
        })
}

/// Resolve a column reference into a dialect expression.
///
/// Plain fields render as `"table"."field"`. Function wrappers are type
/// checked against the schema before dispatch: `json` requires a JSON
/// field, the date parts require a date or timestamp field, and `count`
/// requires a one-to-many alias.
pub fn get_column(
    collection: &str,
    field_ref: &str,
    alias: Option<&str>,
    schema: &SchemaOverview,
    table: &str,
    functions: &FunctionTable,
) -> Result<ColumnExpr> {
    let (wrapper, field) = strip_function(field_ref);
    let alias = alias.unwrap_or(field_ref).to_owned();

    let Some(name) = wrapper else {
        return Ok(ColumnExpr {
            sql: format!("\"{table}\".\"{field}\""),
            alias,
        });
    };

    let handler = functions
        .get(name)
        .ok_or_else(|| Error::InvalidQuery(format!("invalid query function: {name}")))?;

    let related = validate_function_target(collection, name, field, schema)?;
    let args = FunctionArgs {
        table,
        field,
        related,
    };
    Ok(ColumnExpr {
        sql: handler(&args),
        alias,
    })
}

const DATE_PART_FUNCTIONS: &[&str] = &[
    "year", "month", "week", "day", "weekday", "hour", "minute", "second",
];

/// Check that a function applies to its target field's type, resolving the
/// related side for aggregates.
fn validate_function_target<'a>(
    collection: &str,
    name: &str,
    field: &str,
    schema: &'a SchemaOverview,
) -> Result<Option<RelatedArgs<'a>>> {
    if name == "count" {
        let relation = get_relation(schema, collection, field)
            .filter(|rel| relation_kind(rel, collection, field) == Some(RelationKind::Many))
            .ok_or_else(|| {
                Error::InvalidQuery(format!(
                    "count requires a one-to-many field, {collection}.{field} is not one"
                ))
            })?;
        let parent_primary_key = schema
            .primary_key(collection)
            .ok_or_else(|| Error::CollectionNotFound(collection.to_owned()))?;
        return Ok(Some(RelatedArgs {
            collection: relation.collection.as_str(),
            foreign_key: relation.field.as_str(),
            parent_primary_key,
        }));
    }

    let overview = schema
        .collection(collection)
        .ok_or_else(|| Error::CollectionNotFound(collection.to_owned()))?;
    let field_type = overview
        .field(field)
        .map(|f| f.field_type)
        .ok_or_else(|| Error::FieldNotFound {
            collection: collection.to_owned(),
            field: field.to_owned(),
        })?;

    if name == "json" && field_type != FieldType::Json {
        return Err(Error::InvalidQuery(format!(
            "json function requires a JSON field, {collection}.{field} is not one"
        )));
    }
    if DATE_PART_FUNCTIONS.contains(&name) && !field_type.is_datetime() {
        return Err(Error::InvalidQuery(format!(
            "{name} requires a date or timestamp field, {collection}.{field} is not one"
        )));
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_types::schema::{CollectionOverview, FieldOverview, FieldType, Relation};

    fn schema() -> SchemaOverview {
        SchemaOverview::new()
            .with_collection(
                CollectionOverview::new("articles", "id")
                    .with_field(FieldOverview::new("title", FieldType::String))
                    .with_field(FieldOverview::new("date_created", FieldType::Timestamp))
                    .with_field(FieldOverview::new("meta", FieldType::Json))
                    .with_field(FieldOverview::new("links", FieldType::Alias)),
            )
            .with_collection(
                CollectionOverview::new("links", "id")
                    .with_field(FieldOverview::new("article", FieldType::BigInteger)),
            )
            .with_relation(Relation::many_to_one("links", "article", "articles").with_one_field("links"))
    }

    fn resolve(field_ref: &str) -> Result<ColumnExpr> {
        get_column(
            "articles",
            field_ref,
            None,
            &schema(),
            "articles",
            &default_dialect(),
        )
    }

    #[test]
    fn test_plain_field() {
        let col = resolve("title").unwrap();
        assert_eq!(col.sql, "\"articles\".\"title\"");
        assert_eq!(col.alias, "title");
    }

    #[test]
    fn test_date_part_over_timestamp() {
        let col = resolve("year(date_created)").unwrap();
        assert_eq!(col.sql, "EXTRACT(YEAR FROM \"articles\".\"date_created\")");
        assert_eq!(col.alias, "year(date_created)");
    }

    #[test]
    fn test_date_part_over_string_rejected() {
        assert!(matches!(
            resolve("month(title)"),
            Err(Error::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_json_requires_json_field() {
        assert!(resolve("json(meta)").is_ok());
        assert!(matches!(resolve("json(title)"), Err(Error::InvalidQuery(_))));
    }

    #[test]
    fn test_unknown_function_rejected() {
        assert!(matches!(
            resolve("median(date_created)"),
            Err(Error::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_count_needs_one_to_many_alias() {
        let col = resolve("count(links)").unwrap();
        assert_eq!(
            col.sql,
            "(SELECT COUNT(*) FROM \"links\" WHERE \"links\".\"article\" = \"articles\".\"id\")"
        );

        // A scalar field cannot be counted.
        assert!(matches!(
            resolve("count(title)"),
            Err(Error::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_explicit_alias_wins() {
        let col = get_column(
            "articles",
            "title",
            Some("headline"),
            &schema(),
            "articles",
            &default_dialect(),
        )
        .unwrap();
        assert_eq!(col.alias, "headline");
    }

    #[test]
    fn test_unknown_field_is_existence_error() {
        assert!(matches!(
            resolve("year(ghost)"),
            Err(Error::FieldNotFound { .. })
        ));
    }
}
