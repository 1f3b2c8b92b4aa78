//! Filter-operator translation.
//!
//! One condition leaf (`field`, operator, raw value) becomes a [`Predicate`]
//! the relational layer can render. Translation is where value coercion
//! lives: numeric fields coerce string operands element-wise, `Undefined`
//! operands are dropped from bind lists, null equality rewrites to
//! `IS NULL`, and `count(alias)` references rewrite to a correlated count
//! before the operator applies.

use serde::{Deserialize, Serialize};
use warden_types::filter::{strip_function, FilterOperator};
use warden_types::schema::{FieldType, SchemaOverview};
use warden_types::value::Value;

use crate::error::{Error, Result};
use crate::relations::{get_relation, relation_kind, RelationKind};

/// Scalar comparison operators surviving translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `<>`
    Neq,
    /// `>`
    Gt,
    /// `>=`
    Gte,
    /// `<`
    Lt,
    /// `<=`
    Lte,
}

/// A translated predicate over one parent row. Serializable so it can be
/// shipped to an out-of-process relational layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    /// Scalar comparison against a bound value.
    Compare {
        /// Column reference (may be function-wrapped).
        column: String,
        /// Comparison operator.
        op: CompareOp,
        /// Bound value, already coerced.
        value: Value,
    },
    /// Membership in a bind list. The list may be empty, which matches
    /// nothing; that is legal, not an error.
    In {
        /// Column reference.
        column: String,
        /// Bind list, `Undefined` entries dropped.
        values: Vec<Value>,
        /// `NOT IN` when set.
        negated: bool,
    },
    /// Null check.
    IsNull {
        /// Column reference.
        column: String,
        /// `IS NOT NULL` when set.
        negated: bool,
    },
    /// Inclusive range check.
    Between {
        /// Column reference.
        column: String,
        /// Lower bound.
        low: Value,
        /// Upper bound.
        high: Value,
        /// `NOT BETWEEN` when set.
        negated: bool,
    },
    /// Pattern match.
    Like {
        /// Column reference.
        column: String,
        /// SQL LIKE pattern.
        pattern: String,
        /// `NOT LIKE` when set.
        negated: bool,
    },
    /// Disjunction.
    Or(Vec<Predicate>),
    /// Conjunction.
    And(Vec<Predicate>),
    /// Correlated count over a one-to-many relation, compared to a value.
    RelatedCount {
        /// The "many" collection being counted.
        collection: String,
        /// Foreign key on the many side.
        foreign_key: String,
        /// Primary key of the parent table.
        parent_primary_key: String,
        /// Comparison applied to the count.
        op: CompareOp,
        /// Bound count value.
        value: Value,
    },
}

/// Translate one filter condition into a predicate.
pub fn apply_operator(
    collection: &str,
    field_ref: &str,
    operator: FilterOperator,
    value: &Value,
    schema: &SchemaOverview,
) -> Result<Predicate> {
    let (wrapper, field) = strip_function(field_ref);

    if wrapper == Some("count") {
        return related_count(collection, field, operator, value, schema);
    }

    let field_type = effective_type(collection, field, wrapper, schema)?;
    let column = field_ref.to_owned();

    let predicate = match operator {
        FilterOperator::Null => Predicate::IsNull {
            column,
            negated: false,
        },
        FilterOperator::Nnull => Predicate::IsNull {
            column,
            negated: true,
        },
        FilterOperator::Eq | FilterOperator::Neq if value.is_null() => Predicate::IsNull {
            column,
            negated: operator == FilterOperator::Neq,
        },
        FilterOperator::Eq
        | FilterOperator::Neq
        | FilterOperator::Gt
        | FilterOperator::Gte
        | FilterOperator::Lt
        | FilterOperator::Lte => {
            // An unresolved dynamic variable matches nothing, always.
            if value.is_undefined() {
                Predicate::In {
                    column,
                    values: Vec::new(),
                    negated: false,
                }
            } else {
                Predicate::Compare {
                    column,
                    op: compare_op(operator),
                    value: coerce(value, field_type),
                }
            }
        }
        FilterOperator::In | FilterOperator::Nin => {
            let raw = match value {
                Value::Array(items) => items.as_slice(),
                single => std::slice::from_ref(single),
            };
            let values = raw
                .iter()
                .filter(|v| !v.is_undefined())
                .map(|v| coerce(v, field_type))
                .collect();
            Predicate::In {
                column,
                values,
                negated: operator == FilterOperator::Nin,
            }
        }
        FilterOperator::Empty => Predicate::Or(vec![
            Predicate::IsNull {
                column: column.clone(),
                negated: false,
            },
            Predicate::Compare {
                column,
                op: CompareOp::Eq,
                value: Value::from(""),
            },
        ]),
        FilterOperator::Nempty => Predicate::And(vec![
            Predicate::IsNull {
                column: column.clone(),
                negated: true,
            },
            Predicate::Compare {
                column,
                op: CompareOp::Neq,
                value: Value::from(""),
            },
        ]),
        FilterOperator::Between | FilterOperator::Nbetween => {
            let bounds = value.as_array().filter(|a| a.len() == 2).ok_or_else(|| {
                Error::InvalidQuery(format!(
                    "{} requires a two-element array, got {value:?}",
                    operator.as_str()
                ))
            })?;
            Predicate::Between {
                column,
                low: coerce(&bounds[0], field_type),
                high: coerce(&bounds[1], field_type),
                negated: operator == FilterOperator::Nbetween,
            }
        }
        FilterOperator::Contains
        | FilterOperator::Ncontains
        | FilterOperator::StartsWith
        | FilterOperator::EndsWith => {
            let text = pattern_text(value, operator)?;
            let pattern = match operator {
                FilterOperator::StartsWith => format!("{text}%"),
                FilterOperator::EndsWith => format!("%{text}"),
                _ => format!("%{text}%"),
            };
            Predicate::Like {
                column,
                pattern,
                negated: operator == FilterOperator::Ncontains,
            }
        }
    };

    Ok(predicate)
}

fn compare_op(operator: FilterOperator) -> CompareOp {
    match operator {
        FilterOperator::Eq => CompareOp::Eq,
        FilterOperator::Neq => CompareOp::Neq,
        FilterOperator::Gt => CompareOp::Gt,
        FilterOperator::Gte => CompareOp::Gte,
        FilterOperator::Lt => CompareOp::Lt,
        FilterOperator::Lte => CompareOp::Lte,
        other => unreachable!("{other:?} is not a scalar comparison"),
    }
}

/// Resolve the declared type driving coercion. Date-part wrappers produce
/// integers regardless of the column's own type.
fn effective_type(
    collection: &str,
    field: &str,
    wrapper: Option<&str>,
    schema: &SchemaOverview,
) -> Result<FieldType> {
    if wrapper.is_some_and(|w| w != "json") {
        return Ok(FieldType::Integer);
    }

    let overview = schema
        .collection(collection)
        .ok_or_else(|| Error::CollectionNotFound(collection.to_owned()))?;
    overview
        .field(field)
        .map(|f| f.field_type)
        .ok_or_else(|| Error::FieldNotFound {
            collection: collection.to_owned(),
            field: field.to_owned(),
        })
}

/// Coerce one operand to the field's numeric representation where that
/// applies; everything else passes through as the literal.
fn coerce(value: &Value, field_type: FieldType) -> Value {
    value
        .coerce_numeric(&field_type)
        .unwrap_or_else(|| value.clone())
}

fn pattern_text(value: &Value, operator: FilterOperator) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Integer(i) => Ok(i.to_string()),
        Value::Float(f) => Ok(f.to_string()),
        other => Err(Error::InvalidQuery(format!(
            "{} requires a scalar operand, got {other:?}",
            operator.as_str()
        ))),
    }
}

/// Rewrite `count(alias)` into a correlated count predicate.
fn related_count(
    collection: &str,
    field: &str,
    operator: FilterOperator,
    value: &Value,
    schema: &SchemaOverview,
) -> Result<Predicate> {
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

    let op = match operator {
        FilterOperator::Eq
        | FilterOperator::Neq
        | FilterOperator::Gt
        | FilterOperator::Gte
        | FilterOperator::Lt
        | FilterOperator::Lte => compare_op(operator),
        other => {
            return Err(Error::InvalidQuery(format!(
                "{} cannot apply to a related count",
                other.as_str()
            )))
        }
    };

    Ok(Predicate::RelatedCount {
        collection: relation.collection.clone(),
        foreign_key: relation.field.clone(),
        parent_primary_key: parent_primary_key.to_owned(),
        op,
        value: coerce(value, FieldType::BigInteger),
    })
}
