//! The filter-tree language consumed and produced by the compiler.
//!
//! Filters are `{field: {operator: value}}` leaves composed with `_and` /
//! `_or` combinators. An *absent* filter (`Option<Filter>::None`) means
//! unconditional access; an explicit filter restricts row visibility.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Comparison operators supported by the filter language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterOperator {
    /// Equal.
    Eq,
    /// Not equal.
    Neq,
    /// Value is one of a list.
    In,
    /// Value is not one of a list.
    Nin,
    /// Value is null.
    Null,
    /// Value is not null.
    Nnull,
    /// Value is null or the empty string.
    Empty,
    /// Value is neither null nor the empty string.
    Nempty,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal.
    Lte,
    /// Between two bounds (inclusive), value is a two-element array.
    Between,
    /// Outside two bounds, value is a two-element array.
    Nbetween,
    /// Substring match.
    Contains,
    /// Negated substring match.
    Ncontains,
    /// Prefix match.
    StartsWith,
    /// Suffix match.
    EndsWith,
}

impl FilterOperator {
    /// The `_`-prefixed wire name of this operator.
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperator::Eq => "_eq",
            FilterOperator::Neq => "_neq",
            FilterOperator::In => "_in",
            FilterOperator::Nin => "_nin",
            FilterOperator::Null => "_null",
            FilterOperator::Nnull => "_nnull",
            FilterOperator::Empty => "_empty",
            FilterOperator::Nempty => "_nempty",
            FilterOperator::Gt => "_gt",
            FilterOperator::Gte => "_gte",
            FilterOperator::Lt => "_lt",
            FilterOperator::Lte => "_lte",
            FilterOperator::Between => "_between",
            FilterOperator::Nbetween => "_nbetween",
            FilterOperator::Contains => "_contains",
            FilterOperator::Ncontains => "_ncontains",
            FilterOperator::StartsWith => "_starts_with",
            FilterOperator::EndsWith => "_ends_with",
        }
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when an operator name does not exist.
#[derive(Debug, thiserror::Error)]
#[error("unknown filter operator: {0}")]
pub struct UnknownOperator(pub String);

impl FromStr for FilterOperator {
    type Err = UnknownOperator;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let op = match s {
            "_eq" => FilterOperator::Eq,
            "_neq" => FilterOperator::Neq,
            "_in" => FilterOperator::In,
            "_nin" => FilterOperator::Nin,
            "_null" => FilterOperator::Null,
            "_nnull" => FilterOperator::Nnull,
            "_empty" => FilterOperator::Empty,
            "_nempty" => FilterOperator::Nempty,
            "_gt" => FilterOperator::Gt,
            "_gte" => FilterOperator::Gte,
            "_lt" => FilterOperator::Lt,
            "_lte" => FilterOperator::Lte,
            "_between" => FilterOperator::Between,
            "_nbetween" => FilterOperator::Nbetween,
            "_contains" => FilterOperator::Contains,
            "_ncontains" => FilterOperator::Ncontains,
            "_starts_with" => FilterOperator::StartsWith,
            "_ends_with" => FilterOperator::EndsWith,
            other => return Err(UnknownOperator(other.to_owned())),
        };
        Ok(op)
    }
}

/// A filter tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    /// All branches must match.
    And(Vec<Filter>),
    /// At least one branch must match.
    Or(Vec<Filter>),
    /// A single field condition.
    Condition {
        /// Field the condition applies to. May be a function-wrapped
        /// reference such as `year(date_created)` or `count(links)`.
        field: String,
        /// Comparison operator.
        operator: FilterOperator,
        /// Right-hand value.
        value: Value,
    },
}

impl Filter {
    /// Create an AND combination.
    pub fn and(filters: Vec<Filter>) -> Self {
        Filter::And(filters)
    }

    /// Create an OR combination.
    pub fn or(filters: Vec<Filter>) -> Self {
        Filter::Or(filters)
    }

    /// Create a single condition.
    pub fn condition(
        field: impl Into<String>,
        operator: FilterOperator,
        value: impl Into<Value>,
    ) -> Self {
        Filter::Condition {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    /// Create an equality condition.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::condition(field, FilterOperator::Eq, value)
    }

    /// Create an `_in` condition.
    pub fn is_in(field: impl Into<String>, values: Vec<Value>) -> Self {
        Filter::condition(field, FilterOperator::In, Value::Array(values))
    }

    /// Collect every field name referenced anywhere in this filter.
    ///
    /// Function wrappers are stripped, so `year(date_created)` reports
    /// `date_created`.
    pub fn fields(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields(&self, out: &mut BTreeSet<String>) {
        match self {
            Filter::And(branches) | Filter::Or(branches) => {
                for branch in branches {
                    branch.collect_fields(out);
                }
            }
            Filter::Condition { field, .. } => {
                out.insert(strip_function(field).1.to_owned());
            }
        }
    }
}

/// Split a possibly function-wrapped field reference into its wrapper name
/// and the bare field, e.g. `"year(date_created)"` → `(Some("year"),
/// "date_created")`. References without a wrapper come back unchanged.
pub fn strip_function(field_ref: &str) -> (Option<&str>, &str) {
    if let Some(open) = field_ref.find('(') {
        if let Some(stripped) = field_ref[open + 1..].strip_suffix(')') {
            return (Some(&field_ref[..open]), stripped);
        }
    }
    (None, field_ref)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_round_trip() {
        for name in ["_eq", "_nin", "_between", "_starts_with"] {
            let op: FilterOperator = name.parse().unwrap();
            assert_eq!(op.as_str(), name);
        }
    }

    #[test]
    fn test_unknown_operator() {
        assert!("_borrow".parse::<FilterOperator>().is_err());
    }

    #[test]
    fn test_fields_walks_combinators() {
        let filter = Filter::and(vec![
            Filter::eq("status", "published"),
            Filter::or(vec![
                Filter::eq("author", "$CURRENT_USER"),
                Filter::condition("year(date_created)", FilterOperator::Gte, 2024i64),
            ]),
        ]);

        let fields = filter.fields();
        assert!(fields.contains("status"));
        assert!(fields.contains("author"));
        assert!(fields.contains("date_created"));
        assert_eq!(fields.len(), 3);
    }

    #[test]
    fn test_strip_function() {
        assert_eq!(strip_function("year(date_created)"), (Some("year"), "date_created"));
        assert_eq!(strip_function("title"), (None, "title"));
        assert_eq!(strip_function("broken(ref"), (None, "broken(ref"));
    }
}
