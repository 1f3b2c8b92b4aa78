//! The query tree handed to the compiler by the upstream parse stage and
//! returned, annotated with masking cases, to the downstream executor.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::filter::Filter;
use crate::schema::Relation;
use crate::value::Value;

/// Named transform a field reference can be wrapped in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryFunction {
    /// Extract the year of a date/timestamp column.
    Year,
    /// Extract the month.
    Month,
    /// Extract the ISO week.
    Week,
    /// Extract the day of month.
    Day,
    /// Extract the day of week.
    Weekday,
    /// Extract the hour.
    Hour,
    /// Extract the minute.
    Minute,
    /// Extract the second.
    Second,
    /// Count related one-to-many rows.
    Count,
    /// Treat the column as JSON and extract a path.
    Json,
}

impl QueryFunction {
    /// The lowercase wire name of this function.
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryFunction::Year => "year",
            QueryFunction::Month => "month",
            QueryFunction::Week => "week",
            QueryFunction::Day => "day",
            QueryFunction::Weekday => "weekday",
            QueryFunction::Hour => "hour",
            QueryFunction::Minute => "minute",
            QueryFunction::Second => "second",
            QueryFunction::Count => "count",
            QueryFunction::Json => "json",
        }
    }
}

impl fmt::Display for QueryFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a function name does not exist.
#[derive(Debug, thiserror::Error)]
#[error("unknown function: {0}")]
pub struct UnknownFunction(pub String);

impl FromStr for QueryFunction {
    type Err = UnknownFunction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let function = match s {
            "year" => QueryFunction::Year,
            "month" => QueryFunction::Month,
            "week" => QueryFunction::Week,
            "day" => QueryFunction::Day,
            "weekday" => QueryFunction::Weekday,
            "hour" => QueryFunction::Hour,
            "minute" => QueryFunction::Minute,
            "second" => QueryFunction::Second,
            "count" => QueryFunction::Count,
            "json" => QueryFunction::Json,
            other => return Err(UnknownFunction(other.to_owned())),
        };
        Ok(function)
    }
}

/// Sort direction for one sub-query sort entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

/// One sort entry of a node's sub-query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortItem {
    /// Field to sort by.
    pub field: String,
    /// Direction.
    pub direction: SortDirection,
}

impl SortItem {
    /// Ascending sort on a field.
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }
}

/// The sub-query a nested node carries (filter/sort/pagination).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NodeQuery {
    /// Row filter.
    pub filter: Option<Filter>,
    /// Sort entries.
    pub sort: Vec<SortItem>,
    /// Row limit.
    pub limit: Option<usize>,
    /// Row offset.
    pub offset: Option<usize>,
}

impl NodeQuery {
    /// A sub-query with only a filter.
    pub fn filtered(filter: Filter) -> Self {
        Self {
            filter: Some(filter),
            ..Self::default()
        }
    }

    /// Whether this sub-query constrains anything.
    pub fn is_empty(&self) -> bool {
        self.filter.is_none() && self.sort.is_empty() && self.limit.is_none() && self.offset.is_none()
    }
}

/// Value a matched masking branch resolves to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CaseValue {
    /// The field's real column value.
    Field,
    /// A fixed literal (presets and redaction).
    Literal(Value),
}

/// One masking branch: if `when` matches the row, the field resolves to
/// `then`. Branches are ordered; the first match wins, and a row matching
/// none of them sees null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseBranch {
    /// Row predicate.
    pub when: Filter,
    /// Resulting value.
    pub then: CaseValue,
}

impl CaseBranch {
    /// Branch that reveals the real field value.
    pub fn reveal(when: Filter) -> Self {
        Self {
            when,
            then: CaseValue::Field,
        }
    }
}

/// Masking branches for the children of one collection scope, keyed by
/// field name or `"*"`.
pub type CaseMap = BTreeMap<String, Vec<CaseBranch>>;

/// A primitive column, optionally wrapped in a same-row transform such as
/// `year(date_created)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldNode {
    /// Output key in the result row.
    pub field_key: String,
    /// Underlying column name.
    pub name: String,
    /// Same-row transform, if any.
    pub function: Option<QueryFunction>,
    /// Masking branches for this field; empty until case injection.
    pub when_case: Vec<CaseBranch>,
}

impl FieldNode {
    /// A bare column selection.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            field_key: name.clone(),
            name,
            function: None,
            when_case: Vec::new(),
        }
    }

    /// A transformed column selection (`year(date_created)`).
    pub fn with_function(mut self, function: QueryFunction) -> Self {
        self.field_key = format!("{}({})", function, self.name);
        self.function = Some(function);
        self
    }
}

/// An aggregate over a related collection (`count(links)`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionFieldNode {
    /// Output key in the result row.
    pub field_key: String,
    /// Field the function wraps (the o2m alias).
    pub name: String,
    /// Applied function.
    pub function: QueryFunction,
    /// Collection the function ranges over.
    pub related_collection: String,
    /// Sub-query restricting the counted rows.
    pub query: NodeQuery,
    /// Masking branches; empty until case injection.
    pub when_case: Vec<CaseBranch>,
}

/// A many-to-one nested node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NestedOneNode {
    /// Output key.
    pub field_key: String,
    /// Foreign key field on the parent collection.
    pub name: String,
    /// Resolved relation descriptor.
    pub relation: Relation,
    /// Related collection being fetched.
    pub collection: String,
    /// Child nodes fetched from the related collection.
    pub children: Vec<AstNode>,
    /// Sub-query for the related row.
    pub query: NodeQuery,
    /// Masking branches for the node itself; empty until case injection.
    pub when_case: Vec<CaseBranch>,
    /// Masking branches for this node's children; empty until injection.
    pub cases: CaseMap,
}

/// A one-to-many nested node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NestedManyNode {
    /// Output key.
    pub field_key: String,
    /// Reverse alias field on the parent collection.
    pub name: String,
    /// Resolved relation descriptor.
    pub relation: Relation,
    /// The "many" collection being fetched.
    pub collection: String,
    /// Child nodes fetched from the many collection.
    pub children: Vec<AstNode>,
    /// Sub-query for the children.
    pub query: NodeQuery,
    /// Masking branches for the node itself; empty until case injection.
    pub when_case: Vec<CaseBranch>,
    /// Masking branches for this node's children; empty until injection.
    pub cases: CaseMap,
}

/// An any-to-one (polymorphic) nested node: one child set and sub-query per
/// possible target collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NestedAnyNode {
    /// Output key.
    pub field_key: String,
    /// Discriminated foreign key field on the parent collection.
    pub name: String,
    /// Resolved relation descriptor.
    pub relation: Relation,
    /// Child nodes per target collection.
    pub children: BTreeMap<String, Vec<AstNode>>,
    /// Sub-query per target collection.
    pub queries: BTreeMap<String, NodeQuery>,
    /// Masking branches for the node itself; empty until case injection.
    pub when_case: Vec<CaseBranch>,
    /// Masking branches for children, independent per target collection.
    pub cases: BTreeMap<String, CaseMap>,
}

/// One node of the query tree.
///
/// Every compiler pass matches exhaustively on this enum, so adding a node
/// kind is a compile error everywhere it must be handled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AstNode {
    /// Primitive (possibly transformed) column.
    Field(FieldNode),
    /// Aggregate over a related collection.
    FunctionField(FunctionFieldNode),
    /// Many-to-one nested fetch.
    NestedOne(NestedOneNode),
    /// One-to-many nested fetch.
    NestedMany(NestedManyNode),
    /// Any-to-one (polymorphic) nested fetch.
    NestedAny(NestedAnyNode),
}

impl AstNode {
    /// The output key this node produces.
    pub fn field_key(&self) -> &str {
        match self {
            AstNode::Field(n) => &n.field_key,
            AstNode::FunctionField(n) => &n.field_key,
            AstNode::NestedOne(n) => &n.field_key,
            AstNode::NestedMany(n) => &n.field_key,
            AstNode::NestedAny(n) => &n.field_key,
        }
    }

    /// The underlying field name on the parent collection.
    pub fn name(&self) -> &str {
        match self {
            AstNode::Field(n) => &n.name,
            AstNode::FunctionField(n) => &n.name,
            AstNode::NestedOne(n) => &n.name,
            AstNode::NestedMany(n) => &n.name,
            AstNode::NestedAny(n) => &n.name,
        }
    }

    /// Masking branches attached to this node, if any.
    pub fn when_case(&self) -> &[CaseBranch] {
        match self {
            AstNode::Field(n) => &n.when_case,
            AstNode::FunctionField(n) => &n.when_case,
            AstNode::NestedOne(n) => &n.when_case,
            AstNode::NestedMany(n) => &n.when_case,
            AstNode::NestedAny(n) => &n.when_case,
        }
    }
}

/// The root of a parsed query tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ast {
    /// Root collection.
    pub collection: String,
    /// Selected nodes.
    pub children: Vec<AstNode>,
    /// Root-level query (filter/sort/pagination).
    pub query: NodeQuery,
    /// Masking branches for the root children; empty until injection.
    pub cases: CaseMap,
}

impl Ast {
    /// A tree selecting the given children with an empty root query.
    pub fn new(collection: impl Into<String>, children: Vec<AstNode>) -> Self {
        Self {
            collection: collection.into(),
            children,
            query: NodeQuery::default(),
            cases: CaseMap::new(),
        }
    }

    /// Set the root query.
    pub fn with_query(mut self, query: NodeQuery) -> Self {
        self.query = query;
        self
    }
}
