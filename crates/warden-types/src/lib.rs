//! Warden boundary types.
//!
//! This crate defines the types shared between the upstream query parser,
//! the Warden permission compiler, and the downstream relational executor.
//!
//! # Modules
//!
//! - [`value`] - Runtime values for filters, presets, and fetched rows
//! - [`filter`] - The `_and`/`_or` + operator-leaf filter language
//! - [`ast`] - The nested query tree and its masking annotations
//! - [`schema`] - Read-only schema overview (collections, fields, relations)
//! - [`accountability`] - Request-scoped identity context
//! - [`permission`] - Policies, permission rows, and actions
//! - [`ip`] - IP ranges for policy gating

pub mod accountability;
pub mod ast;
pub mod filter;
pub mod ip;
pub mod permission;
pub mod schema;
pub mod value;

pub use accountability::Accountability;
pub use ast::{
    Ast, AstNode, CaseBranch, CaseMap, CaseValue, FieldNode, FunctionFieldNode, NestedAnyNode,
    NestedManyNode, NestedOneNode, NodeQuery, QueryFunction, SortDirection, SortItem,
    UnknownFunction,
};
pub use filter::{strip_function, Filter, FilterOperator, UnknownOperator};
pub use ip::{InvalidIpRange, IpRange};
pub use permission::{Action, Permission, Policy, FIELD_WILDCARD};
pub use schema::{
    CollectionOverview, FieldOverview, FieldType, Relation, RelationMeta, SchemaOverview,
};
pub use value::Value;
