//! Query assembly: the annotated tree's last stop before the relational
//! layer.
//!
//! Three cooperating pieces: [`parent_filters`] derives the batched filter
//! each nested node needs once its parents are fetched, [`column`] renders
//! column references (including function wrappers) into dialect
//! expressions, and [`operator`] translates filter conditions into
//! predicates with the coercion rules applied.

pub mod column;
pub mod operator;
pub mod parent_filters;

pub use column::{default_dialect, get_column, ColumnExpr, FunctionArgs, FunctionTable};
pub use operator::{apply_operator, CompareOp, Predicate};
pub use parent_filters::{apply_parent_filters, ChildFetch, Row};
