//! Warden Core - Permission-aware query compilation.
//!
//! This crate turns a parsed query tree plus an identity into an annotated
//! tree the relational layer can execute: paths are validated (existence
//! before permissions, always), policies and permission rows are resolved
//! through an invalidating cache, row-level masking cases are injected,
//! and the assembly helpers translate the result into batched fetches,
//! column expressions, and predicates.

pub mod assemble;
pub mod bus;
pub mod cases;
pub mod error;
pub mod fieldmap;
pub mod permissions;
pub mod process;
pub mod relations;
pub mod validate;

pub use assemble::{
    apply_operator, apply_parent_filters, default_dialect, get_column, ChildFetch, ColumnExpr,
    CompareOp, FunctionTable, Predicate, Row,
};
pub use bus::{EventBus, ListenerOutcome, MutationEvent, MutationKind, Subscription, Topic};
pub use cases::inject_cases;
pub use error::{Error, Result};
pub use fieldmap::{field_map_from_ast, FieldMap, FieldMapEntry, Path};
pub use permissions::{
    fetch_permissions, fetch_policies, fetch_policies_ip_access, AccessRow, AccessStore,
    FetchPermissionsArgs, MergeStrategy, PermissionCache, PolicyIpAccess, Provided,
};
pub use process::{process_ast, AccessService};
pub use relations::{get_relation, relation_kind, RelationKind};
pub use validate::{validate_field_map, validate_path_existence, validate_path_permissions};

/// Re-export the boundary types.
pub use warden_types as types;
