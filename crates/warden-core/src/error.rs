//! Compiler error types.
//!
//! Existence failures are surfaced before permission failures so malformed
//! queries are never masked as denials, and `Internal` marks invariant
//! breaches that must never be reachable from valid input.

use thiserror::Error;

/// Errors produced while compiling a query.
#[derive(Debug, Error)]
pub enum Error {
    /// No permission row covers the collection, or a requested field is not
    /// granted. Carries no detail beyond the offending names.
    #[error("you don't have permission to access {}", forbidden_target(.collection, .field.as_deref()))]
    Forbidden {
        /// Collection the denial applies to.
        collection: String,
        /// Offending field, when the collection itself is accessible.
        field: Option<String>,
    },

    /// The query is structurally invalid (unknown function, function over
    /// an incompatible field type, malformed operator value).
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// A referenced collection does not exist in the schema.
    #[error("collection \"{0}\" doesn't exist")]
    CollectionNotFound(String),

    /// A referenced field does not exist in the schema.
    #[error("field \"{field}\" doesn't exist in collection \"{collection}\"")]
    FieldNotFound {
        /// Collection that was searched.
        collection: String,
        /// Missing field.
        field: String,
    },

    /// An invariant the validator guarantees was violated later in the
    /// pipeline. Never reachable through valid input.
    #[error("internal invariant violation: {0}")]
    Internal(String),

    /// The backing access store failed.
    #[error("access store error: {0}")]
    Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Forbidden access to a whole collection.
    pub fn forbidden_collection(collection: impl Into<String>) -> Self {
        Error::Forbidden {
            collection: collection.into(),
            field: None,
        }
    }

    /// Forbidden access to one field of a collection.
    pub fn forbidden_field(collection: impl Into<String>, field: impl Into<String>) -> Self {
        Error::Forbidden {
            collection: collection.into(),
            field: Some(field.into()),
        }
    }
}

fn forbidden_target(collection: &str, field: Option<&str>) -> String {
    match field {
        Some(field) => format!("field \"{field}\" in collection \"{collection}\""),
        None => format!("collection \"{collection}\""),
    }
}

/// Result type for compiler operations.
pub type Result<T> = std::result::Result<T, Error>;
