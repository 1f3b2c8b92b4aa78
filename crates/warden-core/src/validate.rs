//! Path validation.
//!
//! Two checks run over every field-map path, in a fixed order: existence
//! first (always, admin identities included, so schema bugs surface as
//! schema errors and never as permission denials), then permission
//! coverage. Both fail closed.

use tracing::trace;
use warden_types::permission::{Action, Permission};
use warden_types::schema::SchemaOverview;

use crate::error::{Error, Result};
use crate::fieldmap::{FieldMap, Path};

/// Check that a path's collection and every touched field exist.
pub fn validate_path_existence(
    path: &Path,
    collection: &str,
    fields: impl IntoIterator<Item = impl AsRef<str>>,
    schema: &SchemaOverview,
) -> Result<()> {
    trace!(?path, collection, "validating path existence");

    let Some(overview) = schema.collection(collection) else {
        return Err(Error::CollectionNotFound(collection.to_owned()));
    };

    for field in fields {
        let field = field.as_ref();
        if overview.field(field).is_none() {
            return Err(Error::FieldNotFound {
                collection: collection.to_owned(),
                field: field.to_owned(),
            });
        }
    }

    Ok(())
}

/// Check that the resolved permission set covers a path's fields for the
/// given action.
///
/// No row for the collection means the collection is invisible; otherwise
/// the union of granted fields across all rows must contain `*` or every
/// requested field, and the first uncovered field is named in the error.
pub fn validate_path_permissions(
    path: &Path,
    permissions: &[Permission],
    collection: &str,
    fields: impl IntoIterator<Item = impl AsRef<str>>,
    action: Action,
) -> Result<()> {
    trace!(?path, collection, action = %action, "validating path permissions");

    let rows: Vec<&Permission> = permissions
        .iter()
        .filter(|p| p.collection == collection && p.action == action)
        .collect();

    if rows.is_empty() {
        return Err(Error::forbidden_collection(collection));
    }

    if rows.iter().any(|p| p.grants_all_fields()) {
        return Ok(());
    }

    for field in fields {
        let field = field.as_ref();
        if !rows.iter().any(|p| p.grants_field(field)) {
            return Err(Error::forbidden_field(collection, field));
        }
    }

    Ok(())
}

/// Run both checks over a full field map.
///
/// Existence is validated for every path of both maps before any
/// permission check runs. Emitted fields (`read` map) are then checked
/// against the requested action, while filter/sort-only fields (`other`
/// map) are always checked against read: filtering or ordering on a field
/// observes its values, whatever the request does to the rows. When
/// `permissions` is `None` the identity is admin and the permission pass
/// is skipped entirely.
pub fn validate_field_map(
    field_map: &FieldMap,
    schema: &SchemaOverview,
    permissions: Option<&[Permission]>,
    action: Action,
) -> Result<()> {
    for (path, entry) in field_map.read.iter().chain(field_map.other.iter()) {
        validate_path_existence(path, &entry.collection, &entry.fields, schema)?;
    }

    let Some(permissions) = permissions else {
        return Ok(());
    };

    for (path, entry) in &field_map.read {
        validate_path_permissions(path, permissions, &entry.collection, &entry.fields, action)?;
    }
    for (path, entry) in &field_map.other {
        validate_path_permissions(
            path,
            permissions,
            &entry.collection,
            &entry.fields,
            Action::Read,
        )?;
    }

    Ok(())
}
