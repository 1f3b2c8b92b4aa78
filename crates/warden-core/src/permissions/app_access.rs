//! Minimal permissions every app-access identity gets.
//!
//! Identities whose policies grant app access can always read the system
//! metadata the app surface needs to render itself, independent of which
//! policies own them. The fragment is unioned into fetched rule sets after
//! the policy filter has been applied; it never grants anything outside
//! these system collections.

use warden_types::filter::Filter;
use warden_types::permission::{Action, Permission};

/// System collections readable by every app-access identity.
const APP_READABLE_COLLECTIONS: &[&str] = &[
    "system_collections",
    "system_fields",
    "system_relations",
    "system_settings",
    "system_translations",
];

/// The static minimal app permission fragment.
///
/// Presets are the one row scoped to the requesting user: identities see
/// only their own saved presets.
pub fn app_access_minimal_permissions() -> Vec<Permission> {
    let mut rows: Vec<Permission> = APP_READABLE_COLLECTIONS
        .iter()
        .map(|collection| Permission::allow_all(*collection, Action::Read))
        .collect();

    rows.push(
        Permission::allow_all("system_presets", Action::Read)
            .with_filter(Filter::eq("user", "$CURRENT_USER")),
    );

    rows
}

/// The fragment restricted to the given actions and collections, matching
/// the shape of a filtered permissions fetch.
pub fn filtered_app_access_permissions(
    actions: &[Action],
    collections: Option<&[String]>,
) -> Vec<Permission> {
    app_access_minimal_permissions()
        .into_iter()
        .filter(|row| actions.contains(&row.action))
        .filter(|row| match collections {
            Some(collections) => collections.iter().any(|c| c == &row.collection),
            None => true,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_is_read_only() {
        assert!(app_access_minimal_permissions()
            .iter()
            .all(|row| row.action == Action::Read));
    }

    #[test]
    fn test_presets_row_is_scoped() {
        let rows = app_access_minimal_permissions();
        let presets = rows
            .iter()
            .find(|row| row.collection == "system_presets")
            .unwrap();
        assert!(presets.permissions.is_some());
    }

    #[test]
    fn test_filtering_by_collection() {
        let collections = vec!["system_settings".to_owned()];
        let rows = filtered_app_access_permissions(&[Action::Read], Some(&collections));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].collection, "system_settings");

        let rows = filtered_app_access_permissions(&[Action::Update], None);
        assert!(rows.is_empty());
    }
}
