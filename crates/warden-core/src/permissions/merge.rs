//! Merging of permission rule sets.
//!
//! Two rule sets merge per (collection, action) pair. The strategy decides
//! how row filters combine: `And` intersects visibility, `Or` widens it.
//! An absent filter is unconditional, so `Or` with an unconditional side is
//! unconditional and `And` with one collapses to the other side.

use std::collections::BTreeMap;

use warden_types::filter::Filter;
use warden_types::permission::{Action, Permission, FIELD_WILDCARD};

/// How two rule sets combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Both sets must grant (filters are intersected).
    And,
    /// Either set may grant (filters are unioned).
    Or,
}

/// Merge two optional filters under a strategy.
pub fn merge_filters(
    strategy: MergeStrategy,
    a: Option<Filter>,
    b: Option<Filter>,
) -> Option<Filter> {
    match (strategy, a, b) {
        (MergeStrategy::Or, None, _) | (MergeStrategy::Or, _, None) => None,
        (MergeStrategy::Or, Some(a), Some(b)) => Some(Filter::or(vec![a, b])),
        (MergeStrategy::And, None, b) => b,
        (MergeStrategy::And, a, None) => a,
        (MergeStrategy::And, Some(a), Some(b)) => Some(Filter::and(vec![a, b])),
    }
}

/// Merge two permission sets per (collection, action) pair.
///
/// Rows present on only one side carry over unchanged; rows present on
/// both merge filters by the strategy, union fields (`*` absorbing), and
/// combine presets with the right-hand side winning on conflicts. Merged
/// rows lose their policy attribution.
pub fn merge_permissions(
    strategy: MergeStrategy,
    a: Vec<Permission>,
    b: Vec<Permission>,
) -> Vec<Permission> {
    let mut merged: BTreeMap<(String, Action), Permission> = BTreeMap::new();

    for row in a.into_iter().chain(b) {
        let key = (row.collection.clone(), row.action);
        match merged.remove(&key) {
            None => {
                merged.insert(key, row);
            }
            Some(existing) => {
                merged.insert(key, merge_pair(strategy, existing, row));
            }
        }
    }

    merged.into_values().collect()
}

fn merge_pair(strategy: MergeStrategy, a: Permission, b: Permission) -> Permission {
    let mut fields: Vec<String> = a.fields;
    for field in b.fields {
        if !fields.contains(&field) {
            fields.push(field);
        }
    }
    if fields.iter().any(|f| f == FIELD_WILDCARD) {
        fields = vec![FIELD_WILDCARD.to_owned()];
    }

    let presets = match (a.presets, b.presets) {
        (None, None) => None,
        (Some(p), None) | (None, Some(p)) => Some(p),
        (Some(mut left), Some(right)) => {
            left.extend(right);
            Some(left)
        }
    };

    Permission {
        policy: None,
        collection: a.collection,
        action: a.action,
        permissions: merge_filters(strategy, a.permissions, b.permissions),
        validation: merge_filters(strategy, a.validation, b.validation),
        presets,
        fields,
    }
}
