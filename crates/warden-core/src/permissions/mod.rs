//! Policy resolution, permission fetch, caching, and merge rules.
//!
//! The pipeline resolves an identity to its policy assignments
//! ([`fetch::fetch_policies_ip_access`]), gates them against the request
//! origin ([`fetch::fetch_policies`]), loads the permission rows those
//! policies grant ([`fetch::fetch_permissions`]), and memoizes the fetches
//! behind [`cache::PermissionCache`], with merge semantics in [`merge`]
//! for collapsing rows across policies.

pub mod app_access;
pub mod cache;
pub mod fetch;
pub mod merge;

pub use app_access::{app_access_minimal_permissions, filtered_app_access_permissions};
pub use cache::{CacheStats, PermissionCache, ACCESS_COLLECTION, POLICIES_COLLECTION};
pub use fetch::{
    fetch_permissions, fetch_policies, fetch_policies_ip_access, gate_policies_by_ip, AccessRow,
    AccessStore, BoxError, FetchPermissionsArgs, PolicyIpAccess, Provided,
};
pub use merge::{merge_filters, merge_permissions, MergeStrategy};
