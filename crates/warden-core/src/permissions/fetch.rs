//! Policy and permission resolution against the backing access store.
//!
//! The store is external; this module owns the resolution rules: policy
//! precedence, IP gating, stable permission ordering, and the app-access
//! union. Handlers report the row ids they read through [`Provided`] so
//! the cache layer can register narrow invalidation listeners without
//! keying on those ids.

use std::net::IpAddr;

use tracing::{debug, trace};
use warden_types::accountability::Accountability;
use warden_types::ip::IpRange;
use warden_types::permission::{Action, Permission, Policy};

use super::app_access::filtered_app_access_permissions;
use crate::error::{Error, Result};

/// Boxed error produced by a backing store.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// One identity-to-policy assignment as stored.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessRow {
    /// Assignment row id (not the policy id).
    pub id: String,
    /// Precedence within the identity's assignments, lowest first.
    pub sort: i64,
    /// The assigned policy.
    pub policy: Policy,
}

/// Backing store for policy assignments and permission rows.
///
/// Implementations are expected to return `access_rows` already ordered by
/// precedence: role-chain assignments first (outermost role first), then
/// user-attached assignments, each group by its `sort`.
pub trait AccessStore: Send + Sync {
    /// Policy assignments for an identity, in precedence order.
    fn access_rows(&self, accountability: &Accountability) -> std::result::Result<Vec<AccessRow>, BoxError>;

    /// Permission rows owned by the given policies, restricted to the given
    /// actions and (optionally) collections. Order is not significant; the
    /// caller re-sorts to policy order.
    fn permissions_for(
        &self,
        policy_ids: &[String],
        actions: &[Action],
        collections: Option<&[String]>,
    ) -> std::result::Result<Vec<Permission>, BoxError>;
}

/// Identifiers a fetch handler read along the way, handed to the cache
/// layer for invalidation without ever entering a cache key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Provided {
    /// Access (assignment) row ids that were read.
    pub access_ids: Vec<String>,
    /// Policy row ids that were read.
    pub policy_ids: Vec<String>,
}

impl Provided {
    /// Record an access row id.
    pub fn access(&mut self, id: impl Into<String>) {
        self.access_ids.push(id.into());
    }

    /// Record a policy row id.
    pub fn policy(&mut self, id: impl Into<String>) {
        self.policy_ids.push(id.into());
    }
}

/// One assigned policy's IP restriction, in precedence order.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyIpAccess {
    /// Policy id.
    pub id: String,
    /// Ranges the request origin must match; `None` means unrestricted.
    pub ip_access: Option<Vec<IpRange>>,
}

/// Resolve the assigned policies and their IP restrictions for an identity,
/// in precedence order, with no gating applied.
///
/// This is the cacheable half of policy resolution: the result does not
/// depend on where the request came from, so one entry serves every origin.
pub fn fetch_policies_ip_access(
    store: &dyn AccessStore,
    accountability: &Accountability,
    provided: &mut Provided,
) -> Result<Vec<PolicyIpAccess>> {
    let rows = store.access_rows(accountability).map_err(Error::Store)?;

    let mut policies = Vec::with_capacity(rows.len());
    for row in rows {
        provided.access(row.id.clone());
        provided.policy(row.policy.id.clone());
        policies.push(PolicyIpAccess {
            id: row.policy.id,
            ip_access: row.policy.ip_access,
        });
    }

    debug!(count = policies.len(), "policy assignments resolved");
    Ok(policies)
}

/// Apply IP gating to an ordered assignment list.
///
/// A policy restricted by `ip_access` only takes effect when the request
/// origin matches one of its ranges; a restricted policy with no known
/// origin never applies.
pub fn gate_policies_by_ip(rows: &[PolicyIpAccess], ip: Option<IpAddr>) -> Vec<String> {
    let mut policies = Vec::with_capacity(rows.len());
    for row in rows {
        let allowed = match &row.ip_access {
            None => true,
            Some(ranges) => match ip {
                Some(ip) => ranges.iter().any(|range| range.matches(ip)),
                None => false,
            },
        };
        if allowed {
            policies.push(row.id.clone());
        } else {
            trace!(policy = %row.id, "policy skipped, ip restriction not met");
        }
    }
    policies
}

/// Resolve the effective policy ids for an identity, in precedence order,
/// gated against the request origin.
pub fn fetch_policies(
    store: &dyn AccessStore,
    accountability: &Accountability,
    provided: &mut Provided,
) -> Result<Vec<String>> {
    let rows = fetch_policies_ip_access(store, accountability, provided)?;
    let policies = gate_policies_by_ip(&rows, accountability.ip);
    debug!(count = policies.len(), "policies resolved");
    Ok(policies)
}

/// Arguments for a permissions fetch.
#[derive(Debug, Clone)]
pub struct FetchPermissionsArgs<'a> {
    /// Effective policies, in precedence order.
    pub policies: &'a [String],
    /// Actions to fetch rows for.
    pub actions: &'a [Action],
    /// Collections to restrict to; `None` fetches all.
    pub collections: Option<&'a [String]>,
    /// Requesting identity (app/admin flags only; never part of cache keys).
    pub accountability: &'a Accountability,
}

/// Fetch permission rows for a set of policies.
///
/// Rows come back in the caller's policy order (stable, so a policy's own
/// rows keep their relative order), because later policies' presets and
/// overrides must apply deterministically. App-access identities without
/// admin get the static minimal app fragment unioned in afterwards,
/// independent of policy ownership.
pub fn fetch_permissions(
    store: &dyn AccessStore,
    args: &FetchPermissionsArgs<'_>,
    provided: &mut Provided,
) -> Result<Vec<Permission>> {
    let mut rows = store
        .permissions_for(args.policies, args.actions, args.collections)
        .map_err(Error::Store)?;

    for row in &rows {
        if let Some(policy) = &row.policy {
            if !provided.policy_ids.contains(policy) {
                provided.policy(policy.clone());
            }
        }
    }

    let order = |row: &Permission| -> usize {
        row.policy
            .as_deref()
            .and_then(|id| args.policies.iter().position(|p| p == id))
            .unwrap_or(usize::MAX)
    };
    rows.sort_by_key(order);

    if args.accountability.app && !args.accountability.admin {
        rows.extend(filtered_app_access_permissions(
            args.actions,
            args.collections,
        ));
    }

    debug!(count = rows.len(), "permissions fetched");
    Ok(rows)
}
