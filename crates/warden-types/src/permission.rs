//! Policies and permission rows consumed by the compiler.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::filter::Filter;
use crate::ip::IpRange;
use crate::value::Value;

/// Action a permission row grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Action {
    /// Read rows.
    Read,
    /// Create rows.
    Create,
    /// Update rows.
    Update,
    /// Delete rows.
    Delete,
    /// Share rows.
    Share,
}

impl Action {
    /// The lowercase wire name of this action.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Read => "read",
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::Share => "share",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named bundle of permission rules. Policies are ordered relative to
/// other policies of the same identity; that order decides preset and
/// override precedence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    /// Policy id.
    pub id: String,
    /// Whether this policy grants unrestricted admin access.
    pub admin_access: bool,
    /// Whether this policy grants access to the app surface.
    pub app_access: bool,
    /// IP ranges this policy is restricted to, if any.
    pub ip_access: Option<Vec<IpRange>>,
}

impl Policy {
    /// Create a plain policy.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            admin_access: false,
            app_access: false,
            ip_access: None,
        }
    }

    /// Grant admin access.
    pub fn with_admin_access(mut self) -> Self {
        self.admin_access = true;
        self
    }

    /// Grant app access.
    pub fn with_app_access(mut self) -> Self {
        self.app_access = true;
        self
    }

    /// Restrict the policy to the given IP ranges.
    pub fn with_ip_access(mut self, ranges: Vec<IpRange>) -> Self {
        self.ip_access = Some(ranges);
        self
    }
}

/// The wildcard entry a permission's field list may contain.
pub const FIELD_WILDCARD: &str = "*";

/// One (policy, collection, action) permission rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Permission {
    /// Owning policy id. Synthetic rows (e.g. the minimal app fragment)
    /// have none.
    pub policy: Option<String>,
    /// Collection the rule applies to.
    pub collection: String,
    /// Granted action.
    pub action: Action,
    /// Row filter; `None` grants unconditionally.
    pub permissions: Option<Filter>,
    /// Validation filter applied to submitted payloads.
    pub validation: Option<Filter>,
    /// Field values injected into payloads before validation.
    pub presets: Option<BTreeMap<String, Value>>,
    /// Granted fields; may contain [`FIELD_WILDCARD`].
    pub fields: Vec<String>,
}

impl Permission {
    /// A rule granting all fields of a collection unconditionally.
    pub fn allow_all(collection: impl Into<String>, action: Action) -> Self {
        Self {
            policy: None,
            collection: collection.into(),
            action,
            permissions: None,
            validation: None,
            presets: None,
            fields: vec![FIELD_WILDCARD.to_owned()],
        }
    }

    /// Attach an owning policy id.
    pub fn for_policy(mut self, policy: impl Into<String>) -> Self {
        self.policy = Some(policy.into());
        self
    }

    /// Restrict granted fields.
    pub fn with_fields(mut self, fields: Vec<String>) -> Self {
        self.fields = fields;
        self
    }

    /// Attach a row filter.
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.permissions = Some(filter);
        self
    }

    /// Attach a validation filter.
    pub fn with_validation(mut self, validation: Filter) -> Self {
        self.validation = Some(validation);
        self
    }

    /// Attach presets.
    pub fn with_presets(mut self, presets: BTreeMap<String, Value>) -> Self {
        self.presets = Some(presets);
        self
    }

    /// Whether this rule grants every field.
    pub fn grants_all_fields(&self) -> bool {
        self.fields.iter().any(|f| f == FIELD_WILDCARD)
    }

    /// Whether this rule grants the given field (directly or via `*`).
    pub fn grants_field(&self, field: &str) -> bool {
        self.grants_all_fields() || self.fields.iter().any(|f| f == field)
    }

    /// Whether this rule applies without a row filter.
    pub fn is_unconditional(&self) -> bool {
        self.permissions.is_none()
    }
}
