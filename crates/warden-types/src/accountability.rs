//! Request-scoped identity context.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::permission::Permission;

/// The identity a request runs as. Supplied by the external authentication
/// layer and immutable for the lifetime of the request.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Accountability {
    /// User id, unset for public requests.
    pub user: Option<String>,
    /// Direct role id.
    pub role: Option<String>,
    /// Full role chain, direct role first.
    pub roles: Vec<String>,
    /// Request origin address.
    pub ip: Option<IpAddr>,
    /// Whether any effective policy grants admin access.
    pub admin: bool,
    /// Whether any effective policy grants app access.
    pub app: bool,
    /// Pre-resolved flat permission list, bypassing the policy fetch when
    /// present.
    pub permissions: Option<Vec<Permission>>,
}

impl Accountability {
    /// An unauthenticated (public) identity.
    pub fn public() -> Self {
        Self::default()
    }

    /// An identity for the given user.
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            user: Some(id.into()),
            ..Self::default()
        }
    }

    /// An admin identity for the given user.
    pub fn admin(id: impl Into<String>) -> Self {
        Self {
            user: Some(id.into()),
            admin: true,
            ..Self::default()
        }
    }

    /// Set the role chain (direct role first).
    pub fn with_roles(mut self, roles: Vec<String>) -> Self {
        self.role = roles.first().cloned();
        self.roles = roles;
        self
    }

    /// Set the request origin address.
    pub fn with_ip(mut self, ip: IpAddr) -> Self {
        self.ip = Some(ip);
        self
    }

    /// Mark the identity as having app access.
    pub fn with_app_access(mut self) -> Self {
        self.app = true;
        self
    }

    /// Attach a pre-resolved permission list.
    pub fn with_permissions(mut self, permissions: Vec<Permission>) -> Self {
        self.permissions = Some(permissions);
        self
    }

    /// Whether the identity is authenticated.
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some() || !self.roles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_identity() {
        let acc = Accountability::public();
        assert!(!acc.is_authenticated());
        assert!(!acc.admin);
    }

    #[test]
    fn test_roles_set_direct_role() {
        let acc = Accountability::user("u1").with_roles(vec!["editor".into(), "staff".into()]);
        assert_eq!(acc.role.as_deref(), Some("editor"));
        assert!(acc.is_authenticated());
    }
}
