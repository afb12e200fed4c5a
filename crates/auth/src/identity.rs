//! Per-request identity context.
//!
//! Built once by the identity layer (usually through
//! [`IdentityClaims`](crate::claims::IdentityClaims)) and never mutated
//! afterwards. The engine only reads it.

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use hrgate_core::{BranchId, OrganizationId, PrincipalId};

use crate::{Permission, Role, RoleLevel};

/// Time-boxed elevation to another role.
///
/// `level`, when present, applies to this grant only and only while it is
/// active; it never changes how the caller's own roles resolve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporaryRole {
    pub role: Role,
    pub level: Option<RoleLevel>,
    pub expires_at: DateTime<Utc>,
}

impl TemporaryRole {
    pub fn new(role: impl Into<Role>, expires_at: DateTime<Utc>) -> Self {
        Self {
            role: role.into(),
            level: None,
            expires_at,
        }
    }

    pub fn with_level(mut self, level: RoleLevel) -> Self {
        self.level = Some(level);
        self
    }
}

/// What a delegation hands over: a named role (optionally with the level it
/// carries for this delegation) or a bare level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegatedAuthority {
    Role { role: Role, level: Option<RoleLevel> },
    Level(RoleLevel),
}

/// "Acting on behalf of" another principal until `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegation {
    pub authority: DelegatedAuthority,
    pub expires_at: DateTime<Utc>,
    pub on_behalf_of: Option<PrincipalId>,
}

impl Delegation {
    pub fn of_role(role: impl Into<Role>, expires_at: DateTime<Utc>) -> Self {
        Self {
            authority: DelegatedAuthority::Role {
                role: role.into(),
                level: None,
            },
            expires_at,
            on_behalf_of: None,
        }
    }

    pub fn of_level(level: RoleLevel, expires_at: DateTime<Utc>) -> Self {
        Self {
            authority: DelegatedAuthority::Level(level),
            expires_at,
            on_behalf_of: None,
        }
    }

    /// Attach a level to a role delegation. No effect on a bare-level one.
    pub fn with_level(mut self, level: RoleLevel) -> Self {
        if let DelegatedAuthority::Role { level: slot, .. } = &mut self.authority {
            *slot = Some(level);
        }
        self
    }

    pub fn on_behalf_of(mut self, principal: PrincipalId) -> Self {
        self.on_behalf_of = Some(principal);
        self
    }
}

/// Immutable, strongly-typed caller attributes for one authorization decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityContext {
    principal_id: Option<PrincipalId>,
    permissions: HashSet<Permission>,
    roles: BTreeSet<Role>,
    role_level_overrides: HashMap<Role, RoleLevel>,
    temporary_role: Option<TemporaryRole>,
    delegation: Option<Delegation>,
    branch_ids: BTreeSet<BranchId>,
    organization_id: Option<OrganizationId>,
    bypass_scope_isolation: bool,
}

impl IdentityContext {
    pub fn builder() -> IdentityContextBuilder {
        IdentityContextBuilder::default()
    }

    pub fn principal_id(&self) -> Option<PrincipalId> {
        self.principal_id
    }

    pub fn permissions(&self) -> &HashSet<Permission> {
        &self.permissions
    }

    pub fn roles(&self) -> &BTreeSet<Role> {
        &self.roles
    }

    pub fn role_level_override(&self, role: &Role) -> Option<RoleLevel> {
        self.role_level_overrides.get(role).copied()
    }

    pub fn temporary_role(&self) -> Option<&TemporaryRole> {
        self.temporary_role.as_ref()
    }

    pub fn delegation(&self) -> Option<&Delegation> {
        self.delegation.as_ref()
    }

    pub fn branch_ids(&self) -> &BTreeSet<BranchId> {
        &self.branch_ids
    }

    pub fn organization_id(&self) -> Option<OrganizationId> {
        self.organization_id
    }

    pub fn bypass_scope_isolation(&self) -> bool {
        self.bypass_scope_isolation
    }
}

/// Assembles an [`IdentityContext`]; consumed by [`build`](Self::build).
#[derive(Debug, Clone, Default)]
pub struct IdentityContextBuilder {
    principal_id: Option<PrincipalId>,
    permissions: HashSet<Permission>,
    roles: BTreeSet<Role>,
    role_level_overrides: HashMap<Role, RoleLevel>,
    temporary_role: Option<TemporaryRole>,
    delegation: Option<Delegation>,
    branch_ids: BTreeSet<BranchId>,
    organization_id: Option<OrganizationId>,
    bypass_scope_isolation: bool,
}

impl IdentityContextBuilder {
    pub fn principal_id(mut self, id: PrincipalId) -> Self {
        self.principal_id = Some(id);
        self
    }

    pub fn permission(mut self, permission: impl Into<Permission>) -> Self {
        self.permissions.insert(permission.into());
        self
    }

    pub fn permissions<I, P>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Permission>,
    {
        self.permissions.extend(permissions.into_iter().map(Into::into));
        self
    }

    pub fn role(mut self, role: impl Into<Role>) -> Self {
        self.roles.insert(role.into());
        self
    }

    pub fn roles<I, R>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<Role>,
    {
        self.roles.extend(roles.into_iter().map(Into::into));
        self
    }

    /// Explicit level for `role`, taking precedence over the role table.
    pub fn role_level_override(mut self, role: impl Into<Role>, level: RoleLevel) -> Self {
        self.role_level_overrides.insert(role.into(), level);
        self
    }

    pub fn temporary_role(mut self, temporary_role: TemporaryRole) -> Self {
        self.temporary_role = Some(temporary_role);
        self
    }

    pub fn delegation(mut self, delegation: Delegation) -> Self {
        self.delegation = Some(delegation);
        self
    }

    pub fn branch(mut self, branch: impl Into<BranchId>) -> Self {
        self.branch_ids.insert(branch.into());
        self
    }

    pub fn branches<I, B>(mut self, branches: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<BranchId>,
    {
        self.branch_ids.extend(branches.into_iter().map(Into::into));
        self
    }

    pub fn organization(mut self, organization: impl Into<OrganizationId>) -> Self {
        self.organization_id = Some(organization.into());
        self
    }

    pub fn bypass_scope_isolation(mut self, bypass: bool) -> Self {
        self.bypass_scope_isolation = bypass;
        self
    }

    pub fn build(self) -> IdentityContext {
        IdentityContext {
            principal_id: self.principal_id,
            permissions: self.permissions,
            roles: self.roles,
            role_level_overrides: self.role_level_overrides,
            temporary_role: self.temporary_role,
            delegation: self.delegation,
            branch_ids: self.branch_ids,
            organization_id: self.organization_id,
            bypass_scope_isolation: self.bypass_scope_isolation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_builder_yields_empty_context() {
        let id = IdentityContext::builder().build();
        assert!(id.roles().is_empty());
        assert!(id.permissions().is_empty());
        assert!(id.branch_ids().is_empty());
        assert_eq!(id.organization_id(), None);
        assert!(!id.bypass_scope_isolation());
    }

    #[test]
    fn builder_deduplicates_sets() {
        let id = IdentityContext::builder()
            .roles(["Manager", "Manager", "Employee"])
            .permissions(["Employee.View", "Employee.View"])
            .branches([1i64, 2, 2, 3])
            .build();
        assert_eq!(id.roles().len(), 2);
        assert_eq!(id.permissions().len(), 1);
        assert_eq!(
            id.branch_ids().iter().map(|b| b.get()).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn overrides_are_keyed_by_role_name() {
        let id = IdentityContext::builder()
            .role_level_override("Manager", 65)
            .build();
        assert_eq!(id.role_level_override(&Role::new("Manager")), Some(65));
        assert_eq!(id.role_level_override(&Role::new("manager")), None);
    }
}
