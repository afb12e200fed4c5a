use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use hrgate_core::{BranchId, OrganizationId, PrincipalId};

use crate::identity::{Delegation, IdentityContext, TemporaryRole};
use crate::{Permission, Role, RoleLevel};

/// Claim bag as delivered by the identity/token layer (transport-agnostic).
///
/// Values arrive loosely typed: levels and scope ids are strings, and any of
/// them may be garbage. [`IdentityClaims::into_identity`] is the only place
/// they are interpreted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaims {
    /// Subject / principal identifier.
    #[serde(default)]
    pub sub: Option<PrincipalId>,

    #[serde(default)]
    pub permissions: Vec<String>,

    #[serde(default)]
    pub roles: Vec<RoleClaim>,

    #[serde(default)]
    pub temporary_role: Option<TemporaryRoleClaim>,

    #[serde(default)]
    pub delegation: Option<DelegationClaim>,

    #[serde(default)]
    pub branch_ids: Vec<String>,

    #[serde(default)]
    pub organization_id: Option<String>,

    /// Explicit cross-branch access capability.
    #[serde(default)]
    pub cross_branch_access: bool,
}

/// A role claim with an optional per-claim level override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleClaim {
    pub name: String,
    #[serde(default)]
    pub level: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporaryRoleClaim {
    pub role: String,
    #[serde(default)]
    pub level: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Delegation claim; carries either the delegator's role or a bare level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationClaim {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub level: Option<String>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub on_behalf_of: Option<PrincipalId>,
}

#[derive(Debug, Error)]
pub enum ClaimsError {
    #[error("claims payload is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Identity-boundary settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityPolicy {
    /// Holding any of these roles bypasses scope isolation.
    pub scope_bypass_roles: BTreeSet<String>,
}

impl Default for IdentityPolicy {
    fn default() -> Self {
        Self {
            scope_bypass_roles: BTreeSet::from(["SuperAdmin".to_string()]),
        }
    }
}

fn parse_level(raw: Option<&str>, role: Option<&str>) -> Option<RoleLevel> {
    let raw = raw?;
    match raw.trim().parse::<RoleLevel>() {
        Ok(level) => Some(level),
        Err(_) => {
            warn!(role = ?role, level = raw, "dropping unparsable role level claim");
            None
        }
    }
}

fn non_blank(value: &str) -> bool {
    !value.trim().is_empty()
}

impl IdentityClaims {
    pub fn from_json(json: &str) -> Result<Self, ClaimsError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Convert into an immutable [`IdentityContext`].
    ///
    /// Never fails. Blank names, unparsable levels and malformed scope ids are
    /// dropped, so a bad claim can only narrow access. A delegation with no
    /// usable role or level is dropped as a whole. Levels on a temporary role
    /// or delegation stay attached to that grant and never re-rank the
    /// caller's own roles.
    pub fn into_identity(self, policy: &IdentityPolicy) -> IdentityContext {
        let mut builder = IdentityContext::builder();
        if let Some(sub) = self.sub {
            builder = builder.principal_id(sub);
        }

        let mut bypass = self.cross_branch_access;

        for permission in self.permissions {
            if non_blank(&permission) {
                builder = builder.permission(Permission::new(permission));
            } else {
                warn!("dropping blank permission claim");
            }
        }

        for claim in self.roles {
            if !non_blank(&claim.name) {
                warn!("dropping role claim with a blank name");
                continue;
            }
            if policy.scope_bypass_roles.contains(&claim.name) {
                bypass = true;
            }
            if let Some(level) = parse_level(claim.level.as_deref(), Some(claim.name.as_str())) {
                builder = builder.role_level_override(Role::new(claim.name.clone()), level);
            }
            builder = builder.role(Role::new(claim.name));
        }

        if let Some(temp) = self.temporary_role {
            if non_blank(&temp.role) {
                let level = parse_level(temp.level.as_deref(), Some(temp.role.as_str()));
                let mut grant = TemporaryRole::new(Role::new(temp.role), temp.expires_at);
                if let Some(level) = level {
                    grant = grant.with_level(level);
                }
                builder = builder.temporary_role(grant);
            } else {
                warn!("dropping temporary role claim with a blank role name");
            }
        }

        if let Some(claim) = self.delegation {
            let role = claim.role.filter(|r| non_blank(r));
            let level = parse_level(claim.level.as_deref(), role.as_deref());
            let delegation = match (role, level) {
                (Some(role), level) => {
                    let delegation = Delegation::of_role(Role::new(role), claim.expires_at);
                    Some(match level {
                        Some(level) => delegation.with_level(level),
                        None => delegation,
                    })
                }
                (None, Some(level)) => Some(Delegation::of_level(level, claim.expires_at)),
                (None, None) => {
                    warn!("dropping delegation claim without a usable role or level");
                    None
                }
            };
            if let Some(mut delegation) = delegation {
                if let Some(principal) = claim.on_behalf_of {
                    delegation = delegation.on_behalf_of(principal);
                }
                builder = builder.delegation(delegation);
            }
        }

        for raw in &self.branch_ids {
            match raw.parse::<BranchId>() {
                Ok(branch) => builder = builder.branch(branch),
                Err(err) => warn!(branch_id = %raw, error = %err, "dropping malformed branch claim"),
            }
        }

        if let Some(raw) = &self.organization_id {
            match raw.parse::<OrganizationId>() {
                Ok(org) => builder = builder.organization(org),
                Err(err) => warn!(organization_id = %raw, error = %err, "dropping malformed organization claim"),
            }
        }

        builder.bypass_scope_isolation(bypass).build()
    }
}
