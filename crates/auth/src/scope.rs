//! Branch / organization scope isolation.
//!
//! The request layer resolves at most one requested value per scope kind
//! (route parameter, then query string, then body field). The guard decides
//! whether the caller may act within it.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use hrgate_core::{BranchId, OrganizationId};

use crate::authorize::AuthzError;
use crate::identity::IdentityContext;

/// Which isolation boundary a scope value belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    Branch,
    Organization,
}

impl core::fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ScopeKind::Branch => f.write_str("branch"),
            ScopeKind::Organization => f.write_str("organization"),
        }
    }
}

/// Where in the request a scope value was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeSource {
    Route,
    Query,
    Body,
}

/// A raw, not yet validated scope value and its origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedScope {
    pub raw: String,
    pub source: ScopeSource,
}

impl RequestedScope {
    pub fn new(raw: impl Into<String>, source: ScopeSource) -> Self {
        Self {
            raw: raw.into(),
            source,
        }
    }
}

/// Candidate values for one scope kind, as extracted by the request layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScopeSources<'a> {
    pub route: Option<&'a str>,
    pub query: Option<&'a str>,
    pub body: Option<&'a str>,
}

impl ScopeSources<'_> {
    /// Pick the first present value in route > query > body order.
    ///
    /// A present-but-empty value still wins: it reaches the guard and is
    /// denied as malformed rather than falling through to a later source.
    pub fn resolve(&self) -> Option<RequestedScope> {
        [
            (self.route, ScopeSource::Route),
            (self.query, ScopeSource::Query),
            (self.body, ScopeSource::Body),
        ]
        .into_iter()
        .find_map(|(value, source)| value.map(|raw| RequestedScope::new(raw, source)))
    }
}

/// Requested scope values carried by one operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestScope {
    pub branch: Option<RequestedScope>,
    pub organization: Option<RequestedScope>,
}

impl RequestScope {
    /// No scope restriction (organization-wide / general endpoint).
    pub fn none() -> Self {
        Self::default()
    }

    pub fn branch(raw: impl Into<String>) -> Self {
        Self {
            branch: Some(RequestedScope::new(raw, ScopeSource::Route)),
            organization: None,
        }
    }

    pub fn from_sources(branch: ScopeSources<'_>, organization: ScopeSources<'_>) -> Self {
        Self {
            branch: branch.resolve(),
            organization: organization.resolve(),
        }
    }

    pub fn with_organization(mut self, raw: impl Into<String>) -> Self {
        self.organization = Some(RequestedScope::new(raw, ScopeSource::Route));
        self
    }
}

/// Branch-level guard.
///
/// Order: missing identity denies; no requested value allows; a malformed
/// value denies; bypass allows; otherwise the value must be one of the
/// caller's branches (an empty branch set denies).
pub fn allows_branch(
    identity: Option<&IdentityContext>,
    requested: Option<&RequestedScope>,
) -> Result<(), AuthzError> {
    let identity = identity.ok_or(AuthzError::MissingIdentity)?;
    let Some(requested) = requested else {
        return Ok(());
    };

    let branch: BranchId = parse_requested(ScopeKind::Branch, requested)?;

    if identity.bypass_scope_isolation() {
        debug!(%branch, "scope isolation bypassed");
        return Ok(());
    }
    if identity.branch_ids().is_empty() {
        return Err(AuthzError::MissingScopeClaim { kind: ScopeKind::Branch });
    }
    if identity.branch_ids().contains(&branch) {
        Ok(())
    } else {
        Err(AuthzError::ScopeMismatch {
            kind: ScopeKind::Branch,
            requested: branch.get(),
        })
    }
}

/// Organization-level guard; same shape as [`allows_branch`].
pub fn allows_organization(
    identity: Option<&IdentityContext>,
    requested: Option<&RequestedScope>,
) -> Result<(), AuthzError> {
    let identity = identity.ok_or(AuthzError::MissingIdentity)?;
    let Some(requested) = requested else {
        return Ok(());
    };

    let org: OrganizationId = parse_requested(ScopeKind::Organization, requested)?;

    if identity.bypass_scope_isolation() {
        debug!(%org, "scope isolation bypassed");
        return Ok(());
    }
    match identity.organization_id() {
        None => Err(AuthzError::MissingScopeClaim {
            kind: ScopeKind::Organization,
        }),
        Some(own) if own == org => Ok(()),
        Some(_) => Err(AuthzError::ScopeMismatch {
            kind: ScopeKind::Organization,
            requested: org.get(),
        }),
    }
}

/// Run both guards; branch first. Either denial is final.
pub fn allows(identity: Option<&IdentityContext>, scope: &RequestScope) -> Result<(), AuthzError> {
    allows_branch(identity, scope.branch.as_ref())?;
    allows_organization(identity, scope.organization.as_ref())
}

fn parse_requested<T>(kind: ScopeKind, requested: &RequestedScope) -> Result<T, AuthzError>
where
    T: core::str::FromStr,
{
    requested.raw.parse::<T>().map_err(|_| {
        warn!(
            %kind,
            source = ?requested.source,
            value = %requested.raw,
            "malformed scope value"
        );
        AuthzError::MalformedScopeValue {
            kind,
            raw: requested.raw.clone(),
        }
    })
}
