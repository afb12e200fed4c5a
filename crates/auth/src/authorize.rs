use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use hrgate_core::PrincipalId;

use crate::identity::IdentityContext;
use crate::permissions;
use crate::roles::{LevelExclusion, RoleEvaluation, RoleHierarchy, RoleHierarchyRequirement};
use crate::scope::{self, RequestScope, ScopeKind};
use crate::{Permission, RoleLevel, RoleLevelTable};

/// Tracing target for denial/audit events.
pub const AUDIT_TARGET: &str = "hrgate::audit";

/// Why an operation was denied.
///
/// Every variant is a deny; none of them escape as a failure of the engine.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum AuthzError {
    #[error("no identity context")]
    MissingIdentity,

    #[error("required permission '{required}' is malformed")]
    MalformedPermission { required: Permission },

    #[error("forbidden: missing permission '{required}'")]
    MissingPermission { required: Permission },

    #[error("no resolvable role (required level {minimum_level})")]
    NoResolvableRole { minimum_level: RoleLevel },

    #[error("role level {effective_level} is below required level {minimum_level}")]
    InsufficientRoleLevel {
        minimum_level: RoleLevel,
        effective_level: RoleLevel,
    },

    #[error("malformed {kind} scope value '{raw}'")]
    MalformedScopeValue { kind: ScopeKind, raw: String },

    #[error("caller carries no {kind} scope claim")]
    MissingScopeClaim { kind: ScopeKind },

    #[error("{kind} {requested} is outside the caller's scope")]
    ScopeMismatch { kind: ScopeKind, requested: i64 },
}

impl AuthzError {
    /// Stable short code for audit records.
    pub fn code(&self) -> &'static str {
        match self {
            AuthzError::MissingIdentity => "missing_identity",
            AuthzError::MalformedPermission { .. } => "malformed_permission",
            AuthzError::MissingPermission { .. } => "missing_permission",
            AuthzError::NoResolvableRole { .. } => "no_resolvable_role",
            AuthzError::InsufficientRoleLevel { .. } => "insufficient_role_level",
            AuthzError::MalformedScopeValue { .. } => "malformed_scope_value",
            AuthzError::MissingScopeClaim { .. } => "missing_scope_claim",
            AuthzError::ScopeMismatch { .. } => "scope_mismatch",
        }
    }
}

/// Requirement attached to a protected operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Requirement {
    Permission { permission: Permission },
    RoleHierarchy { minimum_level: RoleLevel },
}

impl Requirement {
    pub fn permission(permission: impl Into<Permission>) -> Self {
        Self::Permission {
            permission: permission.into(),
        }
    }

    pub fn role_level(minimum_level: RoleLevel) -> Self {
        Self::RoleHierarchy { minimum_level }
    }
}

impl From<RoleHierarchyRequirement> for Requirement {
    fn from(value: RoleHierarchyRequirement) -> Self {
        Self::role_level(value.minimum_level)
    }
}

/// Operation-side authorization contract.
///
/// Implement this on operations that carry requirements; the request pipeline
/// evaluates them before dispatching.
pub trait ProtectedOperation {
    fn requirements(&self) -> &[Requirement];

    /// Requested scope values resolved from the request.
    fn scope(&self) -> RequestScope {
        RequestScope::none()
    }
}

/// Outcome of one authorization decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(AuthzError),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    pub fn denial(&self) -> Option<&AuthzError> {
        match self {
            Decision::Allow => None,
            Decision::Deny(err) => Some(err),
        }
    }

    pub fn into_result(self) -> Result<(), AuthzError> {
        match self {
            Decision::Allow => Ok(()),
            Decision::Deny(err) => Err(err),
        }
    }
}

impl From<Result<(), AuthzError>> for Decision {
    fn from(value: Result<(), AuthzError>) -> Self {
        match value {
            Ok(()) => Decision::Allow,
            Err(err) => Decision::Deny(err),
        }
    }
}

/// Composes the permission matcher, role hierarchy and scope guard.
///
/// Holds only the read-only role table; cheap to clone and safe to share.
#[derive(Debug, Clone, Default)]
pub struct Authorizer {
    hierarchy: RoleHierarchy,
}

impl Authorizer {
    pub fn new(table: Arc<RoleLevelTable>) -> Self {
        Self {
            hierarchy: RoleHierarchy::new(table),
        }
    }

    pub fn hierarchy(&self) -> &RoleHierarchy {
        &self.hierarchy
    }

    /// Decide whether the caller may proceed.
    ///
    /// Permission requirements run first, then role requirements, then scope
    /// isolation. The first deny is final.
    ///
    /// - No IO
    /// - No panics
    /// - No caching: every call recomputes from its inputs
    pub fn authorize(
        &self,
        identity: Option<&IdentityContext>,
        requirements: &[Requirement],
        scope: &RequestScope,
        now: DateTime<Utc>,
    ) -> Decision {
        let decision = Decision::from(self.evaluate(identity, requirements, scope, now));
        if let Decision::Deny(reason) = &decision {
            warn!(
                target: AUDIT_TARGET,
                code = reason.code(),
                principal_id = ?identity.and_then(IdentityContext::principal_id),
                %reason,
                "authorization denied"
            );
        } else {
            debug!(requirements = requirements.len(), "authorization allowed");
        }
        decision
    }

    pub fn authorize_operation<O>(
        &self,
        identity: Option<&IdentityContext>,
        operation: &O,
        now: DateTime<Utc>,
    ) -> Decision
    where
        O: ProtectedOperation + ?Sized,
    {
        self.authorize(identity, operation.requirements(), &operation.scope(), now)
    }

    fn evaluate(
        &self,
        identity: Option<&IdentityContext>,
        requirements: &[Requirement],
        scope: &RequestScope,
        now: DateTime<Utc>,
    ) -> Result<(), AuthzError> {
        let identity = identity.ok_or(AuthzError::MissingIdentity)?;

        for requirement in requirements {
            if let Requirement::Permission { permission } = requirement {
                check_permission(identity, permission)?;
            }
        }

        let mut roles: Option<RoleEvaluation> = None;
        for requirement in requirements {
            if let Requirement::RoleHierarchy { minimum_level } = requirement {
                let eval = roles.get_or_insert_with(|| self.hierarchy.evaluate(identity, now));
                check_role_level(eval, *minimum_level)?;
            }
        }

        scope::allows(Some(identity), scope)
    }

    /// Evaluate every check without short-circuiting, for audit/diagnostics.
    ///
    /// The resulting `granted` always agrees with [`authorize`](Self::authorize).
    pub fn explain(
        &self,
        identity: Option<&IdentityContext>,
        requirements: &[Requirement],
        scope: &RequestScope,
        now: DateTime<Utc>,
    ) -> AuthorizationExplanation {
        let Some(identity) = identity else {
            return AuthorizationExplanation {
                granted: false,
                denial: Some(AuthzError::MissingIdentity),
                principal_id: None,
                effective_level: None,
                level_exclusions: Vec::new(),
                checks: Vec::new(),
            };
        };

        let roles = self.hierarchy.evaluate(identity, now);
        let mut checks = Vec::with_capacity(requirements.len() + 2);

        for requirement in requirements {
            if let Requirement::Permission { permission } = requirement {
                checks.push(CheckOutcome::new(
                    CheckKind::Permission,
                    permission.to_string(),
                    check_permission(identity, permission),
                ));
            }
        }
        for requirement in requirements {
            if let Requirement::RoleHierarchy { minimum_level } = requirement {
                checks.push(CheckOutcome::new(
                    CheckKind::RoleHierarchy,
                    format!("level >= {minimum_level}"),
                    check_role_level(&roles, *minimum_level),
                ));
            }
        }
        if let Some(branch) = &scope.branch {
            checks.push(CheckOutcome::new(
                CheckKind::BranchScope,
                branch.raw.clone(),
                scope::allows_branch(Some(identity), Some(branch)),
            ));
        }
        if let Some(org) = &scope.organization {
            checks.push(CheckOutcome::new(
                CheckKind::OrganizationScope,
                org.raw.clone(),
                scope::allows_organization(Some(identity), Some(org)),
            ));
        }

        let denial = checks.iter().find_map(|c| c.denial.clone());
        AuthorizationExplanation {
            granted: denial.is_none(),
            denial,
            principal_id: identity.principal_id(),
            effective_level: roles.effective_level,
            level_exclusions: roles.exclusions,
            checks,
        }
    }
}

fn check_permission(identity: &IdentityContext, required: &Permission) -> Result<(), AuthzError> {
    if required.required_parts().is_none() {
        return Err(AuthzError::MalformedPermission {
            required: required.clone(),
        });
    }
    if permissions::matches(required, identity.permissions()) {
        Ok(())
    } else {
        Err(AuthzError::MissingPermission {
            required: required.clone(),
        })
    }
}

fn check_role_level(eval: &RoleEvaluation, minimum_level: RoleLevel) -> Result<(), AuthzError> {
    match eval.effective_level {
        None => Err(AuthzError::NoResolvableRole { minimum_level }),
        Some(level) if eval.satisfies(RoleHierarchyRequirement::new(minimum_level)) => {
            debug!(level, minimum_level, "role level satisfied");
            Ok(())
        }
        Some(effective_level) => Err(AuthzError::InsufficientRoleLevel {
            minimum_level,
            effective_level,
        }),
    }
}

/// Authorize against the built-in role table.
pub fn authorize(
    identity: Option<&IdentityContext>,
    requirements: &[Requirement],
    scope: &RequestScope,
    now: DateTime<Utc>,
) -> Decision {
    Authorizer::default().authorize(identity, requirements, scope, now)
}

// ─────────────────────────────────────────────────────────────────────────────
// Authorization Explanation (Audit Trail)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Permission,
    RoleHierarchy,
    BranchScope,
    OrganizationScope,
}

/// Result of one check, in evaluation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckOutcome {
    pub kind: CheckKind,
    /// What was checked (permission string, threshold, scope value).
    pub subject: String,
    pub passed: bool,
    pub denial: Option<AuthzError>,
}

impl CheckOutcome {
    fn new(kind: CheckKind, subject: String, result: Result<(), AuthzError>) -> Self {
        let denial = result.err();
        Self {
            kind,
            subject,
            passed: denial.is_none(),
            denial,
        }
    }
}

/// Detailed explanation of an authorization decision.
///
/// Not surfaced to callers; intended for the audit collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorizationExplanation {
    pub granted: bool,
    /// First failing check in evaluation order (the one `authorize` reports).
    pub denial: Option<AuthzError>,
    pub principal_id: Option<PrincipalId>,
    pub effective_level: Option<RoleLevel>,
    pub level_exclusions: Vec<LevelExclusion>,
    pub checks: Vec<CheckOutcome>,
}

/// Audit entry for one decision, handed to an external audit logger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditRecord {
    pub decided_at: DateTime<Utc>,
    pub principal_id: Option<PrincipalId>,
    pub allowed: bool,
    pub code: Option<&'static str>,
    pub reason: Option<String>,
    pub requirements: Vec<Requirement>,
    pub scope: RequestScope,
}

impl AuditRecord {
    pub fn new(
        identity: Option<&IdentityContext>,
        requirements: &[Requirement],
        scope: &RequestScope,
        decision: &Decision,
        decided_at: DateTime<Utc>,
    ) -> Self {
        let denial = decision.denial();
        Self {
            decided_at,
            principal_id: identity.and_then(IdentityContext::principal_id),
            allowed: decision.is_allowed(),
            code: denial.map(AuthzError::code),
            reason: denial.map(ToString::to_string),
            requirements: requirements.to_vec(),
            scope: scope.clone(),
        }
    }

    /// Emit on the audit tracing target as a single JSON field.
    pub fn emit(&self) {
        match serde_json::to_string(self) {
            Ok(json) => info!(target: AUDIT_TARGET, record = %json, "authorization decision"),
            Err(err) => warn!(target: AUDIT_TARGET, error = %err, "failed to encode audit record"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::TemporaryRole;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    fn manager() -> IdentityContext {
        IdentityContext::builder()
            .principal_id(PrincipalId::new())
            .role("Manager")
            .permissions(["Employee.View", "Leave.*.Approve"])
            .branches([1i64, 2, 3])
            .organization(9i64)
            .build()
    }

    #[test]
    fn all_checks_pass() {
        let reqs = [
            Requirement::permission("Employee.View"),
            Requirement::permission("Leave.Approve"),
            Requirement::role_level(60),
        ];
        let scope = RequestScope::branch("2").with_organization("9");
        assert_eq!(authorize(Some(&manager()), &reqs, &scope, now()), Decision::Allow);
    }

    #[test]
    fn no_requirements_and_no_scope_allows_authenticated_caller() {
        let id = IdentityContext::builder().build();
        assert!(authorize(Some(&id), &[], &RequestScope::none(), now()).is_allowed());
    }

    #[test]
    fn missing_identity_denies_first() {
        let decision = authorize(None, &[], &RequestScope::none(), now());
        assert_eq!(decision, Decision::Deny(AuthzError::MissingIdentity));
    }

    #[test]
    fn permission_checked_before_role_and_scope() {
        let reqs = [Requirement::role_level(100), Requirement::permission("Payroll.Run")];
        let decision = authorize(Some(&manager()), &reqs, &RequestScope::branch("77"), now());
        assert_eq!(
            decision,
            Decision::Deny(AuthzError::MissingPermission { required: Permission::new("Payroll.Run") })
        );
    }

    #[test]
    fn role_checked_before_scope() {
        let reqs = [Requirement::role_level(61)];
        let decision = authorize(Some(&manager()), &reqs, &RequestScope::branch("77"), now());
        assert_eq!(
            decision,
            Decision::Deny(AuthzError::InsufficientRoleLevel { minimum_level: 61, effective_level: 60 })
        );
    }

    #[test]
    fn scope_denies_after_other_checks_pass() {
        let reqs = [Requirement::permission("Employee.View")];
        let decision = authorize(Some(&manager()), &reqs, &RequestScope::branch("4"), now());
        assert_eq!(
            decision,
            Decision::Deny(AuthzError::ScopeMismatch { kind: ScopeKind::Branch, requested: 4 })
        );
    }

    #[test]
    fn malformed_required_permission_denies() {
        let reqs = [Requirement::permission("Employee")];
        let decision = authorize(Some(&manager()), &reqs, &RequestScope::none(), now());
        assert!(matches!(decision, Decision::Deny(AuthzError::MalformedPermission { .. })));
    }

    #[test]
    fn no_resolvable_role_is_reported_as_such() {
        let id = IdentityContext::builder().role("Intern").build();
        let decision = authorize(Some(&id), &[Requirement::role_level(0)], &RequestScope::none(), now());
        assert_eq!(decision, Decision::Deny(AuthzError::NoResolvableRole { minimum_level: 0 }));
    }

    #[test]
    fn custom_table_is_used() {
        let table = RoleLevelTable::from_json(r#"[{"role":"Manager","level":95}]"#).unwrap();
        let authorizer = Authorizer::new(Arc::new(table));
        let decision = authorizer.authorize(
            Some(&manager()),
            &[Requirement::role_level(90)],
            &RequestScope::none(),
            now(),
        );
        assert!(decision.is_allowed());
    }

    struct ApproveLeave {
        requirements: Vec<Requirement>,
        branch: String,
    }

    impl ProtectedOperation for ApproveLeave {
        fn requirements(&self) -> &[Requirement] {
            &self.requirements
        }

        fn scope(&self) -> RequestScope {
            RequestScope::branch(self.branch.clone())
        }
    }

    #[test]
    fn protected_operation_supplies_requirements_and_scope() {
        let op = ApproveLeave {
            requirements: vec![Requirement::permission("Leave.Approve"), Requirement::role_level(50)],
            branch: "3".to_string(),
        };
        let authorizer = Authorizer::default();
        assert!(authorizer.authorize_operation(Some(&manager()), &op, now()).is_allowed());

        let foreign = ApproveLeave { branch: "8".to_string(), ..op };
        assert!(!authorizer.authorize_operation(Some(&manager()), &foreign, now()).is_allowed());
    }

    #[test]
    fn explanation_collects_every_check_and_agrees_with_decision() {
        let id = IdentityContext::builder()
            .role("Manager")
            .temporary_role(TemporaryRole::new("HRManager", now() - Duration::hours(1)))
            .permission("Employee.View")
            .branch(1i64)
            .build();
        let reqs = [
            Requirement::permission("Payroll.Run"),
            Requirement::permission("Employee.View"),
            Requirement::role_level(80),
        ];
        let scope = RequestScope::branch("2");
        let authorizer = Authorizer::default();

        let explanation = authorizer.explain(Some(&id), &reqs, &scope, now());
        let decision = authorizer.authorize(Some(&id), &reqs, &scope, now());

        assert!(!explanation.granted);
        assert_eq!(explanation.denial.as_ref(), decision.denial());
        assert_eq!(explanation.checks.len(), 4);
        assert_eq!(
            explanation.checks.iter().map(|c| c.passed).collect::<Vec<_>>(),
            vec![false, true, false, false]
        );
        assert_eq!(explanation.effective_level, Some(60));
        assert!(matches!(
            explanation.level_exclusions.as_slice(),
            [LevelExclusion::ExpiredElevation { .. }]
        ));
    }

    #[test]
    fn audit_record_serializes_denial() {
        let id = manager();
        let reqs = [Requirement::permission("Payroll.Run")];
        let scope = RequestScope::none();
        let decision = authorize(Some(&id), &reqs, &scope, now());
        let record = AuditRecord::new(Some(&id), &reqs, &scope, &decision, now());

        assert!(!record.allowed);
        assert_eq!(record.code, Some("missing_permission"));

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["requirements"][0]["type"], "permission");
        assert_eq!(json["requirements"][0]["permission"], "Payroll.Run");
        assert_eq!(json["code"], "missing_permission");
        record.emit();
    }

    #[test]
    fn error_codes_match_serialized_tags() {
        let errors = [
            AuthzError::MissingIdentity,
            AuthzError::NoResolvableRole { minimum_level: 1 },
            AuthzError::MissingScopeClaim { kind: ScopeKind::Branch },
            AuthzError::ScopeMismatch { kind: ScopeKind::Organization, requested: 3 },
        ];
        for err in errors {
            let json = serde_json::to_value(&err).unwrap();
            assert_eq!(json["code"], err.code());
        }
    }
}
