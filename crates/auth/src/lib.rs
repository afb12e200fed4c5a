//! `hrgate-auth` — the authorization decision engine.
//!
//! Pure and synchronous: no IO, no shared mutable state, no decision caching.
//! The request pipeline supplies an [`IdentityContext`], the operation's
//! [`Requirement`]s and the resolved [`RequestScope`]; the engine answers
//! with a [`Decision`].

pub mod authorize;
pub mod claims;
pub mod identity;
pub mod permissions;
pub mod roles;
pub mod scope;

pub use authorize::{
    AUDIT_TARGET, AuditRecord, AuthorizationExplanation, Authorizer, AuthzError, CheckKind,
    CheckOutcome, Decision, ProtectedOperation, Requirement, authorize,
};
pub use claims::{ClaimsError, IdentityClaims, IdentityPolicy};
pub use identity::{DelegatedAuthority, Delegation, IdentityContext, IdentityContextBuilder, TemporaryRole};
pub use permissions::{GrantShape, Permission};
pub use roles::{
    BUILTIN_ROLE_LEVELS, LevelExclusion, LevelSource, Role, RoleEvaluation, RoleHierarchy,
    RoleHierarchyRequirement, RoleLevel, RoleLevelEntry, RoleLevelTable, RoleTableError,
};
pub use scope::{RequestScope, RequestedScope, ScopeKind, ScopeSource, ScopeSources};
