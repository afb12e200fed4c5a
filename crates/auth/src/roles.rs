//! Role hierarchy: role names, the role→level table, and effective-level
//! evaluation across direct roles, temporary elevation and delegation.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use hrgate_core::DomainError;

use crate::identity::{DelegatedAuthority, IdentityContext};

/// Integer rank of a role; higher means more privileged.
pub type RoleLevel = i32;

/// Role identifier used for RBAC.
///
/// Roles are opaque, case-sensitive names at this layer. Their rank comes
/// from a [`RoleLevelTable`] or a per-identity override.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for Role {
    fn from(value: &'static str) -> Self {
        Self::new(value)
    }
}

/// Built-in role ranks.
pub const BUILTIN_ROLE_LEVELS: &[(&str, RoleLevel)] = &[
    ("Guest", 10),
    ("Employee", 20),
    ("SeniorEmployee", 30),
    ("Supervisor", 40),
    ("TeamLead", 50),
    ("Manager", 60),
    ("RegionalManager", 70),
    ("HRManager", 80),
    ("Admin", 90),
    ("SuperAdmin", 100),
];

static BUILTIN_TABLE: LazyLock<Arc<RoleLevelTable>> = LazyLock::new(|| {
    Arc::new(RoleLevelTable {
        levels: BUILTIN_ROLE_LEVELS
            .iter()
            .map(|(name, level)| (Cow::Borrowed(*name), *level))
            .collect(),
    })
});

#[derive(Debug, Error)]
pub enum RoleTableError {
    #[error("role table is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Invalid(#[from] DomainError),
}

/// One row of a role table as it appears in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleLevelEntry {
    pub role: String,
    pub level: RoleLevel,
}

/// Read-only role name → level map.
///
/// Frozen after construction; share it behind an `Arc` across threads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleLevelTable {
    levels: HashMap<Cow<'static, str>, RoleLevel>,
}

impl RoleLevelTable {
    /// The process-wide built-in table.
    pub fn builtin() -> Arc<RoleLevelTable> {
        Arc::clone(&BUILTIN_TABLE)
    }

    /// Build a table from configuration rows.
    ///
    /// Rejects blank role names and duplicate role names.
    pub fn from_entries<I>(entries: I) -> Result<Self, DomainError>
    where
        I: IntoIterator<Item = RoleLevelEntry>,
    {
        let mut levels = HashMap::new();
        for entry in entries {
            if entry.role.trim().is_empty() {
                return Err(DomainError::validation("role table entry has a blank role name"));
            }
            if levels.contains_key(entry.role.as_str()) {
                return Err(DomainError::validation(format!(
                    "role '{}' appears more than once in the role table",
                    entry.role
                )));
            }
            levels.insert(Cow::Owned(entry.role), entry.level);
        }
        Ok(Self { levels })
    }

    /// Load a table from a JSON array of `{ "role": ..., "level": ... }` rows.
    pub fn from_json(json: &str) -> Result<Self, RoleTableError> {
        let entries: Vec<RoleLevelEntry> = serde_json::from_str(json)?;
        Ok(Self::from_entries(entries)?)
    }

    pub fn level_of(&self, role: &Role) -> Option<RoleLevel> {
        self.levels.get(role.as_str()).copied()
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

/// Minimum role level attached to a protected operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoleHierarchyRequirement {
    pub minimum_level: RoleLevel,
}

impl RoleHierarchyRequirement {
    pub const fn new(minimum_level: RoleLevel) -> Self {
        Self { minimum_level }
    }
}

/// Where the winning level came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "role", rename_all = "snake_case")]
pub enum LevelSource {
    Direct(Role),
    TemporaryElevation(Role),
    Delegation(Option<Role>),
}

/// Why a claimed role contributed no candidate level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LevelExclusion {
    /// Neither an override nor a table entry exists for the role.
    UnresolvableRole { role: Role },
    ExpiredElevation { role: Role, expired_at: DateTime<Utc> },
    ExpiredDelegation { expired_at: DateTime<Utc> },
}

/// Result of resolving an identity's effective role level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleEvaluation {
    /// Highest candidate level, or `None` when nothing resolved.
    pub effective_level: Option<RoleLevel>,
    pub source: Option<LevelSource>,
    pub exclusions: Vec<LevelExclusion>,
}

impl RoleEvaluation {
    /// An empty candidate set fails every requirement, including
    /// non-positive thresholds.
    pub fn satisfies(&self, requirement: RoleHierarchyRequirement) -> bool {
        self.effective_level
            .is_some_and(|level| level >= requirement.minimum_level)
    }

    fn offer(&mut self, level: RoleLevel, source: LevelSource) {
        if self.effective_level.is_none_or(|best| level > best) {
            self.effective_level = Some(level);
            self.source = Some(source);
        }
    }
}

/// Resolves role levels against a table plus an identity's own overrides.
#[derive(Debug, Clone)]
pub struct RoleHierarchy {
    table: Arc<RoleLevelTable>,
}

impl Default for RoleHierarchy {
    fn default() -> Self {
        Self::new(RoleLevelTable::builtin())
    }
}

impl RoleHierarchy {
    pub fn new(table: Arc<RoleLevelTable>) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &RoleLevelTable {
        &self.table
    }

    /// Level of `role` for this identity: explicit override first, then table.
    pub fn resolve(&self, identity: &IdentityContext, role: &Role) -> Option<RoleLevel> {
        identity
            .role_level_override(role)
            .or_else(|| self.table.level_of(role))
    }

    /// Level of a time-boxed grant: the grant's own level first, then the
    /// regular resolution for its role.
    fn resolve_grant(
        &self,
        identity: &IdentityContext,
        role: &Role,
        grant_level: Option<RoleLevel>,
    ) -> Option<RoleLevel> {
        grant_level.or_else(|| self.resolve(identity, role))
    }

    /// Compute the candidate set and keep the maximum.
    ///
    /// Grants whose expiry is not strictly after `now` are excluded and
    /// recorded; evaluation then proceeds on whatever remains.
    pub fn evaluate(&self, identity: &IdentityContext, now: DateTime<Utc>) -> RoleEvaluation {
        let mut eval = RoleEvaluation {
            effective_level: None,
            source: None,
            exclusions: Vec::new(),
        };

        for role in identity.roles() {
            match self.resolve(identity, role) {
                Some(level) => eval.offer(level, LevelSource::Direct(role.clone())),
                None => eval
                    .exclusions
                    .push(LevelExclusion::UnresolvableRole { role: role.clone() }),
            }
        }

        if let Some(temp) = identity.temporary_role() {
            if temp.expires_at > now {
                match self.resolve_grant(identity, &temp.role, temp.level) {
                    Some(level) => {
                        eval.offer(level, LevelSource::TemporaryElevation(temp.role.clone()))
                    }
                    None => eval.exclusions.push(LevelExclusion::UnresolvableRole {
                        role: temp.role.clone(),
                    }),
                }
            } else {
                eval.exclusions.push(LevelExclusion::ExpiredElevation {
                    role: temp.role.clone(),
                    expired_at: temp.expires_at,
                });
            }
        }

        if let Some(delegation) = identity.delegation() {
            if delegation.expires_at > now {
                match &delegation.authority {
                    DelegatedAuthority::Level(level) => {
                        eval.offer(*level, LevelSource::Delegation(None))
                    }
                    DelegatedAuthority::Role { role, level } => {
                        match self.resolve_grant(identity, role, *level) {
                            Some(level) => {
                                eval.offer(level, LevelSource::Delegation(Some(role.clone())))
                            }
                            None => eval
                                .exclusions
                                .push(LevelExclusion::UnresolvableRole { role: role.clone() }),
                        }
                    }
                }
            } else {
                eval.exclusions.push(LevelExclusion::ExpiredDelegation {
                    expired_at: delegation.expires_at,
                });
            }
        }

        eval
    }

    pub fn satisfies(
        &self,
        requirement: RoleHierarchyRequirement,
        identity: &IdentityContext,
        now: DateTime<Utc>,
    ) -> bool {
        self.evaluate(identity, now).satisfies(requirement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{Delegation, IdentityContext, TemporaryRole};
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    fn with_roles(roles: &[&'static str]) -> IdentityContext {
        let mut b = IdentityContext::builder();
        for r in roles {
            b = b.role(*r);
        }
        b.build()
    }

    fn req(level: RoleLevel) -> RoleHierarchyRequirement {
        RoleHierarchyRequirement::new(level)
    }

    #[test]
    fn builtin_table_has_expected_ranks() {
        let table = RoleLevelTable::builtin();
        assert_eq!(table.level_of(&Role::new("Guest")), Some(10));
        assert_eq!(table.level_of(&Role::new("SuperAdmin")), Some(100));
        assert_eq!(table.level_of(&Role::new("superadmin")), None);
        assert_eq!(table.len(), BUILTIN_ROLE_LEVELS.len());
    }

    #[test]
    fn single_role_compares_against_threshold() {
        let h = RoleHierarchy::default();
        let id = with_roles(&["Manager"]);
        assert!(h.satisfies(req(60), &id, now()));
        assert!(h.satisfies(req(59), &id, now()));
        assert!(!h.satisfies(req(61), &id, now()));
    }

    #[test]
    fn highest_of_multiple_roles_wins() {
        let h = RoleHierarchy::default();
        let id = with_roles(&["Guest", "TeamLead", "RegionalManager"]);
        let eval = h.evaluate(&id, now());
        assert_eq!(eval.effective_level, Some(70));
        assert_eq!(eval.source, Some(LevelSource::Direct(Role::new("RegionalManager"))));
        assert!(eval.satisfies(req(65)));
    }

    #[test]
    fn no_resolvable_role_fails_every_threshold() {
        let h = RoleHierarchy::default();
        for id in [with_roles(&[]), with_roles(&["Intern", "Contractor"])] {
            for threshold in [i32::MIN, -1, 0, 10] {
                assert!(!h.satisfies(req(threshold), &id, now()));
            }
        }
    }

    #[test]
    fn non_positive_threshold_passes_with_any_resolved_role() {
        let h = RoleHierarchy::default();
        let id = with_roles(&["Guest"]);
        assert!(h.satisfies(req(0), &id, now()));
        assert!(h.satisfies(req(-50), &id, now()));
    }

    #[test]
    fn unknown_roles_are_excluded_not_zero() {
        let h = RoleHierarchy::default();
        let id = with_roles(&["Intern", "Employee"]);
        let eval = h.evaluate(&id, now());
        assert_eq!(eval.effective_level, Some(20));
        assert_eq!(
            eval.exclusions,
            vec![LevelExclusion::UnresolvableRole { role: Role::new("Intern") }]
        );
    }

    #[test]
    fn override_takes_precedence_over_table() {
        let h = RoleHierarchy::default();
        let id = IdentityContext::builder()
            .role("Manager")
            .role_level_override("Manager", 85)
            .role("Intern")
            .role_level_override("Intern", 15)
            .build();
        let eval = h.evaluate(&id, now());
        assert_eq!(eval.effective_level, Some(85));
        assert!(eval.exclusions.is_empty());
    }

    #[test]
    fn active_temporary_elevation_raises_level() {
        let h = RoleHierarchy::default();
        let id = IdentityContext::builder()
            .role("Manager")
            .temporary_role(TemporaryRole::new("HRManager", now() + Duration::hours(1)))
            .build();
        let eval = h.evaluate(&id, now());
        assert_eq!(eval.effective_level, Some(80));
        assert_eq!(eval.source, Some(LevelSource::TemporaryElevation(Role::new("HRManager"))));
    }

    #[test]
    fn expired_elevation_falls_back_to_base_role() {
        let h = RoleHierarchy::default();
        let base = with_roles(&["Manager"]);
        let elevated = IdentityContext::builder()
            .role("Manager")
            .temporary_role(TemporaryRole::new("HRManager", now() - Duration::minutes(5)))
            .build();

        let with_expired = h.evaluate(&elevated, now());
        let without = h.evaluate(&base, now());
        assert_eq!(with_expired.effective_level, without.effective_level);
        assert!(!with_expired.satisfies(req(80)));
        assert!(matches!(
            with_expired.exclusions.as_slice(),
            [LevelExclusion::ExpiredElevation { .. }]
        ));
    }

    #[test]
    fn expiry_at_exactly_now_is_expired() {
        let h = RoleHierarchy::default();
        let id = IdentityContext::builder()
            .temporary_role(TemporaryRole::new("Admin", now()))
            .build();
        assert!(!h.satisfies(req(0), &id, now()));
    }

    #[test]
    fn delegation_by_role_and_by_level() {
        let h = RoleHierarchy::default();
        let by_role = IdentityContext::builder()
            .role("Employee")
            .delegation(Delegation::of_role("Admin", now() + Duration::days(1)))
            .build();
        assert_eq!(h.evaluate(&by_role, now()).effective_level, Some(90));

        let by_level = IdentityContext::builder()
            .role("Employee")
            .delegation(Delegation::of_level(75, now() + Duration::days(1)))
            .build();
        let eval = h.evaluate(&by_level, now());
        assert_eq!(eval.effective_level, Some(75));
        assert_eq!(eval.source, Some(LevelSource::Delegation(None)));
    }

    #[test]
    fn expired_delegation_is_excluded() {
        let h = RoleHierarchy::default();
        let id = IdentityContext::builder()
            .role("Employee")
            .delegation(Delegation::of_role("Admin", now() - Duration::seconds(1)))
            .build();
        let eval = h.evaluate(&id, now());
        assert_eq!(eval.effective_level, Some(20));
        assert!(matches!(
            eval.exclusions.as_slice(),
            [LevelExclusion::ExpiredDelegation { .. }]
        ));
    }

    #[test]
    fn grant_level_does_not_leak_into_direct_role() {
        let h = RoleHierarchy::default();
        let expired = IdentityContext::builder()
            .role("Manager")
            .temporary_role(TemporaryRole::new("Manager", now() - Duration::hours(1)).with_level(95))
            .delegation(Delegation::of_role("Manager", now() - Duration::hours(1)).with_level(99))
            .build();
        let eval = h.evaluate(&expired, now());
        assert_eq!(eval.effective_level, Some(60));
        assert_eq!(eval.source, Some(LevelSource::Direct(Role::new("Manager"))));

        let lowering = IdentityContext::builder()
            .role("Admin")
            .temporary_role(TemporaryRole::new("Admin", now() + Duration::hours(1)).with_level(10))
            .build();
        assert_eq!(h.evaluate(&lowering, now()).effective_level, Some(90));
    }

    #[test]
    fn active_grant_level_is_used_for_the_grant() {
        let h = RoleHierarchy::default();
        let id = IdentityContext::builder()
            .role("Employee")
            .temporary_role(TemporaryRole::new("ProjectLead", now() + Duration::hours(1)).with_level(55))
            .build();
        let eval = h.evaluate(&id, now());
        assert_eq!(eval.effective_level, Some(55));
        assert_eq!(eval.source, Some(LevelSource::TemporaryElevation(Role::new("ProjectLead"))));
    }

    #[test]
    fn delegation_alone_counts_as_a_resolved_role() {
        let h = RoleHierarchy::default();
        let id = IdentityContext::builder()
            .delegation(Delegation::of_level(5, now() + Duration::hours(2)))
            .build();
        assert!(h.satisfies(req(0), &id, now()));
        assert!(!h.satisfies(req(10), &id, now()));
    }

    #[test]
    fn custom_table_replaces_builtin() {
        let table = RoleLevelTable::from_json(
            r#"[{"role": "Clerk", "level": 15}, {"role": "Director", "level": 95}]"#,
        )
        .unwrap();
        let h = RoleHierarchy::new(Arc::new(table));
        let id = with_roles(&["Director", "Manager"]);
        assert_eq!(h.evaluate(&id, now()).effective_level, Some(95));
    }

    #[test]
    fn table_rejects_duplicates_and_blank_names() {
        let dup = RoleLevelTable::from_json(r#"[{"role":"A","level":1},{"role":"A","level":2}]"#);
        assert!(matches!(dup, Err(RoleTableError::Invalid(DomainError::Validation(_)))));

        let blank = RoleLevelTable::from_json(r#"[{"role":"  ","level":1}]"#);
        assert!(matches!(blank, Err(RoleTableError::Invalid(_))));

        let garbage = RoleLevelTable::from_json("{not json");
        assert!(matches!(garbage, Err(RoleTableError::Parse(_))));
    }

    #[test]
    fn hundreds_of_roles_resolve_to_the_maximum() {
        let h = RoleHierarchy::default();
        let mut b = IdentityContext::builder();
        for i in 0..300 {
            b = b.role(Role::new(format!("Custom{i}")));
        }
        let id = b.role("TeamLead").build();
        let eval = h.evaluate(&id, now());
        assert_eq!(eval.effective_level, Some(50));
        assert_eq!(eval.exclusions.len(), 300);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 256,
                ..ProptestConfig::default()
            })]

            /// Property: a caller satisfies R iff max(levels) >= R.
            #[test]
            fn max_level_decides(
                picks in proptest::collection::vec(0usize..BUILTIN_ROLE_LEVELS.len(), 1..6),
                threshold in -20i32..120,
            ) {
                let h = RoleHierarchy::default();
                let mut b = IdentityContext::builder();
                let mut max = RoleLevel::MIN;
                for i in picks {
                    let (name, level) = BUILTIN_ROLE_LEVELS[i];
                    b = b.role(name);
                    max = max.max(level);
                }
                let id = b.build();
                prop_assert_eq!(h.satisfies(req(threshold), &id, now()), max >= threshold);
            }
        }
    }
}
