use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Permission string, either required by an operation or granted to a caller.
///
/// Required permissions have exactly two non-empty segments (`Module.Action`).
/// Granted permissions may additionally be one of two wildcard patterns:
///
/// - `Module.*.Action` grants `Action` on every resource of `Module`
/// - `Module.*.*` grants every action of `Module`
///
/// Anything else is malformed and never matches. Comparison is byte-wise and
/// case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

const WILDCARD: &str = "*";

fn is_literal(segment: &str) -> bool {
    !segment.is_empty() && segment != WILDCARD
}

/// How a granted permission string is interpreted by the matcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantShape<'a> {
    /// Two non-empty segments; matches only the identical required string.
    Exact,
    /// `Module.*.Action`.
    AnyResource { module: &'a str, action: &'a str },
    /// `Module.*.*`.
    AnyInModule { module: &'a str },
    /// Blank, wrong segment count, empty segments, or a non-wildcard middle.
    Malformed,
}

impl Permission {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split a required permission into `(module, action)`.
    ///
    /// Returns `None` unless the string is exactly two non-empty, non-wildcard
    /// segments.
    pub fn required_parts(&self) -> Option<(&str, &str)> {
        let mut parts = self.0.split('.');
        let module = parts.next()?;
        let action = parts.next()?;
        if parts.next().is_some() || !is_literal(module) || !is_literal(action) {
            return None;
        }
        Some((module, action))
    }

    /// Classify this string as a granted permission.
    pub fn grant_shape(&self) -> GrantShape<'_> {
        if self.0.trim().is_empty() {
            return GrantShape::Malformed;
        }

        let mut parts = self.0.split('.');
        let first = parts.next();
        let second = parts.next();
        let third = parts.next();
        if parts.next().is_some() {
            return GrantShape::Malformed;
        }

        match (first, second, third) {
            (Some(m), Some(a), None) if is_literal(m) && is_literal(a) => GrantShape::Exact,
            (Some(m), Some(WILDCARD), Some(WILDCARD)) if is_literal(m) => {
                GrantShape::AnyInModule { module: m }
            }
            (Some(m), Some(WILDCARD), Some(a)) if is_literal(m) && is_literal(a) => {
                GrantShape::AnyResource { module: m, action: a }
            }
            _ => GrantShape::Malformed,
        }
    }

    /// Whether this granted permission satisfies `required`.
    ///
    /// `required` must already be known to be well-formed.
    fn grants(&self, required: &Permission, module: &str, action: &str) -> bool {
        match self.grant_shape() {
            GrantShape::Exact => self.0 == required.0,
            GrantShape::AnyResource { module: m, action: a } => m == module && a == action,
            GrantShape::AnyInModule { module: m } => m == module,
            GrantShape::Malformed => false,
        }
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for Permission {
    fn from(value: &'static str) -> Self {
        Self::new(value)
    }
}

/// Decide whether any granted permission satisfies `required`.
///
/// A malformed `required` never matches. Stops at the first match; otherwise
/// a single linear pass over `granted`.
pub fn matches<'a, I>(required: &Permission, granted: I) -> bool
where
    I: IntoIterator<Item = &'a Permission>,
{
    let Some((module, action)) = required.required_parts() else {
        return false;
    };

    granted
        .into_iter()
        .any(|g| g.grants(required, module, action))
}
