//! `hrgate-core` — identifier and error primitives shared by the
//! authorization engine.
//!
//! This crate contains no policy and no infrastructure concerns.

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{BranchId, OrganizationId, PrincipalId, parse_scope_id};
