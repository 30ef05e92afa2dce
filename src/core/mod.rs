//! Core domain types.
//!
//! Module order follows type dependency order:
//! - identity: RepoId, IssueId
//! - domain: DepKind, IssueStatus
//! - dep: DepKey, DepEdge
//! - validate: boundary validation of owner/repo strings

pub mod dep;
pub mod domain;
pub mod error;
pub mod identity;
pub mod validate;

pub use dep::{DepEdge, DepKey};
pub use domain::{DepKind, IssueStatus};
pub use error::{CoreError, InvalidDepKind, InvalidInput, SelfDependency};
pub use identity::{IssueId, RepoId};
pub use validate::validate_owner_repo;
