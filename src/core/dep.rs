//! Dependency edges.
//!
//! DepKey: identity tuple (from, to); `from` depends on `to`. For
//! `kind = blocks` that reads: `from` is blocked, `to` is the blocker.
//! Self-dependencies are structurally impossible - the constructor
//! validates that `from != to`.

use serde::{Deserialize, Serialize};

use super::domain::DepKind;
use super::error::{CoreError, SelfDependency};
use super::identity::{IssueId, RepoId};

/// Dependency identity tuple.
///
/// Edges are unique per (repo, from, to) regardless of kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DepKey {
    from: IssueId,
    to: IssueId,
    kind: DepKind,
}

impl DepKey {
    /// Create a new dependency key.
    ///
    /// Returns an error if `from == to`.
    pub fn new(from: IssueId, to: IssueId, kind: DepKind) -> Result<Self, CoreError> {
        if from == to {
            return Err(SelfDependency {
                issue: from.value(),
            }
            .into());
        }
        Ok(Self { from, to, kind })
    }

    /// The issue that depends on another (the blocked side for `blocks`).
    pub fn from(&self) -> IssueId {
        self.from
    }

    /// The issue being depended on (the blocker for `blocks`).
    pub fn to(&self) -> IssueId {
        self.to
    }

    pub fn kind(&self) -> DepKind {
        self.kind
    }
}

/// A stored dependency edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepEdge {
    pub repo: RepoId,
    pub from: IssueId,
    pub to: IssueId,
    pub kind: DepKind,
    /// Creation time, unix seconds.
    pub created_at: i64,
}

impl DepEdge {
    pub fn is_blocking(&self) -> bool {
        self.kind == DepKind::Blocks
    }
}
