//! Domain enums.
//!
//! DepKind: blocks, relates_to, duplicates, supersedes
//! IssueStatus: open, closed

use serde::{Deserialize, Serialize};

use super::error::{CoreError, InvalidDepKind};

/// Dependency relationship kind.
///
/// Only `Blocks` participates in ranking, ready-detection and blocker
/// counting; the other kinds are carried verbatim for the graph view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepKind {
    Blocks,
    RelatesTo,
    Duplicates,
    Supersedes,
}

impl DepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blocks => "blocks",
            Self::RelatesTo => "relates_to",
            Self::Duplicates => "duplicates",
            Self::Supersedes => "supersedes",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        match raw {
            "blocks" => Ok(Self::Blocks),
            "relates_to" => Ok(Self::RelatesTo),
            "duplicates" => Ok(Self::Duplicates),
            "supersedes" => Ok(Self::Supersedes),
            _ => Err(InvalidDepKind { raw: raw.into() }.into()),
        }
    }
}

/// Open-vs-closed state of an issue, the only lifecycle attribute the
/// engine observes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    Open,
    Closed,
}

impl IssueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}
