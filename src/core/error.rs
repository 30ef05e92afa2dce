//! Core capability errors (parsing, validation, graph invariants).
//!
//! These are bounded and stable: core errors represent domain/refusal
//! states, not library implementation details.

use thiserror::Error;

use crate::error::ErrorKind;

/// Malformed owner/repo string or missing required parameter.
#[derive(Debug, Error, Clone)]
#[error("{field} is invalid: {reason}")]
pub struct InvalidInput {
    pub field: &'static str,
    pub reason: String,
}

/// An issue cannot depend on itself.
#[derive(Debug, Error, Clone)]
#[error("issue {issue} cannot depend on itself")]
pub struct SelfDependency {
    pub issue: i64,
}

/// Unrecognized dependency kind string.
#[derive(Debug, Error, Clone)]
#[error("dependency kind `{raw}` is invalid")]
pub struct InvalidDepKind {
    pub raw: String,
}

/// Canonical error enum for the core capability.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum CoreError {
    #[error(transparent)]
    InvalidInput(#[from] InvalidInput),
    #[error(transparent)]
    SelfDependency(#[from] SelfDependency),
    #[error(transparent)]
    InvalidDepKind(#[from] InvalidDepKind),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::InvalidInput(_) | CoreError::InvalidDepKind(_) => ErrorKind::InvalidInput,
            CoreError::SelfDependency(_) => ErrorKind::Integrity,
        }
    }
}
