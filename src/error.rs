use thiserror::Error;

use crate::cache::SharedFailure;
use crate::cancel::Cancelled;
use crate::config::ConfigError;
use crate::core::CoreError;
use crate::service::ServiceError;
use crate::store::StoreError;

/// Whether retrying this operation may succeed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Transience {
    /// Retry will never help without changing inputs/state.
    Permanent,
    /// Retry may help (transient contention/outage).
    Retryable,
    /// Unknown if retry will help.
    Unknown,
}

impl Transience {
    pub fn is_retryable(self) -> bool {
        matches!(self, Transience::Retryable)
    }
}

/// Boundary classification of an error.
///
/// Consumers map these onto their transport's status codes; the engine
/// itself only guarantees the classification is stable.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorKind {
    /// Malformed caller input (owner/repo strings, parameters).
    InvalidInput,
    /// Unknown repository or issue, or an access check that must not
    /// leak existence.
    NotFound,
    /// The requested record already exists.
    Conflict,
    /// The mutation would violate a graph invariant (cycle, self-loop).
    Integrity,
    /// The underlying store failed in a retryable way.
    Transient,
    /// Anything else.
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Integrity => "integrity_violation",
            ErrorKind::Transient => "transient",
            ErrorKind::Internal => "internal",
        }
    }
}

/// Crate-level convenience error.
///
/// A thin wrapper over the per-capability errors; classification lives
/// with the capability that produced it.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),

    #[error(transparent)]
    Shared(#[from] SharedFailure),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Core(e) => e.kind(),
            Error::Store(e) => e.kind(),
            Error::Config(_) => ErrorKind::InvalidInput,
            Error::Service(e) => e.kind(),
            Error::Cancelled(_) => ErrorKind::Transient,
            Error::Shared(e) => e.kind,
        }
    }

    pub fn transience(&self) -> Transience {
        match self.kind() {
            ErrorKind::Transient => Transience::Retryable,
            ErrorKind::Internal => Transience::Unknown,
            _ => Transience::Permanent,
        }
    }
}
