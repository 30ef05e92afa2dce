#![forbid(unsafe_code)]

pub mod cache;
pub mod cancel;
pub mod config;
pub mod core;
pub mod error;
pub mod graph;
pub mod service;
pub mod store;
pub mod task;
pub mod telemetry;

pub use error::{Error, ErrorKind, Transience};
pub type Result<T> = std::result::Result<T, Error>;

// Re-export core types at crate root for convenience
pub use crate::cancel::{Cancel, Cancelled};
pub use crate::config::{Config, ConfigLayer, LogFormat, LoggingConfig};
pub use crate::core::{CoreError, DepEdge, DepKey, DepKind, IssueId, IssueStatus, RepoId};
pub use crate::graph::{GraphMetrics, RankEngine, RankOutcome, RankParams};
pub use crate::service::{
    ActorRef, AuditEvent, AuditSink, GraphResponse, LogAuditSink, MemoryAuditSink, ReadyResponse,
    RepoRef, RobotService, TriageResponse,
};
pub use crate::store::{Issue, IssueStore, RankEntry, Store, StoreError};
pub use crate::task::{RecomputeTask, SweepReport};
