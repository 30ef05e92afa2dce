//! Graph analytics over the blocking subgraph.
//!
//! - cycle: DFS cycle detection and the pre-insert reachability check
//! - rank: the iterative rank propagation engine
//! - queries: ready set, critical path, blockers-to-clear, metrics

pub mod cycle;
pub mod queries;
pub mod rank;

pub use queries::GraphMetrics;
pub use rank::{RankEngine, RankOutcome, RankParams};
