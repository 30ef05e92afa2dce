//! Rank propagation engine.
//!
//! Importance flows from blocker to blocked: closing a highly-ranked
//! issue unblocks the work that accumulated behind it. Closed issues
//! are excluded from the node set and from the edge set; an issue with
//! no surviving blocking edges is simply not written to the cache and
//! reads as the baseline score.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::cancel::Cancel;
use crate::config::Config;
use crate::core::{IssueId, RepoId};
use crate::store::{IssueStore, RankEntry, Store};

/// Early-exit threshold on the L1 delta between iterations. Purely an
/// optimization: the fixed point is identical either way.
const CONVERGENCE_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Copy)]
pub struct RankParams {
    pub damping: f64,
    pub iterations: u32,
}

impl RankParams {
    pub fn from_config(config: &Config) -> Self {
        Self {
            damping: config.damping_factor,
            iterations: config.iterations,
        }
    }

    /// Score implied for an open issue absent from the cache, given the
    /// cached row count at read time.
    pub fn baseline(&self, cached: usize) -> f64 {
        (1.0 - self.damping) / cached.max(1) as f64
    }
}

/// What a recomputation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankOutcome {
    /// Participating nodes after closed-issue filtering.
    pub nodes: usize,
    /// Cache rows written.
    pub written: usize,
    /// Cache rows that failed to persist; the rest were kept.
    pub failed: usize,
}

#[derive(Clone)]
pub struct RankEngine {
    store: Arc<Store>,
    issues: Arc<dyn IssueStore>,
    params: RankParams,
}

impl RankEngine {
    pub fn new(store: Arc<Store>, issues: Arc<dyn IssueStore>, params: RankParams) -> Self {
        Self {
            store,
            issues,
            params,
        }
    }

    pub fn params(&self) -> RankParams {
        self.params
    }

    /// Recompute and persist ranks for one repository.
    ///
    /// On success the repository's cache rows are replaced atomically.
    /// Individual row failures are counted and logged; the caller gets
    /// a best-effort cache either way.
    pub fn recompute(&self, cancel: &Cancel, repo: RepoId) -> crate::Result<RankOutcome> {
        cancel.checkpoint()?;

        let open: BTreeSet<IssueId> = self
            .issues
            .open_issues(repo)?
            .into_iter()
            .map(|issue| issue.id)
            .collect();

        // Blocking edges between open issues only.
        let mut blocked_by: BTreeMap<IssueId, Vec<IssueId>> = BTreeMap::new();
        let mut blocks_count: BTreeMap<IssueId, usize> = BTreeMap::new();
        let mut nodes: BTreeSet<IssueId> = BTreeSet::new();
        for edge in self.store.blocks_edges(repo)? {
            if !open.contains(&edge.from) || !open.contains(&edge.to) {
                continue;
            }
            blocked_by.entry(edge.from).or_default().push(edge.to);
            *blocks_count.entry(edge.to).or_default() += 1;
            nodes.insert(edge.from);
            nodes.insert(edge.to);
        }

        let n = nodes.len();
        if n == 0 {
            let (written, failed) = self.store.replace_ranks(repo, &[])?;
            return Ok(RankOutcome {
                nodes: 0,
                written,
                failed,
            });
        }

        let damping = self.params.damping;
        let base = (1.0 - damping) / n as f64;
        let mut ranks: BTreeMap<IssueId, f64> =
            nodes.iter().map(|&v| (v, 1.0 / n as f64)).collect();

        for _ in 0..self.params.iterations {
            cancel.checkpoint()?;
            let mut next = BTreeMap::new();
            let mut delta = 0.0;
            for &v in &nodes {
                let mut rank = base;
                if let Some(blockers) = blocked_by.get(&v) {
                    for blocker in blockers {
                        let out = blocks_count[blocker] as f64;
                        rank += damping * ranks[blocker] / out;
                    }
                }
                delta += (rank - ranks[&v]).abs();
                next.insert(v, rank);
            }
            ranks = next;
            if delta < CONVERGENCE_EPSILON {
                break;
            }
        }

        let now = crate::store::now_unix();
        let rows: Vec<RankEntry> = nodes
            .iter()
            .map(|&v| {
                let degree = blocked_by.get(&v).map_or(0, Vec::len)
                    + blocks_count.get(&v).copied().unwrap_or(0);
                RankEntry {
                    issue: v,
                    rank: ranks[&v],
                    centrality: degree as f64,
                    updated_at: now,
                }
            })
            .collect();

        let (written, failed) = self.store.replace_ranks(repo, &rows)?;
        if failed > 0 {
            tracing::warn!(
                repo = repo.value(),
                written,
                failed,
                "rank cache update was partial"
            );
        } else {
            tracing::trace!(repo = repo.value(), nodes = n, written, "rank cache updated");
        }
        Ok(RankOutcome {
            nodes: n,
            written,
            failed,
        })
    }
}
