//! Robot query service: triage, ready, graph.
//!
//! All three operations share one preamble: feature gate, boundary
//! validation, audit, then a snapshot from the request-time cache. The
//! snapshot carries everything a response needs, so concurrent readers
//! of one repository see the same data.

mod audit;
mod response;

pub use audit::{AuditEvent, AuditSink, LogAuditSink, MemoryAuditSink};
pub use response::{
    BlockerInfo, GraphEdge, GraphNode, GraphResponse, ProjectHealth, QuickRef, ReadyIssue,
    ReadyResponse, Recommendation, TriageResponse,
};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crossbeam::channel::Receiver;
use thiserror::Error;
use time::OffsetDateTime;

use crate::cache::TtlCache;
use crate::cancel::Cancel;
use crate::config::Config;
use crate::core::{DepEdge, DepKind, IssueId, RepoId, validate_owner_repo};
use crate::error::ErrorKind;
use crate::graph::{GraphMetrics, RankEngine, RankParams, queries};
use crate::store::{Issue, IssueStore, Store};

/// Labels whose presence marks an issue as explicitly prioritized.
const PRIORITY_LABEL_HINTS: &[&str] = &["priority", "urgent", "critical", "high"];
const MAX_RECOMMENDATIONS: usize = 10;
const MAX_BLOCKERS: usize = 5;

#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum ServiceError {
    #[error("not found")]
    NotFound,
    #[error("feature disabled")]
    Disabled,
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        // A disabled feature reads as not-found; probing the endpoint
        // leaks nothing.
        ErrorKind::NotFound
    }
}

/// Caller identity for auditing; the engine performs no permission
/// checks itself.
#[derive(Debug, Clone)]
pub struct ActorRef {
    pub id: i64,
    pub name: String,
}

impl ActorRef {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    pub fn anonymous() -> Self {
        Self {
            id: 0,
            name: "anonymous".into(),
        }
    }
}

/// A repository already resolved by the caller. The owner/name strings
/// are re-validated at this boundary before anything else happens.
#[derive(Debug, Clone)]
pub struct RepoRef {
    pub id: RepoId,
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn new(id: RepoId, owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id,
            owner: owner.into(),
            name: name.into(),
        }
    }
}

pub struct RobotService {
    store: Arc<Store>,
    issues: Arc<dyn IssueStore>,
    engine: RankEngine,
    cache: TtlCache<RepoSnapshot>,
    audit: Arc<dyn AuditSink>,
    config: Config,
    notices: Receiver<RepoId>,
}

impl RobotService {
    pub fn new(
        store: Arc<Store>,
        issues: Arc<dyn IssueStore>,
        config: Config,
        audit: Arc<dyn AuditSink>,
    ) -> crate::Result<Self> {
        config.validate()?;
        let notices = store.subscribe_invalidations();
        let engine = RankEngine::new(
            Arc::clone(&store),
            Arc::clone(&issues),
            RankParams::from_config(&config),
        );
        let cache = TtlCache::new(config.cache_ttl());
        Ok(Self {
            store,
            issues,
            engine,
            cache,
            audit,
            config,
            notices,
        })
    }

    /// Build a service whose issue store is the SQLite store itself.
    pub fn with_store(store: Arc<Store>, config: Config) -> crate::Result<Self> {
        let issues: Arc<dyn IssueStore> = Arc::clone(&store) as _;
        Self::new(store, issues, config, Arc::new(LogAuditSink))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn engine(&self) -> &RankEngine {
        &self.engine
    }

    /// Drop cached state for a repository: the in-memory entry and the
    /// persistent rank rows.
    pub fn invalidate(&self, repo: RepoId) -> crate::Result<()> {
        self.store.rank_delete_repo(repo)?;
        self.cache.remove(repo);
        Ok(())
    }

    /// Drop one issue's rank row plus the repository's in-memory entry.
    pub fn invalidate_issue(&self, repo: RepoId, issue: IssueId) -> crate::Result<()> {
        self.store.rank_delete_issue(repo, issue)?;
        self.cache.remove(repo);
        Ok(())
    }

    pub fn triage(
        &self,
        cancel: &Cancel,
        actor: &ActorRef,
        repo: &RepoRef,
    ) -> crate::Result<TriageResponse> {
        match self.admitted(actor, repo, "triage") {
            Ok(()) => {}
            Err(err) => return Err(self.boundary(err)),
        }
        match self.snapshot(cancel, repo.id) {
            Ok(snapshot) => Ok(snapshot.triage()),
            Err(err) => Err(self.boundary(err)),
        }
    }

    pub fn ready(
        &self,
        cancel: &Cancel,
        actor: &ActorRef,
        repo: &RepoRef,
    ) -> crate::Result<ReadyResponse> {
        match self.admitted(actor, repo, "ready") {
            Ok(()) => {}
            Err(err) => return Err(self.boundary(err)),
        }
        match self.snapshot(cancel, repo.id) {
            Ok(snapshot) => Ok(snapshot.ready()),
            Err(err) => Err(self.boundary(err)),
        }
    }

    pub fn graph(
        &self,
        cancel: &Cancel,
        actor: &ActorRef,
        repo: &RepoRef,
    ) -> crate::Result<GraphResponse> {
        match self.admitted(actor, repo, "graph") {
            Ok(()) => {}
            Err(err) => return Err(self.boundary(err)),
        }
        match self.snapshot(cancel, repo.id) {
            Ok(snapshot) => Ok(snapshot.graph()),
            Err(err) => Err(self.boundary(err)),
        }
    }

    fn admitted(
        &self,
        actor: &ActorRef,
        repo: &RepoRef,
        endpoint: &'static str,
    ) -> crate::Result<()> {
        if !self.config.enabled_for(repo.id) {
            return Err(ServiceError::Disabled.into());
        }
        if let Err(err) = validate_owner_repo(&repo.owner, &repo.name) {
            self.record(actor, repo, endpoint, false, Some(err.to_string()));
            return Err(err.into());
        }
        self.record(actor, repo, endpoint, true, None);
        Ok(())
    }

    fn record(
        &self,
        actor: &ActorRef,
        repo: &RepoRef,
        endpoint: &'static str,
        ok: bool,
        reason: Option<String>,
    ) {
        if !self.config.audit_log {
            return;
        }
        self.audit.record(AuditEvent {
            actor_id: actor.id,
            actor: actor.name.clone(),
            owner: repo.owner.clone(),
            repo: repo.name.clone(),
            endpoint,
            ok,
            reason,
            ts: OffsetDateTime::now_utc(),
        });
    }

    /// Strict mode hides engine trouble from probes: internal and
    /// transient failures surface as not-found.
    fn boundary(&self, err: crate::Error) -> crate::Error {
        if self.config.strict_mode
            && matches!(err.kind(), ErrorKind::Internal | ErrorKind::Transient)
        {
            return ServiceError::NotFound.into();
        }
        err
    }

    fn snapshot(&self, cancel: &Cancel, repo: RepoId) -> crate::Result<Arc<RepoSnapshot>> {
        self.drain_notices();
        self.cache
            .get_or_compute(repo, cancel, || self.build_snapshot(cancel, repo))
    }

    /// Apply invalidations published since the last request, before the
    /// cache is consulted. A writer that mutated and then reads is thus
    /// guaranteed a post-invalidation computation.
    fn drain_notices(&self) {
        while let Ok(repo) = self.notices.try_recv() {
            self.cache.remove(repo);
        }
    }

    fn build_snapshot(&self, cancel: &Cancel, repo: RepoId) -> crate::Result<RepoSnapshot> {
        cancel.checkpoint()?;

        // Ensure the persistent rank cache is populated; mutations
        // cleared it together with the in-memory entry.
        let mut rank_rows = self.store.rank_all(repo)?;
        if rank_rows.is_empty() {
            self.engine.recompute(cancel, repo)?;
            rank_rows = self.store.rank_all(repo)?;
        }

        let all = self.issues.all_issues(repo)?;
        let edges = self.store.all_deps(repo)?;
        let ready = queries::ready_issues(&self.store, self.issues.as_ref(), repo)?;
        let blockers = queries::blockers_to_clear(&self.store, self.issues.as_ref(), repo)?;
        let metrics = queries::graph_metrics(&self.store, repo)?;

        let open = all
            .iter()
            .filter(|issue| !issue.is_closed())
            .map(|issue| issue.id)
            .collect();
        let ranks = rank_rows
            .iter()
            .map(|entry| (entry.issue, (entry.rank, entry.centrality)))
            .collect();
        let baseline = self.engine.params().baseline(rank_rows.len());

        Ok(RepoSnapshot {
            issues: all.into_iter().map(|issue| (issue.id, issue)).collect(),
            open,
            edges,
            ranks,
            ready,
            blockers,
            metrics,
            baseline,
        })
    }
}

/// Everything the three responses are projected from.
pub(crate) struct RepoSnapshot {
    issues: BTreeMap<IssueId, Issue>,
    open: BTreeSet<IssueId>,
    edges: Vec<DepEdge>,
    /// issue -> (rank, centrality) from the persistent cache.
    ranks: BTreeMap<IssueId, (f64, f64)>,
    ready: Vec<IssueId>,
    blockers: Vec<(IssueId, usize)>,
    metrics: GraphMetrics,
    /// Score implied for an open issue absent from the rank cache.
    baseline: f64,
}

impl RepoSnapshot {
    fn rank_or_baseline(&self, issue: IssueId) -> f64 {
        self.ranks.get(&issue).map_or(self.baseline, |r| r.0)
    }

    fn triage(&self) -> TriageResponse {
        let mut recommendations: Vec<Recommendation> = self
            .ready
            .iter()
            .filter_map(|id| self.issues.get(id))
            .map(|issue| {
                let unblocks: Vec<IssueId> = self
                    .edges
                    .iter()
                    .filter(|edge| {
                        edge.kind == DepKind::Blocks
                            && edge.to == issue.id
                            && self.open.contains(&edge.from)
                    })
                    .map(|edge| edge.from)
                    .collect();
                Recommendation {
                    id: issue.id,
                    index: issue.index,
                    title: issue.title.clone(),
                    pagerank: self.rank_or_baseline(issue.id),
                    centrality: self.ranks.get(&issue.id).map_or(0.0, |r| r.1),
                    unblocks,
                    priority: priority_score(issue),
                    status: issue.status.as_str().to_string(),
                }
            })
            .collect();
        recommendations.sort_by(|a, b| {
            b.pagerank
                .total_cmp(&a.pagerank)
                .then_with(|| a.id.cmp(&b.id))
        });
        recommendations.truncate(MAX_RECOMMENDATIONS);

        let blockers_to_clear: Vec<BlockerInfo> = self
            .blockers
            .iter()
            .take(MAX_BLOCKERS)
            .filter_map(|&(id, count)| {
                self.issues.get(&id).map(|issue| BlockerInfo {
                    id,
                    index: issue.index,
                    title: issue.title.clone(),
                    blocks_count: count as u64,
                    pagerank: self.rank_or_baseline(id),
                })
            })
            .collect();

        let open = self.open.len() as u64;
        let ready = self.ready.len() as u64;
        TriageResponse {
            quick_ref: QuickRef {
                total: self.issues.len() as u64,
                open,
                blocked: open - ready,
                ready,
            },
            recommendations,
            blockers_to_clear,
            project_health: ProjectHealth {
                cycle_detected: self.metrics.has_cycle,
                avg_pagerank: self.metrics.avg_rank,
                max_pagerank: self.metrics.max_rank,
                dependency_count: self.metrics.dependency_count,
            },
        }
    }

    fn ready(&self) -> ReadyResponse {
        let mut issues: Vec<ReadyIssue> = self
            .ready
            .iter()
            .filter_map(|id| self.issues.get(id))
            .map(|issue| ReadyIssue {
                id: issue.id,
                index: issue.index,
                title: issue.title.clone(),
                pagerank: self.rank_or_baseline(issue.id),
            })
            .collect();
        issues.sort_by(|a, b| {
            b.pagerank
                .total_cmp(&a.pagerank)
                .then_with(|| a.id.cmp(&b.id))
        });
        ReadyResponse { issues }
    }

    fn graph(&self) -> GraphResponse {
        let mut node_ids: BTreeSet<IssueId> = BTreeSet::new();
        for edge in &self.edges {
            node_ids.insert(edge.from);
            node_ids.insert(edge.to);
        }

        let nodes = node_ids
            .iter()
            .filter_map(|id| self.issues.get(id))
            .map(|issue| GraphNode {
                id: issue.id,
                index: issue.index,
                title: issue.title.clone(),
                // Graph annotations come straight from the cache; an
                // uncached node shows 0 rather than the baseline.
                pagerank: self.ranks.get(&issue.id).map_or(0.0, |r| r.0),
                status: issue.status.as_str().to_string(),
            })
            .collect();

        let edges = self
            .edges
            .iter()
            .map(|edge| GraphEdge {
                source: edge.to,
                target: edge.from,
                kind: edge.kind.as_str().to_string(),
            })
            .collect();

        GraphResponse { nodes, edges }
    }
}

/// Deterministic priority heuristic, independent of rank.
pub fn priority_score(issue: &Issue) -> i64 {
    let mut priority = 5 * issue.labels.len() as i64 + 2 * i64::from(issue.num_comments);
    let flagged = issue.labels.iter().any(|label| {
        let lowered = label.to_lowercase();
        PRIORITY_LABEL_HINTS
            .iter()
            .any(|hint| lowered.contains(hint))
    });
    if flagged {
        priority += 20;
    }
    priority
}
