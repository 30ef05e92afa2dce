//! End-to-end tests for the robot query service against a real
//! database file.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tempfile::TempDir;

use nextup::{
    ActorRef, Cancel, Config, DepKind, ErrorKind, Issue, IssueId, IssueStore, MemoryAuditSink,
    RepoId, RepoRef, RobotService, Store, StoreError,
};

/// Issue store wrapper that counts snapshot builds (`all_issues` runs
/// exactly once per build).
struct CountingIssues {
    inner: Arc<Store>,
    all_calls: AtomicUsize,
}

impl CountingIssues {
    fn new(inner: Arc<Store>) -> Self {
        Self {
            inner,
            all_calls: AtomicUsize::new(0),
        }
    }

    fn builds(&self) -> usize {
        self.all_calls.load(Ordering::SeqCst)
    }
}

impl IssueStore for CountingIssues {
    fn open_issues(&self, repo: RepoId) -> Result<Vec<Issue>, StoreError> {
        self.inner.open_issues(repo)
    }

    fn all_issues(&self, repo: RepoId) -> Result<Vec<Issue>, StoreError> {
        self.all_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.all_issues(repo)
    }

    fn get(&self, issue: IssueId) -> Result<Option<Issue>, StoreError> {
        self.inner.get(issue)
    }

    fn is_closed(&self, issue: IssueId) -> Result<bool, StoreError> {
        self.inner.is_closed(issue)
    }
}

struct TestBed {
    _dir: TempDir,
    store: Arc<Store>,
    issues: Arc<CountingIssues>,
    audit: Arc<MemoryAuditSink>,
    service: RobotService,
    repo: RepoRef,
}

impl TestBed {
    fn new() -> Self {
        Self::with_config(Config::default())
    }

    fn with_config(config: Config) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let store = Arc::new(Store::open(&dir.path().join("nextup.db")).expect("open store"));
        let issues = Arc::new(CountingIssues::new(Arc::clone(&store)));
        let audit = Arc::new(MemoryAuditSink::new());
        let service = RobotService::new(
            Arc::clone(&store),
            Arc::clone(&issues) as Arc<dyn IssueStore>,
            config,
            Arc::clone(&audit) as _,
        )
        .expect("service");
        Self {
            _dir: dir,
            store,
            issues,
            audit,
            service,
            repo: RepoRef::new(RepoId::new(1), "alice", "widgets"),
        }
    }

    fn issue(&self, index: i64, title: &str) -> IssueId {
        self.store
            .create_issue(self.repo.id, index, title)
            .expect("create issue")
    }

    /// `blocker` blocks `blocked`.
    fn block(&self, blocker: IssueId, blocked: IssueId) {
        self.store
            .add_dep(self.repo.id, blocked, blocker, DepKind::Blocks)
            .expect("add dep");
    }

    fn triage(&self) -> nextup::TriageResponse {
        self.service
            .triage(&Cancel::new(), &ActorRef::anonymous(), &self.repo)
            .expect("triage")
    }

    fn ready(&self) -> nextup::ReadyResponse {
        self.service
            .ready(&Cancel::new(), &ActorRef::anonymous(), &self.repo)
            .expect("ready")
    }

    fn graph(&self) -> nextup::GraphResponse {
        self.service
            .graph(&Cancel::new(), &ActorRef::anonymous(), &self.repo)
            .expect("graph")
    }
}

#[test]
fn triage_on_empty_repo() {
    let bed = TestBed::new();
    let triage = bed.triage();
    assert_eq!(triage.quick_ref.total, 0);
    assert_eq!(triage.quick_ref.ready, 0);
    assert!(triage.recommendations.is_empty());
    assert!(triage.blockers_to_clear.is_empty());
    assert!(!triage.project_health.cycle_detected);
    assert_eq!(triage.project_health.dependency_count, 0);
}

#[test]
fn triage_ranks_and_counts() {
    let bed = TestBed::new();
    // Diamond: a blocks b and c; b and c block d. Plus one orphan.
    let a = bed.issue(1, "a");
    let b = bed.issue(2, "b");
    let c = bed.issue(3, "c");
    let d = bed.issue(4, "d");
    let orphan = bed.issue(5, "orphan");
    bed.block(a, b);
    bed.block(a, c);
    bed.block(b, d);
    bed.block(c, d);

    let triage = bed.triage();
    assert_eq!(triage.quick_ref.total, 5);
    assert_eq!(triage.quick_ref.open, 5);
    // b, c, d wait on open blockers; a and the orphan are ready.
    assert_eq!(triage.quick_ref.blocked, 3);
    assert_eq!(triage.quick_ref.ready, 2);

    let ids: Vec<IssueId> = triage.recommendations.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![a, orphan]);

    let rec_a = &triage.recommendations[0];
    assert_eq!(rec_a.unblocks, vec![b, c]);
    assert_eq!(rec_a.status, "open");
    // a participates in ranking; the orphan reads the baseline.
    let baseline = 0.15 / 4.0;
    assert!((triage.recommendations[1].pagerank - baseline).abs() < 1e-9);
    assert!(rec_a.pagerank > 0.0);

    // a blocks two open issues and tops the blockers list.
    assert_eq!(triage.blockers_to_clear[0].id, a);
    assert_eq!(triage.blockers_to_clear[0].blocks_count, 2);

    assert_eq!(triage.project_health.dependency_count, 4);
    assert!(!triage.project_health.cycle_detected);
    assert!(triage.project_health.max_pagerank >= triage.project_health.avg_pagerank);
}

#[test]
fn triage_truncates_lists() {
    let bed = TestBed::new();
    let sink = bed.issue(100, "sink");
    for i in 0..12 {
        let blocker = bed.issue(i, &format!("blocker {i}"));
        bed.block(blocker, sink);
    }
    let triage = bed.triage();
    assert_eq!(triage.quick_ref.ready, 12);
    assert_eq!(triage.recommendations.len(), 10);
    assert_eq!(triage.blockers_to_clear.len(), 5);
}

#[test]
fn recommendations_order_by_rank_descending() {
    let bed = TestBed::new();
    // Chain head "a" and a second root "x" blocking the chain's tail:
    // both are ready, ranks differ from the orphanage baseline.
    let a = bed.issue(1, "a");
    let b = bed.issue(2, "b");
    let c = bed.issue(3, "c");
    bed.block(a, b);
    bed.block(b, c);

    let ready = bed.ready();
    assert_eq!(ready.issues.len(), 1);
    assert_eq!(ready.issues[0].id, a);

    let triage = bed.triage();
    let ranks: Vec<f64> = triage.recommendations.iter().map(|r| r.pagerank).collect();
    for pair in ranks.windows(2) {
        assert!(pair[0] >= pair[1]);
    }
}

#[test]
fn priority_heuristic_flows_into_response() {
    let bed = TestBed::new();
    let plain = bed.issue(1, "plain");
    let hot = bed.issue(2, "hot");
    bed.store.set_labels(hot, &["Critical-Path", "backend"]).unwrap();
    bed.store.set_num_comments(hot, 4).unwrap();

    let triage = bed.triage();
    let by_id = |id: IssueId| {
        triage
            .recommendations
            .iter()
            .find(|r| r.id == id)
            .expect("recommendation")
            .priority
    };
    assert_eq!(by_id(plain), 0);
    // 2 labels * 5 + 4 comments * 2 + 20 for the priority hint.
    assert_eq!(by_id(hot), 38);
}

#[test]
fn closed_blocker_releases_the_chain() {
    let bed = TestBed::new();
    let a = bed.issue(1, "a");
    let b = bed.issue(2, "b");
    let c = bed.issue(3, "c");
    bed.block(a, b);
    bed.block(b, c);
    bed.store.set_closed(b, true).unwrap();

    let ready = bed.ready();
    let ids: Vec<IssueId> = ready.issues.iter().map(|i| i.id).collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&a) && ids.contains(&c));
    // Nothing participates in ranking, so both read the baseline for
    // an empty cache.
    for issue in &ready.issues {
        assert!((issue.pagerank - 0.15).abs() < 1e-9);
    }

    let triage = bed.triage();
    assert_eq!(triage.quick_ref.total, 3);
    assert_eq!(triage.quick_ref.open, 2);
    assert_eq!(triage.quick_ref.blocked, 0);
}

#[test]
fn graph_reports_blocker_as_source() {
    let bed = TestBed::new();
    let a = bed.issue(1, "a");
    let b = bed.issue(2, "b");
    let c = bed.issue(3, "c");
    bed.block(a, b);
    bed.store
        .add_dep(bed.repo.id, a, c, DepKind::RelatesTo)
        .unwrap();
    bed.store.set_closed(c, true).unwrap();

    let graph = bed.graph();
    assert_eq!(graph.nodes.len(), 3);
    assert_eq!(graph.edges.len(), 2);

    let blocking = graph.edges.iter().find(|e| e.kind == "blocks").unwrap();
    assert_eq!(blocking.source, a);
    assert_eq!(blocking.target, b);

    let related = graph.edges.iter().find(|e| e.kind == "relates_to").unwrap();
    assert_eq!(related.source, c);
    assert_eq!(related.target, a);

    let node_c = graph.nodes.iter().find(|n| n.id == c).unwrap();
    assert_eq!(node_c.status, "closed");
    // c is closed and thus uncached; graph nodes fall back to zero.
    assert_eq!(node_c.pagerank, 0.0);

    let node_a = graph.nodes.iter().find(|n| n.id == a).unwrap();
    assert!(node_a.pagerank > 0.0);
}

#[test]
fn graph_serializes_expected_field_names() {
    let bed = TestBed::new();
    let a = bed.issue(1, "a");
    let b = bed.issue(2, "b");
    bed.block(a, b);

    let json = serde_json::to_value(bed.graph()).unwrap();
    let edge = &json["edges"][0];
    assert!(edge.get("source").is_some());
    assert!(edge.get("target").is_some());
    assert!(edge.get("type").is_some());
    let node = &json["nodes"][0];
    assert!(node.get("pagerank").is_some());
    assert!(node.get("status").is_some());
}

#[test]
fn snapshot_is_cached_within_ttl() {
    let bed = TestBed::new();
    bed.issue(1, "a");
    bed.triage();
    bed.ready();
    bed.graph();
    assert_eq!(bed.issues.builds(), 1);
}

#[test]
fn zero_ttl_recomputes_every_request() {
    let mut config = Config::default();
    config.pagerank_cache_ttl_seconds = 0;
    let bed = TestBed::with_config(config);
    bed.issue(1, "a");
    bed.triage();
    bed.triage();
    assert_eq!(bed.issues.builds(), 2);
}

#[test]
fn mutation_invalidates_before_next_read() {
    let bed = TestBed::new();
    let a = bed.issue(1, "a");
    let b = bed.issue(2, "b");

    let before = bed.triage();
    assert_eq!(before.quick_ref.ready, 2);
    assert_eq!(bed.issues.builds(), 1);

    // Writer mutates, then reads: the read must observe fresh data
    // even though the TTL has not expired.
    bed.block(a, b);
    let after = bed.triage();
    assert_eq!(after.quick_ref.ready, 1);
    assert_eq!(after.quick_ref.blocked, 1);
    assert_eq!(bed.issues.builds(), 2);
}

#[test]
fn explicit_invalidation_forces_recomputation() {
    let bed = TestBed::new();
    bed.issue(1, "a");
    bed.triage();
    bed.service.invalidate(bed.repo.id).unwrap();
    bed.triage();
    assert_eq!(bed.issues.builds(), 2);
}

#[test]
fn issue_invalidation_drops_one_row_and_the_snapshot() {
    let bed = TestBed::new();
    let a = bed.issue(1, "a");
    let b = bed.issue(2, "b");
    bed.block(a, b);
    bed.triage();
    assert_eq!(bed.store.rank_all(bed.repo.id).unwrap().len(), 2);

    bed.service.invalidate_issue(bed.repo.id, a).unwrap();
    assert_eq!(bed.store.rank_all(bed.repo.id).unwrap().len(), 1);

    bed.triage();
    assert_eq!(bed.issues.builds(), 2);
}

#[test]
fn concurrent_cold_requests_share_one_computation() {
    let bed = TestBed::new();
    let a = bed.issue(1, "a");
    let b = bed.issue(2, "b");
    bed.block(a, b);

    let service = Arc::new(bed.service);
    let repo = bed.repo.clone();
    let mut handles = Vec::new();
    for _ in 0..8 {
        let service = Arc::clone(&service);
        let repo = repo.clone();
        handles.push(std::thread::spawn(move || {
            service
                .triage(&Cancel::new(), &ActorRef::anonymous(), &repo)
                .expect("triage")
        }));
    }
    let responses: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(bed.issues.builds(), 1);
    for response in &responses {
        assert_eq!(response.quick_ref.ready, 1);
    }
}

#[test]
fn invalidation_between_readers_computes_twice() {
    let bed = TestBed::new();
    let a = bed.issue(1, "a");
    let b = bed.issue(2, "b");

    bed.triage();
    assert_eq!(bed.issues.builds(), 1);

    // Writer fires between two readers; the second reader recomputes.
    bed.block(a, b);
    bed.triage();
    bed.triage();
    assert_eq!(bed.issues.builds(), 2);
}

#[test]
fn disabled_feature_reads_as_not_found() {
    let mut config = Config::default();
    config.enabled = false;
    let bed = TestBed::with_config(config);
    bed.issue(1, "a");
    let err = bed
        .service
        .triage(&Cancel::new(), &ActorRef::anonymous(), &bed.repo)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    // Nothing is audited before the feature gate.
    assert!(bed.audit.events().is_empty());
}

#[test]
fn disabled_repo_reads_as_not_found() {
    let mut config = Config::default();
    config.disabled_repos.insert(1);
    let bed = TestBed::with_config(config);
    let err = bed
        .service
        .ready(&Cancel::new(), &ActorRef::anonymous(), &bed.repo)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn malformed_owner_is_rejected_and_audited() {
    let bed = TestBed::new();
    let bad = RepoRef::new(bed.repo.id, "evil/../owner", "widgets");
    let err = bed
        .service
        .triage(&Cancel::new(), &ActorRef::new(7, "robot-7"), &bad)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    let events = bed.audit.events();
    assert_eq!(events.len(), 1);
    assert!(!events[0].ok);
    assert_eq!(events[0].actor_id, 7);
    assert!(events[0].reason.is_some());
}

#[test]
fn successful_access_is_audited() {
    let bed = TestBed::new();
    bed.issue(1, "a");
    bed.triage();
    bed.ready();

    let events = bed.audit.events();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.ok));
    assert_eq!(events[0].endpoint, "triage");
    assert_eq!(events[1].endpoint, "ready");
    assert_eq!(events[0].owner, "alice");
    assert_eq!(events[0].repo, "widgets");
}

#[test]
fn audit_can_be_turned_off() {
    let mut config = Config::default();
    config.audit_log = false;
    let bed = TestBed::with_config(config);
    bed.issue(1, "a");
    bed.triage();
    assert!(bed.audit.events().is_empty());
}

/// Issue store that fails every read with an internal error.
struct BrokenIssues;

fn internal_error() -> StoreError {
    StoreError::SchemaVersionMismatch {
        expected: 1,
        got: 99,
    }
}

impl IssueStore for BrokenIssues {
    fn open_issues(&self, _repo: RepoId) -> Result<Vec<Issue>, StoreError> {
        Err(internal_error())
    }

    fn all_issues(&self, _repo: RepoId) -> Result<Vec<Issue>, StoreError> {
        Err(internal_error())
    }

    fn get(&self, _issue: IssueId) -> Result<Option<Issue>, StoreError> {
        Err(internal_error())
    }

    fn is_closed(&self, _issue: IssueId) -> Result<bool, StoreError> {
        Err(internal_error())
    }
}

fn broken_service(strict: bool) -> (RobotService, RepoRef) {
    let mut config = Config::default();
    config.strict_mode = strict;
    let store = Arc::new(Store::open_in_memory().expect("store"));
    let service = RobotService::new(
        store,
        Arc::new(BrokenIssues),
        config,
        Arc::new(MemoryAuditSink::new()),
    )
    .expect("service");
    (service, RepoRef::new(RepoId::new(1), "alice", "widgets"))
}

#[test]
fn internal_errors_surface_by_default() {
    let (service, repo) = broken_service(false);
    let err = service
        .triage(&Cancel::new(), &ActorRef::anonymous(), &repo)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);
}

#[test]
fn strict_mode_collapses_internal_to_not_found() {
    let (service, repo) = broken_service(true);
    let err = service
        .triage(&Cancel::new(), &ActorRef::anonymous(), &repo)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(err.to_string(), "not found");
}

#[test]
fn cycle_rejection_leaves_service_view_intact() {
    let bed = TestBed::new();
    let a = bed.issue(1, "a");
    let b = bed.issue(2, "b");
    let c = bed.issue(3, "c");
    bed.block(a, b);
    bed.block(b, c);

    let err = bed
        .store
        .add_dep(bed.repo.id, a, c, DepKind::Blocks)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Integrity);

    let triage = bed.triage();
    assert!(!triage.project_health.cycle_detected);
    assert_eq!(triage.project_health.dependency_count, 2);
}

#[test]
fn issue_deletion_cascades_into_responses() {
    let bed = TestBed::new();
    let a = bed.issue(1, "a");
    let b = bed.issue(2, "b");
    bed.block(a, b);

    let before = bed.triage();
    assert_eq!(before.quick_ref.blocked, 1);

    bed.store.delete_issue(a).unwrap();
    let after = bed.triage();
    assert_eq!(after.quick_ref.total, 1);
    assert_eq!(after.quick_ref.blocked, 0);
    assert_eq!(after.project_health.dependency_count, 0);
    let ready: Vec<IssueId> = after.recommendations.iter().map(|r| r.id).collect();
    assert_eq!(ready, vec![b]);
}
