//! Scheduled background recomputation.
//!
//! Walks every known repository on a configurable period and refreshes
//! its rank cache, so request-time lazy computation stays the cold-path
//! exception. Per-repository failures are logged and never stop the
//! sweep.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::Receiver;

use crate::cancel::Cancel;
use crate::config::Config;
use crate::core::RepoId;
use crate::graph::{RankEngine, RankParams};
use crate::store::{IssueStore, Store};

/// Upper bound on one repository's recomputation.
const PER_REPO_TIMEOUT: Duration = Duration::from_secs(30);
/// Cancellation poll cadence while idle between sweeps.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// What one sweep across all repositories did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub repos: usize,
    pub computed: usize,
    pub skipped: usize,
    pub failed: usize,
    /// First per-repository failure, for operational visibility.
    pub first_error: Option<String>,
}

pub struct RecomputeTask {
    store: Arc<Store>,
    engine: RankEngine,
    config: Config,
    notices: Receiver<RepoId>,
}

impl RecomputeTask {
    pub fn new(
        store: Arc<Store>,
        issues: Arc<dyn IssueStore>,
        config: Config,
    ) -> crate::Result<Self> {
        config.validate()?;
        let notices = store.subscribe_invalidations();
        let engine = RankEngine::new(
            Arc::clone(&store),
            issues,
            RankParams::from_config(&config),
        );
        Ok(Self {
            store,
            engine,
            config,
            notices,
        })
    }

    /// Run sweeps on the configured period until cancelled. Blocking;
    /// callers spawn this on its own thread.
    pub fn run(&self, cancel: &Cancel) {
        let period = self.config.recompute_interval();
        let mut next_sweep = Instant::now();
        while !cancel.is_cancelled() {
            if Instant::now() >= next_sweep {
                match self.sweep(cancel) {
                    Ok(report) => {
                        if let Some(reason) = &report.first_error {
                            tracing::warn!(
                                computed = report.computed,
                                failed = report.failed,
                                "recompute sweep finished with failures: {reason}"
                            );
                        } else {
                            tracing::debug!(
                                repos = report.repos,
                                computed = report.computed,
                                skipped = report.skipped,
                                "recompute sweep finished"
                            );
                        }
                    }
                    Err(err) => tracing::error!("recompute sweep failed: {err}"),
                }
                next_sweep = Instant::now() + period;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
        tracing::debug!("recompute task stopped");
    }

    /// One pass over every known repository.
    pub fn sweep(&self, cancel: &Cancel) -> crate::Result<SweepReport> {
        // Rank rows were already dropped with each mutation; consuming
        // the backlog here just avoids unbounded channel growth.
        while self.notices.try_recv().is_ok() {}

        let mut report = SweepReport::default();
        if !self.config.enabled {
            return Ok(report);
        }

        let repos = self.store.known_repos()?;
        report.repos = repos.len();

        for repo in repos {
            if cancel.is_cancelled() {
                tracing::debug!("recompute sweep cancelled");
                break;
            }
            if !self.config.enabled_for(repo) {
                report.skipped += 1;
                continue;
            }
            let scoped = cancel.with_timeout(PER_REPO_TIMEOUT);
            match self.engine.recompute(&scoped, repo) {
                Ok(outcome) => {
                    report.computed += 1;
                    tracing::trace!(
                        repo = repo.value(),
                        nodes = outcome.nodes,
                        written = outcome.written,
                        "rank refreshed"
                    );
                }
                Err(err) => {
                    if cancel.is_cancelled() {
                        tracing::debug!("recompute sweep cancelled");
                        break;
                    }
                    report.failed += 1;
                    tracing::error!(repo = repo.value(), "rank refresh failed: {err}");
                    if report.first_error.is_none() {
                        report.first_error = Some(format!("repo {repo}: {err}"));
                    }
                }
            }
        }
        Ok(report)
    }
}
