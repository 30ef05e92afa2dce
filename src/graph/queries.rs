//! Derived queries over the dependency graph and the rank cache.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::core::{IssueId, RepoId};
use crate::store::{IssueStore, Store, StoreError};

use super::cycle;

/// Summary metrics for one repository's graph.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GraphMetrics {
    pub dependency_count: u64,
    pub cached_issues: u64,
    pub has_cycle: bool,
    pub avg_rank: f64,
    pub max_rank: f64,
}

/// Open issues with no open blocker, ordered by id.
///
/// Callers that need a ranked ordering sort by cached rank themselves.
pub fn ready_issues(
    store: &Store,
    issues: &dyn IssueStore,
    repo: RepoId,
) -> Result<Vec<IssueId>, StoreError> {
    let open: BTreeSet<IssueId> = issues
        .open_issues(repo)?
        .into_iter()
        .map(|issue| issue.id)
        .collect();

    let mut blocked: BTreeSet<IssueId> = BTreeSet::new();
    for edge in store.blocks_edges(repo)? {
        if open.contains(&edge.to) {
            blocked.insert(edge.from);
        }
    }

    Ok(open.into_iter().filter(|id| !blocked.contains(id)).collect())
}

/// Longest simple path starting at `start`, walking blocker -> blocked.
///
/// Deterministic: neighbors are visited in ascending id order.
pub fn critical_path(
    store: &Store,
    repo: RepoId,
    start: IssueId,
) -> Result<Vec<IssueId>, StoreError> {
    // dependents[v] = issues that v blocks.
    let mut dependents: BTreeMap<IssueId, Vec<IssueId>> = BTreeMap::new();
    for edge in store.blocks_edges(repo)? {
        dependents.entry(edge.to).or_default().push(edge.from);
    }
    for neighbors in dependents.values_mut() {
        neighbors.sort();
        neighbors.dedup();
    }

    let mut longest = Vec::new();
    let mut path = Vec::new();
    let mut on_path = BTreeSet::new();
    walk_longest(&dependents, start, &mut path, &mut on_path, &mut longest);
    Ok(longest)
}

fn walk_longest(
    dependents: &BTreeMap<IssueId, Vec<IssueId>>,
    node: IssueId,
    path: &mut Vec<IssueId>,
    on_path: &mut BTreeSet<IssueId>,
    longest: &mut Vec<IssueId>,
) {
    if !on_path.insert(node) {
        return;
    }
    path.push(node);
    if path.len() > longest.len() {
        longest.clone_from(path);
    }
    for &next in dependents.get(&node).map(Vec::as_slice).unwrap_or_default() {
        walk_longest(dependents, next, path, on_path, longest);
    }
    path.pop();
    on_path.remove(&node);
}

/// Open issues that block others, with the count of distinct open
/// issues each would (potentially) unblock if closed. Sorted by count
/// descending, then id.
pub fn blockers_to_clear(
    store: &Store,
    issues: &dyn IssueStore,
    repo: RepoId,
) -> Result<Vec<(IssueId, usize)>, StoreError> {
    let open: BTreeSet<IssueId> = issues
        .open_issues(repo)?
        .into_iter()
        .map(|issue| issue.id)
        .collect();

    let mut counts: BTreeMap<IssueId, usize> = BTreeMap::new();
    for edge in store.blocks_edges(repo)? {
        if open.contains(&edge.from) && open.contains(&edge.to) {
            *counts.entry(edge.to).or_default() += 1;
        }
    }

    let mut blockers: Vec<(IssueId, usize)> = counts.into_iter().collect();
    blockers.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    Ok(blockers)
}

/// Whether the repository's blocking subgraph contains a cycle.
pub fn has_cycle(store: &Store, repo: RepoId) -> Result<bool, StoreError> {
    let blocks = store.blocks_edges(repo)?;
    Ok(cycle::has_cycle(&cycle::blocks_adjacency(&blocks)))
}

/// Nodes of one cycle in the blocking subgraph, or empty.
pub fn cycle_path(store: &Store, repo: RepoId) -> Result<Vec<IssueId>, StoreError> {
    let blocks = store.blocks_edges(repo)?;
    Ok(cycle::find_cycle_path(&cycle::blocks_adjacency(&blocks)))
}

/// Exact counts plus rank figures read from the cache as-is; never
/// forces a recomputation.
pub fn graph_metrics(store: &Store, repo: RepoId) -> Result<GraphMetrics, StoreError> {
    let dependency_count = store.dep_count(repo)?;
    let blocks = store.blocks_edges(repo)?;
    let has_cycle = cycle::has_cycle(&cycle::blocks_adjacency(&blocks));

    let rows = store.rank_all(repo)?;
    let cached_issues = rows.len() as u64;
    let (avg_rank, max_rank) = if rows.is_empty() {
        (0.0, 0.0)
    } else {
        let total: f64 = rows.iter().map(|e| e.rank).sum();
        let max = rows.iter().map(|e| e.rank).fold(f64::MIN, f64::max);
        (total / rows.len() as f64, max)
    };

    Ok(GraphMetrics {
        dependency_count,
        cached_issues,
        has_cycle,
        avg_rank,
        max_rank,
    })
}
