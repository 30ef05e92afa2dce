//! Dependency store & validator.
//!
//! `add_dep` runs its duplicate, endpoint, and cycle checks inside the
//! same immediate transaction as the insert, so no interleaved writer
//! can sneak a cycle past the pre-insert check.

use std::collections::BTreeMap;

use rusqlite::{Transaction, params};

use crate::core::{DepEdge, DepKey, DepKind, IssueId, RepoId};
use crate::graph::cycle;

use super::issues::tx_immediate;
use super::{Store, StoreError, now_unix};

impl Store {
    /// Insert a dependency edge: `from` depends on `to`.
    pub fn add_dep(
        &self,
        repo: RepoId,
        from: IssueId,
        to: IssueId,
        kind: DepKind,
    ) -> Result<(), StoreError> {
        let key = DepKey::new(from, to, kind)
            .map_err(|_| StoreError::SelfLoop { issue: from })?;
        {
            let mut conn = self.lock_conn();
            let tx = tx_immediate(&mut conn)?;

            ensure_issue_in_repo(&tx, repo, key.from())?;
            ensure_issue_in_repo(&tx, repo, key.to())?;

            let exists: bool = tx.query_row(
                "SELECT EXISTS(
                     SELECT 1 FROM issue_dep
                     WHERE repo_id = ?1 AND from_id = ?2 AND to_id = ?3)",
                params![repo.value(), from.value(), to.value()],
                |row| row.get(0),
            )?;
            if exists {
                return Err(StoreError::DepExists { from, to });
            }

            if kind == DepKind::Blocks {
                // Inserting from -> to closes a cycle iff `from` is
                // already reachable from `to` along blocking edges.
                let adj = blocks_adjacency_tx(&tx, repo)?;
                if cycle::reaches(&adj, to, from) {
                    return Err(StoreError::WouldCycle { from, to });
                }
            }

            tx.execute(
                "INSERT INTO issue_dep (repo_id, from_id, to_id, kind, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    repo.value(),
                    from.value(),
                    to.value(),
                    kind.as_str(),
                    now_unix()
                ],
            )?;
            tx.execute(
                "DELETE FROM rank_cache WHERE repo_id = ?1",
                params![repo.value()],
            )?;
            tx.commit()?;
        }
        self.publish(repo);
        Ok(())
    }

    pub fn remove_dep(&self, repo: RepoId, from: IssueId, to: IssueId) -> Result<(), StoreError> {
        {
            let mut conn = self.lock_conn();
            let tx = tx_immediate(&mut conn)?;
            tx.execute(
                "DELETE FROM issue_dep WHERE repo_id = ?1 AND from_id = ?2 AND to_id = ?3",
                params![repo.value(), from.value(), to.value()],
            )?;
            tx.execute(
                "DELETE FROM rank_cache WHERE repo_id = ?1",
                params![repo.value()],
            )?;
            tx.commit()?;
        }
        self.publish(repo);
        Ok(())
    }

    /// Remove every edge mentioning `issue` as either endpoint.
    pub fn delete_deps_for_issue(&self, repo: RepoId, issue: IssueId) -> Result<(), StoreError> {
        {
            let mut conn = self.lock_conn();
            let tx = tx_immediate(&mut conn)?;
            tx.execute(
                "DELETE FROM issue_dep
                 WHERE repo_id = ?1 AND (from_id = ?2 OR to_id = ?2)",
                params![repo.value(), issue.value()],
            )?;
            tx.execute(
                "DELETE FROM rank_cache WHERE repo_id = ?1",
                params![repo.value()],
            )?;
            tx.commit()?;
        }
        self.publish(repo);
        Ok(())
    }

    /// Edges where `from` is the dependent side.
    pub fn deps_out_of(&self, repo: RepoId, from: IssueId) -> Result<Vec<DepEdge>, StoreError> {
        self.select_deps(
            "SELECT repo_id, from_id, to_id, kind, created_at FROM issue_dep
             WHERE repo_id = ?1 AND from_id = ?2 ORDER BY to_id",
            params![repo.value(), from.value()],
        )
    }

    /// Edges where `to` is the depended-on side.
    pub fn deps_into(&self, repo: RepoId, to: IssueId) -> Result<Vec<DepEdge>, StoreError> {
        self.select_deps(
            "SELECT repo_id, from_id, to_id, kind, created_at FROM issue_dep
             WHERE repo_id = ?1 AND to_id = ?2 ORDER BY from_id",
            params![repo.value(), to.value()],
        )
    }

    pub fn all_deps(&self, repo: RepoId) -> Result<Vec<DepEdge>, StoreError> {
        self.select_deps(
            "SELECT repo_id, from_id, to_id, kind, created_at FROM issue_dep
             WHERE repo_id = ?1 ORDER BY from_id, to_id",
            params![repo.value()],
        )
    }

    pub fn blocks_edges(&self, repo: RepoId) -> Result<Vec<DepEdge>, StoreError> {
        self.select_deps(
            "SELECT repo_id, from_id, to_id, kind, created_at FROM issue_dep
             WHERE repo_id = ?1 AND kind = 'blocks' ORDER BY from_id, to_id",
            params![repo.value()],
        )
    }

    /// The blockers of `from`: its outgoing `blocks` edges.
    pub fn blockers_of(&self, repo: RepoId, from: IssueId) -> Result<Vec<DepEdge>, StoreError> {
        self.select_deps(
            "SELECT repo_id, from_id, to_id, kind, created_at FROM issue_dep
             WHERE repo_id = ?1 AND from_id = ?2 AND kind = 'blocks' ORDER BY to_id",
            params![repo.value(), from.value()],
        )
    }

    /// True iff `from` has at least one blocking edge to an open issue.
    pub fn is_blocked(&self, repo: RepoId, from: IssueId) -> Result<bool, StoreError> {
        let conn = self.lock_conn();
        conn.query_row(
            "SELECT EXISTS(
                 SELECT 1 FROM issue_dep d
                 JOIN issue i ON i.id = d.to_id
                 WHERE d.repo_id = ?1 AND d.from_id = ?2
                   AND d.kind = 'blocks' AND i.is_closed = 0)",
            params![repo.value(), from.value()],
            |row| row.get(0),
        )
        .map_err(Into::into)
    }

    /// Count of edges of every kind.
    pub fn dep_count(&self, repo: RepoId) -> Result<u64, StoreError> {
        let conn = self.lock_conn();
        conn.query_row(
            "SELECT COUNT(*) FROM issue_dep WHERE repo_id = ?1",
            params![repo.value()],
            |row| row.get::<_, i64>(0),
        )
        .map(|n| n as u64)
        .map_err(Into::into)
    }

    fn select_deps(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<DepEdge>, StoreError> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, |row| {
            let kind: String = row.get(3)?;
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                kind,
                row.get::<_, i64>(4)?,
            ))
        })?;
        let mut edges = Vec::new();
        for row in rows {
            let (repo, from, to, kind, created_at) = row?;
            let kind = DepKind::parse(&kind).map_err(|_| rusqlite::Error::InvalidQuery)?;
            edges.push(DepEdge {
                repo: RepoId::new(repo),
                from: IssueId::new(from),
                to: IssueId::new(to),
                kind,
                created_at,
            });
        }
        Ok(edges)
    }
}

fn ensure_issue_in_repo(tx: &Transaction<'_>, repo: RepoId, issue: IssueId) -> Result<(), StoreError> {
    let exists: bool = tx.query_row(
        "SELECT EXISTS(SELECT 1 FROM issue WHERE id = ?1 AND repo_id = ?2)",
        params![issue.value(), repo.value()],
        |row| row.get(0),
    )?;
    if exists {
        Ok(())
    } else {
        Err(StoreError::IssueMissing { issue })
    }
}

fn blocks_adjacency_tx(
    tx: &Transaction<'_>,
    repo: RepoId,
) -> Result<BTreeMap<IssueId, Vec<IssueId>>, StoreError> {
    let mut stmt = tx.prepare(
        "SELECT from_id, to_id FROM issue_dep
         WHERE repo_id = ?1 AND kind = 'blocks' ORDER BY from_id, to_id",
    )?;
    let rows = stmt.query_map(params![repo.value()], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
    })?;
    let mut adj: BTreeMap<IssueId, Vec<IssueId>> = BTreeMap::new();
    for row in rows {
        let (from, to) = row?;
        adj.entry(IssueId::new(from))
            .or_default()
            .push(IssueId::new(to));
    }
    Ok(adj)
}
