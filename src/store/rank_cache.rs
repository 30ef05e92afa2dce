//! Persistent rank cache.
//!
//! Rows exist only for issues that participated in the last successful
//! computation; readers treat absence as the baseline score. The engine
//! exclusively owns these rows - external callers go through the
//! published invalidation interface.

use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};

use crate::core::{IssueId, RepoId};

use super::issues::tx_immediate;
use super::{Store, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RankEntry {
    pub issue: IssueId,
    pub rank: f64,
    pub centrality: f64,
    /// Unix seconds of the computation that wrote this row.
    pub updated_at: i64,
}

impl Store {
    pub fn rank_get(&self, repo: RepoId, issue: IssueId) -> Result<Option<RankEntry>, StoreError> {
        let conn = self.lock_conn();
        conn.query_row(
            "SELECT issue_id, rank, centrality, updated_at FROM rank_cache
             WHERE repo_id = ?1 AND issue_id = ?2",
            params![repo.value(), issue.value()],
            entry_from_row,
        )
        .optional()
        .map_err(Into::into)
    }

    /// Every cached row for a repository, ordered by issue id.
    pub fn rank_all(&self, repo: RepoId) -> Result<Vec<RankEntry>, StoreError> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(
            "SELECT issue_id, rank, centrality, updated_at FROM rank_cache
             WHERE repo_id = ?1 ORDER BY issue_id",
        )?;
        let rows = stmt.query_map(params![repo.value()], entry_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Cached rows ordered by rank descending.
    pub fn ranked(&self, repo: RepoId, limit: usize) -> Result<Vec<RankEntry>, StoreError> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(
            "SELECT issue_id, rank, centrality, updated_at FROM rank_cache
             WHERE repo_id = ?1 ORDER BY rank DESC, issue_id LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![repo.value(), limit as i64], entry_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    pub fn rank_upsert(&self, repo: RepoId, entry: &RankEntry) -> Result<(), StoreError> {
        let conn = self.lock_conn();
        upsert(&conn, repo, entry)?;
        Ok(())
    }

    pub fn rank_delete_repo(&self, repo: RepoId) -> Result<(), StoreError> {
        let conn = self.lock_conn();
        conn.execute(
            "DELETE FROM rank_cache WHERE repo_id = ?1",
            params![repo.value()],
        )?;
        Ok(())
    }

    pub fn rank_delete_issue(&self, repo: RepoId, issue: IssueId) -> Result<(), StoreError> {
        let conn = self.lock_conn();
        conn.execute(
            "DELETE FROM rank_cache WHERE repo_id = ?1 AND issue_id = ?2",
            params![repo.value(), issue.value()],
        )?;
        Ok(())
    }

    /// Atomically replace a repository's rows.
    ///
    /// Individual row failures do not abort the rest; the caller gets
    /// `(written, failed)` and the commit covers whatever succeeded.
    pub fn replace_ranks(
        &self,
        repo: RepoId,
        rows: &[RankEntry],
    ) -> Result<(usize, usize), StoreError> {
        let mut conn = self.lock_conn();
        let tx = tx_immediate(&mut conn)?;
        tx.execute(
            "DELETE FROM rank_cache WHERE repo_id = ?1",
            params![repo.value()],
        )?;
        let mut written = 0usize;
        let mut failed = 0usize;
        for entry in rows {
            match upsert(&tx, repo, entry) {
                Ok(()) => written += 1,
                Err(err) => {
                    failed += 1;
                    tracing::warn!(
                        repo = repo.value(),
                        issue = entry.issue.value(),
                        "rank row write failed: {err}"
                    );
                }
            }
        }
        tx.commit()?;
        Ok((written, failed))
    }
}

fn upsert(conn: &rusqlite::Connection, repo: RepoId, entry: &RankEntry) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO rank_cache (repo_id, issue_id, rank, centrality, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT (repo_id, issue_id) DO UPDATE SET
             rank = excluded.rank,
             centrality = excluded.centrality,
             updated_at = excluded.updated_at",
        params![
            repo.value(),
            entry.issue.value(),
            entry.rank,
            entry.centrality,
            entry.updated_at
        ],
    )?;
    Ok(())
}

fn entry_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RankEntry> {
    Ok(RankEntry {
        issue: IssueId::new(row.get(0)?),
        rank: row.get(1)?,
        centrality: row.get(2)?,
        updated_at: row.get(3)?,
    })
}
