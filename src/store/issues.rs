//! Issue rows and the issue-store capability.
//!
//! The engine observes issues through the `IssueStore` trait only:
//! open/closed state plus the pass-through attributes echoed in
//! responses. The write side below exists for the hosting service's
//! change feed (open/close events drive invalidation) and for tests.

use rusqlite::{OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};

use crate::core::{IssueId, IssueStatus, RepoId};

use super::{Store, StoreError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: IssueId,
    pub repo: RepoId,
    /// Human-facing issue number within the repository.
    pub index: i64,
    pub title: String,
    pub status: IssueStatus,
    pub labels: Vec<String>,
    pub num_comments: u32,
}

impl Issue {
    pub fn is_closed(&self) -> bool {
        self.status.is_closed()
    }
}

/// Read capability over issues, the seam between the engine and the
/// hosting service's issue model.
pub trait IssueStore: Send + Sync {
    fn open_issues(&self, repo: RepoId) -> Result<Vec<Issue>, StoreError>;
    fn all_issues(&self, repo: RepoId) -> Result<Vec<Issue>, StoreError>;
    fn get(&self, issue: IssueId) -> Result<Option<Issue>, StoreError>;
    fn is_closed(&self, issue: IssueId) -> Result<bool, StoreError>;
}

const ISSUE_COLUMNS: &str = "id, repo_id, idx, title, is_closed, labels, num_comments";

fn issue_from_row(row: &Row<'_>) -> rusqlite::Result<Issue> {
    let labels_json: String = row.get(5)?;
    let labels = serde_json::from_str(&labels_json).unwrap_or_default();
    Ok(Issue {
        id: IssueId::new(row.get(0)?),
        repo: RepoId::new(row.get(1)?),
        index: row.get(2)?,
        title: row.get(3)?,
        status: if row.get::<_, bool>(4)? {
            IssueStatus::Closed
        } else {
            IssueStatus::Open
        },
        labels,
        num_comments: row.get(6)?,
    })
}

impl IssueStore for Store {
    fn open_issues(&self, repo: RepoId) -> Result<Vec<Issue>, StoreError> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ISSUE_COLUMNS} FROM issue WHERE repo_id = ?1 AND is_closed = 0 ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![repo.value()], issue_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    fn all_issues(&self, repo: RepoId) -> Result<Vec<Issue>, StoreError> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ISSUE_COLUMNS} FROM issue WHERE repo_id = ?1 ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![repo.value()], issue_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    fn get(&self, issue: IssueId) -> Result<Option<Issue>, StoreError> {
        let conn = self.lock_conn();
        conn.query_row(
            &format!("SELECT {ISSUE_COLUMNS} FROM issue WHERE id = ?1"),
            params![issue.value()],
            issue_from_row,
        )
        .optional()
        .map_err(Into::into)
    }

    fn is_closed(&self, issue: IssueId) -> Result<bool, StoreError> {
        let conn = self.lock_conn();
        conn.query_row(
            "SELECT is_closed FROM issue WHERE id = ?1",
            params![issue.value()],
            |row| row.get(0),
        )
        .optional()?
        .ok_or(StoreError::IssueMissing { issue })
    }
}

impl Store {
    /// Insert an issue; the id is assigned by the database.
    pub fn create_issue(&self, repo: RepoId, index: i64, title: &str) -> Result<IssueId, StoreError> {
        let conn = self.lock_conn();
        conn.execute(
            "INSERT INTO issue (repo_id, idx, title) VALUES (?1, ?2, ?3)",
            params![repo.value(), index, title],
        )?;
        Ok(IssueId::new(conn.last_insert_rowid()))
    }

    pub fn set_labels(&self, issue: IssueId, labels: &[&str]) -> Result<(), StoreError> {
        let json = serde_json::to_string(labels).unwrap_or_else(|_| "[]".into());
        let conn = self.lock_conn();
        let changed = conn.execute(
            "UPDATE issue SET labels = ?2 WHERE id = ?1",
            params![issue.value(), json],
        )?;
        require_row(changed, issue)
    }

    pub fn set_num_comments(&self, issue: IssueId, count: u32) -> Result<(), StoreError> {
        let conn = self.lock_conn();
        let changed = conn.execute(
            "UPDATE issue SET num_comments = ?2 WHERE id = ?1",
            params![issue.value(), count],
        )?;
        require_row(changed, issue)
    }

    /// Close or reopen an issue. Part of the change feed: the owning
    /// repository's rank rows are dropped in the same transaction and a
    /// notice is published.
    pub fn set_closed(&self, issue: IssueId, closed: bool) -> Result<(), StoreError> {
        let repo = {
            let mut conn = self.lock_conn();
            let tx = tx_immediate(&mut conn)?;
            let repo: i64 = tx
                .query_row(
                    "SELECT repo_id FROM issue WHERE id = ?1",
                    params![issue.value()],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or(StoreError::IssueMissing { issue })?;
            tx.execute(
                "UPDATE issue SET is_closed = ?2 WHERE id = ?1",
                params![issue.value(), closed],
            )?;
            tx.execute(
                "DELETE FROM rank_cache WHERE repo_id = ?1",
                params![repo],
            )?;
            tx.commit()?;
            RepoId::new(repo)
        };
        self.publish(repo);
        Ok(())
    }

    /// Delete an issue, cascading to every edge mentioning it and to
    /// its rank rows.
    pub fn delete_issue(&self, issue: IssueId) -> Result<(), StoreError> {
        let repo = {
            let mut conn = self.lock_conn();
            let tx = tx_immediate(&mut conn)?;
            let repo: i64 = tx
                .query_row(
                    "SELECT repo_id FROM issue WHERE id = ?1",
                    params![issue.value()],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or(StoreError::IssueMissing { issue })?;
            tx.execute(
                "DELETE FROM issue_dep WHERE repo_id = ?1 AND (from_id = ?2 OR to_id = ?2)",
                params![repo, issue.value()],
            )?;
            tx.execute("DELETE FROM rank_cache WHERE repo_id = ?1", params![repo])?;
            tx.execute("DELETE FROM issue WHERE id = ?1", params![issue.value()])?;
            tx.commit()?;
            RepoId::new(repo)
        };
        self.publish(repo);
        Ok(())
    }
}

fn require_row(changed: usize, issue: IssueId) -> Result<(), StoreError> {
    if changed == 0 {
        Err(StoreError::IssueMissing { issue })
    } else {
        Ok(())
    }
}

pub(crate) fn tx_immediate(
    conn: &mut rusqlite::Connection,
) -> Result<rusqlite::Transaction<'_>, StoreError> {
    conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
        .map_err(Into::into)
}
