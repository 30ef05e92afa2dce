//! SQLite-backed persistence: issues, dependency edges, rank cache.
//!
//! One `Store` owns one database. Write operations that change the
//! shape of a repository's graph drop that repository's rank rows in
//! the same transaction and then publish an invalidation notice to
//! every subscriber.

mod deps;
mod issues;
mod rank_cache;

pub use issues::{Issue, IssueStore};
pub use rank_cache::RankEntry;

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crossbeam::channel::{Receiver, Sender, unbounded};
use rusqlite::Connection;
use thiserror::Error;

use crate::core::{IssueId, RepoId};
use crate::error::ErrorKind;

const SCHEMA_VERSION: i32 = 1;
const BUSY_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("schema version mismatch: expected {expected}, got {got}")]
    SchemaVersionMismatch { expected: i32, got: i32 },
    #[error("issue {issue} not found")]
    IssueMissing { issue: IssueId },
    #[error("dependency from {from} to {to} already exists")]
    DepExists { from: IssueId, to: IssueId },
    #[error("dependency from {from} to {to} would create a cycle")]
    WouldCycle { from: IssueId, to: IssueId },
    #[error("issue {issue} cannot depend on itself")]
    SelfLoop { issue: IssueId },
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Sqlite(err) => sqlite_kind(err),
            StoreError::SchemaVersionMismatch { .. } => ErrorKind::Internal,
            StoreError::IssueMissing { .. } => ErrorKind::NotFound,
            StoreError::DepExists { .. } => ErrorKind::Conflict,
            StoreError::WouldCycle { .. } | StoreError::SelfLoop { .. } => ErrorKind::Integrity,
        }
    }
}

fn sqlite_kind(err: &rusqlite::Error) -> ErrorKind {
    use rusqlite::ErrorCode;
    match err.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => ErrorKind::Transient,
        _ => ErrorKind::Internal,
    }
}

/// Fan-out hub for repository invalidation notices.
///
/// Each subscriber gets its own channel, so a notice published during a
/// mutation is visible to every consumer that drains before its next
/// cache lookup.
pub(crate) struct NoticeHub {
    subscribers: Mutex<Vec<Sender<RepoId>>>,
}

impl NoticeHub {
    fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    fn subscribe(&self) -> Receiver<RepoId> {
        let (tx, rx) = unbounded();
        lock(&self.subscribers).push(tx);
        rx
    }

    fn publish(&self, repo: RepoId) {
        lock(&self.subscribers).retain(|tx| tx.send(repo).is_ok());
    }
}

pub struct Store {
    conn: Mutex<Connection>,
    notices: NoticeHub,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

impl Store {
    /// Open (or create) a database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database. Each call is an isolated store.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(std::time::Duration::from_millis(BUSY_TIMEOUT_MS))?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            notices: NoticeHub::new(),
        })
    }

    /// Subscribe to invalidation notices for this store's repositories.
    pub fn subscribe_invalidations(&self) -> Receiver<RepoId> {
        self.notices.subscribe()
    }

    /// Distinct repositories with at least one issue.
    pub fn known_repos(&self) -> Result<Vec<RepoId>, StoreError> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare("SELECT DISTINCT repo_id FROM issue ORDER BY repo_id")?;
        let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
        let mut repos = Vec::new();
        for row in rows {
            repos.push(RepoId::new(row?));
        }
        Ok(repos)
    }

    pub(crate) fn lock_conn(&self) -> MutexGuard<'_, Connection> {
        lock(&self.conn)
    }

    pub(crate) fn publish(&self, repo: RepoId) {
        self.notices.publish(repo);
    }
}

fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    let got: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if got == 0 {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS issue (
                 id            INTEGER PRIMARY KEY,
                 repo_id       INTEGER NOT NULL,
                 idx           INTEGER NOT NULL,
                 title         TEXT NOT NULL,
                 is_closed     INTEGER NOT NULL DEFAULT 0,
                 labels        TEXT NOT NULL DEFAULT '[]',
                 num_comments  INTEGER NOT NULL DEFAULT 0
             );
             CREATE INDEX IF NOT EXISTS issue_repo ON issue(repo_id);

             CREATE TABLE IF NOT EXISTS issue_dep (
                 repo_id    INTEGER NOT NULL,
                 from_id    INTEGER NOT NULL,
                 to_id      INTEGER NOT NULL,
                 kind       TEXT NOT NULL,
                 created_at INTEGER NOT NULL,
                 PRIMARY KEY (repo_id, from_id, to_id)
             );
             CREATE INDEX IF NOT EXISTS issue_dep_to ON issue_dep(repo_id, to_id);

             CREATE TABLE IF NOT EXISTS rank_cache (
                 repo_id    INTEGER NOT NULL,
                 issue_id   INTEGER NOT NULL,
                 rank       REAL NOT NULL DEFAULT 0,
                 centrality REAL NOT NULL DEFAULT 0,
                 updated_at INTEGER NOT NULL,
                 PRIMARY KEY (repo_id, issue_id)
             );",
        )?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        return Ok(());
    }
    if got != SCHEMA_VERSION {
        return Err(StoreError::SchemaVersionMismatch {
            expected: SCHEMA_VERSION,
            got,
        });
    }
    Ok(())
}

pub(crate) fn now_unix() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
