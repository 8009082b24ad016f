//! Embedded relational store: schema, migrations, transactions, and the
//! full-text auxiliary index (§4.1).
//!
//! `Store` wraps a single `rusqlite::Connection`. It carries no internal
//! locking of its own — callers share it behind `Arc<tokio::sync::Mutex<Store>>`
//! (the Ownership Manager and Index Coordinator both do this), which gives
//! the single-writer guarantee the design relies on and lets `transaction`
//! nest via savepoints without risking a self-deadlock.

mod migrations;
mod schema;

use std::cell::Cell;
use std::path::{Path, PathBuf};

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::error::{LedgerError, Result};

const BUSY_TIMEOUT_MS: u32 = 5_000;

pub struct Store {
    conn: Connection,
    depth: Cell<usize>,
    db_path: PathBuf,
}

/// Decrements the nesting depth on every exit path, including panics, so the
/// invariant "depth is always eventually released" holds regardless of how
/// `transaction` returns.
struct DepthGuard<'a> {
    depth: &'a Cell<usize>,
    restore_to: usize,
}

impl<'a> Drop for DepthGuard<'a> {
    fn drop(&mut self) {
        self.depth.set(self.restore_to);
    }
}

impl Store {
    /// Open the database at `<workspace_root>/.<app_dir>/code-ledger.db`, configure
    /// WAL + foreign keys + busy timeout, and run migrations. On corruption
    /// (open or migration failing with a "malformed"/"corrupt"/"not a database"
    /// message) the file and its WAL/SHM companions are deleted and the open
    /// is retried exactly once; a second failure is fatal.
    pub fn open(workspace_root: &Path, app_dir: &str) -> Result<Self> {
        let dir = workspace_root.join(format!(".{app_dir}"));
        std::fs::create_dir_all(&dir).map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?;
        let db_path = dir.join("code-ledger.db");

        match Self::open_at(&db_path) {
            Ok(store) => Ok(store),
            Err(e) if is_corruption(&e) => {
                warn!(
                    "database at {} appears corrupt ({}); deleting and rebuilding",
                    db_path.display(),
                    e
                );
                delete_database_files(&db_path);
                Self::open_at(&db_path)
            }
            Err(e) => Err(e),
        }
    }

    fn open_at(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path).map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?;
        conn.busy_timeout(std::time::Duration::from_millis(BUSY_TIMEOUT_MS as u64))
            .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?;
        conn.pragma_update(None, "foreign_keys", true)
            .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?;

        let mut store = Store {
            conn,
            depth: Cell::new(0),
            db_path: db_path.to_path_buf(),
        };

        store.run_migrations()?;
        store.ensure_fts()?;

        info!("store opened at {}", store.db_path.display());
        Ok(store)
    }

    /// Close the underlying connection. Idempotent at the call-site: the
    /// facade only calls this once during `close()`.
    pub fn close(self) -> Result<()> {
        self.conn
            .close()
            .map_err(|(_, e)| LedgerError::store(anyhow::anyhow!(e)))?;
        Ok(())
    }

    /// Run `f` inside a transaction (depth 0) or a named savepoint (depth > 0).
    /// `f` must be synchronous with respect to the database — the core never
    /// awaits inside this closure (§5).
    pub fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        self.run_transaction("BEGIN", f)
    }

    /// Like `transaction`, but at depth 0 issues `BEGIN IMMEDIATE` so the
    /// write lock is taken before any read. The Ownership Manager's `acquire`
    /// relies on this to make two concurrent callers against the same
    /// database serialize instead of racing on a deferred read.
    pub fn transaction_immediate<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        self.run_transaction("BEGIN IMMEDIATE", f)
    }

    fn run_transaction<F, T>(&self, begin_stmt: &str, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let depth = self.depth.get();
        let savepoint = format!("sp_{depth}");

        if depth == 0 {
            self.conn
                .execute_batch(begin_stmt)
                .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?;
        } else {
            self.conn
                .execute(&format!("SAVEPOINT {savepoint}"), [])
                .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?;
        }
        self.depth.set(depth + 1);
        let _guard = DepthGuard {
            depth: &self.depth,
            restore_to: depth,
        };

        match f(&self.conn) {
            Ok(value) => {
                if depth == 0 {
                    self.conn
                        .execute_batch("COMMIT")
                        .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?;
                } else {
                    self.conn
                        .execute(&format!("RELEASE {savepoint}"), [])
                        .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?;
                }
                Ok(value)
            }
            Err(e) => {
                if depth == 0 {
                    let _ = self.conn.execute_batch("ROLLBACK");
                } else {
                    let _ = self
                        .conn
                        .execute(&format!("ROLLBACK TO {savepoint}"), []);
                    let _ = self.conn.execute(&format!("RELEASE {savepoint}"), []);
                }
                Err(e)
            }
        }
    }

    /// Run a scalar query directly, outside a transaction. Used by introspection
    /// and health checks.
    pub fn raw_query_scalar(&self, text: &str) -> Result<String> {
        self.conn
            .query_row(text, [], |row| row.get::<_, String>(0))
            .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))
    }

    pub fn list_tables(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?;
        Ok(names)
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}

fn is_corruption(err: &LedgerError) -> bool {
    let text = err.to_string().to_lowercase();
    text.contains("malformed") || text.contains("corrupt") || text.contains("not a database")
}

fn delete_database_files(db_path: &Path) {
    for suffix in ["", "-wal", "-shm", "-journal"] {
        let path = if suffix.is_empty() {
            db_path.to_path_buf()
        } else {
            PathBuf::from(format!("{}{suffix}", db_path.display()))
        };
        if path.exists() {
            if let Err(e) = std::fs::remove_file(&path) {
                debug!("failed to remove {}: {}", path.display(), e);
            }
        }
    }
}
