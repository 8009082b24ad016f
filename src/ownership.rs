//! Cross-process watcher ownership: leader election and liveness tracking
//! over the `watcher_owner` singleton row (§4.3).

use rusqlite::params;
use tracing::{debug, info, warn};

use crate::error::{LedgerError, Result};
use crate::model::{OwnerRecord, Role};
use crate::store::Store;

/// Heartbeats older than this are considered stale; a new process may take over.
pub const OWNERSHIP_FRESHNESS_MS: i64 = 90_000;

pub struct OwnershipManager<'a> {
    store: &'a Store,
}

impl<'a> OwnershipManager<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Attempt to become the owner. Runs under an immediate-write transaction
    /// so two concurrent callers against the same database cannot both win:
    /// SQLite serializes the writers and the loser observes the winner's row.
    pub fn acquire(&self, pid: u32, now_ms: i64) -> Result<Role> {
        self.store.transaction_immediate(|conn| {
            let existing = Self::read_owner(conn)?;

            match existing {
                None => {
                    Self::write_owner(conn, pid, now_ms, now_ms)?;
                    info!("acquired ownership as pid {pid} (no previous owner)");
                    Ok(Role::Owner)
                }
                Some(owner) => {
                    let alive = is_process_alive(owner.pid);
                    let fresh = now_ms - owner.heartbeat_at <= OWNERSHIP_FRESHNESS_MS;
                    if alive && fresh {
                        debug!("pid {pid} observes live owner {}; becoming reader", owner.pid);
                        Ok(Role::Reader)
                    } else {
                        warn!(
                            "previous owner pid {} is stale (alive={alive}, fresh={fresh}); pid {pid} taking over",
                            owner.pid
                        );
                        Self::write_owner(conn, pid, now_ms, now_ms)?;
                        Ok(Role::Owner)
                    }
                }
            }
        })
    }

    /// No-op unless `pid` is the registered owner.
    pub fn heartbeat(&self, pid: u32, now_ms: i64) -> Result<()> {
        self.store
            .connection()
            .execute(
                "UPDATE watcher_owner SET heartbeat_at = ?1 WHERE id = 1 AND pid = ?2",
                params![now_ms, pid],
            )
            .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?;
        Ok(())
    }

    /// No-op when another owner has already taken over.
    pub fn release(&self, pid: u32) -> Result<()> {
        self.store
            .connection()
            .execute(
                "DELETE FROM watcher_owner WHERE id = 1 AND pid = ?1",
                params![pid],
            )
            .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?;
        Ok(())
    }

    pub fn current_owner(&self) -> Result<Option<OwnerRecord>> {
        Self::read_owner(self.store.connection())
    }

    fn read_owner(conn: &rusqlite::Connection) -> Result<Option<OwnerRecord>> {
        conn.query_row(
            "SELECT pid, started_at, heartbeat_at FROM watcher_owner WHERE id = 1",
            [],
            |row| {
                Ok(OwnerRecord {
                    pid: row.get::<_, i64>(0)? as u32,
                    started_at: row.get(1)?,
                    heartbeat_at: row.get(2)?,
                })
            },
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(LedgerError::store(anyhow::anyhow!(other))),
        })
    }

    fn write_owner(
        conn: &rusqlite::Connection,
        pid: u32,
        started_at: i64,
        heartbeat_at: i64,
    ) -> Result<()> {
        conn.execute(
            "INSERT INTO watcher_owner (id, pid, started_at, heartbeat_at)
             VALUES (1, ?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET pid = excluded.pid, started_at = excluded.started_at, heartbeat_at = excluded.heartbeat_at",
            params![pid, started_at, heartbeat_at],
        )
        .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?;
        Ok(())
    }
}

/// Signal-zero liveness probe: "no such process" means dead, "permission
/// denied" means alive under a different user.
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    let result = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if result == 0 {
        return true;
    }
    match std::io::Error::last_os_error().raw_os_error() {
        Some(libc::ESRCH) => false,
        Some(libc::EPERM) => true,
        _ => false,
    }
}

#[cfg(not(unix))]
pub fn is_process_alive(pid: u32) -> bool {
    // Best-effort fallback: without a signal-zero probe, treat the process as
    // alive unless the heartbeat freshness check already caught the takeover.
    let _ = pid;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn acquire_with_no_owner_becomes_owner() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path(), "code-ledger").unwrap();
        let mgr = OwnershipManager::new(&store);
        let role = mgr.acquire(111, 1_000).unwrap();
        assert_eq!(role, Role::Owner);
    }

    #[test]
    fn second_acquire_with_fresh_heartbeat_is_reader() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path(), "code-ledger").unwrap();
        let mgr = OwnershipManager::new(&store);
        mgr.acquire(std::process::id(), 1_000).unwrap();
        let role = mgr.acquire(999999, 1_500).unwrap();
        assert_eq!(role, Role::Reader);
    }

    #[test]
    fn acquire_with_stale_heartbeat_takes_over() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path(), "code-ledger").unwrap();
        let mgr = OwnershipManager::new(&store);
        mgr.acquire(std::process::id(), 0).unwrap();
        let role = mgr.acquire(222, OWNERSHIP_FRESHNESS_MS + 1_000).unwrap();
        assert_eq!(role, Role::Owner);
        let owner = mgr.current_owner().unwrap().unwrap();
        assert_eq!(owner.pid, 222);
    }

    #[test]
    fn heartbeat_noop_for_non_owner() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path(), "code-ledger").unwrap();
        let mgr = OwnershipManager::new(&store);
        mgr.acquire(111, 1_000).unwrap();
        mgr.heartbeat(999, 2_000).unwrap();
        let owner = mgr.current_owner().unwrap().unwrap();
        assert_eq!(owner.heartbeat_at, 1_000);
    }

    #[test]
    fn release_noop_for_non_owner() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path(), "code-ledger").unwrap();
        let mgr = OwnershipManager::new(&store);
        mgr.acquire(111, 1_000).unwrap();
        mgr.release(999).unwrap();
        assert!(mgr.current_owner().unwrap().is_some());
        mgr.release(111).unwrap();
        assert!(mgr.current_owner().unwrap().is_none());
    }
}
