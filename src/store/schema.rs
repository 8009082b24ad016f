//! Table, index, and full-text-search trigger creation (§3, §6).

use rusqlite::Connection;
use tracing::debug;

use crate::error::{LedgerError, Result};
use super::Store;

impl Store {
    pub(super) fn create_core_tables(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS files (
                project      TEXT NOT NULL,
                file_path    TEXT NOT NULL,
                mtime_ms     INTEGER NOT NULL,
                size         INTEGER NOT NULL,
                content_hash TEXT NOT NULL,
                updated_at   INTEGER NOT NULL,
                PRIMARY KEY (project, file_path)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS symbols (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                project      TEXT NOT NULL,
                file_path    TEXT NOT NULL,
                kind         TEXT NOT NULL,
                name         TEXT NOT NULL,
                start_line   INTEGER NOT NULL,
                start_column INTEGER NOT NULL,
                end_line     INTEGER NOT NULL,
                end_column   INTEGER NOT NULL,
                is_exported  INTEGER NOT NULL,
                signature    TEXT,
                fingerprint  INTEGER,
                detail_json  TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                indexed_at   INTEGER NOT NULL,
                FOREIGN KEY (project, file_path) REFERENCES files(project, file_path) ON DELETE CASCADE
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_symbols_file ON symbols(project, file_path)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_symbols_kind ON symbols(project, kind)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_symbols_name ON symbols(project, name)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_symbols_fingerprint ON symbols(project, fingerprint)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS relations (
                id               INTEGER PRIMARY KEY AUTOINCREMENT,
                project          TEXT NOT NULL,
                type             TEXT NOT NULL,
                src_file_path    TEXT NOT NULL,
                src_symbol_name  TEXT,
                dst_file_path    TEXT NOT NULL,
                dst_symbol_name  TEXT,
                meta             TEXT NOT NULL,
                FOREIGN KEY (project, src_file_path) REFERENCES files(project, file_path) ON DELETE CASCADE
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_relations_src ON relations(project, src_file_path)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_relations_dst ON relations(project, dst_file_path)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_relations_type ON relations(project, type)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS watcher_owner (
                id           INTEGER PRIMARY KEY CHECK (id = 1),
                pid          INTEGER NOT NULL,
                started_at   INTEGER NOT NULL,
                heartbeat_at INTEGER NOT NULL
            )",
            [],
        )?;

        debug!("core tables and indexes created");
        Ok(())
    }

    /// Create the FTS5 virtual table and its three synchronization triggers if
    /// missing. Keyed by symbol row id; columns `name`, `file_path`, `kind`.
    pub(super) fn ensure_fts(&mut self) -> Result<()> {
        let conn = &self.conn;
        conn.execute(
            "CREATE VIRTUAL TABLE IF NOT EXISTS symbols_fts USING fts5(
                name, file_path, kind,
                content='symbols',
                content_rowid='id'
            )",
            [],
        )
        .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?;

        conn.execute(
            "CREATE TRIGGER IF NOT EXISTS symbols_ai AFTER INSERT ON symbols BEGIN
                INSERT INTO symbols_fts(rowid, name, file_path, kind)
                VALUES (new.id, new.name, new.file_path, new.kind);
            END",
            [],
        )
        .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?;

        conn.execute(
            "CREATE TRIGGER IF NOT EXISTS symbols_ad AFTER DELETE ON symbols BEGIN
                INSERT INTO symbols_fts(symbols_fts, rowid, name, file_path, kind)
                VALUES ('delete', old.id, old.name, old.file_path, old.kind);
            END",
            [],
        )
        .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?;

        conn.execute(
            "CREATE TRIGGER IF NOT EXISTS symbols_au AFTER UPDATE ON symbols BEGIN
                INSERT INTO symbols_fts(symbols_fts, rowid, name, file_path, kind)
                VALUES ('delete', old.id, old.name, old.file_path, old.kind);
                INSERT INTO symbols_fts(rowid, name, file_path, kind)
                VALUES (new.id, new.name, new.file_path, new.kind);
            END",
            [],
        )
        .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?;

        debug!("symbols_fts virtual table and triggers ensured");
        Ok(())
    }
}
