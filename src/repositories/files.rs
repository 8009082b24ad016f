use std::collections::HashMap;

use rusqlite::params;
use tracing::debug;

use crate::error::{LedgerError, Result};
use crate::model::FileRecord;
use crate::store::Store;

pub struct FileRepository<'a> {
    store: &'a Store,
}

impl<'a> FileRepository<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    pub fn get_file(&self, project: &str, path: &str) -> Result<Option<FileRecord>> {
        self.store
            .connection()
            .query_row(
                "SELECT project, file_path, mtime_ms, size, content_hash, updated_at
                 FROM files WHERE project = ?1 AND file_path = ?2",
                params![project, path],
                Self::row_to_record,
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(LedgerError::store(anyhow::anyhow!(other))),
            })
    }

    /// Insert, or on `(project, path)` conflict overwrite `mtime_ms`, `size`,
    /// `content_hash`, `updated_at`.
    pub fn upsert_file(&self, record: &FileRecord) -> Result<()> {
        self.store
            .connection()
            .execute(
                "INSERT INTO files (project, file_path, mtime_ms, size, content_hash, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(project, file_path) DO UPDATE SET
                    mtime_ms = excluded.mtime_ms,
                    size = excluded.size,
                    content_hash = excluded.content_hash,
                    updated_at = excluded.updated_at",
                params![
                    record.project,
                    record.file_path,
                    record.mtime_ms,
                    record.size,
                    record.content_hash,
                    record.updated_at,
                ],
            )
            .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?;
        debug!("upserted file {}/{}", record.project, record.file_path);
        Ok(())
    }

    pub fn get_all(&self, project: &str) -> Result<Vec<FileRecord>> {
        let conn = self.store.connection();
        let mut stmt = conn
            .prepare(
                "SELECT project, file_path, mtime_ms, size, content_hash, updated_at
                 FROM files WHERE project = ?1",
            )
            .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?;
        let rows = stmt
            .query_map(params![project], Self::row_to_record)
            .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?;
        Ok(rows)
    }

    pub fn get_files_map(&self, project: &str) -> Result<HashMap<String, FileRecord>> {
        Ok(self
            .get_all(project)?
            .into_iter()
            .map(|f| (f.file_path.clone(), f))
            .collect())
    }

    /// Delete the file row; `ON DELETE CASCADE` removes dependent symbols and relations.
    pub fn delete_file(&self, project: &str, path: &str) -> Result<()> {
        self.store
            .connection()
            .execute(
                "DELETE FROM files WHERE project = ?1 AND file_path = ?2",
                params![project, path],
            )
            .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?;
        Ok(())
    }

    /// Delete every file row across the given projects (used by `fullIndex`,
    /// which rebuilds every known project boundary in one transaction).
    pub fn delete_all(&self, projects: &[String]) -> Result<()> {
        for project in projects {
            self.store
                .connection()
                .execute("DELETE FROM files WHERE project = ?1", params![project])
                .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?;
        }
        Ok(())
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<FileRecord> {
        Ok(FileRecord {
            project: row.get("project")?,
            file_path: row.get("file_path")?,
            mtime_ms: row.get("mtime_ms")?,
            size: row.get("size")?,
            content_hash: row.get("content_hash")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(path: &str) -> FileRecord {
        FileRecord {
            project: "p".into(),
            file_path: path.into(),
            mtime_ms: 1,
            size: 10,
            content_hash: "h1".into(),
            updated_at: 100,
        }
    }

    #[test]
    fn upsert_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path(), "code-ledger").unwrap();
        let repo = FileRepository::new(&store);
        repo.upsert_file(&record("a.rs")).unwrap();
        let found = repo.get_file("p", "a.rs").unwrap().unwrap();
        assert_eq!(found.content_hash, "h1");
    }

    #[test]
    fn upsert_overwrites_on_conflict() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path(), "code-ledger").unwrap();
        let repo = FileRepository::new(&store);
        repo.upsert_file(&record("a.rs")).unwrap();
        let mut updated = record("a.rs");
        updated.content_hash = "h2".into();
        repo.upsert_file(&updated).unwrap();
        let found = repo.get_file("p", "a.rs").unwrap().unwrap();
        assert_eq!(found.content_hash, "h2");
        assert_eq!(repo.get_all("p").unwrap().len(), 1);
    }

    #[test]
    fn delete_file_cascades() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path(), "code-ledger").unwrap();
        let repo = FileRepository::new(&store);
        repo.upsert_file(&record("a.rs")).unwrap();
        repo.delete_file("p", "a.rs").unwrap();
        assert!(repo.get_file("p", "a.rs").unwrap().is_none());
    }

    #[test]
    fn get_files_map_keys_by_path() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path(), "code-ledger").unwrap();
        let repo = FileRepository::new(&store);
        repo.upsert_file(&record("a.rs")).unwrap();
        repo.upsert_file(&record("b.rs")).unwrap();
        let map = repo.get_files_map("p").unwrap();
        assert_eq!(map.len(), 2);
        assert!(map.contains_key("a.rs"));
    }
}
