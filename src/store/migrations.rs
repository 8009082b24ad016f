//! Versioned schema migrations, run from a packaged sequence on every open
//! (§4.1). There is one migration today; the table exists so future schema
//! changes have somewhere to land without special-casing a first release.

use tracing::{debug, info};

use crate::error::{LedgerError, Result};
use super::Store;

pub const LATEST_SCHEMA_VERSION: i32 = 1;

impl Store {
    pub(super) fn run_migrations(&mut self) -> Result<()> {
        self.create_schema_version_table()?;
        let current = self.schema_version()?;

        if current >= LATEST_SCHEMA_VERSION {
            debug!("schema already at version {current}");
            return Ok(());
        }

        for version in (current + 1)..=LATEST_SCHEMA_VERSION {
            info!("applying migration {version}");
            self.apply_migration(version)?;
            self.record_migration(version)?;
        }
        Ok(())
    }

    fn create_schema_version_table(&self) -> Result<()> {
        self.connection()
            .execute(
                "CREATE TABLE IF NOT EXISTS schema_version (
                    version     INTEGER PRIMARY KEY,
                    applied_at  INTEGER NOT NULL,
                    description TEXT NOT NULL
                )",
                [],
            )
            .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?;
        Ok(())
    }

    pub fn schema_version(&self) -> Result<i32> {
        self.connection()
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))
    }

    fn apply_migration(&mut self, version: i32) -> Result<()> {
        match version {
            1 => Self::create_core_tables(self.connection())
                .map_err(|e| LedgerError::store(anyhow::anyhow!(e))),
            other => Err(LedgerError::store(anyhow::anyhow!(
                "unknown migration version: {other}"
            ))),
        }
    }

    fn record_migration(&self, version: i32) -> Result<()> {
        let description = match version {
            1 => "initial schema: files, symbols, relations, watcher_owner",
            _ => "unknown",
        };
        let now = chrono::Utc::now().timestamp_millis();
        self.connection()
            .execute(
                "INSERT OR REPLACE INTO schema_version (version, applied_at, description)
                 VALUES (?1, ?2, ?3)",
                rusqlite::params![version, now, description],
            )
            .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?;
        Ok(())
    }
}
