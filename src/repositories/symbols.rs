use rusqlite::{params, types::Value as SqlValue, Row};
use tracing::debug;

use crate::error::{LedgerError, Result};
use crate::model::{ExtractedSymbol, SymbolKind, SymbolRecord};
use crate::store::Store;

use super::{parse_detail, parse_kind, span_from_row};

/// Recovers the literal name a user typed from the escaped, prefix-starred
/// FTS expression (`UserService*` -> `UserService`, `"foo-bar"*` -> `foo-bar`)
/// so a single-token query can still rank its exact match first. Built
/// token-by-token rather than trimming stars off the whole expression, which
/// only strips the outermost token's star and leaves interior ones (and any
/// quoting) in place for multi-word queries.
fn exact_candidate(fts: &str) -> String {
    fts.split_whitespace()
        .map(|token| token.trim_end_matches('*').trim_matches('"'))
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Default, Clone)]
pub struct SearchQuery {
    pub fts_query: Option<String>,
    pub kind: Option<SymbolKind>,
    pub file_path: Option<String>,
    pub is_exported: Option<bool>,
    pub project: Option<String>,
    pub limit: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SymbolStats {
    pub file_count: i64,
    pub symbol_count: i64,
}

pub struct SymbolRepository<'a> {
    store: &'a Store,
}

impl<'a> SymbolRepository<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Delete all rows for `(project, path)` then insert `rows`, within one
    /// transaction; FTS rows follow automatically via the synchronization
    /// triggers. `rows` becomes the complete, authoritative symbol set for
    /// that file — no partial or duplicate-on-reindex residue.
    pub fn replace_file_symbols(
        &self,
        project: &str,
        path: &str,
        content_hash: &str,
        rows: &[ExtractedSymbol],
        indexed_at: i64,
    ) -> Result<Vec<SymbolRecord>> {
        self.store.transaction(|conn| {
            conn.execute(
                "DELETE FROM symbols WHERE project = ?1 AND file_path = ?2",
                params![project, path],
            )
            .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?;

            let mut inserted = Vec::with_capacity(rows.len());
            let mut stmt = conn
                .prepare(
                    "INSERT INTO symbols
                        (project, file_path, kind, name, start_line, start_column,
                         end_line, end_column, is_exported, signature, fingerprint,
                         detail_json, content_hash, indexed_at)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)",
                )
                .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?;

            for sym in rows {
                let fingerprint = sym.fingerprint();
                let detail_json = serde_json::to_string(&sym.detail)
                    .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?;
                let id = stmt
                    .insert(params![
                        project,
                        path,
                        sym.kind.as_str(),
                        sym.name,
                        sym.span.start.line,
                        sym.span.start.column,
                        sym.span.end.line,
                        sym.span.end.column,
                        sym.is_exported as i64,
                        sym.signature,
                        fingerprint as i64,
                        detail_json,
                        content_hash,
                        indexed_at,
                    ])
                    .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?;

                inserted.push(SymbolRecord {
                    id,
                    project: project.to_string(),
                    file_path: path.to_string(),
                    kind: sym.kind,
                    name: sym.name.clone(),
                    span: sym.span,
                    is_exported: sym.is_exported,
                    signature: sym.signature.clone(),
                    fingerprint: Some(fingerprint),
                    detail: sym.detail.clone(),
                    content_hash: content_hash.to_string(),
                    indexed_at,
                });
            }
            debug!("replaced {} symbols for {}/{}", inserted.len(), project, path);
            Ok(inserted)
        })
    }

    pub fn get_file_symbols(&self, project: &str, path: &str) -> Result<Vec<SymbolRecord>> {
        let conn = self.store.connection();
        let mut stmt = conn
            .prepare(
                "SELECT id, project, file_path, kind, name, start_line, start_column,
                        end_line, end_column, is_exported, signature, fingerprint,
                        detail_json, content_hash, indexed_at
                 FROM symbols WHERE project = ?1 AND file_path = ?2 ORDER BY id",
            )
            .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?;
        let rows = stmt
            .query_map(params![project, path], Self::row_to_record)
            .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?;
        Ok(rows)
    }

    pub fn delete_file_symbols(&self, project: &str, path: &str) -> Result<()> {
        self.store
            .connection()
            .execute(
                "DELETE FROM symbols WHERE project = ?1 AND file_path = ?2",
                params![project, path],
            )
            .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?;
        Ok(())
    }

    pub fn search_by_name(
        &self,
        project: &str,
        fts_expr: &str,
        kind: Option<SymbolKind>,
        limit: usize,
    ) -> Result<Vec<SymbolRecord>> {
        self.search_by_query(&SearchQuery {
            fts_query: Some(fts_expr.to_string()),
            kind,
            file_path: None,
            is_exported: None,
            project: Some(project.to_string()),
            limit,
        })
    }

    pub fn search_by_kind(
        &self,
        project: &str,
        kind: SymbolKind,
        limit: usize,
    ) -> Result<Vec<SymbolRecord>> {
        self.search_by_query(&SearchQuery {
            fts_query: None,
            kind: Some(kind),
            file_path: None,
            is_exported: None,
            project: Some(project.to_string()),
            limit,
        })
    }

    pub fn get_by_fingerprint(&self, project: &str, fingerprint: u64) -> Result<Vec<SymbolRecord>> {
        let conn = self.store.connection();
        let mut stmt = conn
            .prepare(
                "SELECT id, project, file_path, kind, name, start_line, start_column,
                        end_line, end_column, is_exported, signature, fingerprint,
                        detail_json, content_hash, indexed_at
                 FROM symbols WHERE project = ?1 AND fingerprint = ?2",
            )
            .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?;
        let rows = stmt
            .query_map(params![project, fingerprint as i64], Self::row_to_record)
            .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?;
        Ok(rows)
    }

    pub fn get_stats(&self, project: &str) -> Result<SymbolStats> {
        let conn = self.store.connection();
        let file_count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM files WHERE project = ?1",
                params![project],
                |r| r.get(0),
            )
            .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?;
        let symbol_count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM symbols WHERE project = ?1",
                params![project],
                |r| r.get(0),
            )
            .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?;
        Ok(SymbolStats {
            file_count,
            symbol_count,
        })
    }

    /// Ordering: exact-name matches first, then FTS rank (when applicable),
    /// then row id for stability. When `fts_query` is absent, filters the
    /// base table directly instead of joining through FTS.
    pub fn search_by_query(&self, query: &SearchQuery) -> Result<Vec<SymbolRecord>> {
        let conn = self.store.connection();

        if let Some(fts) = &query.fts_query {
            let mut sql = String::from(
                "SELECT s.id, s.project, s.file_path, s.kind, s.name, s.start_line, s.start_column,
                        s.end_line, s.end_column, s.is_exported, s.signature, s.fingerprint,
                        s.detail_json, s.content_hash, s.indexed_at,
                        CASE WHEN s.name = :exact THEN 0 ELSE 1 END AS exact_rank,
                        bm25(symbols_fts) AS fts_rank
                 FROM symbols_fts
                 JOIN symbols s ON s.id = symbols_fts.rowid
                 WHERE symbols_fts MATCH :fts",
            );
            Self::push_filters(&mut sql, query);
            sql.push_str(" ORDER BY exact_rank ASC, fts_rank ASC, s.id ASC LIMIT :limit");

            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?;
            let mut named = Self::named_params(query);
            named.push((":exact".to_string(), SqlValue::Text(exact_candidate(fts))));
            named.push((":fts".to_string(), SqlValue::Text(fts.clone())));
            named.push((":limit".to_string(), SqlValue::Integer(query.limit as i64)));

            let param_refs: Vec<(&str, &dyn rusqlite::ToSql)> = named
                .iter()
                .map(|(k, v)| (k.as_str(), v as &dyn rusqlite::ToSql))
                .collect();

            let rows = stmt
                .query_map(param_refs.as_slice(), Self::row_to_record)
                .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?;
            Ok(rows)
        } else {
            let mut sql = String::from(
                "SELECT id, project, file_path, kind, name, start_line, start_column,
                        end_line, end_column, is_exported, signature, fingerprint,
                        detail_json, content_hash, indexed_at
                 FROM symbols WHERE 1 = 1",
            );
            Self::push_filters(&mut sql, query);
            sql.push_str(" ORDER BY id ASC LIMIT :limit");

            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?;
            let mut named = Self::named_params(query);
            named.push((":limit".to_string(), SqlValue::Integer(query.limit as i64)));
            let param_refs: Vec<(&str, &dyn rusqlite::ToSql)> = named
                .iter()
                .map(|(k, v)| (k.as_str(), v as &dyn rusqlite::ToSql))
                .collect();

            let rows = stmt
                .query_map(param_refs.as_slice(), Self::row_to_record)
                .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?;
            Ok(rows)
        }
    }

    fn push_filters(sql: &mut String, query: &SearchQuery) {
        let table = if query.fts_query.is_some() { "s." } else { "" };
        if query.kind.is_some() {
            sql.push_str(&format!(" AND {table}kind = :kind"));
        }
        if query.file_path.is_some() {
            sql.push_str(&format!(" AND {table}file_path = :file_path"));
        }
        if query.is_exported.is_some() {
            sql.push_str(&format!(" AND {table}is_exported = :is_exported"));
        }
        if query.project.is_some() {
            sql.push_str(&format!(" AND {table}project = :project"));
        }
    }

    fn named_params(query: &SearchQuery) -> Vec<(String, SqlValue)> {
        let mut out = Vec::new();
        if let Some(kind) = query.kind {
            out.push((":kind".to_string(), SqlValue::Text(kind.as_str().to_string())));
        }
        if let Some(fp) = &query.file_path {
            out.push((":file_path".to_string(), SqlValue::Text(fp.clone())));
        }
        if let Some(exported) = query.is_exported {
            out.push((":is_exported".to_string(), SqlValue::Integer(exported as i64)));
        }
        if let Some(project) = &query.project {
            out.push((":project".to_string(), SqlValue::Text(project.clone())));
        }
        out
    }

    fn row_to_record(row: &Row) -> rusqlite::Result<SymbolRecord> {
        let kind_text: String = row.get("kind")?;
        let kind = parse_kind(&kind_text).unwrap_or(SymbolKind::Variable);
        let detail_text: String = row.get("detail_json")?;
        let fingerprint: Option<i64> = row.get("fingerprint")?;
        Ok(SymbolRecord {
            id: row.get("id")?,
            project: row.get("project")?,
            file_path: row.get("file_path")?,
            kind,
            name: row.get("name")?,
            span: span_from_row(row)?,
            is_exported: row.get::<_, i64>("is_exported")? != 0,
            signature: row.get("signature")?,
            fingerprint: fingerprint.map(|v| v as u64),
            detail: parse_detail(&detail_text),
            content_hash: row.get("content_hash")?,
            indexed_at: row.get("indexed_at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FileRecord, Position, Span};
    use crate::repositories::FileRepository;
    use tempfile::tempdir;

    fn sym(name: &str, kind: SymbolKind) -> ExtractedSymbol {
        ExtractedSymbol {
            kind,
            name: name.to_string(),
            span: Span {
                start: Position { line: 1, column: 0 },
                end: Position { line: 1, column: 10 },
            },
            is_exported: true,
            signature: None,
            detail: serde_json::json!({}),
        }
    }

    fn setup(store: &Store) {
        let files = FileRepository::new(store);
        files
            .upsert_file(&FileRecord {
                project: "p".into(),
                file_path: "a.rs".into(),
                mtime_ms: 1,
                size: 1,
                content_hash: "h".into(),
                updated_at: 1,
            })
            .unwrap();
    }

    #[test]
    fn replace_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path(), "code-ledger").unwrap();
        setup(&store);
        let repo = SymbolRepository::new(&store);
        let rows = vec![sym("Foo", SymbolKind::Class), sym("bar", SymbolKind::Function)];
        repo.replace_file_symbols("p", "a.rs", "h", &rows, 1).unwrap();
        let got = repo.get_file_symbols("p", "a.rs").unwrap();
        assert_eq!(got.len(), 2);
    }

    #[test]
    fn replace_clears_previous_rows() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path(), "code-ledger").unwrap();
        setup(&store);
        let repo = SymbolRepository::new(&store);
        repo.replace_file_symbols("p", "a.rs", "h", &[sym("Foo", SymbolKind::Class)], 1)
            .unwrap();
        repo.replace_file_symbols("p", "a.rs", "h2", &[sym("Bar", SymbolKind::Class)], 2)
            .unwrap();
        let got = repo.get_file_symbols("p", "a.rs").unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].name, "Bar");
    }

    #[test]
    fn search_by_name_prefix_matches() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path(), "code-ledger").unwrap();
        setup(&store);
        let repo = SymbolRepository::new(&store);
        repo.replace_file_symbols(
            "p",
            "a.rs",
            "h",
            &[sym("UserService", SymbolKind::Class), sym("OtherThing", SymbolKind::Class)],
            1,
        )
        .unwrap();
        let results = repo.search_by_name("p", "User*", None, 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "UserService");
    }

    #[test]
    fn get_by_fingerprint_finds_moved_symbol() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path(), "code-ledger").unwrap();
        setup(&store);
        let repo = SymbolRepository::new(&store);
        let s = sym("movedFn", SymbolKind::Function);
        let fp = s.fingerprint();
        repo.replace_file_symbols("p", "a.rs", "h", &[s], 1).unwrap();
        let found = repo.get_by_fingerprint("p", fp).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "movedFn");
    }
}
