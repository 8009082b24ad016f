use rusqlite::{params, types::Value as SqlValue, Row};
use tracing::debug;

use crate::error::{LedgerError, Result};
use crate::model::{CodeRelation, RelationRecord, RelationType};
use crate::store::Store;

use super::parse_detail;

#[derive(Debug, Default, Clone)]
pub struct RelationSearchQuery {
    pub src_file_path: Option<String>,
    pub src_symbol_name: Option<String>,
    pub dst_file_path: Option<String>,
    pub dst_symbol_name: Option<String>,
    pub relation_type: Option<RelationType>,
    pub project: Option<String>,
    pub limit: usize,
}

pub struct RelationRepository<'a> {
    store: &'a Store,
}

impl<'a> RelationRepository<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Delete-then-insert for `(project, src_path)`.
    pub fn replace_file_relations(
        &self,
        project: &str,
        src_path: &str,
        rows: &[CodeRelation],
    ) -> Result<Vec<RelationRecord>> {
        self.store.transaction(|conn| {
            conn.execute(
                "DELETE FROM relations WHERE project = ?1 AND src_file_path = ?2",
                params![project, src_path],
            )
            .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?;

            let mut inserted = Vec::with_capacity(rows.len());
            let mut stmt = conn
                .prepare(
                    "INSERT INTO relations
                        (project, type, src_file_path, src_symbol_name, dst_file_path, dst_symbol_name, meta)
                     VALUES (?1,?2,?3,?4,?5,?6,?7)",
                )
                .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?;

            for rel in rows {
                let meta_json = serde_json::to_string(&rel.meta)
                    .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?;
                let id = stmt
                    .insert(params![
                        project,
                        rel.relation_type.as_str(),
                        src_path,
                        rel.src_symbol_name,
                        rel.dst_file_path,
                        rel.dst_symbol_name,
                        meta_json,
                    ])
                    .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?;

                inserted.push(RelationRecord {
                    id,
                    project: project.to_string(),
                    relation_type: rel.relation_type,
                    src_file_path: src_path.to_string(),
                    src_symbol_name: rel.src_symbol_name.clone(),
                    dst_file_path: rel.dst_file_path.clone(),
                    dst_symbol_name: rel.dst_symbol_name.clone(),
                    meta: rel.meta.clone(),
                });
            }
            debug!("replaced {} relations for {}/{}", inserted.len(), project, src_path);
            Ok(inserted)
        })
    }

    pub fn get_outgoing(
        &self,
        project: &str,
        src_path: &str,
        src_symbol: Option<&str>,
    ) -> Result<Vec<RelationRecord>> {
        let conn = self.store.connection();
        let sql = if src_symbol.is_some() {
            "SELECT id, project, type, src_file_path, src_symbol_name, dst_file_path, dst_symbol_name, meta
             FROM relations WHERE project = ?1 AND src_file_path = ?2 AND src_symbol_name = ?3"
        } else {
            "SELECT id, project, type, src_file_path, src_symbol_name, dst_file_path, dst_symbol_name, meta
             FROM relations WHERE project = ?1 AND src_file_path = ?2"
        };
        let mut stmt = conn.prepare(sql).map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?;
        let rows = if let Some(sym) = src_symbol {
            stmt.query_map(params![project, src_path, sym], Self::row_to_record)
        } else {
            stmt.query_map(params![project, src_path], Self::row_to_record)
        }
        .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?;
        Ok(rows)
    }

    pub fn get_incoming(&self, project: &str, dst_path: &str) -> Result<Vec<RelationRecord>> {
        let conn = self.store.connection();
        let mut stmt = conn
            .prepare(
                "SELECT id, project, type, src_file_path, src_symbol_name, dst_file_path, dst_symbol_name, meta
                 FROM relations WHERE project = ?1 AND dst_file_path = ?2",
            )
            .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?;
        let rows = stmt
            .query_map(params![project, dst_path], Self::row_to_record)
            .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?;
        Ok(rows)
    }

    pub fn get_by_type(&self, project: &str, relation_type: RelationType) -> Result<Vec<RelationRecord>> {
        let conn = self.store.connection();
        let mut stmt = conn
            .prepare(
                "SELECT id, project, type, src_file_path, src_symbol_name, dst_file_path, dst_symbol_name, meta
                 FROM relations WHERE project = ?1 AND type = ?2",
            )
            .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?;
        let rows = stmt
            .query_map(params![project, relation_type.as_str()], Self::row_to_record)
            .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?;
        Ok(rows)
    }

    pub fn delete_file_relations(&self, project: &str, src_path: &str) -> Result<()> {
        self.store
            .connection()
            .execute(
                "DELETE FROM relations WHERE project = ?1 AND src_file_path = ?2",
                params![project, src_path],
            )
            .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?;
        Ok(())
    }

    /// Update `(dst_file_path, dst_symbol_name)` for every relation matching
    /// `(project, dst_file_path = old_file, dst_symbol_name = old_symbol)`.
    /// `old_symbol = None` matches rows whose `dst_symbol_name` is null.
    pub fn retarget_relations(
        &self,
        project: &str,
        old_file: &str,
        old_symbol: Option<&str>,
        new_file: &str,
        new_symbol: Option<&str>,
    ) -> Result<usize> {
        let conn = self.store.connection();
        let affected = match old_symbol {
            Some(sym) => conn
                .execute(
                    "UPDATE relations SET dst_file_path = ?1, dst_symbol_name = ?2
                     WHERE project = ?3 AND dst_file_path = ?4 AND dst_symbol_name = ?5",
                    params![new_file, new_symbol, project, old_file, sym],
                )
                .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?,
            None => conn
                .execute(
                    "UPDATE relations SET dst_file_path = ?1, dst_symbol_name = ?2
                     WHERE project = ?3 AND dst_file_path = ?4 AND dst_symbol_name IS NULL",
                    params![new_file, new_symbol, project, old_file],
                )
                .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?,
        };
        Ok(affected)
    }

    pub fn search_relations(&self, query: &RelationSearchQuery) -> Result<Vec<RelationRecord>> {
        let conn = self.store.connection();
        let mut sql = String::from(
            "SELECT id, project, type, src_file_path, src_symbol_name, dst_file_path, dst_symbol_name, meta
             FROM relations WHERE 1 = 1",
        );
        if query.src_file_path.is_some() {
            sql.push_str(" AND src_file_path = :src_file_path");
        }
        if query.src_symbol_name.is_some() {
            sql.push_str(" AND src_symbol_name = :src_symbol_name");
        }
        if query.dst_file_path.is_some() {
            sql.push_str(" AND dst_file_path = :dst_file_path");
        }
        if query.dst_symbol_name.is_some() {
            sql.push_str(" AND dst_symbol_name = :dst_symbol_name");
        }
        if query.relation_type.is_some() {
            sql.push_str(" AND type = :type");
        }
        if query.project.is_some() {
            sql.push_str(" AND project = :project");
        }
        sql.push_str(" ORDER BY id ASC LIMIT :limit");

        let mut named: Vec<(String, SqlValue)> = Vec::new();
        if let Some(v) = &query.src_file_path {
            named.push((":src_file_path".into(), SqlValue::Text(v.clone())));
        }
        if let Some(v) = &query.src_symbol_name {
            named.push((":src_symbol_name".into(), SqlValue::Text(v.clone())));
        }
        if let Some(v) = &query.dst_file_path {
            named.push((":dst_file_path".into(), SqlValue::Text(v.clone())));
        }
        if let Some(v) = &query.dst_symbol_name {
            named.push((":dst_symbol_name".into(), SqlValue::Text(v.clone())));
        }
        if let Some(v) = query.relation_type {
            named.push((":type".into(), SqlValue::Text(v.as_str().to_string())));
        }
        if let Some(v) = &query.project {
            named.push((":project".into(), SqlValue::Text(v.clone())));
        }
        named.push((":limit".into(), SqlValue::Integer(query.limit as i64)));

        let mut stmt = conn.prepare(&sql).map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?;
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

    fn row_to_record(row: &Row) -> rusqlite::Result<RelationRecord> {
        let type_text: String = row.get("type")?;
        let relation_type = RelationType::parse(&type_text).unwrap_or(RelationType::Imports);
        let meta_text: String = row.get("meta")?;
        Ok(RelationRecord {
            id: row.get("id")?,
            project: row.get("project")?,
            relation_type,
            src_file_path: row.get("src_file_path")?,
            src_symbol_name: row.get("src_symbol_name")?,
            dst_file_path: row.get("dst_file_path")?,
            dst_symbol_name: row.get("dst_symbol_name")?,
            meta: parse_detail(&meta_text),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FileRecord;
    use crate::repositories::FileRepository;
    use tempfile::tempdir;

    fn setup(store: &Store) {
        let files = FileRepository::new(store);
        for path in ["src/old.ts", "src/new.ts", "src/other.ts"] {
            files
                .upsert_file(&FileRecord {
                    project: "p".into(),
                    file_path: path.into(),
                    mtime_ms: 1,
                    size: 1,
                    content_hash: "h".into(),
                    updated_at: 1,
                })
                .unwrap();
        }
    }

    fn rel(dst_file: &str, dst_symbol: Option<&str>) -> CodeRelation {
        CodeRelation {
            relation_type: RelationType::Imports,
            src_symbol_name: None,
            dst_file_path: dst_file.to_string(),
            dst_symbol_name: dst_symbol.map(|s| s.to_string()),
            meta: serde_json::json!({}),
        }
    }

    #[test]
    fn replace_then_get_outgoing() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path(), "code-ledger").unwrap();
        setup(&store);
        let repo = RelationRepository::new(&store);
        repo.replace_file_relations("p", "src/other.ts", &[rel("src/old.ts", Some("movedFn"))])
            .unwrap();
        let out = repo.get_outgoing("p", "src/other.ts", None).unwrap();
        assert_eq!(out.len(), 1);
        let inc = repo.get_incoming("p", "src/old.ts").unwrap();
        assert_eq!(inc.len(), 1);
    }

    #[test]
    fn retarget_moves_relation_to_new_destination() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path(), "code-ledger").unwrap();
        setup(&store);
        let repo = RelationRepository::new(&store);
        repo.replace_file_relations("p", "src/other.ts", &[rel("src/old.ts", Some("movedFn"))])
            .unwrap();
        let affected = repo
            .retarget_relations("p", "src/old.ts", Some("movedFn"), "src/new.ts", Some("movedFn"))
            .unwrap();
        assert_eq!(affected, 1);
        assert!(repo.get_incoming("p", "src/old.ts").unwrap().is_empty());
        let inc = repo.get_incoming("p", "src/new.ts").unwrap();
        assert_eq!(inc.len(), 1);
        assert_eq!(inc[0].dst_symbol_name.as_deref(), Some("movedFn"));
    }

    #[test]
    fn retarget_with_none_symbol_matches_null() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path(), "code-ledger").unwrap();
        setup(&store);
        let repo = RelationRepository::new(&store);
        repo.replace_file_relations("p", "src/other.ts", &[rel("src/old.ts", None)])
            .unwrap();
        let affected = repo
            .retarget_relations("p", "src/old.ts", None, "src/new.ts", None)
            .unwrap();
        assert_eq!(affected, 1);
    }
}
