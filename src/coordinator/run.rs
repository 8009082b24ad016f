//! The per-run algorithm (§4.5 `_doIndex`): classify the changeset, snapshot
//! fingerprints of files about to be deleted so moves can be detected, apply
//! the changeset (incremental: file-by-file, no enclosing transaction; full:
//! pre-read everything, then one synchronous transaction), retarget moved
//! symbols' incoming relations, and report the result.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use tracing::warn;

use super::{IndexCoordinator, Inner};
use crate::error::{LedgerError, Result};
use crate::model::{ChangeSet, EventType, FileEntry, FileRecord, IndexResult, SymbolRecord, WatcherEvent};
use crate::repositories::{FileRepository, RelationRepository, SymbolRepository};
use crate::store::Store;

struct PreparedFile {
    project: String,
    rel_path: String,
    source_text: String,
    mtime_ms: i64,
    size: i64,
    content_hash: String,
}

pub(super) async fn do_index(
    coordinator: &IndexCoordinator,
    events: Option<Vec<WatcherEvent>>,
    use_transaction: bool,
) -> Result<IndexResult> {
    let start = Instant::now();
    let inner = &coordinator.0;

    await_boundaries_refresh(coordinator).await;
    let boundaries = inner.boundaries.lock().await.clone();
    let projects: Vec<String> = {
        let mut seen = HashSet::new();
        let mut names = Vec::new();
        for b in &boundaries {
            if seen.insert(b.project_name.clone()) {
                names.push(b.project_name.clone());
            }
        }
        if names.is_empty() {
            names.push("default".to_string());
        }
        names
    };

    let changeset = classify_changeset(coordinator, events, use_transaction, &projects).await?;

    // Move-detection snapshot, taken before any deletion happens.
    let deleted_snapshot = {
        let store = inner.store.lock().await;
        snapshot_deleted_symbols(&store, &projects, &changeset.deleted)?
    };

    let mut result = IndexResult {
        removed_files: changeset.deleted.len(),
        deleted_files: changeset.deleted.clone(),
        ..Default::default()
    };

    // Pre-read every changed file before doing anything destructive; a file
    // that fails to read (permission error, vanished mid-scan) is dropped
    // from this run rather than aborting it (§7 ParseFailure policy).
    let mut prepared = Vec::with_capacity(changeset.changed.len());
    for entry in &changeset.changed {
        let project = inner
            .collaborators
            .project_resolver
            .resolve_file_project(&entry.file_path, &boundaries);
        match prepare_file(&inner.workspace_root, &entry.file_path, &project).await {
            Ok(p) => prepared.push(p),
            Err(e) => {
                warn!("skipping {} after read failure: {e}", entry.file_path);
                result.failed_files.push(entry.file_path.clone());
            }
        }
    }

    {
        let store = inner.store.lock().await;

        for project in &projects {
            let file_repo = FileRepository::new(&store);
            for path in &changeset.deleted {
                file_repo.delete_file(project, path)?;
            }
        }

        if use_transaction {
            apply_full(inner, &store, &projects, &prepared, &mut result)?;
        } else {
            apply_incremental(inner, &store, &prepared, &mut result)?;
        }

        retarget_moved_symbols(&store, &projects, &deleted_snapshot, &prepared)?;
    }

    result.changed_files = prepared
        .iter()
        .map(|p| p.rel_path.clone())
        .filter(|path| !result.failed_files.contains(path))
        .collect();
    result.duration_ms = start.elapsed().as_millis();
    Ok(result)
}

async fn await_boundaries_refresh(coordinator: &IndexCoordinator) {
    let inner = &coordinator.0;
    let handle = {
        let mut state = inner.state.lock().await;
        state.boundaries_refresh.take()
    };
    if let Some(handle) = handle {
        match handle.await {
            Ok(Ok(fresh)) => {
                *inner.boundaries.lock().await = fresh;
            }
            Ok(Err(e)) => warn!("project boundary refresh failed: {e}"),
            Err(e) if e.is_cancelled() => {}
            Err(e) => warn!("project boundary refresh task panicked: {e}"),
        }
    }
}

async fn classify_changeset(
    coordinator: &IndexCoordinator,
    events: Option<Vec<WatcherEvent>>,
    use_transaction: bool,
    projects: &[String],
) -> Result<ChangeSet> {
    let inner = &coordinator.0;

    if let Some(events) = events {
        let mut changed = Vec::new();
        let mut deleted = Vec::new();
        let mut seen_changed = HashSet::new();
        let mut seen_deleted = HashSet::new();
        for event in events {
            match event.event_type {
                EventType::Create | EventType::Change => {
                    if seen_changed.insert(event.file_path.clone()) {
                        changed.push(FileEntry {
                            file_path: event.file_path,
                            mtime_ms: 0,
                            size: 0,
                            content_hash: String::new(),
                        });
                    }
                }
                EventType::Delete => {
                    if seen_deleted.insert(event.file_path.clone()) {
                        deleted.push(event.file_path);
                    }
                }
            }
        }
        return Ok(ChangeSet {
            changed,
            unchanged: Vec::new(),
            deleted,
        });
    }

    let known_files: HashMap<String, FileRecord> = {
        let store = inner.store.lock().await;
        let mut merged = HashMap::new();
        for project in projects {
            let repo = FileRepository::new(&store);
            merged.extend(repo.get_files_map(project)?);
        }
        merged
    };

    let mut changeset = inner
        .collaborators
        .change_detector
        .detect_changes(&inner.workspace_root, &inner.extensions, &inner.ignore_patterns, &known_files)
        .await?;

    if use_transaction {
        changeset.changed.append(&mut changeset.unchanged);
    }
    Ok(changeset)
}

async fn prepare_file(workspace_root: &std::path::Path, rel_path: &str, project: &str) -> Result<PreparedFile> {
    let abs = workspace_root.join(rel_path);
    let source_text = tokio::fs::read_to_string(&abs)
        .await
        .map_err(|e| LedgerError::parse(rel_path, anyhow::anyhow!(e)))?;
    let metadata = tokio::fs::metadata(&abs)
        .await
        .map_err(|e| LedgerError::parse(rel_path, anyhow::anyhow!(e)))?;
    let mtime_ms = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    let content_hash = crate::hashing::hash_string(&source_text);
    Ok(PreparedFile {
        project: project.to_string(),
        rel_path: rel_path.to_string(),
        size: metadata.len() as i64,
        source_text,
        mtime_ms,
        content_hash,
    })
}

fn snapshot_deleted_symbols(
    store: &Store,
    projects: &[String],
    deleted: &[String],
) -> Result<HashMap<u64, Vec<(String, String)>>> {
    let mut snapshot: HashMap<u64, Vec<(String, String)>> = HashMap::new();
    let symbols = SymbolRepository::new(store);
    for project in projects {
        for path in deleted {
            for sym in symbols.get_file_symbols(project, path)? {
                if let Some(fp) = sym.fingerprint {
                    snapshot.entry(fp).or_default().push((project.clone(), path.clone()));
                }
            }
        }
    }
    Ok(snapshot)
}

fn apply_full(
    inner: &Inner,
    store: &Store,
    projects: &[String],
    prepared: &[PreparedFile],
    result: &mut IndexResult,
) -> Result<()> {
    store.transaction(|_conn| {
        let file_repo = FileRepository::new(store);
        file_repo.delete_all(projects)?;

        let indexed_at = chrono::Utc::now().timestamp_millis();
        for file in prepared {
            match index_one_file(inner, store, file, indexed_at) {
                Ok((symbols, relations)) => {
                    result.indexed_files += 1;
                    result.total_symbols += symbols;
                    result.total_relations += relations;
                }
                Err(e) => {
                    warn!("failed to index {}: {e}", file.rel_path);
                    result.failed_files.push(file.rel_path.clone());
                }
            }
        }
        Ok(())
    })
}

fn apply_incremental(inner: &Inner, store: &Store, prepared: &[PreparedFile], result: &mut IndexResult) -> Result<()> {
    let indexed_at = chrono::Utc::now().timestamp_millis();
    for file in prepared {
        match index_one_file(inner, store, file, indexed_at) {
            Ok((symbols, relations)) => {
                result.indexed_files += 1;
                result.total_symbols += symbols;
                result.total_relations += relations;
            }
            Err(e) => {
                warn!("failed to index {}: {e}", file.rel_path);
                result.failed_files.push(file.rel_path.clone());
            }
        }
    }
    Ok(())
}

/// Parses `file`, stores the AST in the bounded parse cache, extracts
/// symbols and relations, and persists all three. Returns
/// `(symbol_count, relation_count)`. Called both from inside the
/// full-index transaction and, file-by-file with no enclosing transaction,
/// from the incremental path.
fn index_one_file(inner: &Inner, store: &Store, file: &PreparedFile, indexed_at: i64) -> Result<(usize, usize)> {
    let parsed = inner
        .collaborators
        .parser
        .parse_source(&file.rel_path, &file.source_text)
        .map_err(|e| LedgerError::parse(&file.rel_path, anyhow::anyhow!(e)))?;

    inner
        .parse_cache
        .lock()
        .unwrap()
        .put(cache_key(&file.project, &file.rel_path), parsed.clone());

    let extracted_symbols = inner.collaborators.symbol_extractor.extract_symbols(&parsed)?;
    let extracted_relations = inner.collaborators.relation_extractor.extract_relations(&parsed)?;

    let file_repo = FileRepository::new(store);
    file_repo.upsert_file(&FileRecord {
        project: file.project.clone(),
        file_path: file.rel_path.clone(),
        mtime_ms: file.mtime_ms,
        size: file.size,
        content_hash: file.content_hash.clone(),
        updated_at: indexed_at,
    })?;

    let symbol_repo = SymbolRepository::new(store);
    let symbols = symbol_repo.replace_file_symbols(
        &file.project,
        &file.rel_path,
        &file.content_hash,
        &extracted_symbols,
        indexed_at,
    )?;

    let relation_repo = RelationRepository::new(store);
    let relations = relation_repo.replace_file_relations(&file.project, &file.rel_path, &extracted_relations)?;

    Ok((symbols.len(), relations.len()))
}

fn cache_key(project: &str, rel_path: &str) -> String {
    format!("{project}:{rel_path}")
}

/// Retargets incoming relations of moved symbols: a symbol that disappeared
/// from exactly one deleted file and reappears in exactly one newly-indexed
/// file (same fingerprint) is treated as moved rather than deleted-then-
/// recreated. Ambiguous fingerprints (present in more than one deleted file,
/// or matching more than one new file) are left alone.
fn retarget_moved_symbols(
    store: &Store,
    projects: &[String],
    deleted_snapshot: &HashMap<u64, Vec<(String, String)>>,
    prepared: &[PreparedFile],
) -> Result<()> {
    if deleted_snapshot.is_empty() || prepared.is_empty() {
        return Ok(());
    }

    let symbols = SymbolRepository::new(store);
    let relations = RelationRepository::new(store);

    for project in projects {
        for (fingerprint, origins) in deleted_snapshot {
            if origins.len() != 1 {
                continue;
            }
            let (origin_project, origin_path) = &origins[0];
            if origin_project != project {
                continue;
            }

            let candidates: Vec<SymbolRecord> = symbols.get_by_fingerprint(project, *fingerprint)?;

            if candidates.len() != 1 {
                continue;
            }
            let new_symbol = &candidates[0];
            if &new_symbol.file_path == origin_path {
                continue;
            }
            relations.retarget_relations(
                project,
                origin_path,
                Some(&new_symbol.name),
                &new_symbol.file_path,
                Some(&new_symbol.name),
            )?;
        }
    }
    Ok(())
}
