//! Default `ChangeDetector` implementation: walks the workspace, compares
//! disk state against the store's known files, and reports
//! `{changed, unchanged, deleted}` (§6).

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use walkdir::WalkDir;

use crate::collaborators::ChangeDetector as ChangeDetectorTrait;
use crate::error::{LedgerError, Result};
use crate::hashing::hash_string;
use crate::model::{ChangeSet, FileEntry, FileRecord};
use crate::paths::to_forward_slashes;
use crate::watcher::{EventFilter, RawEventKind};

pub struct FilesystemChangeDetector;

#[async_trait]
impl ChangeDetectorTrait for FilesystemChangeDetector {
    async fn detect_changes(
        &self,
        workspace_root: &Path,
        extensions: &[String],
        ignore_patterns: &[String],
        known_files: &HashMap<String, FileRecord>,
    ) -> Result<ChangeSet> {
        let workspace_root = workspace_root.to_path_buf();
        let extensions = extensions.to_vec();
        let ignore_patterns = ignore_patterns.to_vec();
        let known_files = known_files.clone();

        tokio::task::spawn_blocking(move || scan(&workspace_root, &extensions, &ignore_patterns, &known_files))
            .await
            .map_err(|e| LedgerError::store(anyhow::anyhow!(e)))?
    }
}

fn scan(
    workspace_root: &Path,
    extensions: &[String],
    ignore_patterns: &[String],
    known_files: &HashMap<String, FileRecord>,
) -> Result<ChangeSet> {
    let filter = EventFilter::new(extensions.to_vec(), ignore_patterns);
    let mut changed = Vec::new();
    let mut unchanged = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for entry in WalkDir::new(workspace_root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let path = entry.path();
        let Some(watcher_event) = filter.accept(workspace_root, path, RawEventKind::Create) else {
            continue;
        };
        let rel_path = watcher_event.file_path;

        let metadata = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(_) => continue,
        };
        let mtime_ms = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        let size = metadata.len() as i64;

        seen.insert(rel_path.clone());

        let known = known_files.get(&rel_path);
        let unchanged_by_stat = known.map(|f| f.mtime_ms == mtime_ms && f.size == size).unwrap_or(false);

        if unchanged_by_stat {
            unchanged.push(FileEntry {
                file_path: rel_path,
                mtime_ms,
                size,
                content_hash: known.unwrap().content_hash.clone(),
            });
            continue;
        }

        let content_hash = std::fs::read_to_string(path)
            .map(|text| hash_string(&text))
            .unwrap_or_default();

        if known.map(|f| f.content_hash == content_hash).unwrap_or(false) {
            unchanged.push(FileEntry {
                file_path: rel_path,
                mtime_ms,
                size,
                content_hash,
            });
        } else {
            changed.push(FileEntry {
                file_path: rel_path,
                mtime_ms,
                size,
                content_hash,
            });
        }
    }

    let deleted = known_files
        .keys()
        .filter(|path| !seen.contains(*path))
        .cloned()
        .collect::<Vec<_>>();

    Ok(ChangeSet {
        changed,
        unchanged,
        deleted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn detects_new_file_as_changed() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn main() {}").unwrap();
        let detector = FilesystemChangeDetector;
        let result = detector
            .detect_changes(dir.path(), &["rs".to_string()], &[], &HashMap::new())
            .await
            .unwrap();
        assert_eq!(result.changed.len(), 1);
        assert_eq!(result.changed[0].file_path, "a.rs");
    }

    #[tokio::test]
    async fn detects_missing_known_file_as_deleted() {
        let dir = tempdir().unwrap();
        let mut known = HashMap::new();
        known.insert(
            "gone.rs".to_string(),
            FileRecord {
                project: "p".into(),
                file_path: "gone.rs".into(),
                mtime_ms: 1,
                size: 1,
                content_hash: "h".into(),
                updated_at: 1,
            },
        );
        let detector = FilesystemChangeDetector;
        let result = detector
            .detect_changes(dir.path(), &["rs".to_string()], &[], &known)
            .await
            .unwrap();
        assert_eq!(result.deleted, vec!["gone.rs".to_string()]);
    }

    #[tokio::test]
    async fn unchanged_content_hash_is_reported_unchanged() {
        let dir = tempdir().unwrap();
        let content = "fn main() {}";
        std::fs::write(dir.path().join("a.rs"), content).unwrap();
        let hash = hash_string(content);
        let mut known = HashMap::new();
        known.insert(
            "a.rs".to_string(),
            FileRecord {
                project: "p".into(),
                file_path: "a.rs".into(),
                mtime_ms: 999_999_999_999,
                size: content.len() as i64,
                content_hash: hash,
                updated_at: 1,
            },
        );
        let detector = FilesystemChangeDetector;
        let result = detector
            .detect_changes(dir.path(), &["rs".to_string()], &[], &known)
            .await
            .unwrap();
        assert_eq!(result.unchanged.len(), 1);
        assert!(result.changed.is_empty());
    }
}
