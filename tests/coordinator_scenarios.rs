//! End-to-end coordinator scenarios from the design doc's testable-properties
//! section: move tracking (unique and ambiguous), debounced coalescing, and
//! per-file parse-failure containment. Uses a tiny line-oriented test
//! collaborator bundle instead of the heuristic defaults so symbol names and
//! relation targets are exact and fingerprint collisions are deliberate.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as JsonValue;
use tokio::sync::Mutex as TokioMutex;

use code_ledger::change_detector::FilesystemChangeDetector;
use code_ledger::defaults::{ManifestProjectDiscoverer, NearestAncestorProjectResolver, NullAliasLoader};
use code_ledger::{
    CodeRelation, Collaborators, CoordinatorConfig, EventType, ExtractedSymbol, IndexCoordinator, IndexResult,
    ParsedFile, Position, RelationExtractor, RelationRepository, RelationType, Result, Span, Store, SourceParser,
    SymbolExtractor, SymbolKind, SymbolRepository, WatcherEvent,
};

/// `symbol:<kind>:<name>:<exported>` per line; `relation:imports:<dst file>:<dst symbol>` per line.
struct LineProtocolParser;

impl SourceParser for LineProtocolParser {
    fn parse_source(&self, file_path: &str, source_text: &str) -> Result<ParsedFile> {
        Ok(ParsedFile {
            file_path: file_path.to_string(),
            program: JsonValue::Null,
            errors: Vec::new(),
            comments: Vec::new(),
            source_text: source_text.to_string(),
        })
    }
}

struct LineProtocolSymbolExtractor;

impl SymbolExtractor for LineProtocolSymbolExtractor {
    fn extract_symbols(&self, parsed: &ParsedFile) -> Result<Vec<ExtractedSymbol>> {
        let mut out = Vec::new();
        for (idx, line) in parsed.source_text.lines().enumerate() {
            let Some(rest) = line.strip_prefix("symbol:") else { continue };
            let parts: Vec<&str> = rest.split(':').collect();
            if parts.len() != 3 {
                continue;
            }
            let kind = match parts[0] {
                "function" => SymbolKind::Function,
                "class" => SymbolKind::Class,
                _ => SymbolKind::Variable,
            };
            let line_no = (idx + 1) as i64;
            out.push(ExtractedSymbol {
                kind,
                name: parts[1].to_string(),
                span: Span {
                    start: Position { line: line_no, column: 0 },
                    end: Position { line: line_no, column: line.len() as i64 },
                },
                is_exported: parts[2] == "true",
                signature: None,
                detail: JsonValue::Null,
            });
        }
        Ok(out)
    }
}

struct LineProtocolRelationExtractor;

impl RelationExtractor for LineProtocolRelationExtractor {
    fn extract_relations(&self, parsed: &ParsedFile) -> Result<Vec<CodeRelation>> {
        let mut out = Vec::new();
        for line in parsed.source_text.lines() {
            let Some(rest) = line.strip_prefix("relation:imports:") else { continue };
            let parts: Vec<&str> = rest.splitn(2, ':').collect();
            if parts.len() != 2 {
                continue;
            }
            out.push(CodeRelation {
                relation_type: RelationType::Imports,
                src_symbol_name: None,
                dst_file_path: parts[0].to_string(),
                dst_symbol_name: Some(parts[1].to_string()),
                meta: JsonValue::Null,
            });
        }
        Ok(out)
    }
}

/// Wraps [`LineProtocolSymbolExtractor`] but fails for one configured path,
/// modeling a single bad file in an otherwise-healthy batch (§7 `ParseFailure`).
struct FailingSymbolExtractor {
    fail_path: String,
    inner: LineProtocolSymbolExtractor,
}

impl SymbolExtractor for FailingSymbolExtractor {
    fn extract_symbols(&self, parsed: &ParsedFile) -> Result<Vec<ExtractedSymbol>> {
        if parsed.file_path == self.fail_path {
            return Err(code_ledger::LedgerError::parse(
                &parsed.file_path,
                anyhow::anyhow!("simulated extractor failure"),
            ));
        }
        self.inner.extract_symbols(parsed)
    }
}

struct CountingSymbolExtractor {
    calls: Arc<AtomicUsize>,
    inner: LineProtocolSymbolExtractor,
}

impl SymbolExtractor for CountingSymbolExtractor {
    fn extract_symbols(&self, parsed: &ParsedFile) -> Result<Vec<ExtractedSymbol>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.extract_symbols(parsed)
    }
}

fn base_collaborators() -> Collaborators {
    Collaborators {
        parser: Arc::new(LineProtocolParser),
        symbol_extractor: Arc::new(LineProtocolSymbolExtractor),
        relation_extractor: Arc::new(LineProtocolRelationExtractor),
        project_resolver: Arc::new(NearestAncestorProjectResolver),
        project_discoverer: Arc::new(ManifestProjectDiscoverer::default()),
        alias_loader: Arc::new(NullAliasLoader),
        change_detector: Arc::new(FilesystemChangeDetector),
    }
}

async fn coordinator_for(root: &Path, collaborators: Collaborators) -> IndexCoordinator {
    let store = Store::open(root, "code-ledger").expect("store opens");
    IndexCoordinator::new(
        Arc::new(TokioMutex::new(store)),
        collaborators,
        Vec::new(),
        CoordinatorConfig {
            workspace_root: root.to_path_buf(),
            app_dir: "code-ledger".to_string(),
            extensions: vec!["ts".to_string()],
            ignore_patterns: Vec::new(),
            parse_cache_capacity: 50,
        },
    )
}

fn store_handle(root: &Path) -> Store {
    Store::open(root, "code-ledger").expect("reopening an already-migrated store succeeds")
}

#[tokio::test]
async fn move_tracking_unique_match_retargets_relation() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("src")).unwrap();
    std::fs::write(dir.path().join("src/old.ts"), "symbol:function:movedFn:true\n").unwrap();
    std::fs::write(
        dir.path().join("src/other.ts"),
        "relation:imports:src/old.ts:movedFn\n",
    )
    .unwrap();

    let coordinator = coordinator_for(dir.path(), base_collaborators()).await;
    let first = coordinator.full_index().await.unwrap();
    assert_eq!(first.indexed_files, 2);

    // Simulate the move on disk: old.ts disappears, new.ts reintroduces the
    // same symbol (same name/kind/signature => same fingerprint).
    std::fs::remove_file(dir.path().join("src/old.ts")).unwrap();
    std::fs::write(dir.path().join("src/new.ts"), "symbol:function:movedFn:true\n").unwrap();

    let events = vec![
        WatcherEvent { event_type: EventType::Delete, file_path: "src/old.ts".to_string() },
        WatcherEvent { event_type: EventType::Create, file_path: "src/new.ts".to_string() },
    ];
    coordinator.incremental_index(Some(events)).await.unwrap();

    let store = store_handle(dir.path());
    let relations = RelationRepository::new(&store);
    let incoming_new = relations.get_incoming("default", "src/new.ts").unwrap();
    assert_eq!(incoming_new.len(), 1);
    assert_eq!(incoming_new[0].dst_symbol_name.as_deref(), Some("movedFn"));
    assert!(relations.get_incoming("default", "src/old.ts").unwrap().is_empty());
}

#[tokio::test]
async fn move_tracking_ambiguous_match_leaves_relation_stale() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("src")).unwrap();
    std::fs::write(dir.path().join("src/old.ts"), "symbol:function:dupFn:true\n").unwrap();
    std::fs::write(
        dir.path().join("src/other.ts"),
        "relation:imports:src/old.ts:dupFn\n",
    )
    .unwrap();

    let coordinator = coordinator_for(dir.path(), base_collaborators()).await;
    coordinator.full_index().await.unwrap();

    std::fs::remove_file(dir.path().join("src/old.ts")).unwrap();
    std::fs::write(dir.path().join("src/new_a.ts"), "symbol:function:dupFn:true\n").unwrap();
    std::fs::write(dir.path().join("src/new_b.ts"), "symbol:function:dupFn:true\n").unwrap();

    let events = vec![
        WatcherEvent { event_type: EventType::Delete, file_path: "src/old.ts".to_string() },
        WatcherEvent { event_type: EventType::Create, file_path: "src/new_a.ts".to_string() },
        WatcherEvent { event_type: EventType::Create, file_path: "src/new_b.ts".to_string() },
    ];
    coordinator.incremental_index(Some(events)).await.unwrap();

    let store = store_handle(dir.path());
    let relations = RelationRepository::new(&store);
    assert!(relations.get_incoming("default", "src/new_a.ts").unwrap().is_empty());
    assert!(relations.get_incoming("default", "src/new_b.ts").unwrap().is_empty());
    // Ambiguous fingerprints are left alone: the relation still points at the
    // now-deleted src/old.ts rather than guessing which new file it moved to.
    assert_eq!(relations.get_incoming("default", "src/old.ts").unwrap().len(), 1);
}

#[tokio::test]
async fn empty_event_list_indexes_nothing_and_skips_extractor() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let mut collaborators = base_collaborators();
    collaborators.symbol_extractor = Arc::new(CountingSymbolExtractor {
        calls: Arc::clone(&calls),
        inner: LineProtocolSymbolExtractor,
    });

    let coordinator = coordinator_for(dir.path(), collaborators).await;
    let result = coordinator.incremental_index(Some(Vec::new())).await.unwrap();

    assert_eq!(result.indexed_files, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn parse_failure_on_one_file_does_not_abort_the_batch() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.ts"), "symbol:function:a:true\n").unwrap();
    std::fs::write(dir.path().join("bad.ts"), "symbol:function:bad:true\n").unwrap();
    std::fs::write(dir.path().join("c.ts"), "symbol:function:c:true\n").unwrap();

    let mut collaborators = base_collaborators();
    collaborators.symbol_extractor = Arc::new(FailingSymbolExtractor {
        fail_path: "bad.ts".to_string(),
        inner: LineProtocolSymbolExtractor,
    });

    let coordinator = coordinator_for(dir.path(), collaborators).await;
    let events = vec![
        WatcherEvent { event_type: EventType::Create, file_path: "a.ts".to_string() },
        WatcherEvent { event_type: EventType::Create, file_path: "bad.ts".to_string() },
        WatcherEvent { event_type: EventType::Create, file_path: "c.ts".to_string() },
    ];
    let result = coordinator.incremental_index(Some(events)).await.unwrap();

    assert_eq!(result.indexed_files, 2);
    assert_eq!(result.failed_files, vec!["bad.ts".to_string()]);
    assert!(!result.changed_files.contains(&"bad.ts".to_string()));

    let store = store_handle(dir.path());
    let symbols = SymbolRepository::new(&store);
    assert_eq!(symbols.get_file_symbols("default", "a.ts").unwrap().len(), 1);
    assert!(symbols.get_file_symbols("default", "bad.ts").unwrap().is_empty());
    assert_eq!(symbols.get_file_symbols("default", "c.ts").unwrap().len(), 1);

    // The lock must be released and a subsequent run must still succeed.
    let second = coordinator.incremental_index(Some(Vec::new())).await.unwrap();
    assert_eq!(second.indexed_files, 0);
}

#[tokio::test]
async fn debounced_events_coalesce_into_one_run() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["a.ts", "b.ts", "c.ts"] {
        std::fs::write(dir.path().join(name), format!("symbol:function:{name}:true\n")).unwrap();
    }

    let coordinator = coordinator_for(dir.path(), base_collaborators()).await;
    let run_count = Arc::new(AtomicUsize::new(0));
    let last_indexed = Arc::new(std::sync::Mutex::new(0usize));
    {
        let run_count = Arc::clone(&run_count);
        let last_indexed = Arc::clone(&last_indexed);
        let _unsub = coordinator
            .on_indexed(Arc::new(move |result: &IndexResult| {
                run_count.fetch_add(1, Ordering::SeqCst);
                *last_indexed.lock().unwrap() = result.indexed_files;
            }))
            .await;

        for name in ["a.ts", "b.ts", "c.ts"] {
            coordinator.handle_watcher_event(WatcherEvent {
                event_type: EventType::Create,
                file_path: name.to_string(),
            });
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // Debounce window is 100ms; give the scheduled run time to complete.
        tokio::time::sleep(Duration::from_millis(400)).await;
    }

    assert_eq!(run_count.load(Ordering::SeqCst), 1);
    assert_eq!(*last_indexed.lock().unwrap(), 3);
}

#[tokio::test]
async fn full_index_twice_on_unchanged_tree_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.ts"), "symbol:function:a:true\n").unwrap();
    std::fs::write(dir.path().join("b.ts"), "relation:imports:a.ts:a\n").unwrap();

    let coordinator = coordinator_for(dir.path(), base_collaborators()).await;
    let first = coordinator.full_index().await.unwrap();
    let second = coordinator.full_index().await.unwrap();

    assert_eq!(first.indexed_files, second.indexed_files);
    assert_eq!(first.total_symbols, second.total_symbols);
    assert_eq!(first.total_relations, second.total_relations);

    let store = store_handle(dir.path());
    let symbols = SymbolRepository::new(&store);
    assert_eq!(symbols.get_file_symbols("default", "a.ts").unwrap().len(), 1);
}
