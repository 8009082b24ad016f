//! The injected dependency bundle (§9 "Eliminating global state").
//!
//! The coordinator and facade take a single `Collaborators` value rather than
//! reaching into process-wide registries. Each trait mirrors one external
//! interface from §6; concrete AST parsing, extraction rules, and project
//! discovery are deliberately out of scope for this crate (§1) and are
//! supplied by the caller.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::error::Result;
use crate::model::{ChangeSet, CodeRelation, ExtractedSymbol, ProjectBoundary};

/// A parsed source file. `program` is an opaque AST handed back to the
/// extractors; the core never inspects it.
#[derive(Debug, Clone)]
pub struct ParsedFile {
    pub file_path: String,
    pub program: JsonValue,
    pub errors: Vec<String>,
    pub comments: Vec<String>,
    pub source_text: String,
}

/// `parseSource(filePath, sourceText) -> ParsedFile` — pure and synchronous (§6).
pub trait SourceParser: Send + Sync {
    fn parse_source(&self, file_path: &str, source_text: &str) -> Result<ParsedFile>;
}

/// `extractSymbols(parsedFile) -> ExtractedSymbol[]`.
pub trait SymbolExtractor: Send + Sync {
    fn extract_symbols(&self, parsed: &ParsedFile) -> Result<Vec<ExtractedSymbol>>;
}

/// `extractRelations(parsedFile) -> CodeRelation[]`.
pub trait RelationExtractor: Send + Sync {
    fn extract_relations(&self, parsed: &ParsedFile) -> Result<Vec<CodeRelation>>;
}

/// `resolveFileProject(relPath, boundaries) -> projectName`.
pub trait ProjectResolver: Send + Sync {
    fn resolve_file_project(&self, rel_path: &str, boundaries: &[ProjectBoundary]) -> String;
}

/// `discoverProjects(workspaceRoot) -> ProjectBoundary[]`.
#[async_trait]
pub trait ProjectDiscoverer: Send + Sync {
    async fn discover_projects(&self, workspace_root: &Path) -> Result<Vec<ProjectBoundary>>;
}

/// `loadTsconfigPaths(workspaceRoot) -> opaque | promise<opaque> | none`.
#[async_trait]
pub trait AliasLoader: Send + Sync {
    async fn load_tsconfig_paths(&self, workspace_root: &Path) -> Result<Option<JsonValue>>;
}

/// `detectChanges({workspaceRoot, extensions, ignorePatterns, fileRepo}) -> {changed, unchanged, deleted}`.
#[async_trait]
pub trait ChangeDetector: Send + Sync {
    async fn detect_changes(
        &self,
        workspace_root: &Path,
        extensions: &[String],
        ignore_patterns: &[String],
        known_files: &std::collections::HashMap<String, crate::model::FileRecord>,
    ) -> Result<ChangeSet>;
}

/// The full bundle passed once into the Coordinator and Facade constructors.
/// No subsystem reaches for more than the fields it uses.
#[derive(Clone)]
pub struct Collaborators {
    pub parser: Arc<dyn SourceParser>,
    pub symbol_extractor: Arc<dyn SymbolExtractor>,
    pub relation_extractor: Arc<dyn RelationExtractor>,
    pub project_resolver: Arc<dyn ProjectResolver>,
    pub project_discoverer: Arc<dyn ProjectDiscoverer>,
    pub alias_loader: Arc<dyn AliasLoader>,
    pub change_detector: Arc<dyn ChangeDetector>,
}
