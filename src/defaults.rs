//! Minimal reference implementations of the external collaborator traits
//! (§6, §9). Concrete AST parsing and extraction rules are out of scope for
//! this crate (§1) — real deployments inject their own `SourceParser` /
//! `SymbolExtractor` / `RelationExtractor` backed by a real front-end. These
//! defaults exist so the facade and demo binary have something to run
//! against: line-oriented regexes instead of a parser, "nearest enclosing
//! directory" instead of a build-file-aware project boundary scanner.

use std::path::Path;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value as JsonValue;
use walkdir::WalkDir;

use crate::collaborators::{AliasLoader, ParsedFile, ProjectDiscoverer, ProjectResolver, RelationExtractor, SourceParser, SymbolExtractor};
use crate::error::Result;
use crate::model::{CodeRelation, ExtractedSymbol, Position, ProjectBoundary, RelationType, Span, SymbolKind};
use crate::paths::to_forward_slashes;

/// Manifest file names that mark a directory as a project boundary.
pub const DEFAULT_MANIFESTS: &[&str] = &["package.json", "Cargo.toml", "pyproject.toml", "go.mod"];

/// Treats the whole source text as one opaque blob; there is no real AST to
/// hand back, so `program` is `Null` and extraction happens straight off
/// `source_text` in the paired extractors below.
pub struct PlainTextParser;

impl SourceParser for PlainTextParser {
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

static FN_LIKE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(?P<export>pub(?:\([^)]*\))?\s+|export\s+(?:default\s+)?)?(?P<kind>fn|function|def|class|struct|interface|enum)\s+(?P<name>[A-Za-z_][A-Za-z0-9_]*)")
        .expect("static fn-like regex is valid")
});

/// Heuristic line scanner: one match per declaration keyword (`fn`,
/// `function`, `def`, `class`, `struct`, `interface`, `enum`). Good enough to
/// exercise the coordinator and search paths without a real front-end; not a
/// substitute for one.
pub struct LineHeuristicSymbolExtractor;

impl SymbolExtractor for LineHeuristicSymbolExtractor {
    fn extract_symbols(&self, parsed: &ParsedFile) -> Result<Vec<ExtractedSymbol>> {
        let mut symbols = Vec::new();
        for (idx, line) in parsed.source_text.lines().enumerate() {
            let Some(caps) = FN_LIKE.captures(line) else { continue };
            let kind = match &caps["kind"] {
                "fn" | "function" | "def" => SymbolKind::Function,
                "class" => SymbolKind::Class,
                "struct" => SymbolKind::Type,
                "interface" => SymbolKind::Interface,
                "enum" => SymbolKind::Enum,
                _ => continue,
            };
            let name = caps["name"].to_string();
            let line_no = (idx + 1) as i64;
            symbols.push(ExtractedSymbol {
                kind,
                name,
                span: Span {
                    start: Position { line: line_no, column: 0 },
                    end: Position { line: line_no, column: line.len() as i64 },
                },
                is_exported: caps.name("export").is_some(),
                signature: None,
                detail: JsonValue::Null,
            });
        }
        Ok(symbols)
    }
}

static IMPORT_LIKE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?m)^\s*(?:import\s.*?from\s+["'](?P<es_path>[^"']+)["']|use\s+crate::(?P<rust_path>[A-Za-z0-9_:]+)\s*;)"#,
    )
    .expect("static import-like regex is valid")
});

/// Heuristic line scanner for `imports` relations: ES-module `import ... from
/// "..."` and Rust `use crate::...;`. Every other relation type is the
/// extractor's business, not this default's.
pub struct LineHeuristicRelationExtractor;

impl RelationExtractor for LineHeuristicRelationExtractor {
    fn extract_relations(&self, parsed: &ParsedFile) -> Result<Vec<CodeRelation>> {
        let mut relations = Vec::new();
        for line in parsed.source_text.lines() {
            let Some(caps) = IMPORT_LIKE.captures(line) else { continue };
            let dst = if let Some(m) = caps.name("es_path") {
                m.as_str().to_string()
            } else if let Some(m) = caps.name("rust_path") {
                m.as_str().replace("::", "/")
            } else {
                continue;
            };
            relations.push(CodeRelation {
                relation_type: RelationType::Imports,
                src_symbol_name: None,
                dst_file_path: dst,
                dst_symbol_name: None,
                meta: JsonValue::Null,
            });
        }
        Ok(relations)
    }
}

/// Walks the workspace looking for manifest files; each manifest's parent
/// directory becomes a boundary named after that directory (the workspace
/// root itself is named `"default"`).
pub struct ManifestProjectDiscoverer {
    pub manifests: Vec<String>,
}

impl Default for ManifestProjectDiscoverer {
    fn default() -> Self {
        Self {
            manifests: DEFAULT_MANIFESTS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[async_trait]
impl ProjectDiscoverer for ManifestProjectDiscoverer {
    async fn discover_projects(&self, workspace_root: &Path) -> Result<Vec<ProjectBoundary>> {
        let workspace_root = workspace_root.to_path_buf();
        let manifests = self.manifests.clone();
        let boundaries = tokio::task::spawn_blocking(move || scan_boundaries(&workspace_root, &manifests))
            .await
            .map_err(|e| crate::error::LedgerError::store(anyhow::anyhow!(e)))?;
        Ok(boundaries)
    }
}

fn scan_boundaries(workspace_root: &Path, manifests: &[String]) -> Vec<ProjectBoundary> {
    let mut boundaries = vec![ProjectBoundary {
        dir: String::new(),
        project_name: "default".to_string(),
    }];

    for entry in WalkDir::new(workspace_root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let name = entry.file_name().to_string_lossy();
        if !manifests.iter().any(|m| m == name.as_ref()) {
            continue;
        }
        let parent = entry.path().parent().unwrap_or(workspace_root);
        let rel = to_forward_slashes(parent.strip_prefix(workspace_root).unwrap_or(parent));
        if rel.is_empty() {
            continue;
        }
        let project_name = parent.file_name().and_then(|n| n.to_str()).unwrap_or("default").to_string();
        boundaries.push(ProjectBoundary { dir: rel, project_name });
    }

    boundaries
}

/// Resolves a file to the nearest ancestor boundary — the longest `dir`
/// prefix of `rel_path` among the supplied boundaries, or `"default"` if
/// none matches.
pub struct NearestAncestorProjectResolver;

impl ProjectResolver for NearestAncestorProjectResolver {
    fn resolve_file_project(&self, rel_path: &str, boundaries: &[ProjectBoundary]) -> String {
        boundaries
            .iter()
            .filter(|b| !b.dir.is_empty() && (rel_path == b.dir || rel_path.starts_with(&format!("{}/", b.dir))))
            .max_by_key(|b| b.dir.len())
            .map(|b| b.project_name.clone())
            .unwrap_or_else(|| "default".to_string())
    }
}

/// No `tsconfig.json`-style alias table to load by default.
pub struct NullAliasLoader;

#[async_trait]
impl AliasLoader for NullAliasLoader {
    async fn load_tsconfig_paths(&self, _workspace_root: &Path) -> Result<Option<JsonValue>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_heuristic_extracts_exported_function() {
        let parsed = ParsedFile {
            file_path: "a.rs".into(),
            program: JsonValue::Null,
            errors: Vec::new(),
            comments: Vec::new(),
            source_text: "pub fn greet() {}\nfn hidden() {}\n".to_string(),
        };
        let extractor = LineHeuristicSymbolExtractor;
        let symbols = extractor.extract_symbols(&parsed).unwrap();
        assert_eq!(symbols.len(), 2);
        assert_eq!(symbols[0].name, "greet");
        assert!(symbols[0].is_exported);
        assert!(!symbols[1].is_exported);
    }

    #[test]
    fn line_heuristic_extracts_es_import() {
        let parsed = ParsedFile {
            file_path: "a.ts".into(),
            program: JsonValue::Null,
            errors: Vec::new(),
            comments: Vec::new(),
            source_text: "import { Foo } from \"./foo\";\n".to_string(),
        };
        let extractor = LineHeuristicRelationExtractor;
        let relations = extractor.extract_relations(&parsed).unwrap();
        assert_eq!(relations.len(), 1);
        assert_eq!(relations[0].dst_file_path, "./foo");
    }

    #[test]
    fn nearest_ancestor_resolves_longest_prefix() {
        let boundaries = vec![
            ProjectBoundary { dir: "".into(), project_name: "default".into() },
            ProjectBoundary { dir: "packages/a".into(), project_name: "a".into() },
            ProjectBoundary { dir: "packages/a/nested".into(), project_name: "a-nested".into() },
        ];
        let resolver = NearestAncestorProjectResolver;
        assert_eq!(resolver.resolve_file_project("packages/a/nested/x.ts", &boundaries), "a-nested");
        assert_eq!(resolver.resolve_file_project("packages/a/x.ts", &boundaries), "a");
        assert_eq!(resolver.resolve_file_project("readme.md", &boundaries), "default");
    }
}
