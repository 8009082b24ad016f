//! Record types shared by the store, repositories, and facade.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A tracked source file, identified by `(project, file_path)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub project: String,
    pub file_path: String,
    pub mtime_ms: i64,
    pub size: i64,
    pub content_hash: String,
    pub updated_at: i64,
}

/// The kind of a symbol, as enumerated by §3 of the data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Function,
    Method,
    Class,
    Variable,
    Type,
    Interface,
    Enum,
    Property,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolKind::Function => "function",
            SymbolKind::Method => "method",
            SymbolKind::Class => "class",
            SymbolKind::Variable => "variable",
            SymbolKind::Type => "type",
            SymbolKind::Interface => "interface",
            SymbolKind::Enum => "enum",
            SymbolKind::Property => "property",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "function" => SymbolKind::Function,
            "method" => SymbolKind::Method,
            "class" => SymbolKind::Class,
            "variable" => SymbolKind::Variable,
            "type" => SymbolKind::Type,
            "interface" => SymbolKind::Interface,
            "enum" => SymbolKind::Enum,
            "property" => SymbolKind::Property,
            _ => return None,
        })
    }
}

/// Inclusive-exclusive source span, line/column both 1-based per the external parser contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub line: i64,
    pub column: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Position,
    pub end: Position,
}

/// A symbol row as persisted by `SymbolRepository`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolRecord {
    pub id: i64,
    pub project: String,
    pub file_path: String,
    pub kind: SymbolKind,
    pub name: String,
    pub span: Span,
    pub is_exported: bool,
    pub signature: Option<String>,
    pub fingerprint: Option<u64>,
    pub detail: JsonValue,
    pub content_hash: String,
    pub indexed_at: i64,
}

/// A symbol as produced by the external extractor, before a row id is assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedSymbol {
    pub kind: SymbolKind,
    pub name: String,
    pub span: Span,
    pub is_exported: bool,
    pub signature: Option<String>,
    pub detail: JsonValue,
}

impl ExtractedSymbol {
    /// `fingerprint = hash(name | kind | signature)`, stable across files.
    pub fn fingerprint(&self) -> u64 {
        let sig = self.signature.as_deref().unwrap_or("");
        let text = format!("{}|{}|{}", self.name, self.kind.as_str(), sig);
        crate::hashing::hash_u64(&text)
    }
}

/// The four relation kinds the core understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationType {
    Imports,
    Calls,
    Extends,
    Implements,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::Imports => "imports",
            RelationType::Calls => "calls",
            RelationType::Extends => "extends",
            RelationType::Implements => "implements",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "imports" => RelationType::Imports,
            "calls" => RelationType::Calls,
            "extends" => RelationType::Extends,
            "implements" => RelationType::Implements,
            _ => return None,
        })
    }
}

/// A relation row as persisted by `RelationRepository`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationRecord {
    pub id: i64,
    pub project: String,
    pub relation_type: RelationType,
    pub src_file_path: String,
    pub src_symbol_name: Option<String>,
    pub dst_file_path: String,
    pub dst_symbol_name: Option<String>,
    pub meta: JsonValue,
}

/// A relation as produced by the external extractor, before a row id is assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeRelation {
    pub relation_type: RelationType,
    pub src_symbol_name: Option<String>,
    pub dst_file_path: String,
    pub dst_symbol_name: Option<String>,
    pub meta: JsonValue,
}

/// Row for the `watcher_owner` singleton.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnerRecord {
    pub pid: u32,
    pub started_at: i64,
    pub heartbeat_at: i64,
}

/// Role returned by `OwnershipManager::acquire`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Owner,
    Reader,
}

/// A raw file-system event as reported by the watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventType {
    Create,
    Change,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherEvent {
    pub event_type: EventType,
    pub file_path: String,
}

/// `(dir, project_name)` — the nearest ancestor boundary of a file determines its project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectBoundary {
    pub dir: String,
    pub project_name: String,
}

/// A disk-side entry produced by the change detector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub file_path: String,
    pub mtime_ms: i64,
    pub size: i64,
    pub content_hash: String,
}

/// Outcome of `ChangeDetector::detect_changes`.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub changed: Vec<FileEntry>,
    pub unchanged: Vec<FileEntry>,
    pub deleted: Vec<String>,
}

/// Result payload returned by `fullIndex` / `incrementalIndex`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexResult {
    pub indexed_files: usize,
    pub removed_files: usize,
    pub total_symbols: usize,
    pub total_relations: usize,
    pub duration_ms: u128,
    pub changed_files: Vec<String>,
    pub deleted_files: Vec<String>,
    pub failed_files: Vec<String>,
}
