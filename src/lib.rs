//! code-ledger: an embedded code-intelligence infrastructure layer.
//!
//! Watches a workspace, keeps a persistent index of files, symbols, and
//! relations in an embedded SQLite store, arbitrates a single writer across
//! processes, and answers symbol/relation search and dependency-graph
//! queries over the result. Concrete source parsing and extraction rules are
//! supplied by the caller through the [`collaborators`] module; this crate
//! owns everything downstream of a parsed file.
//!
//! [`facade::LedgerFacade`] is the entry point most callers want.

pub mod change_detector;
pub mod collaborators;
pub mod coordinator;
pub mod defaults;
pub mod error;
pub mod facade;
pub mod graph;
pub mod hashing;
pub mod model;
pub mod ownership;
pub mod paths;
pub mod repositories;
pub mod search;
pub mod store;
pub mod watcher;

pub use collaborators::{
    AliasLoader, ChangeDetector, Collaborators, ParsedFile, ProjectDiscoverer, ProjectResolver, RelationExtractor,
    SourceParser, SymbolExtractor,
};
pub use coordinator::{CoordinatorConfig, IndexCoordinator, IndexedCallback};
pub use error::{LedgerError, Result};
pub use facade::{default_extensions, LedgerFacade, OpenOptions};
pub use graph::DependencyGraph;
pub use model::{
    ChangeSet, CodeRelation, EventType, ExtractedSymbol, FileEntry, FileRecord, IndexResult, OwnerRecord,
    Position, ProjectBoundary, RelationRecord, RelationType, Role, SymbolKind, SymbolRecord, Span, WatcherEvent,
};
pub use ownership::OwnershipManager;
pub use repositories::{FileRepository, RelationRepository, SymbolRepository, SymbolStats};
pub use search::{RelationSearchParams, SymbolSearchQuery};
pub use store::Store;
pub use watcher::FileWatcher;
