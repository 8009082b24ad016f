//! Demo CLI driving the facade end to end: open a workspace, let it index,
//! and run search/graph queries against the result. Uses the heuristic
//! collaborators in [`code_ledger::defaults`] — real deployments supply
//! their own parser and extractors.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use code_ledger::change_detector::FilesystemChangeDetector;
use code_ledger::defaults::{
    LineHeuristicRelationExtractor, LineHeuristicSymbolExtractor, ManifestProjectDiscoverer,
    NearestAncestorProjectResolver, NullAliasLoader, PlainTextParser,
};
use code_ledger::{Collaborators, OpenOptions, RelationSearchParams, SymbolSearchQuery};

#[derive(Parser)]
#[command(name = "code-ledger", about = "Embedded code-intelligence indexing and query tool")]
struct Cli {
    /// Workspace root to index. Defaults to the current directory.
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Open the workspace, run a full index, and report counts.
    Index,
    /// Search indexed symbols by name.
    SearchSymbols {
        query: String,
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Search indexed relations.
    SearchRelations {
        #[arg(long)]
        src_file: Option<String>,
        #[arg(long)]
        dst_file: Option<String>,
        #[arg(long)]
        project: Option<String>,
    },
    /// List a file's direct outgoing imports.
    Dependencies {
        path: String,
        #[arg(long)]
        project: Option<String>,
    },
    /// List every file that transitively depends on `path`.
    Dependents {
        path: String,
        #[arg(long)]
        project: Option<String>,
    },
    /// List every file transitively affected by a set of changed paths.
    Affected {
        paths: Vec<String>,
        #[arg(long)]
        project: Option<String>,
    },
    /// Report whether the project's import graph contains a cycle.
    HasCycle {
        #[arg(long)]
        project: Option<String>,
    },
    /// Print symbol/file counts for a project.
    Stats {
        #[arg(long)]
        project: Option<String>,
    },
    /// List discovered project boundaries.
    Projects,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();
}

fn default_collaborators() -> Collaborators {
    Collaborators {
        parser: Arc::new(PlainTextParser),
        symbol_extractor: Arc::new(LineHeuristicSymbolExtractor),
        relation_extractor: Arc::new(LineHeuristicRelationExtractor),
        project_resolver: Arc::new(NearestAncestorProjectResolver),
        project_discoverer: Arc::new(ManifestProjectDiscoverer::default()),
        alias_loader: Arc::new(NullAliasLoader),
        change_detector: Arc::new(FilesystemChangeDetector),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let workspace_root = match cli.workspace {
        Some(path) => path,
        None => std::env::current_dir()?,
    }
    .canonicalize()?;

    let facade = code_ledger::LedgerFacade::open(OpenOptions::new(workspace_root, default_collaborators())).await?;

    match cli.command {
        Command::Index => {
            let result = facade.reindex().await?;
            println!(
                "indexed {} files ({} symbols, {} relations) in {}ms, {} failed, {} removed",
                result.indexed_files,
                result.total_symbols,
                result.total_relations,
                result.duration_ms,
                result.failed_files.len(),
                result.removed_files,
            );
        }
        Command::SearchSymbols { query, project, limit } => {
            let results = facade
                .search_symbols(&SymbolSearchQuery {
                    text: Some(query),
                    project,
                    limit,
                    ..Default::default()
                })
                .await?;
            for sym in results {
                println!("{}:{} {} {}", sym.file_path, sym.span.start.line, sym.kind.as_str(), sym.name);
            }
        }
        Command::SearchRelations { src_file, dst_file, project } => {
            let results = facade
                .search_relations(&RelationSearchParams {
                    src_file_path: src_file,
                    dst_file_path: dst_file,
                    project,
                    ..Default::default()
                })
                .await?;
            for rel in results {
                println!("{} --{}--> {}", rel.src_file_path, rel.relation_type.as_str(), rel.dst_file_path);
            }
        }
        Command::Dependencies { path, project } => {
            for dep in facade.get_dependencies(&path, project.as_deref()).await? {
                println!("{dep}");
            }
        }
        Command::Dependents { path, project } => {
            for dep in facade.get_dependents(&path, project.as_deref()).await? {
                println!("{dep}");
            }
        }
        Command::Affected { paths, project } => {
            for dep in facade.get_affected(&paths, project.as_deref()).await? {
                println!("{dep}");
            }
        }
        Command::HasCycle { project } => {
            println!("{}", facade.has_cycle(project.as_deref()).await?);
        }
        Command::Stats { project } => {
            let stats = facade.get_stats(project.as_deref()).await?;
            println!("{} files, {} symbols", stats.file_count, stats.symbol_count);
        }
        Command::Projects => {
            for name in facade.projects().await? {
                println!("{name}");
            }
        }
    }

    facade.close().await?;
    Ok(())
}
