//! The Facade: component lifecycle and public entry point (§4.7).
//!
//! `LedgerFacade::open` validates the workspace root, opens the store,
//! discovers project boundaries, loads the alias table, and attempts
//! ownership. Owners build a coordinator and watcher and run an initial
//! full index; readers start a healthcheck loop that retries `acquire` and,
//! on promotion, builds its own coordinator and watcher, forwards every
//! previously-registered subscriber, and runs a full index.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex as TokioMutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::collaborators::{Collaborators, ParsedFile};
use crate::coordinator::{CoordinatorConfig, IndexCoordinator, IndexedCallback};
use crate::error::{LedgerError, Result};
use crate::graph::DependencyGraph;
use crate::model::{CodeRelation, ExtractedSymbol, IndexResult, ProjectBoundary, Role};
use crate::ownership::OwnershipManager;
use crate::repositories::{SymbolRepository, SymbolStats};
use crate::search::{self, RelationSearchParams, SymbolSearchQuery};
use crate::store::Store;
use crate::watcher::FileWatcher;

const HEARTBEAT_INTERVAL_MS: u64 = 30_000;
const HEALTHCHECK_INTERVAL_MS: u64 = 60_000;
const DEFAULT_APP_DIR: &str = "code-ledger";
const DEFAULT_PARSE_CACHE_CAPACITY: usize = 500;

pub fn default_extensions() -> Vec<String> {
    ["ts", "tsx", "js", "jsx", "rs", "py", "go", "java"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// `open` options (§6 "Configuration inputs").
pub struct OpenOptions {
    pub workspace_root: PathBuf,
    pub collaborators: Collaborators,
    pub extensions: Vec<String>,
    pub ignore_patterns: Vec<String>,
    pub parse_cache_capacity: usize,
    pub app_dir: String,
}

impl OpenOptions {
    pub fn new(workspace_root: PathBuf, collaborators: Collaborators) -> Self {
        Self {
            workspace_root,
            collaborators,
            extensions: default_extensions(),
            ignore_patterns: Vec::new(),
            parse_cache_capacity: DEFAULT_PARSE_CACHE_CAPACITY,
            app_dir: DEFAULT_APP_DIR.to_string(),
        }
    }
}

struct Subscriber {
    callback: IndexedCallback,
    coordinator_unsub: Option<Box<dyn FnOnce() + Send>>,
}

struct Inner {
    store: Arc<TokioMutex<Store>>,
    collaborators: Collaborators,
    workspace_root: PathBuf,
    app_dir: String,
    extensions: Vec<String>,
    ignore_patterns: Vec<String>,
    parse_cache_capacity: usize,
    pid: u32,

    boundaries: TokioMutex<Vec<ProjectBoundary>>,
    role: TokioMutex<Role>,
    coordinator: TokioMutex<Option<IndexCoordinator>>,
    watcher: TokioMutex<Option<FileWatcher>>,
    heartbeat_task: TokioMutex<Option<JoinHandle<()>>>,
    healthcheck_task: TokioMutex<Option<JoinHandle<()>>>,

    subscribers: TokioMutex<HashMap<u64, Subscriber>>,
    next_subscriber_id: AtomicU64,

    closed: AtomicBool,
}

/// Lifecycle + public entry point. Cheaply cloneable; every clone shares the
/// same underlying state, matching the facade's single-instance-per-process
/// role described in §4.7.
#[derive(Clone)]
pub struct LedgerFacade(Arc<Inner>);

impl LedgerFacade {
    /// Validate the workspace root, open the store, discover boundaries and
    /// aliases, and attempt ownership. Owners get a running watcher and an
    /// initial full index; readers get a healthcheck loop.
    pub async fn open(options: OpenOptions) -> Result<Self> {
        if !options.workspace_root.is_absolute() {
            return Err(LedgerError::LifecycleFailure(format!(
                "workspace root must be absolute: {}",
                options.workspace_root.display()
            )));
        }
        if !options.workspace_root.exists() {
            return Err(LedgerError::LifecycleFailure(format!(
                "workspace root does not exist: {}",
                options.workspace_root.display()
            )));
        }

        let store = match Store::open(&options.workspace_root, &options.app_dir) {
            Ok(store) => store,
            Err(e) => return Err(e),
        };
        let store = Arc::new(TokioMutex::new(store));

        let boundaries = match options
            .collaborators
            .project_discoverer
            .discover_projects(&options.workspace_root)
            .await
        {
            Ok(b) => b,
            Err(e) => {
                close_store(store).await;
                return Err(e);
            }
        };

        let pid = std::process::id();
        let role = {
            let guard = store.lock().await;
            let mgr = OwnershipManager::new(&guard);
            match mgr.acquire(pid, now_ms()) {
                Ok(role) => role,
                Err(e) => {
                    drop(guard);
                    close_store(store).await;
                    return Err(e);
                }
            }
        };

        let facade = Self(Arc::new(Inner {
            store,
            collaborators: options.collaborators,
            workspace_root: options.workspace_root,
            app_dir: options.app_dir,
            extensions: options.extensions,
            ignore_patterns: options.ignore_patterns,
            parse_cache_capacity: options.parse_cache_capacity,
            pid,
            boundaries: TokioMutex::new(boundaries.clone()),
            role: TokioMutex::new(role),
            coordinator: TokioMutex::new(None),
            watcher: TokioMutex::new(None),
            heartbeat_task: TokioMutex::new(None),
            healthcheck_task: TokioMutex::new(None),
            subscribers: TokioMutex::new(HashMap::new()),
            next_subscriber_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }));

        match role {
            Role::Owner => {
                if let Err(e) = facade.become_owner(boundaries).await {
                    facade.close().await.ok();
                    return Err(e);
                }
            }
            Role::Reader => {
                facade.start_healthcheck().await;
            }
        }

        facade.install_signal_handlers();
        Ok(facade)
    }

    async fn become_owner(&self, boundaries: Vec<ProjectBoundary>) -> Result<()> {
        let inner = &self.0;
        *inner.boundaries.lock().await = boundaries.clone();
        let coordinator = IndexCoordinator::new(
            Arc::clone(&inner.store),
            inner.collaborators.clone(),
            boundaries,
            CoordinatorConfig {
                workspace_root: inner.workspace_root.clone(),
                app_dir: inner.app_dir.clone(),
                extensions: inner.extensions.clone(),
                ignore_patterns: inner.ignore_patterns.clone(),
                parse_cache_capacity: inner.parse_cache_capacity,
            },
        );

        let coordinator_for_watcher = coordinator.clone();
        let mut watcher = FileWatcher::new(
            inner.workspace_root.clone(),
            inner.extensions.clone(),
            inner.ignore_patterns.clone(),
        );
        watcher.start(Arc::new(move |event| coordinator_for_watcher.handle_watcher_event(event)))?;

        *inner.watcher.lock().await = Some(watcher);
        *inner.coordinator.lock().await = Some(coordinator.clone());

        self.forward_subscribers_to(&coordinator).await;
        self.start_heartbeat().await;

        coordinator.full_index().await?;
        Ok(())
    }

    async fn forward_subscribers_to(&self, coordinator: &IndexCoordinator) {
        let mut subscribers = self.0.subscribers.lock().await;
        for entry in subscribers.values_mut() {
            if entry.coordinator_unsub.is_some() {
                continue;
            }
            let unsub = coordinator.on_indexed(Arc::clone(&entry.callback)).await;
            entry.coordinator_unsub = Some(Box::new(unsub));
        }
    }

    async fn start_heartbeat(&self) {
        let inner = Arc::clone(&self.0);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(HEARTBEAT_INTERVAL_MS));
            interval.tick().await;
            loop {
                interval.tick().await;
                let guard = inner.store.lock().await;
                let mgr = OwnershipManager::new(&guard);
                if let Err(e) = mgr.heartbeat(inner.pid, now_ms()) {
                    warn!("heartbeat failed: {e}");
                }
            }
        });
        *self.0.heartbeat_task.lock().await = Some(handle);
    }

    async fn start_healthcheck(&self) {
        let this = self.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(HEALTHCHECK_INTERVAL_MS));
            interval.tick().await;
            loop {
                interval.tick().await;
                let role = {
                    let guard = this.0.store.lock().await;
                    let mgr = OwnershipManager::new(&guard);
                    mgr.acquire(this.0.pid, now_ms())
                };
                match role {
                    Ok(Role::Owner) => {
                        info!("promoted to owner; starting watcher and coordinator");
                        *this.0.role.lock().await = Role::Owner;
                        if let Some(task) = this.0.healthcheck_task.lock().await.take() {
                            task.abort();
                        }
                        let boundaries = this
                            .0
                            .collaborators
                            .project_discoverer
                            .discover_projects(&this.0.workspace_root)
                            .await
                            .unwrap_or_default();
                        if let Err(e) = this.become_owner(boundaries).await {
                            error!("promotion to owner failed: {e}");
                        }
                        return;
                    }
                    Ok(Role::Reader) => {}
                    Err(e) => warn!("healthcheck acquire failed: {e}"),
                }
            }
        });
        *self.0.healthcheck_task.lock().await = Some(handle);
    }

    fn install_signal_handlers(&self) {
        let this = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("received interrupt signal; closing");
                this.close().await.ok();
            }
        });
    }

    fn ensure_open(&self) -> Result<()> {
        if self.0.closed.load(Ordering::SeqCst) {
            return Err(LedgerError::UsageFailure("facade used after close".to_string()));
        }
        Ok(())
    }

    /// Register a subscriber; returns an unsubscribe closure. If the facade
    /// is already the owner, forwards immediately to the live coordinator;
    /// otherwise the callback is forwarded on promotion (§4.7 "Reader"
    /// clause, §4.5 subscriber fanout).
    pub async fn on_indexed(&self, callback: IndexedCallback) -> Result<impl FnOnce() + Send + 'static> {
        self.ensure_open()?;
        let id = self.0.next_subscriber_id.fetch_add(1, Ordering::SeqCst);

        let coordinator_unsub = if let Some(coordinator) = self.0.coordinator.lock().await.as_ref() {
            let unsub = coordinator.on_indexed(Arc::clone(&callback)).await;
            Some(Box::new(unsub) as Box<dyn FnOnce() + Send>)
        } else {
            None
        };

        self.0.subscribers.lock().await.insert(
            id,
            Subscriber {
                callback,
                coordinator_unsub,
            },
        );

        let inner = Arc::clone(&self.0);
        Ok(move || {
            tokio::spawn(async move {
                if let Some(entry) = inner.subscribers.lock().await.remove(&id) {
                    if let Some(unsub) = entry.coordinator_unsub {
                        unsub();
                    }
                }
            });
        })
    }

    /// Forces a from-scratch rebuild. Owners only; readers throw `UsageFailure`.
    pub async fn reindex(&self) -> Result<IndexResult> {
        self.ensure_open()?;
        let coordinator = self.0.coordinator.lock().await.clone();
        match coordinator {
            Some(coordinator) => coordinator.full_index().await,
            None => Err(LedgerError::UsageFailure(
                "reindex is only available to the current owner".to_string(),
            )),
        }
    }

    pub async fn projects(&self) -> Result<Vec<String>> {
        self.ensure_open()?;
        let boundaries = self.0.boundaries.lock().await;
        let mut seen = std::collections::HashSet::new();
        let mut names = Vec::new();
        for b in boundaries.iter() {
            if seen.insert(b.project_name.clone()) {
                names.push(b.project_name.clone());
            }
        }
        if names.is_empty() {
            names.push("default".to_string());
        }
        Ok(names)
    }

    pub async fn get_stats(&self, project: Option<&str>) -> Result<SymbolStats> {
        self.ensure_open()?;
        let guard = self.0.store.lock().await;
        let repo = SymbolRepository::new(&guard);
        repo.get_stats(project.unwrap_or("default"))
    }

    pub async fn search_symbols(&self, query: &SymbolSearchQuery) -> Result<Vec<crate::model::SymbolRecord>> {
        self.ensure_open()?;
        let guard = self.0.store.lock().await;
        search::search_symbols(&guard, query)
    }

    pub async fn search_relations(&self, query: &RelationSearchParams) -> Result<Vec<crate::model::RelationRecord>> {
        self.ensure_open()?;
        let guard = self.0.store.lock().await;
        search::search_relations(&guard, query)
    }

    pub async fn get_dependencies(&self, path: &str, project: Option<&str>) -> Result<Vec<String>> {
        self.ensure_open()?;
        let guard = self.0.store.lock().await;
        let repo = crate::repositories::RelationRepository::new(&guard);
        Ok(repo
            .get_outgoing(project.unwrap_or("default"), path, None)?
            .into_iter()
            .filter(|r| r.relation_type == crate::model::RelationType::Imports)
            .map(|r| r.dst_file_path)
            .collect())
    }

    pub async fn get_dependents(&self, path: &str, project: Option<&str>) -> Result<Vec<String>> {
        self.ensure_open()?;
        let guard = self.0.store.lock().await;
        let graph = DependencyGraph::build(&guard, project.unwrap_or("default"))?;
        Ok(graph.get_transitive_dependents(path))
    }

    pub async fn get_affected(&self, paths: &[String], project: Option<&str>) -> Result<Vec<String>> {
        self.ensure_open()?;
        let guard = self.0.store.lock().await;
        let graph = DependencyGraph::build(&guard, project.unwrap_or("default"))?;
        Ok(graph.get_affected_by_change(paths))
    }

    pub async fn has_cycle(&self, project: Option<&str>) -> Result<bool> {
        self.ensure_open()?;
        let guard = self.0.store.lock().await;
        let graph = DependencyGraph::build(&guard, project.unwrap_or("default"))?;
        Ok(graph.has_cycle())
    }

    /// Pass-through to the injected parser (§6).
    pub fn parse_source(&self, file_path: &str, source_text: &str) -> Result<ParsedFile> {
        self.0.collaborators.parser.parse_source(file_path, source_text)
    }

    /// Pass-through to the injected symbol extractor (§6).
    pub fn extract_symbols(&self, parsed: &ParsedFile) -> Result<Vec<ExtractedSymbol>> {
        self.0.collaborators.symbol_extractor.extract_symbols(parsed)
    }

    /// Pass-through to the injected relation extractor (§6).
    pub fn extract_relations(&self, parsed: &ParsedFile) -> Result<Vec<CodeRelation>> {
        self.0.collaborators.relation_extractor.extract_relations(parsed)
    }

    pub fn workspace_root(&self) -> &Path {
        &self.0.workspace_root
    }

    pub async fn current_role(&self) -> Role {
        *self.0.role.lock().await
    }

    /// Runs once: cancel the heartbeat/healthcheck timers, await the
    /// coordinator's shutdown, stop the watcher, and release ownership. The
    /// store itself closes on drop once the last `Arc` reference goes away.
    pub async fn close(&self) -> Result<()> {
        if self.0.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let heartbeat = self.0.heartbeat_task.lock().await.take();
        if let Some(task) = heartbeat {
            task.abort();
        }
        let healthcheck = self.0.healthcheck_task.lock().await.take();
        if let Some(task) = healthcheck {
            task.abort();
        }

        let coordinator = self.0.coordinator.lock().await.take();
        if let Some(coordinator) = coordinator {
            coordinator.shutdown().await;
        }
        let watcher = self.0.watcher.lock().await.take();
        if let Some(mut watcher) = watcher {
            watcher.stop()?;
        }

        let guard = self.0.store.lock().await;
        let mgr = OwnershipManager::new(&guard);
        mgr.release(self.0.pid)?;

        Ok(())
    }
}

async fn close_store(store: Arc<TokioMutex<Store>>) {
    if let Ok(store) = Arc::try_unwrap(store) {
        let _ = store.into_inner().close();
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
