//! The Index Coordinator — a single-writer, debounced, lock-protected
//! pipeline that turns file-change events into atomic, crash-safe updates
//! of the persistent index (§4.5). This is the largest component; the
//! per-run algorithm lives in `run.rs`, this file owns the public contract,
//! locking policy, and debounce/intake machinery.

mod run;

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lru::LruCache;
use serde_json::Value as JsonValue;
use tokio::sync::{Mutex as TokioMutex, Notify};
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::collaborators::{Collaborators, ParsedFile};
use crate::error::{LedgerError, Result};
use crate::model::{IndexResult, ProjectBoundary, WatcherEvent};
use crate::store::Store;

/// Debounce window for coalescing watcher events into one indexing batch.
pub const DEBOUNCE_MS: u64 = 100;

pub type IndexedCallback = Arc<dyn Fn(&IndexResult) + Send + Sync>;

#[derive(Clone)]
enum RunOutcome {
    Ok(IndexResult),
    Err(String),
}

impl RunOutcome {
    fn into_result(self) -> Result<IndexResult> {
        match self {
            RunOutcome::Ok(r) => Ok(r),
            RunOutcome::Err(msg) => Err(LedgerError::coordinator(anyhow::anyhow!(msg))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RunKind {
    Full,
    Incremental,
}

struct RunState {
    indexing: bool,
    pending_events: Vec<WatcherEvent>,
    pending_full_index: bool,
    debounce_task: Option<JoinHandle<()>>,
    boundaries_refresh: Option<JoinHandle<Result<Vec<ProjectBoundary>>>>,
    last_result: Option<RunOutcome>,
    shutting_down: bool,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            indexing: false,
            pending_events: Vec::new(),
            pending_full_index: false,
            debounce_task: None,
            boundaries_refresh: None,
            last_result: None,
            shutting_down: false,
        }
    }
}

struct Inner {
    store: Arc<TokioMutex<Store>>,
    collaborators: Collaborators,
    workspace_root: PathBuf,
    app_dir: String,
    extensions: Vec<String>,
    ignore_patterns: Vec<String>,
    parse_cache: std::sync::Mutex<LruCache<String, ParsedFile>>,
    boundaries: TokioMutex<Vec<ProjectBoundary>>,
    aliases: TokioMutex<Option<JsonValue>>,
    state: TokioMutex<RunState>,
    run_done: Notify,
    subscribers: TokioMutex<Vec<(u64, IndexedCallback)>>,
    next_subscriber_id: AtomicU64,
}

/// Cheaply cloneable handle; every clone shares the same state via `Arc`.
#[derive(Clone)]
pub struct IndexCoordinator(Arc<Inner>);

pub struct CoordinatorConfig {
    pub workspace_root: PathBuf,
    pub app_dir: String,
    pub extensions: Vec<String>,
    pub ignore_patterns: Vec<String>,
    pub parse_cache_capacity: usize,
}

impl IndexCoordinator {
    pub fn new(
        store: Arc<TokioMutex<Store>>,
        collaborators: Collaborators,
        boundaries: Vec<ProjectBoundary>,
        config: CoordinatorConfig,
    ) -> Self {
        let capacity = NonZeroUsize::new(config.parse_cache_capacity.max(1)).unwrap();
        Self(Arc::new(Inner {
            store,
            collaborators,
            workspace_root: config.workspace_root,
            app_dir: config.app_dir,
            extensions: config.extensions,
            ignore_patterns: config.ignore_patterns,
            parse_cache: std::sync::Mutex::new(LruCache::new(capacity)),
            boundaries: TokioMutex::new(boundaries),
            aliases: TokioMutex::new(None),
            state: TokioMutex::new(RunState::default()),
            run_done: Notify::new(),
            subscribers: TokioMutex::new(Vec::new()),
            next_subscriber_id: AtomicU64::new(1),
        }))
    }

    pub fn workspace_root(&self) -> &std::path::Path {
        &self.0.workspace_root
    }

    /// Forces a from-scratch rebuild.
    pub async fn full_index(&self) -> Result<IndexResult> {
        self.start_index(RunKind::Full, None).await
    }

    /// Processes either an explicit event list or whatever the Change
    /// Detector reports.
    pub async fn incremental_index(&self, events: Option<Vec<WatcherEvent>>) -> Result<IndexResult> {
        self.start_index(RunKind::Incremental, events).await
    }

    /// Register a subscriber; returns an unsubscribe closure. Callbacks fire
    /// in registration order on every completed run.
    pub async fn on_indexed(&self, cb: IndexedCallback) -> impl FnOnce() + Send + 'static {
        let id = self.0.next_subscriber_id.fetch_add(1, Ordering::SeqCst);
        self.0.subscribers.lock().await.push((id, cb));
        let inner = Arc::clone(&self.0);
        move || {
            tokio::spawn(async move {
                inner.subscribers.lock().await.retain(|(sub_id, _)| *sub_id != id);
            });
        }
    }

    /// Non-blocking intake used by the watcher callback (§4.5). Never starts
    /// indexing synchronously: it either arms the debounce timer or appends
    /// to the buffer, and always returns immediately.
    pub fn handle_watcher_event(&self, event: WatcherEvent) {
        let this = self.clone();
        tokio::spawn(async move {
            this.handle_watcher_event_async(event).await;
        });
    }

    async fn handle_watcher_event_async(&self, event: WatcherEvent) {
        if event.file_path.ends_with("tsconfig.json") {
            self.on_tsconfig_change().await;
            return;
        }
        if event.file_path.ends_with("package.json") {
            self.schedule_boundaries_refresh().await;
        }
        self.enqueue_event(event).await;
    }

    async fn on_tsconfig_change(&self) {
        {
            let mut aliases = self.0.aliases.lock().await;
            *aliases = None;
        }
        match self
            .0
            .collaborators
            .alias_loader
            .load_tsconfig_paths(&self.0.workspace_root)
            .await
        {
            Ok(loaded) => {
                *self.0.aliases.lock().await = loaded;
            }
            Err(e) => warn!("failed to reload tsconfig paths: {e}"),
        }
        if let Err(e) = self.full_index().await {
            error!("full index after tsconfig change failed: {e}");
        }
    }

    /// Spawns boundary re-discovery and stores the join handle so the next
    /// run awaits it. A second manifest event before the run consumes it
    /// overwrites the handle — only the latest refresh is awaited, by design
    /// (§9 Open Question).
    async fn schedule_boundaries_refresh(&self) {
        let inner = Arc::clone(&self.0);
        let handle = tokio::spawn(async move {
            inner
                .collaborators
                .project_discoverer
                .discover_projects(&inner.workspace_root)
                .await
        });
        let mut state = self.0.state.lock().await;
        if let Some(previous) = state.boundaries_refresh.take() {
            previous.abort();
        }
        state.boundaries_refresh = Some(handle);
    }

    async fn enqueue_event(&self, event: WatcherEvent) {
        let mut state = self.0.state.lock().await;
        state.pending_events.push(event);
        if state.debounce_task.is_none() {
            let this = self.clone();
            let handle = tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(DEBOUNCE_MS)).await;
                this.on_debounce_fire().await;
            });
            state.debounce_task = Some(handle);
        }
    }

    async fn on_debounce_fire(&self) {
        let events = {
            let mut state = self.0.state.lock().await;
            state.debounce_task = None;
            if state.indexing || state.pending_events.is_empty() {
                return;
            }
            std::mem::take(&mut state.pending_events)
        };
        if let Err(e) = self.incremental_index(Some(events)).await {
            error!("debounced incremental index failed: {e}");
        }
    }

    /// Locking policy (§4.5 `_startIndex`). A requested full run folds into
    /// `pending_full_index` if the lock is held; incremental requests fold
    /// their events into the buffer. Either way the caller waits for the run
    /// that actually covers its request to finish.
    async fn start_index(&self, kind: RunKind, events: Option<Vec<WatcherEvent>>) -> Result<IndexResult> {
        let mut events = events;
        loop {
            let mut state = self.0.state.lock().await;
            if state.indexing {
                match kind {
                    RunKind::Full => state.pending_full_index = true,
                    RunKind::Incremental => {
                        if let Some(events) = events.take() {
                            state.pending_events.extend(events);
                        }
                    }
                }
                drop(state);
                self.0.run_done.notified().await;
                continue;
            }

            state.indexing = true;
            let use_transaction = kind == RunKind::Full;
            let run_events = if kind == RunKind::Incremental { events.take() } else { None };
            drop(state);

            let outcome = match run::do_index(self, run_events, use_transaction).await {
                Ok(result) => RunOutcome::Ok(result),
                Err(e) => RunOutcome::Err(e.to_string()),
            };
            self.fan_out(&outcome).await;
            return self.finalize_run(outcome).await;
        }
    }

    async fn fan_out(&self, outcome: &RunOutcome) {
        if let RunOutcome::Ok(result) = outcome {
            let subscribers = self.0.subscribers.lock().await.clone();
            for (_, cb) in subscribers {
                let result = result.clone();
                let cb = cb.clone();
                if let Err(panic) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| cb(&result))) {
                    error!("indexed subscriber panicked: {:?}", panic_message(&panic));
                }
            }
        }
    }

    async fn finalize_run(&self, outcome: RunOutcome) -> Result<IndexResult> {
        let (start_full, start_events) = {
            let mut state = self.0.state.lock().await;
            state.indexing = false;
            state.last_result = Some(outcome.clone());
            let start_full = state.pending_full_index;
            state.pending_full_index = false;
            let events = if !start_full && !state.pending_events.is_empty() {
                Some(std::mem::take(&mut state.pending_events))
            } else {
                None
            };
            (start_full, events)
        };
        self.0.run_done.notify_waiters();

        if start_full {
            let this = self.clone();
            tokio::spawn(async move {
                if let Err(e) = this.full_index().await {
                    error!("follow-up full index failed: {e}");
                }
            });
        } else if let Some(events) = start_events {
            let this = self.clone();
            tokio::spawn(async move {
                if let Err(e) = this.incremental_index(Some(events)).await {
                    error!("follow-up incremental index failed: {e}");
                }
            });
        }

        outcome.into_result()
    }

    /// Awaits any in-flight run and cancels the debounce timer.
    pub async fn shutdown(&self) {
        let mut state = self.0.state.lock().await;
        state.shutting_down = true;
        if let Some(task) = state.debounce_task.take() {
            task.abort();
        }
        if let Some(task) = state.boundaries_refresh.take() {
            task.abort();
        }
        let still_indexing = state.indexing;
        drop(state);

        if still_indexing {
            self.0.run_done.notified().await;
        }
    }
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
