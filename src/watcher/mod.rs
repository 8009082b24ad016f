//! OS file-system subscription, normalization, and filtering (§4.4).

mod filtering;

pub use filtering::{EventFilter, RawEventKind, DEFAULT_IGNORE_PATTERNS, PROJECT_MANIFESTS};

use std::path::PathBuf;
use std::sync::Arc;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::error::{LedgerError, Result};
use crate::model::WatcherEvent;

pub type WatcherCallback = Arc<dyn Fn(WatcherEvent) + Send + Sync>;

pub struct FileWatcher {
    workspace_root: PathBuf,
    filter: EventFilter,
    watcher: Option<RecommendedWatcher>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl FileWatcher {
    pub fn new(workspace_root: PathBuf, extensions: Vec<String>, user_ignore_patterns: Vec<String>) -> Self {
        Self {
            workspace_root,
            filter: EventFilter::new(extensions, &user_ignore_patterns),
            watcher: None,
            task: None,
        }
    }

    /// Start watching. Idempotent: calling twice without an intervening
    /// `stop` is a no-op.
    pub fn start(&mut self, callback: WatcherCallback) -> Result<()> {
        if self.watcher.is_some() {
            return Ok(());
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
        let mut watcher = notify::recommended_watcher(move |res| {
            if tx.send(res).is_err() {
                error!("watcher event channel closed; dropping event");
            }
        })
        .map_err(|e| LedgerError::watcher(anyhow::anyhow!(e)))?;

        watcher
            .watch(&self.workspace_root, RecursiveMode::Recursive)
            .map_err(|e| LedgerError::watcher(anyhow::anyhow!(e)))?;

        let workspace_root = self.workspace_root.clone();
        let filter = self.filter.clone();
        let task = tokio::spawn(async move {
            while let Some(res) = rx.recv().await {
                match res {
                    Ok(event) => dispatch(&workspace_root, &filter, event, &callback),
                    Err(e) => warn!("watcher error: {e}"),
                }
            }
        });

        self.watcher = Some(watcher);
        self.task = Some(task);
        Ok(())
    }

    /// Stop watching. Idempotent.
    pub fn stop(&mut self) -> Result<()> {
        self.watcher.take();
        if let Some(task) = self.task.take() {
            task.abort();
        }
        Ok(())
    }
}

fn dispatch(workspace_root: &std::path::Path, filter: &EventFilter, event: Event, callback: &WatcherCallback) {
    let kind = match event.kind {
        EventKind::Create(_) => RawEventKind::Create,
        EventKind::Modify(_) => RawEventKind::Modify,
        EventKind::Remove(_) => RawEventKind::Remove,
        _ => return,
    };
    for path in event.paths {
        if let Some(watcher_event) = filter.accept(workspace_root, &path, kind) {
            callback(watcher_event);
        }
    }
}
