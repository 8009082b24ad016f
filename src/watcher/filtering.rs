//! Event filtering rules applied to every raw file-system notification (§4.4).

use std::path::Path;

use crate::model::{EventType, WatcherEvent};
use crate::paths::{is_inside_workspace, to_forward_slashes};

/// Fixed ignore patterns merged with caller-supplied ones.
pub const DEFAULT_IGNORE_PATTERNS: &[&str] = &[
    "**/.git/**",
    "**/node_modules/**",
    "**/target/**",
    "**/.code-ledger/**",
    "**/dist/**",
    "**/build/**",
];

/// Manifest files bypass the extension filter so the coordinator can react
/// to them specially (alias reload, project re-discovery).
pub const PROJECT_MANIFESTS: &[&str] = &["tsconfig.json", "package.json"];

#[derive(Clone)]
pub struct EventFilter {
    pub extensions: Vec<String>,
    pub ignore_patterns: Vec<glob::Pattern>,
    pub declaration_suffixes: Vec<String>,
}

impl EventFilter {
    pub fn new(extensions: Vec<String>, user_ignore_patterns: &[String]) -> Self {
        let mut patterns = Vec::new();
        for p in DEFAULT_IGNORE_PATTERNS.iter().chain(user_ignore_patterns.iter().map(|s| s.as_str())) {
            if let Ok(pattern) = glob::Pattern::new(p) {
                patterns.push(pattern);
            }
        }
        Self {
            extensions,
            ignore_patterns: patterns,
            declaration_suffixes: vec![".d.ts".to_string()],
        }
    }

    /// Apply the filter chain from §4.4 to one raw notify event, returning
    /// the event to deliver to the callback or `None` if it was dropped.
    pub fn accept(
        &self,
        workspace_root: &Path,
        absolute_path: &Path,
        kind: RawEventKind,
    ) -> Option<WatcherEvent> {
        let rel = to_forward_slashes(absolute_path.strip_prefix(workspace_root).unwrap_or(absolute_path));

        // 1. Drop if outside the workspace.
        if !is_inside_workspace(&rel) {
            return None;
        }

        let base_name = absolute_path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        let is_manifest = PROJECT_MANIFESTS.contains(&base_name);

        // 2. Drop if extension not configured, unless it's a project manifest.
        if !is_manifest {
            let ext_ok = absolute_path
                .extension()
                .and_then(|e| e.to_str())
                .map(|ext| self.extensions.iter().any(|allowed| allowed == ext))
                .unwrap_or(false);
            if !ext_ok {
                return None;
            }
        }

        // 3. Drop declaration-only files (e.g. `.d.ts`).
        if self.declaration_suffixes.iter().any(|suffix| rel.ends_with(suffix.as_str())) {
            return None;
        }

        // Ignore-glob check, applied to the relative path.
        if self.ignore_patterns.iter().any(|p| p.matches(&rel)) {
            return None;
        }

        let event_type = match kind {
            RawEventKind::Create => EventType::Create,
            RawEventKind::Modify => EventType::Change,
            RawEventKind::Remove => EventType::Delete,
        };

        Some(WatcherEvent {
            event_type,
            file_path: rel,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub enum RawEventKind {
    Create,
    Modify,
    Remove,
}
