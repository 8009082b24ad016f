//! Pure path utilities consumed by the coordinator and watcher.
//!
//! These are deliberately stateless free functions rather than part of the
//! injected collaborator bundle (§9): there is nothing to substitute.

use std::path::{Path, PathBuf};

/// Join `root` and `rel` and normalize to an absolute path.
pub fn to_absolute_path(root: &Path, rel: &str) -> PathBuf {
    root.join(rel)
}

/// Render `path` relative to `root` using forward slashes, never beginning with `..`
/// unless `path` truly falls outside `root`.
pub fn to_relative_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    to_forward_slashes(rel)
}

pub fn to_forward_slashes(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Per the File record invariant (§3): relative, forward-slashed, never `..`-prefixed.
pub fn is_inside_workspace(rel_path: &str) -> bool {
    !rel_path.starts_with("..")
}
