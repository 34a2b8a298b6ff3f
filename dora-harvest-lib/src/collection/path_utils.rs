//! Filesystem layout helpers for per-repository output.

use std::path::{Path, PathBuf};

/// Sanitize an owner or repository name for use as a single path component.
///
/// Traversal sequences and filesystem-hostile characters become `_`. Names that would still
/// resolve to the current directory are replaced outright.
#[must_use]
pub fn sanitize_path_component(s: &str) -> String {
    let s = s.replace("..", "__").replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|', '\0'], "_");

    match s.trim() {
        "" | "." => "_".to_string(),
        _ => s,
    }
}

/// `<output_dir>/<owner>/<name>`
#[must_use]
pub fn repo_dir(output_dir: &Path, owner: &str, name: &str) -> PathBuf {
    output_dir.join(sanitize_path_component(owner)).join(sanitize_path_component(name))
}
