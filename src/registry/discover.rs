use coderelay_common::is_working_tree;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Default depth for `repo discover`.
pub const DEFAULT_DISCOVERY_DEPTH: usize = 3;

/// Find every working tree under `root`, at most `max_depth` levels below it.
///
/// `root` itself is depth 0. A discovered working tree is never descended
/// into, so nested repositories (submodules, vendored checkouts) are skipped.
/// Unreadable directories are logged and ignored.
pub fn discover_repositories(root: &Path, max_depth: usize) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut walker = WalkDir::new(root)
        .max_depth(max_depth)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter();

    while let Some(entry) = walker.next() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!(error = %e, "Skipping unreadable path during discovery");
                continue;
            }
        };
        if !entry.file_type().is_dir() {
            continue;
        }
        if is_working_tree(entry.path()) {
            found.push(entry.path().to_path_buf());
            walker.skip_current_dir();
        }
    }

    found
}
