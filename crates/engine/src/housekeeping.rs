//! Startup cleanup of stale artifacts in the output tree.
//!
//! A crashed or interrupted run can leave partial `.tmp` outputs behind;
//! those are always removed before discovery. Error markers persist across
//! runs on purpose and are only cleared when the operator explicitly asks
//! for failed files to be retried.

use std::path::Path;
use tracing::warn;
use walkdir::WalkDir;

/// What the startup cleanup removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Stale partial outputs removed.
    pub tmp_removed: usize,
    /// Error markers removed (only on explicit retry).
    pub markers_removed: usize,
}

/// Remove stale `.tmp` files from the output tree, and `.err` markers when
/// `clear_markers` is set.
///
/// A missing output tree is fine (first run). Per-file removal failures are
/// logged and skipped; they never abort startup.
pub fn clean_output_tree(output_root: &Path, clear_markers: bool) -> CleanupReport {
    let mut report = CleanupReport::default();

    if !output_root.exists() {
        return report;
    }

    for entry in WalkDir::new(output_root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }

        let ext = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");

        let counter = match ext {
            "tmp" => &mut report.tmp_removed,
            "err" if clear_markers => &mut report.markers_removed,
            _ => continue,
        };

        match std::fs::remove_file(entry.path()) {
            Ok(()) => *counter += 1,
            Err(e) => warn!(
                path = %entry.path().display(),
                error = %e,
                "failed to remove stale artifact"
            ),
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use tempfile::TempDir;

    #[test]
    fn test_missing_output_tree_is_noop() {
        let report = clean_output_tree(Path::new("/nonexistent/out"), false);
        assert_eq!(report, CleanupReport::default());
    }

    #[test]
    fn test_removes_tmp_keeps_markers_by_default() {
        let temp = TempDir::new().unwrap();
        let out = temp.path();

        let nested = out.join("sub");
        fs::create_dir_all(&nested).unwrap();

        File::create(out.join("a.tmp")).unwrap();
        File::create(nested.join("b.tmp")).unwrap();
        File::create(out.join("a.err")).unwrap();
        File::create(out.join("done.mp4")).unwrap();

        let report = clean_output_tree(out, false);

        assert_eq!(report.tmp_removed, 2);
        assert_eq!(report.markers_removed, 0);
        assert!(!out.join("a.tmp").exists());
        assert!(!nested.join("b.tmp").exists());
        assert!(out.join("a.err").exists());
        assert!(out.join("done.mp4").exists());
    }

    #[test]
    fn test_retry_clears_markers_too() {
        let temp = TempDir::new().unwrap();
        let out = temp.path();

        File::create(out.join("a.err")).unwrap();
        File::create(out.join("b.err")).unwrap();
        File::create(out.join("done.mp4")).unwrap();

        let report = clean_output_tree(out, true);

        assert_eq!(report.markers_removed, 2);
        assert!(!out.join("a.err").exists());
        assert!(!out.join("b.err").exists());
        assert!(out.join("done.mp4").exists());
    }
}
