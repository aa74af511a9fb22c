//! Scanner module for discovering candidate video files under an input root.
//!
//! Discovery walks the input tree breadth-bounded to a fixed depth, skips the
//! output subtree and hidden directories, filters by configured extensions,
//! and returns candidates sorted by path so queue order is deterministic.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Maximum directory depth below the input root that is scanned.
pub const MAX_SCAN_DEPTH: usize = 3;

/// Suffix appended to the input root to form the output root.
pub const OUTPUT_DIR_SUFFIX: &str = "_out";

/// Error type for discovery operations.
///
/// Unlike per-file failures, an unreadable input root aborts the whole run.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("input directory does not exist: {0}")]
    MissingRoot(PathBuf),

    #[error("input path is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("failed to read input directory {path}: {source}")]
    Unreadable {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// A candidate video file discovered during scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Absolute path to the video file.
    pub path: PathBuf,
    /// File size in bytes at discovery time.
    pub size_bytes: u64,
    /// Path relative to the input root, used to mirror the tree in the output.
    pub rel_path: PathBuf,
}

/// Constructs the output root for an input root.
///
/// `/media/clips` -> `/media/clips_out`
pub fn output_root_for(input_root: &Path) -> PathBuf {
    let mut name = input_root.as_os_str().to_owned();
    name.push(OUTPUT_DIR_SUFFIX);
    PathBuf::from(name)
}

/// Resolves a source file's output path under the output root.
pub fn output_path_for(output_root: &Path, source: &SourceFile) -> PathBuf {
    output_root.join(&source.rel_path)
}

/// Checks if a file has one of the configured extensions (case-insensitive).
///
/// Extensions carry a leading dot, e.g. `.mp4`.
pub fn is_candidate_file(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext_lower = format!(".{}", ext.to_lowercase());
            extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext_lower))
        })
        .unwrap_or(false)
}

/// Scans the input root for candidate video files.
///
/// This function:
/// - Walks the root up to `MAX_SCAN_DEPTH` directory levels deep
/// - Excludes the output subtree so finished encodes are never re-discovered
/// - Skips hidden directories (names starting with `.`)
/// - Filters files by the configured extensions (case-insensitive)
/// - Sorts results by path for a deterministic FIFO base order
pub fn scan_input(
    input_root: &Path,
    output_root: &Path,
    extensions: &[String],
) -> Result<Vec<SourceFile>, ScanError> {
    use walkdir::WalkDir;

    if !input_root.exists() {
        return Err(ScanError::MissingRoot(input_root.to_path_buf()));
    }
    if !input_root.is_dir() {
        return Err(ScanError::NotADirectory(input_root.to_path_buf()));
    }

    let mut candidates = Vec::new();

    // Files live at walkdir depth 1..=MAX_SCAN_DEPTH + 1 (depth 0 is the root).
    let walker = WalkDir::new(input_root)
        .max_depth(MAX_SCAN_DEPTH + 1)
        .into_iter()
        .filter_entry(|entry| {
            if entry.file_type().is_dir() && entry.depth() > 0 {
                if entry.path() == output_root {
                    return false;
                }
                if let Some(name) = entry.file_name().to_str() {
                    if name.starts_with('.') {
                        return false;
                    }
                }
            }
            true
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                // Only a failure on the root itself is fatal; deeper entries
                // that disappear mid-scan are skipped.
                if e.depth() == 0 {
                    return Err(ScanError::Unreadable {
                        path: input_root.to_path_buf(),
                        source: e.into(),
                    });
                }
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if !is_candidate_file(path, extensions) {
            continue;
        }

        let Ok(metadata) = entry.metadata() else {
            continue;
        };

        let Ok(rel_path) = path.strip_prefix(input_root) else {
            continue;
        };

        candidates.push(SourceFile {
            path: path.to_path_buf(),
            size_bytes: metadata.len(),
            rel_path: rel_path.to_path_buf(),
        });
    }

    candidates.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::fs::{self, File};
    use tempfile::TempDir;

    fn default_extensions() -> Vec<String> {
        vec![
            ".mp4".to_string(),
            ".mov".to_string(),
            ".avi".to_string(),
            ".flv".to_string(),
            ".webm".to_string(),
        ]
    }

    #[test]
    fn test_output_root_suffix() {
        assert_eq!(
            output_root_for(Path::new("/media/clips")),
            PathBuf::from("/media/clips_out")
        );
    }

    #[test]
    fn test_output_path_mirrors_structure() {
        let source = SourceFile {
            path: PathBuf::from("/media/clips/2024/trip/a.mp4"),
            size_bytes: 10,
            rel_path: PathBuf::from("2024/trip/a.mp4"),
        };
        assert_eq!(
            output_path_for(Path::new("/media/clips_out"), &source),
            PathBuf::from("/media/clips_out/2024/trip/a.mp4")
        );
    }

    #[test]
    fn test_is_candidate_file() {
        let exts = default_extensions();
        assert!(is_candidate_file(Path::new("/media/a.mp4"), &exts));
        assert!(is_candidate_file(Path::new("/media/a.MP4"), &exts)); // case-insensitive
        assert!(is_candidate_file(Path::new("/media/a.Mov"), &exts));
        assert!(!is_candidate_file(Path::new("/media/a.mkv"), &exts));
        assert!(!is_candidate_file(Path::new("/media/a.txt"), &exts));
        assert!(!is_candidate_file(Path::new("/media/a"), &exts)); // no extension
    }

    #[test]
    fn test_scan_missing_root_is_fatal() {
        let result = scan_input(
            Path::new("/nonexistent/input"),
            Path::new("/nonexistent/input_out"),
            &default_extensions(),
        );
        assert!(matches!(result, Err(ScanError::MissingRoot(_))));
    }

    #[test]
    fn test_scan_excludes_output_subtree() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("clips");
        let output = output_root_for(&input);
        fs::create_dir_all(&input).unwrap();
        fs::create_dir_all(&output).unwrap();

        File::create(input.join("a.mp4")).unwrap();
        File::create(output.join("a.mp4")).unwrap();

        // The output root sits outside the input root here; nest one inside
        // the input to verify the exclusion directly.
        let nested_out = input.join("nested_out");
        fs::create_dir_all(&nested_out).unwrap();
        File::create(nested_out.join("b.mp4")).unwrap();

        let found = scan_input(&input, &nested_out, &default_extensions()).unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|f| f.rel_path.to_string_lossy().to_string())
            .collect();

        assert_eq!(names, vec!["a.mp4"]);
    }

    #[test]
    fn test_scan_respects_max_depth() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("clips");

        // Depth 0 (root), 1, 3 are inside the limit; 4 is beyond it.
        let deep_ok = input.join("a/b/c");
        let deep_excluded = input.join("a/b/c/d");
        fs::create_dir_all(&deep_ok).unwrap();
        fs::create_dir_all(&deep_excluded).unwrap();

        File::create(input.join("root.mp4")).unwrap();
        File::create(input.join("a").join("one.mp4")).unwrap();
        File::create(deep_ok.join("three.mp4")).unwrap();
        File::create(deep_excluded.join("four.mp4")).unwrap();

        let found = scan_input(
            &input,
            &output_root_for(&input),
            &default_extensions(),
        )
        .unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|f| f.path.file_name().unwrap().to_string_lossy().to_string())
            .collect();

        assert!(names.contains(&"root.mp4".to_string()));
        assert!(names.contains(&"one.mp4".to_string()));
        assert!(names.contains(&"three.mp4".to_string()));
        assert!(!names.contains(&"four.mp4".to_string()));
    }

    #[test]
    fn test_scan_sorted_by_path() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("clips");
        fs::create_dir_all(&input).unwrap();

        for name in ["zebra.mp4", "alpha.mp4", "mid.mp4"] {
            File::create(input.join(name)).unwrap();
        }

        let found = scan_input(
            &input,
            &output_root_for(&input),
            &default_extensions(),
        )
        .unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|f| f.rel_path.to_string_lossy().to_string())
            .collect();

        assert_eq!(names, vec!["alpha.mp4", "mid.mp4", "zebra.mp4"]);
    }

    // Property: a file is a candidate iff its extension (case-insensitive,
    // with leading dot) is in the configured list.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_extension_filtering(
            basename in "[a-zA-Z0-9_-]{1,20}",
            ext in prop_oneof![
                Just("mp4"), Just("MP4"), Just("Mp4"),
                Just("mov"), Just("MOV"),
                Just("avi"), Just("flv"), Just("webm"),
                Just("mkv"), Just("txt"), Just("jpg"), Just("srt"),
            ],
        ) {
            let exts = default_extensions();
            let path = PathBuf::from(format!("/media/{}.{}", basename, ext));

            let expected = matches!(
                ext.to_lowercase().as_str(),
                "mp4" | "mov" | "avi" | "flv" | "webm"
            );

            prop_assert_eq!(is_candidate_file(&path, &exts), expected);
        }
    }

    // Property: files under hidden directories are never discovered.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn prop_hidden_directory_exclusion(
            visible_dir in "[a-zA-Z0-9]{1,10}",
            hidden_dir in "\\.[a-zA-Z0-9]{1,10}",
            filename in "[a-zA-Z0-9]{1,10}",
        ) {
            let temp = TempDir::new().unwrap();
            let input = temp.path().join("clips");

            let visible_path = input.join(&visible_dir);
            fs::create_dir_all(&visible_path).unwrap();
            let visible_video = visible_path.join(format!("{}.mp4", filename));
            File::create(&visible_video).unwrap();

            let hidden_path = input.join(&hidden_dir);
            fs::create_dir_all(&hidden_path).unwrap();
            let hidden_video = hidden_path.join(format!("{}.mp4", filename));
            File::create(&hidden_video).unwrap();

            let found = scan_input(
                &input,
                &output_root_for(&input),
                &default_extensions(),
            ).unwrap();

            prop_assert!(found.iter().any(|f| f.path == visible_video));
            prop_assert!(!found.iter().any(|f| f.path == hidden_video));
        }
    }
}
