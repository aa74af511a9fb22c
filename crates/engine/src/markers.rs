//! Error markers and temporary-output naming.
//!
//! A failed job leaves a sibling marker file next to its output location:
//! same base name, `err` extension, containing the failure reason. A marker's
//! existence means "do not retry unless explicitly requested". In-progress
//! encoder output is written under a `tmp` extension and only renamed onto
//! the final path on success, so an interrupted run never presents a
//! truncated file as a finished one.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Constructs the error marker path for an output file.
///
/// `/out/clip.mp4` -> `/out/clip.err`
pub fn marker_path(output: &Path) -> PathBuf {
    output.with_extension("err")
}

/// Constructs the temporary in-progress path for an output file.
///
/// `/out/clip.mp4` -> `/out/clip.tmp`
pub fn tmp_path(output: &Path) -> PathBuf {
    output.with_extension("tmp")
}

/// Checks if an unresolved error marker exists for the output location.
pub fn has_marker(output: &Path) -> bool {
    marker_path(output).exists()
}

/// Writes an error marker containing the failure reason.
///
/// Creates parent directories as needed.
pub fn write_marker(output: &Path, reason: &str) -> io::Result<()> {
    let path = marker_path(output);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, reason)
}

/// Removes the error marker if present.
///
/// Called on explicit retry and on successful reprocessing.
pub fn clear_marker(output: &Path) -> io::Result<()> {
    let path = marker_path(output);
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_marker_path() {
        assert_eq!(
            marker_path(Path::new("/out/clip.mp4")),
            PathBuf::from("/out/clip.err")
        );
    }

    #[test]
    fn test_tmp_path() {
        assert_eq!(
            tmp_path(Path::new("/out/clip.mp4")),
            PathBuf::from("/out/clip.tmp")
        );
    }

    #[test]
    fn test_marker_path_with_dots_in_name() {
        assert_eq!(
            marker_path(Path::new("/out/trip.day2.mp4")),
            PathBuf::from("/out/trip.day2.err")
        );
    }

    #[test]
    fn test_write_marker_creates_parents_and_content() {
        let temp = TempDir::new().unwrap();
        let output = temp.path().join("nested/dir/clip.mp4");

        write_marker(&output, "ffmpeg exited with code 1").unwrap();

        assert!(has_marker(&output));
        let content = fs::read_to_string(marker_path(&output)).unwrap();
        assert_eq!(content, "ffmpeg exited with code 1");
    }

    #[test]
    fn test_clear_marker_removes_file() {
        let temp = TempDir::new().unwrap();
        let output = temp.path().join("clip.mp4");

        write_marker(&output, "reason").unwrap();
        assert!(has_marker(&output));

        clear_marker(&output).unwrap();
        assert!(!has_marker(&output));
    }

    #[test]
    fn test_clear_marker_tolerates_missing() {
        let temp = TempDir::new().unwrap();
        let output = temp.path().join("clip.mp4");

        assert!(!has_marker(&output));
        clear_marker(&output).unwrap();
    }
}
