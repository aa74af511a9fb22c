//! Best-effort tag propagation onto finished outputs.
//!
//! Copies EXIF/XMP/QuickTime tags from the source onto the encoded file via
//! exiftool. This is a side effect separate from compression: failure (tool
//! absent, unwritable target) downgrades to a warning and never fails the job.

use std::path::Path;
use thiserror::Error;
use tokio::process::Command;

/// Error type for tag-copy operations.
#[derive(Debug, Error)]
pub enum TagCopyError {
    #[error("failed to run exiftool: {0}")]
    Spawn(std::io::Error),

    #[error("exiftool failed: {0}")]
    ToolFailed(String),
}

/// Copy all tags from `source` onto `target`, overwriting in place.
pub async fn copy_tags(source: &Path, target: &Path) -> Result<(), TagCopyError> {
    let output = Command::new("exiftool")
        .arg("-tagsFromFile")
        .arg(source)
        .args(["-all:all", "-unsafe", "-overwrite_original"])
        .arg(target)
        .output()
        .await
        .map_err(TagCopyError::Spawn)?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(TagCopyError::ToolFailed(format!(
            "exit status {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    Ok(())
}
