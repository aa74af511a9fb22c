//! Metadata provider: ffprobe adapter with a per-path cache.
//!
//! Runs `ffprobe -v quiet -print_format json -show_streams -show_format`
//! against a candidate file and parses stream geometry, codec, frame rate,
//! duration, bitrate, and the camera model from the container tags. Results
//! are cached per absolute path for the run's lifetime so repeated queries
//! (display refresh, decision re-evaluation) never re-invoke the tool.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::process::Command;

/// Frame rates above this are treated as bogus timebase values and dropped.
const MAX_PLAUSIBLE_FPS: f64 = 240.0;

/// Container tag keys that may carry the camera model, in preference order.
const CAMERA_TAG_KEYS: &[&str] = &["com.apple.quicktime.model", "model", "camera_model"];

/// Error type for metadata extraction.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The probe tool could not be started (missing binary, spawn failure).
    #[error("failed to run ffprobe: {0}")]
    Spawn(std::io::Error),

    /// The probe tool ran but reported failure; the input is unreadable.
    #[error("ffprobe failed: {0}")]
    ToolFailed(String),

    /// The probe output could not be parsed.
    #[error("failed to parse ffprobe output: {0}")]
    Parse(String),

    /// The file contains no video stream.
    #[error("no video stream found in {0}")]
    NoVideoStream(PathBuf),
}

impl ProbeError {
    /// True when the failure is in the tool environment rather than the
    /// input file. Callers downgrade these to a per-file skip; everything
    /// else marks the input as corrupted.
    pub fn is_tool_unavailable(&self) -> bool {
        matches!(self, ProbeError::Spawn(_))
    }
}

/// Technical and camera metadata for one video file. Immutable once set.
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub codec: String,
    pub duration_secs: f64,
    /// Camera model from container tags; absence is valid.
    pub camera_model: Option<String>,
    pub bitrate_kbps: Option<f64>,
}

/// Raw ffprobe JSON structures for parsing.
mod ffprobe_json {
    use serde::Deserialize;
    use std::collections::HashMap;

    #[derive(Debug, Deserialize)]
    pub struct FfprobeOutput {
        pub streams: Option<Vec<Stream>>,
        pub format: Option<Format>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Stream {
        pub codec_type: Option<String>,
        pub codec_name: Option<String>,
        pub width: Option<u32>,
        pub height: Option<u32>,
        pub bit_rate: Option<String>,
        pub avg_frame_rate: Option<String>,
        pub tags: Option<HashMap<String, String>>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Format {
        pub duration: Option<String>,
        pub bit_rate: Option<String>,
        pub tags: Option<HashMap<String, String>>,
    }
}

/// Parse an `avg_frame_rate` fraction like `30000/1001`.
///
/// Values above the plausibility cap are dropped (some containers report the
/// timebase here instead of the frame rate).
fn parse_frame_rate(raw: &str) -> f64 {
    let value = if let Some((num, den)) = raw.split_once('/') {
        match (num.parse::<f64>(), den.parse::<f64>()) {
            (Ok(n), Ok(d)) if d != 0.0 => n / d,
            _ => return 0.0,
        }
    } else {
        raw.parse::<f64>().unwrap_or(0.0)
    };

    if value > 0.0 && value <= MAX_PLAUSIBLE_FPS {
        value
    } else {
        0.0
    }
}

/// Find the camera model in a tag map, trying the known key aliases
/// case-insensitively.
fn camera_from_tags(tags: &HashMap<String, String>) -> Option<String> {
    for key in CAMERA_TAG_KEYS {
        if let Some(value) = tags
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
        {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

/// Parses ffprobe JSON output into Metadata.
pub fn parse_ffprobe_output(json_str: &str, path: &Path) -> Result<Metadata, ProbeError> {
    let ffprobe: ffprobe_json::FfprobeOutput =
        serde_json::from_str(json_str).map_err(|e| ProbeError::Parse(e.to_string()))?;

    let streams = ffprobe.streams.unwrap_or_default();
    let format = ffprobe
        .format
        .ok_or_else(|| ProbeError::Parse("missing format information".to_string()))?;

    let video = streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| ProbeError::NoVideoStream(path.to_path_buf()))?;

    // Prefer the stream bitrate; fall back to the container's.
    let bitrate_kbps = video
        .bit_rate
        .as_ref()
        .or(format.bit_rate.as_ref())
        .and_then(|br| br.parse::<f64>().ok())
        .map(|bps| bps / 1000.0);

    let duration_secs = format
        .duration
        .as_ref()
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);

    // Camera model may live on the format or on the video stream.
    let camera_model = format
        .tags
        .as_ref()
        .and_then(camera_from_tags)
        .or_else(|| video.tags.as_ref().and_then(camera_from_tags));

    Ok(Metadata {
        width: video.width.unwrap_or(0),
        height: video.height.unwrap_or(0),
        fps: video
            .avg_frame_rate
            .as_deref()
            .map(parse_frame_rate)
            .unwrap_or(0.0),
        codec: video.codec_name.clone().unwrap_or_else(|| "unknown".to_string()),
        duration_secs,
        camera_model,
        bitrate_kbps,
    })
}

/// ffprobe adapter caching results per absolute path for the run's lifetime.
#[derive(Default)]
pub struct MetadataProvider {
    cache: Mutex<HashMap<PathBuf, Arc<Metadata>>>,
}

impl MetadataProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extract metadata for a file, consulting the cache first.
    pub async fn extract(&self, path: &Path) -> Result<Arc<Metadata>, ProbeError> {
        if let Some(cached) = self.cached(path) {
            return Ok(cached);
        }

        let output = Command::new("ffprobe")
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_streams",
                "-show_format",
            ])
            .arg(path)
            .output()
            .await
            .map_err(ProbeError::Spawn)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProbeError::ToolFailed(format!(
                "ffprobe exited with status {} for {}: {}",
                output.status,
                path.display(),
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let metadata = Arc::new(parse_ffprobe_output(&stdout, path)?);

        let mut cache = self.cache.lock().expect("metadata cache poisoned");
        let entry = cache
            .entry(path.to_path_buf())
            .or_insert_with(|| metadata.clone());
        Ok(entry.clone())
    }

    /// Look up a cached result without invoking the tool.
    pub fn cached(&self, path: &Path) -> Option<Arc<Metadata>> {
        let cache = self.cache.lock().expect("metadata cache poisoned");
        cache.get(path).cloned()
    }

    /// Insert a precomputed result; used by tests and warm-start paths.
    pub fn prime(&self, path: PathBuf, metadata: Metadata) {
        let mut cache = self.cache.lock().expect("metadata cache poisoned");
        cache.insert(path, Arc::new(metadata));
    }
}
