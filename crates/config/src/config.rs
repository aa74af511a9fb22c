//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Rotation angles accepted by the encoder pipeline
pub const VALID_ROTATION_ANGLES: &[u16] = &[0, 90, 180, 270];

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Configuration value out of range or otherwise unusable
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Concurrency bounds and queueing behavior
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConcurrencyConfig {
    /// Initial concurrency level (derived from CPU cores if None)
    pub initial: Option<u32>,
    /// Hard ceiling on simultaneously running jobs
    #[serde(default = "default_max_level")]
    pub max: u32,
    /// Submit-on-demand multiplier: at most prefetch_factor * level tasks outstanding
    #[serde(default = "default_prefetch_factor")]
    pub prefetch_factor: u32,
}

fn default_max_level() -> u32 {
    8
}

fn default_prefetch_factor() -> u32 {
    1
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            initial: None,
            max: default_max_level(),
            prefetch_factor: default_prefetch_factor(),
        }
    }
}

/// A per-camera constant-quality override
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CameraQuality {
    /// Camera model name as reported in file metadata
    pub camera: String,
    /// Constant quality value to use for this camera
    pub cq: u8,
}

/// Quality selection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityConfig {
    /// Default constant quality (0-63, lower is better quality)
    #[serde(default = "default_cq")]
    pub default_cq: u8,
    /// Per-camera overrides, matched on the normalized camera model
    #[serde(default)]
    pub per_camera: Vec<CameraQuality>,
}

fn default_cq() -> u8 {
    45
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            default_cq: default_cq(),
            per_camera: Vec::new(),
        }
    }
}

/// Candidate filtering settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilterConfig {
    /// Files smaller than this are skipped
    #[serde(default = "default_min_size_bytes")]
    pub min_size_bytes: u64,
    /// Camera allow-list; empty means all cameras are accepted
    #[serde(default)]
    pub cameras: Vec<String>,
    /// Skip files whose codec already matches the target codec
    #[serde(default = "default_true")]
    pub skip_already_encoded: bool,
    /// Recognized file extensions (with leading dot, case-insensitive)
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

fn default_min_size_bytes() -> u64 {
    1_048_576
}

fn default_true() -> bool {
    true
}

fn default_extensions() -> Vec<String> {
    [".mp4", ".mov", ".avi", ".flv", ".webm"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_size_bytes: default_min_size_bytes(),
            cameras: Vec::new(),
            skip_already_encoded: default_true(),
            extensions: default_extensions(),
        }
    }
}

/// A filename-pattern rotation rule
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RotationRule {
    /// Regex matched against the file name
    pub pattern: String,
    /// Rotation angle in degrees (0, 90, 180 or 270)
    pub angle: u16,
}

/// Rotation selection settings
///
/// Rules are an ordered array because first match wins; a manual override
/// takes priority over all rules.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RotationConfig {
    /// Manual rotation override applied to every job
    pub manual: Option<u16>,
    /// Ordered pattern rules, evaluated first to last
    #[serde(default)]
    pub rules: Vec<RotationRule>,
}

/// External-tool execution settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionConfig {
    /// Use the GPU encoder (av1_nvenc); false selects the CPU encoder (libsvtav1)
    #[serde(default = "default_true")]
    pub use_gpu: bool,
    /// Copy container/EXIF tags onto the finished output
    #[serde(default = "default_true")]
    pub copy_metadata: bool,
    /// Clear error markers at startup and re-attempt previously failed files
    #[serde(default)]
    pub retry_failed: bool,
    /// Per-job wall-clock cap in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Codec the pipeline produces; used by the already-encoded filter
    #[serde(default = "default_target_codec")]
    pub target_codec: String,
}

fn default_timeout_secs() -> u64 {
    21_600
}

fn default_target_codec() -> String {
    "av1".to_string()
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            use_gpu: default_true(),
            copy_metadata: default_true(),
            retry_failed: false,
            timeout_secs: default_timeout_secs(),
            target_codec: default_target_codec(),
        }
    }
}

/// Main run configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RunConfig {
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub filters: FilterConfig,
    #[serde(default)]
    pub rotation: RotationConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
}

impl RunConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: RunConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// Load configuration from file and validate it
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load_from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate value ranges
    ///
    /// Fatal at startup: a run never begins with an out-of-range quality,
    /// rotation angle, or concurrency bound.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency.max == 0 {
            return Err(ConfigError::Invalid(
                "concurrency.max must be at least 1".to_string(),
            ));
        }
        if let Some(initial) = self.concurrency.initial {
            if initial == 0 {
                return Err(ConfigError::Invalid(
                    "concurrency.initial must be at least 1".to_string(),
                ));
            }
        }
        if !(1..=5).contains(&self.concurrency.prefetch_factor) {
            return Err(ConfigError::Invalid(format!(
                "concurrency.prefetch_factor must be in 1..=5, got {}",
                self.concurrency.prefetch_factor
            )));
        }
        if self.quality.default_cq > 63 {
            return Err(ConfigError::Invalid(format!(
                "quality.default_cq must be in 0..=63, got {}",
                self.quality.default_cq
            )));
        }
        for entry in &self.quality.per_camera {
            if entry.cq > 63 {
                return Err(ConfigError::Invalid(format!(
                    "quality override for '{}' must be in 0..=63, got {}",
                    entry.camera, entry.cq
                )));
            }
        }
        if let Some(angle) = self.rotation.manual {
            if !VALID_ROTATION_ANGLES.contains(&angle) {
                return Err(ConfigError::Invalid(format!(
                    "rotation.manual must be one of 0, 90, 180, 270, got {}",
                    angle
                )));
            }
        }
        for rule in &self.rotation.rules {
            if !VALID_ROTATION_ANGLES.contains(&rule.angle) {
                return Err(ConfigError::Invalid(format!(
                    "rotation angle for pattern '{}' must be one of 0, 90, 180, 270, got {}",
                    rule.pattern, rule.angle
                )));
            }
        }
        if self.execution.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "execution.timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
