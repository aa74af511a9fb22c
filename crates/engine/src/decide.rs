//! Decision engine: maps metadata and configuration to per-job parameters.
//!
//! The mapping is pure and deterministic: identical inputs always produce the
//! same quality, rotation angle and verdict. All filesystem state it depends
//! on (the error-marker check) is passed in as a precomputed flag.

use crate::probe::Metadata;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use vidbatch_config::RunConfig;

/// Error type for building the engine from configuration.
#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("invalid rotation pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },
}

/// Why a file was filtered out of the run.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// File size is below the configured minimum.
    BelowMinSize { size_bytes: u64, min_bytes: u64 },
    /// Camera model is not on the non-empty allow-list.
    CameraNotAllowed(Option<String>),
    /// Codec already matches the target codec.
    AlreadyEncoded(String),
    /// An unresolved error marker exists and retry was not requested.
    PriorFailure,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::BelowMinSize {
                size_bytes,
                min_bytes,
            } => write!(
                f,
                "below minimum size ({} bytes < {} bytes)",
                size_bytes, min_bytes
            ),
            SkipReason::CameraNotAllowed(model) => match model {
                Some(model) => write!(f, "camera '{}' not in allow-list", model),
                None => write!(f, "no camera model, allow-list active"),
            },
            SkipReason::AlreadyEncoded(codec) => write!(f, "already encoded as {}", codec),
            SkipReason::PriorFailure => {
                write!(f, "previous failure marker present, retry not requested")
            }
        }
    }
}

/// The decision for one file.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Process the file with the resolved parameters.
    Proceed { quality: u8, rotation: u16 },
    /// Do not process the file.
    Skip(SkipReason),
}

/// Per-file inputs to the decision.
#[derive(Debug, Clone)]
pub struct DecisionInput<'a> {
    pub metadata: &'a Metadata,
    pub size_bytes: u64,
    pub file_name: &'a str,
    /// Precomputed: does an unresolved error marker exist for the output?
    pub has_error_marker: bool,
}

/// A compiled filename-pattern rotation rule.
#[derive(Debug, Clone)]
struct RotationRule {
    pattern: Regex,
    angle: u16,
}

/// Compiled decision state, built once per run from the configuration.
pub struct DecisionEngine {
    default_cq: u8,
    per_camera: HashMap<String, u8>,
    allowed_cameras: HashSet<String>,
    min_size_bytes: u64,
    skip_already_encoded: bool,
    target_codec: String,
    retry_failed: bool,
    manual_rotation: Option<u16>,
    rotation_rules: Vec<RotationRule>,
}

/// Normalize a camera model for matching: trim, lowercase, collapse
/// whitespace runs. Applied symmetrically to probed models, override keys
/// and allow-list entries so formatting differences don't break matches.
pub fn normalize_camera(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

impl DecisionEngine {
    /// Build the engine from configuration, compiling rotation patterns.
    ///
    /// An invalid pattern is a configuration error and aborts startup.
    pub fn from_config(config: &RunConfig) -> Result<Self, DecisionError> {
        let per_camera = config
            .quality
            .per_camera
            .iter()
            .map(|entry| (normalize_camera(&entry.camera), entry.cq))
            .collect();

        let allowed_cameras = config
            .filters
            .cameras
            .iter()
            .map(|camera| normalize_camera(camera))
            .collect();

        let mut rotation_rules = Vec::with_capacity(config.rotation.rules.len());
        for rule in &config.rotation.rules {
            let pattern = Regex::new(&rule.pattern).map_err(|source| {
                DecisionError::InvalidPattern {
                    pattern: rule.pattern.clone(),
                    source,
                }
            })?;
            rotation_rules.push(RotationRule {
                pattern,
                angle: rule.angle,
            });
        }

        Ok(Self {
            default_cq: config.quality.default_cq,
            per_camera,
            allowed_cameras,
            min_size_bytes: config.filters.min_size_bytes,
            skip_already_encoded: config.filters.skip_already_encoded,
            target_codec: config.execution.target_codec.to_lowercase(),
            retry_failed: config.execution.retry_failed,
            manual_rotation: config.rotation.manual,
            rotation_rules,
        })
    }

    /// Resolve the constant quality for a camera model.
    pub fn quality_for(&self, camera_model: Option<&str>) -> u8 {
        camera_model
            .map(normalize_camera)
            .and_then(|normalized| self.per_camera.get(&normalized).copied())
            .unwrap_or(self.default_cq)
    }

    /// Resolve the rotation angle for a file name.
    ///
    /// The manual override wins; otherwise the first matching rule; else 0.
    pub fn rotation_for(&self, file_name: &str) -> u16 {
        if let Some(angle) = self.manual_rotation {
            return angle;
        }
        self.rotation_rules
            .iter()
            .find(|rule| rule.pattern.is_match(file_name))
            .map(|rule| rule.angle)
            .unwrap_or(0)
    }

    /// Decide whether and how to process a file.
    pub fn decide(&self, input: &DecisionInput<'_>) -> Verdict {
        if input.size_bytes < self.min_size_bytes {
            return Verdict::Skip(SkipReason::BelowMinSize {
                size_bytes: input.size_bytes,
                min_bytes: self.min_size_bytes,
            });
        }

        if !self.allowed_cameras.is_empty() {
            let allowed = input
                .metadata
                .camera_model
                .as_deref()
                .map(|model| self.allowed_cameras.contains(&normalize_camera(model)))
                .unwrap_or(false);
            if !allowed {
                return Verdict::Skip(SkipReason::CameraNotAllowed(
                    input.metadata.camera_model.clone(),
                ));
            }
        }

        if self.skip_already_encoded
            && input.metadata.codec.to_lowercase() == self.target_codec
        {
            return Verdict::Skip(SkipReason::AlreadyEncoded(input.metadata.codec.clone()));
        }

        if input.has_error_marker && !self.retry_failed {
            return Verdict::Skip(SkipReason::PriorFailure);
        }

        Verdict::Proceed {
            quality: self.quality_for(input.metadata.camera_model.as_deref()),
            rotation: self.rotation_for(input.file_name),
        }
    }
}
