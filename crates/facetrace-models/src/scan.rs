//! Scan identifiers and configuration.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Fixed warm-up window skipped at the start of a video when enabled.
pub const WARMUP_FRAMES: u64 = 10;

/// Default similarity a face must exceed to match a reference face.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.7;

/// Default similarity at or above which a face is a catalog duplicate.
pub const DEFAULT_DEDUP_THRESHOLD: f32 = 0.6;

/// Default minimum spacing between two discovery acceptances.
pub const DEFAULT_COOLDOWN_SECS: f64 = 2.0;

/// Default half-width of a discovery preview window.
pub const DEFAULT_CLIP_HALF_WINDOW_SECS: f64 = 0.25;

/// Default shortest preview window worth keeping.
pub const DEFAULT_MIN_CLIP_SECS: f64 = 0.5;

/// Unique identifier for a scan.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ScanId(pub String);

impl ScanId {
    /// Generate a new random scan ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ScanId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ScanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which question a scan answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    /// Find frames showing one of the reference faces
    Targeted,
    /// Catalog every distinct face in the video
    Discovery,
}

impl ScanMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanMode::Targeted => "targeted",
            ScanMode::Discovery => "discovery",
        }
    }
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How many qualifying faces a single frame may turn into events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum FramePolicy {
    /// Stop evaluating a frame at the first qualifying face
    #[default]
    FirstMatchWins,
    /// Evaluate every face; a frame may still emit only one event, but the
    /// strongest qualifying face is reported
    BestMatchWins,
}

/// Scan configuration shared by both modes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ScanConfig {
    /// Yield every Nth decoded frame (>= 1)
    #[serde(default = "default_stride")]
    pub frame_skip_stride: u64,

    /// Skip the first [`WARMUP_FRAMES`] frames
    #[serde(default)]
    pub enable_warmup: bool,

    /// Similarity a face must exceed to count as the target (strict >)
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f32,

    /// Similarity below which a face is new to the catalog (discovery only)
    #[serde(default = "default_dedup_threshold")]
    pub dedup_threshold: f32,

    /// Minimum time between two accepted discoveries (discovery only)
    #[serde(default = "default_cooldown")]
    pub cooldown_seconds: f64,

    /// Half-width of the preview window around a discovery (discovery only)
    #[serde(default = "default_half_window")]
    pub clip_half_window_seconds: f64,

    /// Shortest preview window kept after clamping (discovery only)
    #[serde(default = "default_min_clip")]
    pub min_clip_seconds: f64,

    /// Faces examined per frame, in detector order; `None` examines all
    #[serde(default)]
    pub max_faces_per_frame: Option<usize>,

    /// Per-frame event policy (targeted only)
    #[serde(default)]
    pub frame_policy: FramePolicy,
}

fn default_stride() -> u64 {
    1
}
fn default_match_threshold() -> f32 {
    DEFAULT_MATCH_THRESHOLD
}
fn default_dedup_threshold() -> f32 {
    DEFAULT_DEDUP_THRESHOLD
}
fn default_cooldown() -> f64 {
    DEFAULT_COOLDOWN_SECS
}
fn default_half_window() -> f64 {
    DEFAULT_CLIP_HALF_WINDOW_SECS
}
fn default_min_clip() -> f64 {
    DEFAULT_MIN_CLIP_SECS
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self::targeted()
    }
}

impl ScanConfig {
    /// Defaults for Targeted Match Mode: every detection is examined.
    pub fn targeted() -> Self {
        Self {
            frame_skip_stride: 1,
            enable_warmup: false,
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            dedup_threshold: DEFAULT_DEDUP_THRESHOLD,
            cooldown_seconds: DEFAULT_COOLDOWN_SECS,
            clip_half_window_seconds: DEFAULT_CLIP_HALF_WINDOW_SECS,
            min_clip_seconds: DEFAULT_MIN_CLIP_SECS,
            max_faces_per_frame: None,
            frame_policy: FramePolicy::FirstMatchWins,
        }
    }

    /// Defaults for Discovery Mode: only the first face of a frame counts.
    pub fn discovery() -> Self {
        Self {
            max_faces_per_frame: Some(1),
            ..Self::targeted()
        }
    }

    /// Builder-style stride override.
    pub fn with_stride(mut self, stride: u64) -> Self {
        self.frame_skip_stride = stride;
        self
    }

    /// Builder-style warm-up toggle.
    pub fn with_warmup(mut self, enabled: bool) -> Self {
        self.enable_warmup = enabled;
        self
    }

    /// Check the configuration before a scan starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frame_skip_stride == 0 {
            return Err(ConfigError::InvalidStride);
        }
        for (name, value) in [
            ("match_threshold", self.match_threshold),
            ("dedup_threshold", self.dedup_threshold),
        ] {
            if !value.is_finite() || !(-1.0..=1.0).contains(&value) {
                return Err(ConfigError::ThresholdOutOfRange { name, value });
            }
        }
        for (name, value) in [
            ("cooldown_seconds", self.cooldown_seconds),
            ("clip_half_window_seconds", self.clip_half_window_seconds),
            ("min_clip_seconds", self.min_clip_seconds),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::NegativeDuration { name, value });
            }
        }
        if self.max_faces_per_frame == Some(0) {
            return Err(ConfigError::ZeroFacesPerFrame);
        }
        Ok(())
    }
}

/// Invalid scan configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("frame_skip_stride must be at least 1")]
    InvalidStride,

    #[error("{name} must be within [-1, 1], got {value}")]
    ThresholdOutOfRange { name: &'static str, value: f32 },

    #[error("{name} must be a non-negative number of seconds, got {value}")]
    NegativeDuration { name: &'static str, value: f64 },

    #[error("max_faces_per_frame must be at least 1 when set")]
    ZeroFacesPerFrame,
}
