//! Match events and scan reports.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::scan::{ScanConfig, ScanId, ScanMode};

/// Slack for floating-point window arithmetic.
const WINDOW_EPSILON: f64 = 1e-9;

/// A time range inside a source video.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ClipWindow {
    /// Start time in seconds
    pub start: f64,
    /// End time in seconds
    pub end: f64,
}

impl ClipWindow {
    /// Window of `half_width` seconds on either side of `center`, clamped to
    /// `[0, video_duration]`.
    ///
    /// Returns `None` when the clamped window is shorter than `min_duration`.
    pub fn around(
        center: f64,
        half_width: f64,
        video_duration: Option<f64>,
        min_duration: f64,
    ) -> Option<Self> {
        let start = (center - half_width).max(0.0);
        let mut end = center + half_width;
        if let Some(duration) = video_duration {
            end = end.min(duration);
        }

        let window = Self { start, end };
        if window.duration() + WINDOW_EPSILON >= min_duration {
            Some(window)
        } else {
            None
        }
    }

    /// Window length in seconds.
    #[inline]
    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }
}

/// One accepted face sighting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MatchEvent {
    /// Position of this event within the scan (0-based)
    pub sequence: usize,
    /// Source timestamp of the frame in seconds
    pub timestamp: f64,
    /// Similarity that decided the event (to the reference set, or to the
    /// nearest catalog entry for discoveries; `None` for the first discovery)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
    /// Persisted frame or preview clip
    pub artifact: PathBuf,
    /// Stable catalog index (discovery only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovery_index: Option<usize>,
    /// Preview window around the timestamp (discovery only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clip: Option<ClipWindow>,
}

/// Counters collected over one scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ScanStats {
    /// Frames decoded from the source
    pub frames_decoded: u64,
    /// Frames handed to the detector
    pub frames_sampled: u64,
    /// Frames skipped by the discovery cooldown
    pub frames_in_cooldown: u64,
    /// Frames whose analysis failed and were skipped
    pub frames_failed: u64,
    /// Faces detected and embedded
    pub faces_embedded: u64,
    /// Discovery faces rejected as already cataloged
    pub duplicates: u64,
    /// Accepted faces whose artifact could not be written
    pub artifact_failures: u64,
    /// Discovery faces rejected because their preview window was too short
    pub short_windows: u64,
    /// Events emitted
    pub events: u64,
}

/// Everything a finished scan produced, written as `manifest.json`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ScanReport {
    pub scan_id: ScanId,
    pub mode: ScanMode,
    /// Source video the scan read
    pub video: PathBuf,
    pub config: ScanConfig,
    pub events: Vec<MatchEvent>,
    pub stats: ScanStats,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ScanReport {
    /// Whether the scan produced no events.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
