//! Scan metrics.
//!
//! Recorded through the `metrics` facade; the worker decides whether a
//! Prometheus exporter is installed.

use metrics::{counter, histogram};

use facetrace_models::ScanMode;

/// Metric names as constants for consistency.
pub mod names {
    pub const FRAMES_SAMPLED_TOTAL: &str = "facetrace_frames_sampled_total";
    pub const FRAMES_FAILED_TOTAL: &str = "facetrace_frames_failed_total";
    pub const FACES_EMBEDDED_TOTAL: &str = "facetrace_faces_embedded_total";
    pub const MATCH_EVENTS_TOTAL: &str = "facetrace_match_events_total";
    pub const SCAN_DURATION_SECONDS: &str = "facetrace_scan_duration_seconds";
    pub const RENDER_DURATION_SECONDS: &str = "facetrace_render_duration_seconds";
}

pub fn record_frame_sampled(mode: ScanMode) {
    counter!(names::FRAMES_SAMPLED_TOTAL, "mode" => mode.as_str()).increment(1);
}

pub fn record_frame_failed(mode: ScanMode, reason: &'static str) {
    counter!(names::FRAMES_FAILED_TOTAL, "mode" => mode.as_str(), "reason" => reason).increment(1);
}

pub fn record_faces_embedded(mode: ScanMode, count: usize) {
    counter!(names::FACES_EMBEDDED_TOTAL, "mode" => mode.as_str()).increment(count as u64);
}

pub fn record_match_event(mode: ScanMode) {
    counter!(names::MATCH_EVENTS_TOTAL, "mode" => mode.as_str()).increment(1);
}

pub fn record_scan_duration(mode: ScanMode, duration_secs: f64) {
    histogram!(names::SCAN_DURATION_SECONDS, "mode" => mode.as_str()).record(duration_secs);
}

pub fn record_render_duration(duration_secs: f64) {
    histogram!(names::RENDER_DURATION_SECONDS).record(duration_secs);
}
