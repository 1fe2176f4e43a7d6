//! Render job processing.
//!
//! Turns selected events of a finished scan into one final video. The
//! selection refers to event sequence numbers in the scan's manifest. A clip
//! starts where the event's preview starts (discovery events) or at the
//! event's timestamp (targeted events).

use std::path::{Path, PathBuf};
use tokio::sync::watch;

use facetrace_media::{FfmpegRunner, FinalRenderer};
use facetrace_models::render::DEFAULT_CLIP_SECS;
use facetrace_models::{
    ClipDescriptor, Effect, MatchEvent, RenderRequest, ScanId, ScanReport, Transition,
};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::ScanLogger;

/// How to assemble the final video.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Event sequence numbers in playback order; empty selects every event
    pub selection: Vec<usize>,
    pub effect: Option<Effect>,
    pub transition: Transition,
    pub with_audio: bool,
    pub music: Option<PathBuf>,
    pub timestamp_label: bool,
    pub clip_secs: f64,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            selection: Vec::new(),
            effect: None,
            transition: Transition::None,
            with_audio: false,
            music: None,
            timestamp_label: true,
            clip_secs: DEFAULT_CLIP_SECS,
        }
    }
}

/// Read a scan manifest.
pub fn load_manifest(path: impl AsRef<Path>) -> WorkerResult<ScanReport> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|e| {
        WorkerError::invalid_input(format!("cannot read manifest {}: {}", path.display(), e))
    })?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Render request for the selected events of `report`.
pub fn render_request(
    report: &ScanReport,
    options: &RenderOptions,
) -> WorkerResult<RenderRequest> {
    if !(options.clip_secs > 0.0) {
        return Err(WorkerError::invalid_input("clip length must be positive"));
    }

    let events: Vec<_> = if options.selection.is_empty() {
        report.events.iter().collect()
    } else {
        options
            .selection
            .iter()
            .map(|&sequence| {
                report
                    .events
                    .iter()
                    .find(|e| e.sequence == sequence)
                    .ok_or_else(|| {
                        WorkerError::invalid_input(format!("scan has no event {}", sequence))
                    })
            })
            .collect::<WorkerResult<_>>()?
    };

    if events.is_empty() {
        return Err(WorkerError::invalid_input("no events selected"));
    }

    let clips = events
        .into_iter()
        .map(|event| ClipDescriptor {
            source: report.video.clone(),
            start: clip_start(event),
            duration: options.clip_secs,
        })
        .collect();

    Ok(RenderRequest {
        clips,
        transition: options.transition,
        effect: options.effect,
        with_audio: options.with_audio,
        music: options.music.clone(),
        timestamp_label: options.timestamp_label,
    })
}

/// Start of the final clip for `event`, to the hundredth of a second.
fn clip_start(event: &MatchEvent) -> f64 {
    let start = event.clip.map(|window| window.start).unwrap_or(event.timestamp);
    (start * 100.0).round() / 100.0
}

/// Render the selected events of the scan at `manifest`.
///
/// The final video is written next to the manifest.
pub async fn run_render(
    config: &WorkerConfig,
    manifest: &Path,
    options: &RenderOptions,
    shutdown_rx: watch::Receiver<bool>,
) -> WorkerResult<PathBuf> {
    let report = load_manifest(manifest)?;
    let logger = ScanLogger::new(&report.scan_id, "render");
    let request = render_request(&report, options)?;
    logger.log_start(&format!(
        "{} clips from {}",
        request.clips.len(),
        report.video.display()
    ));

    let output_dir = manifest
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.output_dir.join(ScanId::new().as_str()));

    let mut runner = FfmpegRunner::new().with_cancel(shutdown_rx);
    if let Some(timeout) = config.scan_timeout {
        runner = runner.with_timeout(timeout.as_secs());
    }

    let result = FinalRenderer::new()
        .with_runner(runner)
        .render(&request, &output_dir)
        .await;

    match &result {
        Ok(path) => logger.log_completion(&path.display().to_string()),
        Err(e) => logger.log_error(&e.to_string()),
    }
    result.map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use facetrace_models::{ClipWindow, ScanConfig, ScanMode, ScanStats};

    fn report(timestamps: &[f64]) -> ScanReport {
        ScanReport {
            scan_id: ScanId::new(),
            mode: ScanMode::Targeted,
            video: PathBuf::from("/videos/party.mp4"),
            config: ScanConfig::targeted(),
            events: timestamps
                .iter()
                .enumerate()
                .map(|(sequence, &timestamp)| MatchEvent {
                    sequence,
                    timestamp,
                    similarity: Some(0.9),
                    artifact: PathBuf::from(format!("match_{}.jpg", sequence)),
                    discovery_index: None,
                    clip: None,
                })
                .collect(),
            stats: ScanStats::default(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn test_selection_order_is_playback_order() {
        let options = RenderOptions {
            selection: vec![2, 0],
            transition: Transition::Fade,
            ..Default::default()
        };
        let request = render_request(&report(&[0.5, 3.2, 7.0]), &options).unwrap();

        let starts: Vec<f64> = request.clips.iter().map(|c| c.start).collect();
        assert_eq!(starts, vec![7.0, 0.5]);
        assert!(request.clips.iter().all(|c| c.duration == DEFAULT_CLIP_SECS));
        assert_eq!(request.clips[0].source, PathBuf::from("/videos/party.mp4"));
        assert_eq!(request.transition, Transition::Fade);
    }

    #[test]
    fn test_discovery_clip_starts_with_its_preview() {
        let mut report = report(&[3.0, 6.0]);
        report.mode = ScanMode::Discovery;
        report.events[0].clip = Some(ClipWindow {
            start: 2.75,
            end: 3.25,
        });

        let request = render_request(&report, &RenderOptions::default()).unwrap();
        assert_eq!(request.clips[0].start, 2.75);
        assert_eq!(request.clips[1].start, 6.0);
    }

    #[test]
    fn test_empty_selection_takes_every_event() {
        let request = render_request(&report(&[0.5, 3.2]), &RenderOptions::default()).unwrap();
        assert_eq!(request.clips.len(), 2);
        assert!(request.timestamp_label);
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        let options = RenderOptions {
            selection: vec![5],
            ..Default::default()
        };
        let err = render_request(&report(&[0.5]), &options).unwrap_err();
        assert!(err.is_input_rejection());
    }

    #[test]
    fn test_scan_without_events_has_nothing_to_render() {
        let err = render_request(&report(&[]), &RenderOptions::default()).unwrap_err();
        assert!(err.is_input_rejection());
    }

    #[test]
    fn test_manifest_round_trip_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        let original = report(&[1.25]);
        std::fs::write(&path, serde_json::to_vec(&original).unwrap()).unwrap();

        let loaded = load_manifest(&path).unwrap();
        assert_eq!(loaded.scan_id, original.scan_id);
        assert_eq!(loaded.events[0].timestamp, 1.25);

        std::fs::write(&path, b"{ not json").unwrap();
        assert!(load_manifest(&path).unwrap_err().is_input_rejection());
    }
}
