//! Single-pass match scanning.
//!
//! - **Targeted**: frames pass stride and warm-up; a face matches when its
//!   best similarity to the reference set is `> match_threshold`; the event
//!   is the full frame, at most one per frame.
//! - **Discovery**: frames also pass the cooldown; a face is novel when its
//!   best catalog similarity is `< dedup_threshold`; the event is a preview
//!   clip and the registry grows.
//!
//! Per-frame problems never abort a scan: each sampled frame resolves to a
//! [`FrameOutcome`], failures are counted and the scan moves on. Only setup
//! errors and cancellation end a scan early.

use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use facetrace_models::{ClipWindow, FramePolicy, MatchEvent, ScanConfig, ScanMode, ScanStats};

use crate::artifacts::ArtifactSink;
use crate::detection::{DetectedFace, FaceAnalyzer, FaceDetector, FaceEmbedder};
use crate::error::{MediaError, MediaResult};
use crate::metrics;
use crate::reference::ReferenceSet;
use crate::registry::{IdentityRegistry, Novelty};
use crate::sampler::{FrameSampler, SampledFrame};
use crate::source::FrameSource;

/// What one sampled frame produced.
#[derive(Debug)]
pub enum FrameOutcome {
    /// The frame emitted an event
    Event(MatchEvent),
    /// No face was detected
    NoFaces,
    /// Faces were found but none qualified
    NoMatch,
    /// Every examined face was already cataloged
    Duplicate,
    /// A novel face sat too close to either end of the video
    ShortWindow,
    /// Analysis or persistence failed; the frame is skipped
    Failed(MediaError),
}

/// Result of a completed scan.
#[derive(Debug)]
pub struct ScanOutcome {
    /// Events in timestamp order
    pub events: Vec<MatchEvent>,
    pub stats: ScanStats,
    /// Cataloged identities (empty for targeted scans)
    pub registry: IdentityRegistry,
}

/// Drives the sampler, the analyzer and the artifact sink for one scan.
pub struct MatchScanner<D, E, K> {
    analyzer: FaceAnalyzer<D, E>,
    sink: K,
    config: ScanConfig,
    cancel_rx: Option<watch::Receiver<bool>>,
}

impl<D, E, K> MatchScanner<D, E, K>
where
    D: FaceDetector,
    E: FaceEmbedder,
    K: ArtifactSink,
{
    /// Create a scanner; rejects an invalid configuration.
    pub fn new(analyzer: FaceAnalyzer<D, E>, sink: K, config: ScanConfig) -> MediaResult<Self> {
        config.validate()?;
        Ok(Self {
            analyzer,
            sink,
            config,
            cancel_rx: None,
        })
    }

    /// Stop at the next sampled frame once the signal turns `true`.
    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Analyzer access, e.g. to build the reference set before scanning.
    pub fn analyzer_mut(&mut self) -> &mut FaceAnalyzer<D, E> {
        &mut self.analyzer
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    fn check_cancelled(&self) -> MediaResult<()> {
        match &self.cancel_rx {
            Some(rx) if *rx.borrow() => Err(MediaError::Cancelled),
            _ => Ok(()),
        }
    }

    /// Report every sampled frame showing one of the reference faces.
    pub fn scan_targeted<S: FrameSource>(
        &mut self,
        source: S,
        references: &ReferenceSet,
    ) -> MediaResult<ScanOutcome> {
        if references.is_empty() {
            return Err(MediaError::EmptyReferenceSet);
        }

        let mode = ScanMode::Targeted;
        let started = Instant::now();
        let mut sampler = FrameSampler::new(source, &self.config);
        let mut events = Vec::new();
        let mut stats = ScanStats::default();

        info!(
            mode = %mode,
            references = references.len(),
            stride = self.config.frame_skip_stride,
            warmup = self.config.enable_warmup,
            threshold = self.config.match_threshold,
            "Starting scan"
        );

        while let Some(sampled) = sampler.next_frame() {
            self.check_cancelled()?;
            stats.frames_sampled += 1;
            metrics::record_frame_sampled(mode);

            let outcome = self.targeted_step(&sampled, references, events.len(), &mut stats);
            tally(mode, &sampled, outcome, &mut events, &mut stats);
        }

        stats.frames_decoded = sampler.frames_decoded();
        stats.frames_failed += sampler.frames_unreadable();
        finish(mode, started, &stats);

        Ok(ScanOutcome {
            events,
            stats,
            registry: IdentityRegistry::new(),
        })
    }

    /// Catalog every distinct face, one preview per new identity.
    pub fn scan_discovery<S: FrameSource>(&mut self, source: S) -> MediaResult<ScanOutcome> {
        let mode = ScanMode::Discovery;
        let started = Instant::now();
        let mut sampler =
            FrameSampler::new(source, &self.config).with_cooldown(self.config.cooldown_seconds);
        let mut registry = IdentityRegistry::new();
        let mut events = Vec::new();
        let mut stats = ScanStats::default();

        info!(
            mode = %mode,
            stride = self.config.frame_skip_stride,
            cooldown = self.config.cooldown_seconds,
            dedup_threshold = self.config.dedup_threshold,
            "Starting scan"
        );

        while let Some(sampled) = sampler.next_frame() {
            self.check_cancelled()?;
            stats.frames_sampled += 1;
            metrics::record_frame_sampled(mode);

            let outcome =
                self.discovery_step(&sampled, &sampler, &mut registry, events.len(), &mut stats);
            if let FrameOutcome::Event(_) = &outcome {
                sampler.record_acceptance(sampled.timestamp());
            }
            tally(mode, &sampled, outcome, &mut events, &mut stats);
        }

        stats.frames_decoded = sampler.frames_decoded();
        stats.frames_in_cooldown = sampler.frames_in_cooldown();
        stats.frames_failed += sampler.frames_unreadable();
        finish(mode, started, &stats);

        Ok(ScanOutcome {
            events,
            stats,
            registry,
        })
    }

    fn embed_frame(
        &mut self,
        sampled: &SampledFrame,
        mode: ScanMode,
        stats: &mut ScanStats,
    ) -> Result<Vec<DetectedFace>, MediaError> {
        let faces = self
            .analyzer
            .detect_and_embed_limited(&sampled.frame.image, self.config.max_faces_per_frame)?;
        stats.faces_embedded += faces.len() as u64;
        metrics::record_faces_embedded(mode, faces.len());
        Ok(faces)
    }

    fn targeted_step(
        &mut self,
        sampled: &SampledFrame,
        references: &ReferenceSet,
        sequence: usize,
        stats: &mut ScanStats,
    ) -> FrameOutcome {
        let faces = match self.embed_frame(sampled, ScanMode::Targeted, stats) {
            Ok(faces) if faces.is_empty() => return FrameOutcome::NoFaces,
            Ok(faces) => faces,
            Err(e) => return FrameOutcome::Failed(e),
        };

        let mut chosen: Option<f32> = None;
        for face in &faces {
            let best = match references.best_match(&face.embedding) {
                Ok(best) => best,
                Err(e) => return FrameOutcome::Failed(e),
            };
            if best.similarity <= self.config.match_threshold {
                continue;
            }
            match self.config.frame_policy {
                FramePolicy::FirstMatchWins => {
                    chosen = Some(best.similarity);
                    break;
                }
                FramePolicy::BestMatchWins => {
                    if chosen.map_or(true, |s| best.similarity > s) {
                        chosen = Some(best.similarity);
                    }
                }
            }
        }

        let Some(similarity) = chosen else {
            return FrameOutcome::NoMatch;
        };

        match self.sink.persist_frame(sequence, &sampled.frame) {
            Ok(artifact) => FrameOutcome::Event(MatchEvent {
                sequence,
                timestamp: sampled.timestamp(),
                similarity: Some(similarity),
                artifact,
                discovery_index: None,
                clip: None,
            }),
            Err(e) => FrameOutcome::Failed(e),
        }
    }

    fn discovery_step<S: FrameSource>(
        &mut self,
        sampled: &SampledFrame,
        sampler: &FrameSampler<S>,
        registry: &mut IdentityRegistry,
        sequence: usize,
        stats: &mut ScanStats,
    ) -> FrameOutcome {
        let faces = match self.embed_frame(sampled, ScanMode::Discovery, stats) {
            Ok(faces) if faces.is_empty() => return FrameOutcome::NoFaces,
            Ok(faces) => faces,
            Err(e) => return FrameOutcome::Failed(e),
        };

        let timestamp = sampled.timestamp();
        let mut outcome = FrameOutcome::Duplicate;

        for face in faces {
            let novelty = match registry.classify(&face.embedding, self.config.dedup_threshold) {
                Ok(novelty) => novelty,
                Err(e) => return FrameOutcome::Failed(e),
            };
            if let Novelty::Duplicate(best) = novelty {
                stats.duplicates += 1;
                debug!(
                    timestamp,
                    matched = best.index,
                    similarity = best.similarity,
                    "Face already cataloged"
                );
                continue;
            }

            let Some(window) = ClipWindow::around(
                timestamp,
                self.config.clip_half_window_seconds,
                sampler.duration(),
                self.config.min_clip_seconds,
            ) else {
                stats.short_windows += 1;
                outcome = FrameOutcome::ShortWindow;
                continue;
            };

            let index = registry.len();
            let artifact = match self.sink.persist_clip(
                index,
                sampler.source().path(),
                &window,
                &sampled.frame,
            ) {
                Ok(path) => path,
                Err(e) => return FrameOutcome::Failed(e),
            };

            let index = registry.register(face.embedding);
            return FrameOutcome::Event(MatchEvent {
                sequence,
                timestamp,
                similarity: novelty.similarity(),
                artifact,
                discovery_index: Some(index),
                clip: Some(window),
            });
        }

        outcome
    }
}

/// Fold a frame outcome into the running events and stats.
fn tally(
    mode: ScanMode,
    sampled: &SampledFrame,
    outcome: FrameOutcome,
    events: &mut Vec<MatchEvent>,
    stats: &mut ScanStats,
) {
    match outcome {
        FrameOutcome::Event(event) => {
            info!(
                mode = %mode,
                sequence = event.sequence,
                timestamp = event.timestamp,
                similarity = ?event.similarity,
                discovery_index = ?event.discovery_index,
                artifact = %event.artifact.display(),
                "Face match"
            );
            metrics::record_match_event(mode);
            stats.events += 1;
            events.push(event);
        }
        FrameOutcome::Failed(e) => {
            let reason = match &e {
                MediaError::ArtifactFailed { .. } => {
                    stats.artifact_failures += 1;
                    "artifact"
                }
                MediaError::InferenceFailed(_) => "inference",
                MediaError::FrameConversion(_) => "conversion",
                MediaError::Embedding(_) => "embedding",
                _ => "other",
            };
            stats.frames_failed += 1;
            metrics::record_frame_failed(mode, reason);
            warn!(
                mode = %mode,
                ordinal = sampled.ordinal,
                timestamp = sampled.timestamp(),
                reason,
                "Skipping frame: {}",
                e
            );
        }
        FrameOutcome::NoFaces
        | FrameOutcome::NoMatch
        | FrameOutcome::Duplicate
        | FrameOutcome::ShortWindow => {}
    }
}

fn finish(mode: ScanMode, started: Instant, stats: &ScanStats) {
    let elapsed = started.elapsed().as_secs_f64();
    metrics::record_scan_duration(mode, elapsed);
    log_scan_summary(mode, stats, elapsed);
}

/// Log a structured summary of a finished scan.
pub fn log_scan_summary(mode: ScanMode, stats: &ScanStats, elapsed_secs: f64) {
    info!(
        mode = %mode,
        frames_decoded = stats.frames_decoded,
        frames_sampled = stats.frames_sampled,
        frames_in_cooldown = stats.frames_in_cooldown,
        frames_failed = stats.frames_failed,
        faces_embedded = stats.faces_embedded,
        duplicates = stats.duplicates,
        short_windows = stats.short_windows,
        artifact_failures = stats.artifact_failures,
        events = stats.events,
        elapsed_secs = format!("{:.2}", elapsed_secs),
        "Scan finished"
    );
}
