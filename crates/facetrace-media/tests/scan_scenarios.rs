//! End-to-end scans over scripted videos.

mod common;

use tokio::sync::watch;

use common::{
    at_similarity, reference, ColumnDetector, Persisted, RecordingSink, ScriptedVideo,
    TableEmbedder,
};
use facetrace_media::{
    DirectorySink, FaceAnalyzer, MatchScanner, MediaError, ReferenceSet, MANIFEST_FILE,
};
use facetrace_models::{ClipWindow, FramePolicy, ScanConfig, ScanId, ScanMode, ScanReport};

type Scanner<K> = MatchScanner<ColumnDetector, TableEmbedder, K>;

fn scanner(embedder: TableEmbedder, config: ScanConfig) -> Scanner<RecordingSink> {
    MatchScanner::new(
        FaceAnalyzer::new(ColumnDetector, embedder),
        RecordingSink::default(),
        config,
    )
    .unwrap()
}

fn references() -> ReferenceSet {
    ReferenceSet::from_embeddings(vec![reference()]).unwrap()
}

fn approx(a: f32, b: f32) -> bool {
    (a - b).abs() < 1e-4
}

#[test]
fn test_targeted_reports_only_the_frame_above_threshold() {
    let video = ScriptedVideo::new(
        vec![(0.0, vec![]), (0.5, vec![1]), (1.0, vec![]), (3.2, vec![2])],
        4.0,
    );
    let embedder = TableEmbedder::new([(1, at_similarity(0.85)), (2, at_similarity(0.4))]);
    let mut scanner = scanner(embedder, ScanConfig::targeted());

    let outcome = scanner.scan_targeted(video, &references()).unwrap();

    assert_eq!(outcome.events.len(), 1);
    let event = &outcome.events[0];
    assert_eq!(event.timestamp, 0.5);
    assert_eq!(event.sequence, 0);
    assert!(approx(event.similarity.unwrap(), 0.85));
    assert_eq!(event.discovery_index, None);
    assert_eq!(event.artifact.to_string_lossy(), "match_0.jpg");

    assert_eq!(outcome.stats.frames_sampled, 4);
    assert_eq!(outcome.stats.faces_embedded, 2);
    assert_eq!(outcome.stats.events, 1);
    assert!(outcome.registry.is_empty());
}

#[test]
fn test_targeted_without_matches_is_an_empty_result() {
    let video = ScriptedVideo::uniform(20, 10.0, |_| vec![1]);
    let embedder = TableEmbedder::new([(1, at_similarity(0.4))]);
    let mut scanner = scanner(embedder, ScanConfig::targeted());

    let outcome = scanner.scan_targeted(video, &references()).unwrap();
    assert!(outcome.events.is_empty());
    assert_eq!(outcome.stats.frames_sampled, 20);
    assert_eq!(outcome.stats.frames_failed, 0);
    assert!(scanner.sink().calls.is_empty());
}

#[test]
fn test_targeted_threshold_is_strict() {
    let video = ScriptedVideo::new(vec![(0.0, vec![1])], 1.0);
    let embedder = TableEmbedder::new([(1, vec![1.0, 0.0])]);
    let mut config = ScanConfig::targeted();
    config.match_threshold = 1.0;
    let mut scanner = scanner(embedder, config);

    let outcome = scanner.scan_targeted(video, &references()).unwrap();
    assert!(outcome.events.is_empty());
}

#[test]
fn test_targeted_frame_policy() {
    let frames = || ScriptedVideo::new(vec![(0.2, vec![1, 2])], 1.0);
    let embedder = || TableEmbedder::new([(1, at_similarity(0.75)), (2, at_similarity(0.95))]);

    let mut first = scanner(embedder(), ScanConfig::targeted());
    let outcome = first.scan_targeted(frames(), &references()).unwrap();
    assert_eq!(outcome.events.len(), 1);
    assert!(approx(outcome.events[0].similarity.unwrap(), 0.75));

    let mut config = ScanConfig::targeted();
    config.frame_policy = FramePolicy::BestMatchWins;
    let mut best = scanner(embedder(), config);
    let outcome = best.scan_targeted(frames(), &references()).unwrap();
    assert_eq!(outcome.events.len(), 1);
    assert!(approx(outcome.events[0].similarity.unwrap(), 0.95));
}

#[test]
fn test_targeted_stride_and_warmup() {
    let video = ScriptedVideo::uniform(30, 10.0, |_| vec![1]);
    let embedder = TableEmbedder::new([(1, at_similarity(0.85))]);
    let config = ScanConfig::targeted().with_stride(5).with_warmup(true);
    let mut scanner = scanner(embedder, config);

    let outcome = scanner.scan_targeted(video, &references()).unwrap();
    let timestamps: Vec<f64> = outcome.events.iter().map(|e| e.timestamp).collect();
    assert_eq!(timestamps, vec![1.0, 1.5, 2.0, 2.5]);
    let sequences: Vec<usize> = outcome.events.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, vec![0, 1, 2, 3]);
    assert_eq!(outcome.stats.frames_decoded, 30);
    assert_eq!(outcome.stats.frames_sampled, 4);
}

#[test]
fn test_targeted_inference_failure_skips_the_frame() {
    // Identity 9 is unknown to the embedder
    let video = ScriptedVideo::new(vec![(0.1, vec![9]), (0.2, vec![1])], 1.0);
    let embedder = TableEmbedder::new([(1, at_similarity(0.85))]);
    let mut scanner = scanner(embedder, ScanConfig::targeted());

    let outcome = scanner.scan_targeted(video, &references()).unwrap();
    assert_eq!(outcome.stats.frames_failed, 1);
    assert_eq!(outcome.events.len(), 1);
    assert_eq!(outcome.events[0].timestamp, 0.2);
}

#[test]
fn test_targeted_artifact_failure_is_counted_and_skipped() {
    let video = ScriptedVideo::new(vec![(0.5, vec![1]), (0.6, vec![1])], 1.0);
    let embedder = TableEmbedder::new([(1, at_similarity(0.85))]);
    let sink = RecordingSink {
        fail_at: vec![0.5],
        ..Default::default()
    };
    let mut scanner = MatchScanner::new(
        FaceAnalyzer::new(ColumnDetector, embedder),
        sink,
        ScanConfig::targeted(),
    )
    .unwrap();

    let outcome = scanner.scan_targeted(video, &references()).unwrap();
    assert_eq!(outcome.stats.artifact_failures, 1);
    assert_eq!(outcome.stats.frames_failed, 1);
    assert_eq!(outcome.events.len(), 1);
    assert_eq!(outcome.events[0].timestamp, 0.6);
    assert_eq!(outcome.events[0].sequence, 0);
}

#[test]
fn test_discovery_same_identity_is_cataloged_once() {
    // Sightings at 2.5 s and 4.0 s are the same person at similarity 0.9
    let video = ScriptedVideo::new(vec![(1.0, vec![1]), (2.5, vec![2]), (4.0, vec![2])], 6.0);
    let embedder = TableEmbedder::new([(1, vec![1.0, 0.0]), (2, at_similarity(0.9))]);
    let mut scanner = scanner(embedder, ScanConfig::discovery());

    let outcome = scanner.scan_discovery(video).unwrap();

    assert_eq!(outcome.registry.len(), 1);
    assert_eq!(outcome.events.len(), 1);
    let event = &outcome.events[0];
    assert_eq!(event.timestamp, 1.0);
    assert_eq!(event.discovery_index, Some(0));
    assert_eq!(event.similarity, None);
    assert_eq!(event.clip, Some(ClipWindow { start: 0.75, end: 1.25 }));

    assert_eq!(outcome.stats.frames_in_cooldown, 1);
    assert_eq!(outcome.stats.duplicates, 1);
}

#[test]
fn test_discovery_catalogs_distinct_faces_in_order() {
    let video = ScriptedVideo::new(vec![(1.0, vec![1]), (3.5, vec![2])], 6.0);
    let embedder = TableEmbedder::new([(1, vec![1.0, 0.0]), (2, vec![0.0, 1.0])]);
    let mut scanner = scanner(embedder, ScanConfig::discovery());

    let outcome = scanner.scan_discovery(video).unwrap();

    assert_eq!(outcome.registry.len(), 2);
    let indices: Vec<Option<usize>> = outcome.events.iter().map(|e| e.discovery_index).collect();
    assert_eq!(indices, vec![Some(0), Some(1)]);
    assert!(approx(outcome.events[1].similarity.unwrap(), 0.0));
    assert_eq!(
        scanner.sink().calls,
        vec![
            Persisted::Clip {
                index: 0,
                window: ClipWindow { start: 0.75, end: 1.25 }
            },
            Persisted::Clip {
                index: 1,
                window: ClipWindow { start: 3.25, end: 3.75 }
            },
        ]
    );
}

#[test]
fn test_discovery_duplicates_do_not_restart_cooldown() {
    let video = ScriptedVideo::new(
        vec![(1.0, vec![1]), (3.1, vec![1]), (3.5, vec![2])],
        6.0,
    );
    let embedder = TableEmbedder::new([(1, vec![1.0, 0.0]), (2, vec![0.0, 1.0])]);
    let mut scanner = scanner(embedder, ScanConfig::discovery());

    let outcome = scanner.scan_discovery(video).unwrap();
    let timestamps: Vec<f64> = outcome.events.iter().map(|e| e.timestamp).collect();
    assert_eq!(timestamps, vec![1.0, 3.5]);
}

#[test]
fn test_discovery_short_window_is_not_registered() {
    let video = ScriptedVideo::new(vec![(0.0, vec![1]), (0.5, vec![1])], 6.0);
    let embedder = TableEmbedder::new([(1, vec![1.0, 0.0])]);
    let mut scanner = scanner(embedder, ScanConfig::discovery());

    let outcome = scanner.scan_discovery(video).unwrap();
    assert_eq!(outcome.stats.short_windows, 1);
    assert_eq!(outcome.events.len(), 1);
    assert_eq!(outcome.events[0].timestamp, 0.5);
    assert_eq!(outcome.events[0].discovery_index, Some(0));
    assert_eq!(outcome.events[0].clip, Some(ClipWindow { start: 0.25, end: 0.75 }));
}

#[test]
fn test_discovery_window_clamped_at_video_end() {
    let video = ScriptedVideo::new(vec![(5.9, vec![1])], 6.0);
    let embedder = TableEmbedder::new([(1, vec![1.0, 0.0])]);
    let mut scanner = scanner(embedder, ScanConfig::discovery());

    let outcome = scanner.scan_discovery(video).unwrap();
    assert!(outcome.events.is_empty());
    assert!(outcome.registry.is_empty());
    assert_eq!(outcome.stats.short_windows, 1);
}

#[test]
fn test_discovery_faces_per_frame_limit() {
    let frames = || ScriptedVideo::new(vec![(1.0, vec![1]), (3.5, vec![1, 2])], 6.0);
    let embedder = || TableEmbedder::new([(1, vec![1.0, 0.0]), (2, vec![0.0, 1.0])]);

    let mut limited = scanner(embedder(), ScanConfig::discovery());
    assert_eq!(limited.scan_discovery(frames()).unwrap().registry.len(), 1);

    let mut config = ScanConfig::discovery();
    config.max_faces_per_frame = None;
    let mut unlimited = scanner(embedder(), config);
    let outcome = unlimited.scan_discovery(frames()).unwrap();
    assert_eq!(outcome.registry.len(), 2);
    assert_eq!(outcome.events[1].timestamp, 3.5);
}

#[test]
fn test_cancelled_scan_stops() {
    let (tx, rx) = watch::channel(false);
    tx.send(true).unwrap();

    let video = ScriptedVideo::uniform(10, 10.0, |_| vec![1]);
    let embedder = TableEmbedder::new([(1, at_similarity(0.85))]);
    let mut scanner = scanner(embedder, ScanConfig::targeted()).with_cancel(rx);

    let err = scanner.scan_targeted(video, &references()).unwrap_err();
    assert!(matches!(err, MediaError::Cancelled));
    assert!(scanner.sink().calls.is_empty());
}

#[test]
fn test_invalid_config_is_rejected_up_front() {
    let err = MatchScanner::new(
        FaceAnalyzer::new(ColumnDetector, TableEmbedder::new([])),
        RecordingSink::default(),
        ScanConfig::targeted().with_stride(0),
    )
    .err()
    .unwrap();
    assert!(matches!(err, MediaError::InvalidConfig(_)));
    assert!(err.is_input_rejection());
}

#[test]
fn test_discovery_writes_previews_and_manifest_to_disk() {
    let dir = tempfile::tempdir().unwrap();
    let scan_id = ScanId::new();
    let sink = DirectorySink::namespaced(dir.path(), &scan_id).unwrap();
    let root = sink.root().to_path_buf();

    let video = ScriptedVideo::new(vec![(1.0, vec![1]), (3.5, vec![2])], 6.0);
    let embedder = TableEmbedder::new([(1, vec![1.0, 0.0]), (2, vec![0.0, 1.0])]);
    let config = ScanConfig::discovery();
    let analyzer = FaceAnalyzer::new(ColumnDetector, embedder);
    let mut scanner = MatchScanner::new(analyzer, sink, config.clone()).unwrap();

    let started_at = chrono::Utc::now();
    let outcome = scanner.scan_discovery(video).unwrap();
    for event in &outcome.events {
        assert!(event.artifact.starts_with(&root));
        assert!(event.artifact.is_file());
    }

    let report = ScanReport {
        scan_id,
        mode: ScanMode::Discovery,
        video: "scripted.mp4".into(),
        config,
        events: outcome.events,
        stats: outcome.stats,
        started_at,
        finished_at: chrono::Utc::now(),
    };
    let manifest = scanner.sink().write_manifest(&report).unwrap();
    assert_eq!(manifest, root.join(MANIFEST_FILE));

    let parsed: ScanReport = serde_json::from_slice(&std::fs::read(&manifest).unwrap()).unwrap();
    assert_eq!(parsed.events.len(), 2);
    assert_eq!(parsed.stats.events, 2);
}
