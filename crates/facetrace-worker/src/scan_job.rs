//! Scan job orchestration.
//!
//! A job resolves its video (downloading URLs into the work directory),
//! then runs the whole scan on a blocking thread: models are loaded,
//! references embedded and frames decoded there, never on the runtime.
//! Results land in `<output_dir>/<scan_id>/` next to a `manifest.json`.

use chrono::Utc;
use metrics::counter;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use facetrace_media::{
    build_reference_set, download_path, download_video, is_url, load_reference_images, open_source,
    DirectorySink, FaceAnalyzer, FaceDetector, FaceEmbedder, FrameSource, MatchScanner, MediaResult,
    ScanOutcome,
};
use facetrace_models::{ScanConfig, ScanId, ScanMode, ScanReport};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::ScanLogger;

const SCANS_TOTAL: &str = "facetrace_scans_total";

/// How long a stopped scan may take to notice its cancellation signal.
const DEFAULT_CANCEL_GRACE: Duration = Duration::from_secs(2);

/// Detector and embedder chosen at runtime.
pub type BoxedAnalyzer = FaceAnalyzer<Box<dyn FaceDetector>, Box<dyn FaceEmbedder>>;

/// One scan request.
#[derive(Debug, Clone)]
pub struct ScanJob {
    pub scan_id: ScanId,
    pub mode: ScanMode,
    /// Local path or URL
    pub video: String,
    /// Reference images (targeted only)
    pub references: Vec<PathBuf>,
    pub config: ScanConfig,
}

impl ScanJob {
    pub fn targeted(
        video: impl Into<String>,
        references: Vec<PathBuf>,
        config: ScanConfig,
    ) -> Self {
        Self {
            scan_id: ScanId::new(),
            mode: ScanMode::Targeted,
            video: video.into(),
            references,
            config,
        }
    }

    pub fn discovery(video: impl Into<String>, config: ScanConfig) -> Self {
        Self {
            scan_id: ScanId::new(),
            mode: ScanMode::Discovery,
            video: video.into(),
            references: Vec::new(),
            config,
        }
    }

    /// Reject malformed jobs before any download or model load.
    pub fn validate(&self) -> WorkerResult<()> {
        self.config.validate().map_err(facetrace_media::MediaError::from)?;
        if self.video.trim().is_empty() {
            return Err(WorkerError::invalid_input("no video given"));
        }
        if self.mode == ScanMode::Targeted && self.references.is_empty() {
            return Err(WorkerError::invalid_input(
                "targeted scans need at least one reference image",
            ));
        }
        Ok(())
    }
}

/// Finished scan: the report and where it was written.
#[derive(Debug, Clone)]
pub struct ScanJobResult {
    pub report: ScanReport,
    pub artifact_dir: PathBuf,
    pub manifest: PathBuf,
}

/// Runs scan jobs with the worker's models, timeout and shutdown signal.
pub struct ScanRunner {
    config: WorkerConfig,
    shutdown_rx: watch::Receiver<bool>,
    cancel_grace: Duration,
}

impl ScanRunner {
    pub fn new(config: WorkerConfig, shutdown_rx: watch::Receiver<bool>) -> Self {
        Self {
            config,
            shutdown_rx,
            cancel_grace: DEFAULT_CANCEL_GRACE,
        }
    }

    /// Set how long to wait for a stopped scan before detaching it.
    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Run a job end to end.
    pub async fn run(&self, job: ScanJob) -> WorkerResult<ScanJobResult> {
        let logger = ScanLogger::new(&job.scan_id, job.mode.as_str());
        let mode = job.mode;
        job.validate()?;
        logger.log_start(&job.video);

        let video = self.resolve_video(&job.video).await?;
        logger.log_progress(&format!("video ready at {}", video.display()));

        let worker_config = self.config.clone();
        let span = logger.create_span();
        let result = self
            .run_blocking(move |cancel_rx| {
                let _entered = span.enter();
                let analyzer = build_analyzer(&worker_config)?;
                execute_scan(
                    analyzer,
                    || open_source(&video),
                    &video,
                    &job,
                    &worker_config.output_dir,
                    cancel_rx,
                )
            })
            .await;

        match &result {
            Ok(done) => logger.log_completion(&format!(
                "{} events, manifest at {}",
                done.report.events.len(),
                done.manifest.display()
            )),
            Err(e) => logger.log_error(&e.to_string()),
        }
        let outcome = match &result {
            Ok(_) => "completed",
            Err(e) if e.is_cancelled() => "cancelled",
            Err(_) => "failed",
        };
        counter!(SCANS_TOTAL, "mode" => mode.as_str(), "outcome" => outcome).increment(1);
        result
    }

    /// Local path for `input`, downloading it first when it is a URL.
    pub async fn resolve_video(&self, input: &str) -> WorkerResult<PathBuf> {
        if is_url(input) {
            let target = download_path(&self.config.work_dir);
            download_video(input, &target).await?;
            return Ok(target);
        }
        let path = PathBuf::from(input);
        if !path.is_file() {
            return Err(facetrace_media::MediaError::source_unavailable(format!(
                "{} does not exist",
                path.display()
            ))
            .into());
        }
        Ok(path)
    }

    /// Run `work` on a blocking thread, stopping it on timeout or shutdown.
    ///
    /// `work` receives a cancellation signal it must poll; it is flipped
    /// before this returns `Timeout` or `Cancelled`. Work that does not stop
    /// within the cancel grace period is left running detached.
    pub async fn run_blocking<T, F>(&self, work: F) -> WorkerResult<T>
    where
        T: Send + 'static,
        F: FnOnce(watch::Receiver<bool>) -> WorkerResult<T> + Send + 'static,
    {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let mut handle = tokio::task::spawn_blocking(move || work(cancel_rx));

        let timeout = self.config.scan_timeout;
        let deadline = sleep_or_forever(timeout);
        tokio::pin!(deadline);
        let mut shutdown_rx = self.shutdown_rx.clone();

        let stopped = tokio::select! {
            joined = &mut handle => {
                return joined.map_err(|e| {
                    WorkerError::scan_failed(format!("scan task panicked: {}", e))
                })?;
            }
            _ = &mut deadline => WorkerError::Timeout(timeout.unwrap_or_default()),
            _ = wait_for_shutdown(&mut shutdown_rx) => WorkerError::Cancelled,
        };

        debug!("Stopping scan: {}", stopped);
        let _ = cancel_tx.send(true);
        // The scan polls the signal once per sampled frame
        if tokio::time::timeout(self.cancel_grace, handle).await.is_err() {
            warn!(
                "Scan did not stop within {:?}; leaving it to finish in the background",
                self.cancel_grace
            );
        }
        Err(stopped)
    }
}

fn sleep_or_forever(timeout: Option<Duration>) -> impl Future<Output = ()> {
    async move {
        match timeout {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending().await,
        }
    }
}

async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Run one scan synchronously with the given analyzer.
///
/// Reference images are embedded before `open_source` is called, so a
/// rejected reference set never pays for probing the video. Writes
/// artifacts and the manifest under `output_root/<scan_id>/`.
pub fn execute_scan<D, E, S, O>(
    mut analyzer: FaceAnalyzer<D, E>,
    open_source: O,
    video: &Path,
    job: &ScanJob,
    output_root: &Path,
    cancel_rx: watch::Receiver<bool>,
) -> WorkerResult<ScanJobResult>
where
    D: FaceDetector,
    E: FaceEmbedder,
    S: FrameSource,
    O: FnOnce() -> MediaResult<S>,
{
    let started_at = Utc::now();
    let references = match job.mode {
        ScanMode::Targeted => {
            let images = load_reference_images(&job.references)?;
            Some(build_reference_set(&mut analyzer, &images)?)
        }
        ScanMode::Discovery => None,
    };

    let source = open_source()?;
    let sink = DirectorySink::namespaced(output_root, &job.scan_id)?;
    let mut scanner =
        MatchScanner::new(analyzer, sink, job.config.clone())?.with_cancel(cancel_rx);

    let outcome: ScanOutcome = match &references {
        Some(references) => scanner.scan_targeted(source, references)?,
        None => scanner.scan_discovery(source)?,
    };

    let report = ScanReport {
        scan_id: job.scan_id.clone(),
        mode: job.mode,
        video: video.to_path_buf(),
        config: job.config.clone(),
        events: outcome.events,
        stats: outcome.stats,
        started_at,
        finished_at: Utc::now(),
    };
    let manifest = scanner.sink().write_manifest(&report)?;
    let artifact_dir = scanner.sink().root().to_path_buf();

    info!(
        scan_id = %job.scan_id,
        mode = %job.mode,
        events = report.events.len(),
        identities = outcome.registry.len(),
        "Scan written"
    );

    Ok(ScanJobResult {
        report,
        artifact_dir,
        manifest,
    })
}

/// Load the detector and embedder named by the configuration.
#[cfg(all(feature = "opencv", feature = "onnx"))]
pub fn build_analyzer(config: &WorkerConfig) -> WorkerResult<BoxedAnalyzer> {
    use crate::config::EmbedderKind;
    use facetrace_media::{OnnxEmbedder, OnnxEmbedderConfig, YuNetDetector};

    let detector = match &config.detector_model {
        Some(path) => YuNetDetector::from_model(path)?,
        None => YuNetDetector::discover()?,
    };

    let model = config
        .embedder_model
        .clone()
        .ok_or_else(|| WorkerError::config_error("FACETRACE_EMBEDDER_MODEL is not set"))?;
    let mut embedder_config = match config.embedder_kind {
        EmbedderKind::FaceNet => OnnxEmbedderConfig::facenet(model),
        EmbedderKind::ArcFace => OnnxEmbedderConfig::arcface(model),
    };
    if let Some(size) = config.embedder_input {
        embedder_config = embedder_config.with_input_size(size);
    }
    let embedder = OnnxEmbedder::load(embedder_config)?;

    Ok(FaceAnalyzer::new(Box::new(detector), Box::new(embedder)))
}

/// Load the detector and embedder named by the configuration.
#[cfg(not(all(feature = "opencv", feature = "onnx")))]
pub fn build_analyzer(_config: &WorkerConfig) -> WorkerResult<BoxedAnalyzer> {
    Err(WorkerError::config_error(
        "built without face models; enable the `opencv` and `onnx` features",
    ))
}
