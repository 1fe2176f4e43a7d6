//! Worker configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use facetrace_models::{ScanConfig, ScanMode};

/// Embedding model family, which fixes input size and normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmbedderKind {
    /// 160x160, `(x - 127.5) / 128`
    #[default]
    FaceNet,
    /// 112x112, `(x - 127.5) / 127.5`
    ArcFace,
}

impl FromStr for EmbedderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "facenet" => Ok(EmbedderKind::FaceNet),
            "arcface" | "sface" => Ok(EmbedderKind::ArcFace),
            other => Err(format!("unknown embedder kind '{}'", other)),
        }
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Work directory for downloads and temporary files
    pub work_dir: PathBuf,
    /// Root for scan artifact directories and final videos
    pub output_dir: PathBuf,
    /// YuNet model; searched in the usual locations when unset
    pub detector_model: Option<PathBuf>,
    /// ONNX embedding model
    pub embedder_model: Option<PathBuf>,
    pub embedder_kind: EmbedderKind,
    /// Overrides the input edge implied by `embedder_kind`
    pub embedder_input: Option<u32>,
    pub match_threshold: Option<f32>,
    pub dedup_threshold: Option<f32>,
    pub cooldown_secs: Option<f64>,
    /// Wall-clock limit for one scan
    pub scan_timeout: Option<Duration>,
    /// Serve Prometheus metrics on this address when set
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("/tmp/facetrace"),
            output_dir: PathBuf::from("./facetrace-output"),
            detector_model: None,
            embedder_model: None,
            embedder_kind: EmbedderKind::FaceNet,
            embedder_input: None,
            match_threshold: None,
            dedup_threshold: None,
            cooldown_secs: None,
            scan_timeout: None,
            metrics_addr: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from any key lookup; unparsable values fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
            lookup(key).and_then(|s| s.trim().parse().ok())
        }
        let defaults = Self::default();

        Self {
            work_dir: lookup("FACETRACE_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            output_dir: lookup("FACETRACE_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            detector_model: lookup("FACETRACE_DETECTOR_MODEL").map(PathBuf::from),
            embedder_model: lookup("FACETRACE_EMBEDDER_MODEL").map(PathBuf::from),
            embedder_kind: parse_var(&lookup, "FACETRACE_EMBEDDER_KIND").unwrap_or_default(),
            embedder_input: parse_var(&lookup, "FACETRACE_EMBEDDER_INPUT")
                .filter(|&size: &u32| size > 0),
            match_threshold: parse_var(&lookup, "FACETRACE_MATCH_THRESHOLD"),
            dedup_threshold: parse_var(&lookup, "FACETRACE_DEDUP_THRESHOLD"),
            cooldown_secs: parse_var(&lookup, "FACETRACE_COOLDOWN_SECS"),
            scan_timeout: parse_var(&lookup, "FACETRACE_SCAN_TIMEOUT_SECS")
                .filter(|&secs: &u64| secs > 0)
                .map(Duration::from_secs),
            metrics_addr: parse_var(&lookup, "FACETRACE_METRICS_ADDR"),
        }
    }

    /// Mode preset with the environment overrides applied.
    pub fn scan_config(&self, mode: ScanMode) -> ScanConfig {
        let mut config = match mode {
            ScanMode::Targeted => ScanConfig::targeted(),
            ScanMode::Discovery => ScanConfig::discovery(),
        };
        if let Some(threshold) = self.match_threshold {
            config.match_threshold = threshold;
        }
        if let Some(threshold) = self.dedup_threshold {
            config.dedup_threshold = threshold;
        }
        if let Some(cooldown) = self.cooldown_secs {
            config.cooldown_seconds = cooldown;
        }
        config
    }
}
