#![deny(unreachable_patterns)]
//! Face matching engine over video.
//!
//! This crate provides:
//! - Frame sources (FFmpeg pipe, OpenCV capture) with native timestamps
//! - Stride / warm-up / cooldown sampling
//! - Detector and embedder adapters (YuNet, ONNX) behind traits
//! - Targeted and discovery scans with artifact persistence
//! - Type-safe FFmpeg command building, probing and final video rendering

pub mod artifacts;
pub mod command;
pub mod detection;
pub mod download;
pub mod error;
pub mod metrics;
pub mod probe;
pub mod progress;
pub mod reference;
pub mod registry;
pub mod render;
pub mod sampler;
pub mod scanner;
pub mod source;

pub use artifacts::{ArtifactSink, DirectorySink, MANIFEST_FILE};
pub use command::{check_ffmpeg, check_ffprobe, check_ytdlp, FfmpegCommand, FfmpegRunner};
pub use detection::{DetectedFace, FaceAnalyzer, FaceDetector, FaceEmbedder};
pub use download::{download_path, download_video, is_url};
pub use error::{MediaError, MediaResult};
pub use probe::{probe_video, probe_video_blocking, VideoInfo};
pub use progress::{FfmpegProgress, ProgressCallback};
pub use reference::{build_reference_set, load_reference_images, ReferenceImage, ReferenceSet};
pub use registry::{IdentityRegistry, Novelty};
pub use render::{FinalRenderer, PreparedClip};
pub use sampler::{FrameSampler, SampledFrame, SamplerState};
pub use scanner::{FrameOutcome, MatchScanner, ScanOutcome};
pub use source::{open_source, FfmpegFrameSource, Frame, FrameSource};

#[cfg(feature = "opencv")]
pub use detection::YuNetDetector;
#[cfg(feature = "opencv")]
pub use source::OpenCvFrameSource;

#[cfg(feature = "onnx")]
pub use detection::{OnnxEmbedder, OnnxEmbedderConfig, TensorLayout};
