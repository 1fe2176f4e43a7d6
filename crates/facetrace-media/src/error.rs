//! Error types for scanning and media operations.
//!
//! Errors fall into three groups:
//! - input rejections, which stop a request before any scanning happens
//! - per-frame failures, which the scanner counts and skips
//! - tool and I/O failures from FFmpeg, yt-dlp and the filesystem

use std::path::PathBuf;
use thiserror::Error;

use facetrace_models::{ConfigError, EmbeddingError};

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while scanning or rendering.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Video source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Face inference failed: {0}")]
    InferenceFailed(String),

    #[error("No valid faces in reference images")]
    NoFacesFound,

    #[error("Reference set is empty")]
    EmptyReferenceSet,

    #[error("Unreadable reference image {path}: {message}")]
    UnreadableImage { path: PathBuf, message: String },

    #[error("Reference image {path} rejected: {message}")]
    ReferenceRejected { path: PathBuf, message: String },

    #[error("Invalid scan configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Frame conversion failed: {0}")]
    FrameConversion(String),

    #[error("Failed to write artifact {path}: {message}")]
    ArtifactFailed { path: PathBuf, message: String },

    #[error("Nothing to render: {0}")]
    NothingToRender(String),

    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("yt-dlp not found in PATH")]
    YtDlpNotFound,

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("FFprobe command failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("Download failed: {message}")]
    DownloadFailed { message: String },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaError {
    /// Create a source-unavailable error.
    pub fn source_unavailable(message: impl Into<String>) -> Self {
        Self::SourceUnavailable(message.into())
    }

    /// Create an inference failure error.
    pub fn inference_failed(message: impl Into<String>) -> Self {
        Self::InferenceFailed(message.into())
    }

    /// Create a frame conversion error.
    pub fn frame_conversion(message: impl Into<String>) -> Self {
        Self::FrameConversion(message.into())
    }

    /// Create an artifact write error.
    pub fn artifact_failed(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::ArtifactFailed {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// Create a download failure error.
    pub fn download_failed(message: impl Into<String>) -> Self {
        Self::DownloadFailed {
            message: message.into(),
        }
    }

    /// Create a model not found error.
    pub fn model_not_found(path: impl Into<String>) -> Self {
        Self::ModelNotFound(path.into())
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Errors caused by the request itself; the scan never starts.
    pub fn is_input_rejection(&self) -> bool {
        matches!(
            self,
            MediaError::SourceUnavailable(_)
                | MediaError::NoFacesFound
                | MediaError::EmptyReferenceSet
                | MediaError::UnreadableImage { .. }
                | MediaError::ReferenceRejected { .. }
                | MediaError::InvalidConfig(_)
                | MediaError::FileNotFound(_)
                | MediaError::DownloadFailed { .. }
        )
    }

    /// Errors that only cost the current frame; the scan continues.
    pub fn is_frame_recoverable(&self) -> bool {
        matches!(
            self,
            MediaError::InferenceFailed(_)
                | MediaError::FrameConversion(_)
                | MediaError::ArtifactFailed { .. }
                | MediaError::Embedding(_)
        )
    }
}
