//! Worker error types.

use std::time::Duration;
use thiserror::Error;

use facetrace_media::MediaError;

pub type WorkerResult<T> = Result<T, WorkerError>;

/// Process exit codes.
pub mod exit_code {
    /// The command ran to completion (possibly with zero matches)
    pub const COMPLETED: u8 = 0;
    /// The command started but failed
    pub const FAILED: u8 = 1;
    /// Inputs or configuration were rejected before any work started
    pub const REJECTED: u8 = 2;
    /// Stopped by a shutdown signal
    pub const CANCELLED: u8 = 130;
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Scan failed: {0}")]
    ScanFailed(String),

    #[error("Scan timed out after {0:?}")]
    Timeout(Duration),

    #[error("Cancelled")]
    Cancelled,

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Manifest error: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn scan_failed(msg: impl Into<String>) -> Self {
        Self::ScanFailed(msg.into())
    }

    /// Whether the request was rejected before any work began.
    pub fn is_input_rejection(&self) -> bool {
        match self {
            WorkerError::ConfigError(_)
            | WorkerError::InvalidInput(_)
            | WorkerError::Manifest(_) => true,
            WorkerError::Media(e) => e.is_input_rejection(),
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, WorkerError::Cancelled | WorkerError::Media(MediaError::Cancelled))
    }

    /// Exit code the binary reports for this error.
    pub fn exit_code(&self) -> u8 {
        if self.is_cancelled() {
            exit_code::CANCELLED
        } else if self.is_input_rejection() {
            exit_code::REJECTED
        } else {
            exit_code::FAILED
        }
    }
}
