//! Face scan worker.
//!
//! This crate provides:
//! - Environment configuration and exit codes
//! - Scan jobs running the engine on a blocking thread with timeout and shutdown
//! - Render jobs turning a scan manifest into a final video
//! - Structured scan logging

pub mod config;
pub mod error;
pub mod logging;
pub mod render_job;
pub mod scan_job;

pub use config::{EmbedderKind, WorkerConfig};
pub use error::{exit_code, WorkerError, WorkerResult};
pub use logging::ScanLogger;
pub use render_job::{load_manifest, render_request, run_render, RenderOptions};
pub use scan_job::{execute_scan, ScanJob, ScanJobResult, ScanRunner};
