//! Shared data models for facetrace.
//!
//! This crate provides:
//! - Normalized face embeddings and cosine similarity
//! - Face boxes and crop rectangles
//! - Scan configuration for targeted and discovery scans
//! - Match events, scan statistics and reports
//! - Render descriptors for the final highlight video

pub mod embedding;
pub mod encoding;
pub mod event;
pub mod face;
pub mod render;
pub mod scan;
pub mod timestamp;

// Re-export common types
pub use embedding::{best_similarity, similarity, BestMatch, EmbeddingError, EmbeddingVector};
pub use encoding::EncodingConfig;
pub use event::{ClipWindow, MatchEvent, ScanReport, ScanStats};
pub use face::{CropRect, FaceBox};
pub use render::{ClipDescriptor, Effect, RenderRequest, Transition};
pub use scan::{ConfigError, FramePolicy, ScanConfig, ScanId, ScanMode, WARMUP_FRAMES};
pub use timestamp::{format_label, format_seconds, parse_timestamp, TimestampError};
