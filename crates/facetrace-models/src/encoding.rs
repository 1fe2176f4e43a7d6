//! Output encoding settings for previews and final videos.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Default video codec (H.264)
pub const DEFAULT_VIDEO_CODEC: &str = "libx264";
/// Default audio codec
pub const DEFAULT_AUDIO_CODEC: &str = "aac";
/// Default encoding preset
pub const DEFAULT_PRESET: &str = "ultrafast";
/// Default video bitrate
pub const DEFAULT_VIDEO_BITRATE: &str = "5000k";
/// Default encoder thread count
pub const DEFAULT_THREADS: u32 = 4;

/// Discovery preview GIF settings
pub const PREVIEW_HEIGHT: u32 = 180;
pub const PREVIEW_FPS: u32 = 10;

/// Canvas every final-video clip is fitted onto
pub const RENDER_WIDTH: u32 = 1280;
pub const RENDER_HEIGHT: u32 = 720;
pub const RENDER_FPS: u32 = 30;

/// Video encoding configuration for the final render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EncodingConfig {
    /// Video codec (e.g., "libx264", "h264_nvenc")
    #[serde(default = "default_video_codec")]
    pub codec: String,

    /// Encoding preset (e.g., "ultrafast", "medium")
    #[serde(default = "default_preset")]
    pub preset: String,

    /// Target video bitrate
    #[serde(default = "default_video_bitrate")]
    pub video_bitrate: String,

    /// Audio codec
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,

    /// Encoder threads
    #[serde(default = "default_threads")]
    pub threads: u32,

    /// Output canvas width
    #[serde(default = "default_width")]
    pub width: u32,

    /// Output canvas height
    #[serde(default = "default_height")]
    pub height: u32,

    /// Output frame rate
    #[serde(default = "default_fps")]
    pub fps: u32,

    /// Additional FFmpeg output arguments
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_video_codec() -> String {
    DEFAULT_VIDEO_CODEC.to_string()
}
fn default_preset() -> String {
    DEFAULT_PRESET.to_string()
}
fn default_video_bitrate() -> String {
    DEFAULT_VIDEO_BITRATE.to_string()
}
fn default_audio_codec() -> String {
    DEFAULT_AUDIO_CODEC.to_string()
}
fn default_threads() -> u32 {
    DEFAULT_THREADS
}
fn default_width() -> u32 {
    RENDER_WIDTH
}
fn default_height() -> u32 {
    RENDER_HEIGHT
}
fn default_fps() -> u32 {
    RENDER_FPS
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            codec: DEFAULT_VIDEO_CODEC.to_string(),
            preset: DEFAULT_PRESET.to_string(),
            video_bitrate: DEFAULT_VIDEO_BITRATE.to_string(),
            audio_codec: DEFAULT_AUDIO_CODEC.to_string(),
            threads: DEFAULT_THREADS,
            width: RENDER_WIDTH,
            height: RENDER_HEIGHT,
            fps: RENDER_FPS,
            extra_args: Vec::new(),
        }
    }
}

impl EncodingConfig {
    /// Create a new encoding configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a new config with a different canvas size.
    pub fn with_canvas(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Video encoder arguments.
    pub fn video_args(&self) -> Vec<String> {
        let mut args = vec![
            "-c:v".to_string(),
            self.codec.clone(),
            "-preset".to_string(),
            self.preset.clone(),
            "-b:v".to_string(),
            self.video_bitrate.clone(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-threads".to_string(),
            self.threads.to_string(),
        ];
        args.extend(self.extra_args.clone());
        args
    }

    /// Audio encoder arguments.
    pub fn audio_args(&self) -> Vec<String> {
        vec!["-c:a".to_string(), self.audio_codec.clone()]
    }
}
