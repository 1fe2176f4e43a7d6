//! Persisting match artifacts.
//!
//! Targeted scans write the full matching frame as `match_<n>.jpg`.
//! Discovery scans write a short `preview_<idx>_<random>.gif` cut from the
//! source around the sighting.

use image::codecs::gif::GifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{ColorType, DynamicImage};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

use facetrace_models::encoding::{PREVIEW_FPS, PREVIEW_HEIGHT};
use facetrace_models::{ClipWindow, ScanId, ScanReport};

use crate::command::FfmpegCommand;
use crate::error::{MediaError, MediaResult};
use crate::source::Frame;

/// File name of the scan manifest.
pub const MANIFEST_FILE: &str = "manifest.json";

const JPEG_QUALITY: u8 = 90;

/// Destination for scan artifacts.
pub trait ArtifactSink {
    /// Persist the full frame of the `sequence`-th targeted match.
    fn persist_frame(&mut self, sequence: usize, frame: &Frame) -> MediaResult<PathBuf>;

    /// Persist a preview of `window` for the discovery at `index`.
    ///
    /// `source` is the video file when known; without it only `frame` is
    /// available.
    fn persist_clip(
        &mut self,
        index: usize,
        source: Option<&Path>,
        window: &ClipWindow,
        frame: &Frame,
    ) -> MediaResult<PathBuf>;
}

/// Writes artifacts into a directory on disk.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    root: PathBuf,
}

impl DirectorySink {
    /// Use `root` directly, creating it if needed.
    pub fn new(root: impl Into<PathBuf>) -> MediaResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| MediaError::artifact_failed(&root, e))?;
        Ok(Self { root })
    }

    /// One sub-directory per scan under `base`, so concurrent scans never collide.
    pub fn namespaced(base: impl AsRef<Path>, scan_id: &ScanId) -> MediaResult<Self> {
        Self::new(base.as_ref().join(scan_id.as_str()))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write the scan report as `manifest.json`.
    pub fn write_manifest(&self, report: &ScanReport) -> MediaResult<PathBuf> {
        let path = self.root.join(MANIFEST_FILE);
        let file = File::create(&path).map_err(|e| MediaError::artifact_failed(&path, e))?;
        write_report(file, report, &path)?;
        info!(path = %path.display(), events = report.events.len(), "Wrote scan manifest");
        Ok(path)
    }

    fn write_jpeg(&self, path: &Path, frame: &Frame) -> MediaResult<()> {
        let file = File::create(path).map_err(|e| MediaError::artifact_failed(path, e))?;
        let mut writer = BufWriter::new(file);
        let (w, h) = frame.image.dimensions();
        JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY)
            .encode(frame.image.as_raw(), w, h, ColorType::Rgb8)
            .map_err(|e| MediaError::artifact_failed(path, e))?;
        writer.flush().map_err(|e| MediaError::artifact_failed(path, e))
    }

    /// Single-frame GIF used when the source file is not available.
    fn write_still_gif(&self, path: &Path, frame: &Frame) -> MediaResult<()> {
        let (w, h) = frame.image.dimensions();
        let target_h = PREVIEW_HEIGHT.min(h).max(1);
        let target_w = ((w as f64 * target_h as f64 / h.max(1) as f64).round() as u32).max(1);
        let small = imageops::resize(&frame.image, target_w, target_h, FilterType::Triangle);

        let file = File::create(path).map_err(|e| MediaError::artifact_failed(path, e))?;
        let mut encoder = GifEncoder::new(BufWriter::new(file));
        encoder
            .encode_frame(image::Frame::new(DynamicImage::ImageRgb8(small).to_rgba8()))
            .map_err(|e| MediaError::artifact_failed(path, e))
    }
}

impl ArtifactSink for DirectorySink {
    fn persist_frame(&mut self, sequence: usize, frame: &Frame) -> MediaResult<PathBuf> {
        let path = self.root.join(format!("match_{}.jpg", sequence));
        self.write_jpeg(&path, frame)?;
        debug!(path = %path.display(), timestamp = frame.timestamp, "Saved match frame");
        Ok(path)
    }

    fn persist_clip(
        &mut self,
        index: usize,
        source: Option<&Path>,
        window: &ClipWindow,
        frame: &Frame,
    ) -> MediaResult<PathBuf> {
        let path = self
            .root
            .join(format!("preview_{}_{}.gif", index, Uuid::new_v4().simple()));

        match source {
            Some(video) => FfmpegCommand::new(video, &path)
                .seek(window.start)
                .duration(window.duration())
                .video_filter(format!(
                    "fps={},scale=-2:{}:flags=lanczos",
                    PREVIEW_FPS, PREVIEW_HEIGHT
                ))
                .output_arg("-loop")
                .output_arg("0")
                .run_blocking()
                .map_err(|e| MediaError::artifact_failed(&path, e))?,
            None => self.write_still_gif(&path, frame)?,
        }

        debug!(
            path = %path.display(),
            start = window.start,
            end = window.end,
            "Saved discovery preview"
        );
        Ok(path)
    }
}

/// Serialize `report` into `writer`; buffered bytes that cannot be flushed fail the write.
fn write_report<W: Write>(writer: W, report: &ScanReport, path: &Path) -> MediaResult<()> {
    let mut writer = BufWriter::new(writer);
    serde_json::to_writer_pretty(&mut writer, report)?;
    writer.flush().map_err(|e| MediaError::artifact_failed(path, e))
}
