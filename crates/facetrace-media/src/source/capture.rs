//! Frame source backed by OpenCV `VideoCapture`.

use image::RgbImage;
use opencv::core::Mat;
use opencv::imgproc;
use opencv::prelude::{
    MatTraitConst, MatTraitConstManual, VideoCaptureTrait, VideoCaptureTraitConst,
};
use opencv::videoio::{
    VideoCapture, CAP_ANY, CAP_PROP_FPS, CAP_PROP_FRAME_COUNT, CAP_PROP_POS_MSEC,
};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{Frame, FrameSource};
use crate::error::{MediaError, MediaResult};

/// Decodes frames with OpenCV and reports `CAP_PROP_POS_MSEC` timestamps.
pub struct OpenCvFrameSource {
    path: PathBuf,
    capture: VideoCapture,
    duration: Option<f64>,
}

impl OpenCvFrameSource {
    /// Open a video file.
    pub fn open(path: impl AsRef<Path>) -> MediaResult<Self> {
        let path = path.as_ref();
        let path_str = path
            .to_str()
            .ok_or_else(|| MediaError::source_unavailable("video path is not valid UTF-8"))?;
        if !path.is_file() {
            return Err(MediaError::source_unavailable(format!("{} does not exist", path_str)));
        }

        let capture = VideoCapture::from_file(path_str, CAP_ANY)
            .map_err(|e| MediaError::source_unavailable(format!("Failed to open video: {}", e)))?;
        if !capture.is_opened().unwrap_or(false) {
            return Err(MediaError::source_unavailable(format!(
                "Failed to open video file: {}",
                path_str
            )));
        }

        let fps = capture.get(CAP_PROP_FPS).unwrap_or(0.0);
        let frames = capture.get(CAP_PROP_FRAME_COUNT).unwrap_or(0.0);
        let duration = (fps > 0.0 && frames > 0.0).then(|| frames / fps);

        debug!(path = path_str, fps, frames, "Opened OpenCV frame source");

        Ok(Self {
            path: path.to_path_buf(),
            capture,
            duration,
        })
    }
}

/// Convert an 8-bit BGR matrix into an RGB image.
pub(crate) fn mat_to_rgb(frame: &Mat) -> MediaResult<RgbImage> {
    let mut rgb = Mat::default();
    imgproc::cvt_color(
        frame,
        &mut rgb,
        imgproc::COLOR_BGR2RGB,
        0,
        opencv::core::AlgorithmHint::ALGO_HINT_DEFAULT,
    )
    .map_err(|e| MediaError::frame_conversion(format!("bgr2rgb: {e}")))?;

    let width = rgb.cols() as u32;
    let height = rgb.rows() as u32;
    let bytes = rgb
        .data_bytes()
        .map_err(|e| MediaError::frame_conversion(format!("frame bytes: {e}")))?;

    RgbImage::from_raw(width, height, bytes.to_vec())
        .ok_or_else(|| MediaError::frame_conversion("frame buffer size does not match geometry"))
}

impl FrameSource for OpenCvFrameSource {
    fn read_frame(&mut self) -> MediaResult<Option<Frame>> {
        let mut frame = Mat::default();
        let ok = self
            .capture
            .read(&mut frame)
            .map_err(|e| MediaError::source_unavailable(format!("decode failed: {e}")))?;
        if !ok || frame.empty() {
            return Ok(None);
        }

        let timestamp = self.capture.get(CAP_PROP_POS_MSEC).unwrap_or(0.0) / 1000.0;
        let image = mat_to_rgb(&frame)?;
        Ok(Some(Frame::new(image, timestamp)))
    }

    fn duration(&self) -> Option<f64> {
        self.duration
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

impl Drop for OpenCvFrameSource {
    fn drop(&mut self) {
        let _ = self.capture.release();
    }
}
