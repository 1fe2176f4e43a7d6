//! OpenCV YuNet face detector.
//!
//! Wraps `FaceDetectorYN`. Frames are downscaled to a 32-aligned input no
//! larger than 960x540 and boxes are scaled back to source pixels.
//!
//! # Known Issues
//! - The 2023mar models need OpenCV 4.8+. Older builds fail with
//!   "Layer with requested id=-1 not found"; the 2022mar model is tried next.

use image::RgbImage;
use opencv::core::{Mat, Ptr, Scalar, Size, CV_8UC3};
use opencv::imgproc;
use opencv::objdetect::FaceDetectorYN;
use opencv::prelude::{FaceDetectorYNTrait, MatTraitConst, MatTraitManual};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use facetrace_models::FaceBox;

use super::FaceDetector;
use crate::error::{MediaError, MediaResult};

/// Model files searched when no path is configured, newest first.
const MODEL_SEARCH_PATHS: &[&str] = &[
    "./models/face_detection_yunet_2023mar.onnx",
    "./models/face_detection_yunet_2023mar_int8bq.onnx",
    "./models/face_detection_yunet_2022mar.onnx",
    "/usr/share/opencv/models/face_detection_yunet_2023mar.onnx",
    "/usr/share/opencv/models/face_detection_yunet_2022mar.onnx",
];

/// Minimum plausible model size; smaller files are truncated downloads.
const MIN_MODEL_BYTES: u64 = 50_000;

const SCORE_THRESHOLD: f32 = 0.6;
const NMS_THRESHOLD: f32 = 0.3;
const TOP_K: i32 = 50;

/// YuNet face detector.
pub struct YuNetDetector {
    detector: Ptr<FaceDetectorYN>,
    model_path: PathBuf,
    /// Detector input (width, height) for the current frame geometry
    input_size: (i32, i32),
    /// Frame geometry the input size was computed for
    frame_size: (u32, u32),
    score_threshold: f32,
}

impl YuNetDetector {
    /// Load the first model found in the default search paths.
    pub fn discover() -> MediaResult<Self> {
        let path = find_model_path().ok_or_else(|| {
            MediaError::model_not_found(format!(
                "no YuNet model in any of: {}",
                MODEL_SEARCH_PATHS.join(", ")
            ))
        })?;
        Self::from_model(path)
    }

    /// Load a specific model file.
    pub fn from_model(model_path: impl AsRef<Path>) -> MediaResult<Self> {
        let model_path = model_path.as_ref();
        let metadata = std::fs::metadata(model_path)
            .map_err(|_| MediaError::model_not_found(model_path.display().to_string()))?;
        if metadata.len() < MIN_MODEL_BYTES {
            return Err(MediaError::inference_failed(format!(
                "YuNet model file appears corrupted (size: {} bytes)",
                metadata.len()
            )));
        }

        let input_size = (320, 320);
        let detector = create_detector_with_fallback(model_path, input_size)?;
        info!(model = %model_path.display(), "YuNet detector initialized");

        Ok(Self {
            detector,
            model_path: model_path.to_path_buf(),
            input_size,
            frame_size: (0, 0),
            score_threshold: SCORE_THRESHOLD,
        })
    }

    /// Override the confidence cut-off.
    pub fn with_score_threshold(mut self, threshold: f32) -> Self {
        self.score_threshold = threshold;
        self
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    /// Input size for a frame: at most 960x540, multiples of 32.
    fn calculate_input_size(frame_width: u32, frame_height: u32) -> (i32, i32) {
        let scale = (frame_width as f64 / 960.0)
            .max(frame_height as f64 / 540.0)
            .max(1.0);

        const ALIGNMENT: i32 = 32;
        let align = |v: f64| {
            let scaled = (v / scale).round() as i32;
            ((scaled + ALIGNMENT / 2) / ALIGNMENT * ALIGNMENT).max(ALIGNMENT)
        };

        (align(frame_width as f64), align(frame_height as f64))
    }

    fn prepare(&mut self, width: u32, height: u32) -> MediaResult<()> {
        if self.frame_size == (width, height) {
            return Ok(());
        }
        self.input_size = Self::calculate_input_size(width, height);
        self.frame_size = (width, height);
        self.detector
            .set_input_size(Size::new(self.input_size.0, self.input_size.1))
            .map_err(|e| MediaError::inference_failed(format!("YuNet set_input_size: {e}")))?;
        debug!(
            frame_width = width,
            frame_height = height,
            input_width = self.input_size.0,
            input_height = self.input_size.1,
            "YuNet input size updated"
        );
        Ok(())
    }
}

/// Copy an RGB image into a BGR matrix.
fn rgb_to_bgr_mat(image: &RgbImage) -> MediaResult<Mat> {
    let (width, height) = image.dimensions();
    let mut rgb =
        Mat::new_rows_cols_with_default(height as i32, width as i32, CV_8UC3, Scalar::all(0.0))
            .map_err(|e| MediaError::frame_conversion(format!("allocate frame: {e}")))?;
    rgb.data_bytes_mut()
        .map_err(|e| MediaError::frame_conversion(format!("frame bytes: {e}")))?
        .copy_from_slice(image.as_raw());

    let mut bgr = Mat::default();
    imgproc::cvt_color(
        &rgb,
        &mut bgr,
        imgproc::COLOR_RGB2BGR,
        0,
        opencv::core::AlgorithmHint::ALGO_HINT_DEFAULT,
    )
    .map_err(|e| MediaError::frame_conversion(format!("rgb2bgr: {e}")))?;
    Ok(bgr)
}

fn create_detector_with_fallback(
    model_path: &Path,
    input_size: (i32, i32),
) -> MediaResult<Ptr<FaceDetectorYN>> {
    use opencv::dnn::{DNN_BACKEND_DEFAULT, DNN_BACKEND_OPENCV, DNN_TARGET_CPU};

    let model = model_path
        .to_str()
        .ok_or_else(|| MediaError::model_not_found("model path is not valid UTF-8"))?;

    let backends = [
        (DNN_BACKEND_DEFAULT, DNN_TARGET_CPU, "default"),
        (DNN_BACKEND_OPENCV, DNN_TARGET_CPU, "opencv"),
    ];

    let mut last_error = String::new();
    for (backend_id, target_id, backend_name) in backends {
        match FaceDetectorYN::create(
            model,
            "",
            Size::new(input_size.0, input_size.1),
            SCORE_THRESHOLD,
            NMS_THRESHOLD,
            TOP_K,
            backend_id,
            target_id,
        ) {
            Ok(detector) => {
                debug!("YuNet created with {} backend", backend_name);
                return Ok(detector);
            }
            Err(e) => {
                warn!("YuNet {} backend failed: {}", backend_name, e);
                last_error = e.to_string();
            }
        }
    }

    Err(MediaError::inference_failed(format!(
        "Failed to create YuNet detector with any backend: {}",
        last_error
    )))
}

fn find_model_path() -> Option<&'static str> {
    MODEL_SEARCH_PATHS.iter().copied().find(|p| Path::new(p).exists())
}

impl FaceDetector for YuNetDetector {
    fn detect(&mut self, image: &RgbImage) -> MediaResult<Vec<FaceBox>> {
        let (width, height) = image.dimensions();
        self.prepare(width, height)?;

        let frame = rgb_to_bgr_mat(image)?;
        let mut resized = Mat::default();
        imgproc::resize(
            &frame,
            &mut resized,
            Size::new(self.input_size.0, self.input_size.1),
            0.0,
            0.0,
            imgproc::INTER_LINEAR,
        )
        .map_err(|e| MediaError::inference_failed(format!("YuNet resize: {e}")))?;

        let mut faces = Mat::default();
        self.detector
            .detect(&resized, &mut faces)
            .map_err(|e| MediaError::inference_failed(format!("YuNet detection failed: {e}")))?;

        // Row layout: [x, y, w, h, 5 landmark pairs, score]
        if faces.rows() <= 0 {
            return Ok(Vec::new());
        }
        if faces.cols() < 15 {
            return Err(MediaError::inference_failed(format!(
                "YuNet output has {} columns, expected 15",
                faces.cols()
            )));
        }

        let scale_x = width as f64 / self.input_size.0 as f64;
        let scale_y = height as f64 / self.input_size.1 as f64;
        let at = |row: i32, col: i32| faces.at_2d::<f32>(row, col).map(|v| *v as f64);

        let mut boxes = Vec::with_capacity(faces.rows() as usize);
        for row in 0..faces.rows() {
            let (Ok(x), Ok(y), Ok(w), Ok(h), Ok(score)) =
                (at(row, 0), at(row, 1), at(row, 2), at(row, 3), at(row, 14))
            else {
                continue;
            };
            if w <= 0.0 || h <= 0.0 || score < self.score_threshold as f64 {
                continue;
            }
            boxes.push(
                FaceBox::new(x * scale_x, y * scale_y, w * scale_x, h * scale_y).with_score(score),
            );
        }

        Ok(boxes)
    }

    fn name(&self) -> &'static str {
        "yunet"
    }
}
