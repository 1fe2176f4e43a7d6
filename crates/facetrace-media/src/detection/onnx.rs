//! ONNX Runtime face embedder for FaceNet and ArcFace style models.

use image::RgbImage;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::{Tensor, Value};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use facetrace_models::EmbeddingVector;

use super::FaceEmbedder;
use crate::error::{MediaError, MediaResult};

/// Memory layout of the model input tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    /// `[1, 3, H, W]`
    #[default]
    Nchw,
    /// `[1, H, W, 3]`
    Nhwc,
}

/// Embedder model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnnxEmbedderConfig {
    pub model_path: PathBuf,
    /// Square input edge in pixels
    pub input_size: u32,
    pub layout: TensorLayout,
    /// Pixel normalization: `(value - mean) / std`
    pub mean: f32,
    pub std: f32,
}

impl OnnxEmbedderConfig {
    /// FaceNet (InceptionResnetV1): 160x160, `(x - 127.5) / 128`.
    pub fn facenet(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            input_size: 160,
            layout: TensorLayout::Nchw,
            mean: 127.5,
            std: 128.0,
        }
    }

    /// ArcFace / SFace: 112x112, `(x - 127.5) / 127.5`.
    pub fn arcface(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            input_size: 112,
            layout: TensorLayout::Nchw,
            mean: 127.5,
            std: 127.5,
        }
    }

    pub fn with_input_size(mut self, size: u32) -> Self {
        self.input_size = size;
        self
    }

    pub fn with_layout(mut self, layout: TensorLayout) -> Self {
        self.layout = layout;
        self
    }
}

/// Face embedder backed by an ONNX Runtime session.
pub struct OnnxEmbedder {
    session: Session,
    config: OnnxEmbedderConfig,
}

impl OnnxEmbedder {
    /// Load the model described by `config`.
    pub fn load(config: OnnxEmbedderConfig) -> MediaResult<Self> {
        if config.input_size == 0 {
            return Err(MediaError::inference_failed("embedder input size must be positive"));
        }
        let model_bytes = read_model(&config.model_path)?;

        let session = Session::builder()
            .map_err(|e| MediaError::inference_failed(format!("ORT session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| MediaError::inference_failed(format!("ORT opt level: {e}")))?
            .commit_from_memory(model_bytes.as_slice())
            .map_err(|e| MediaError::inference_failed(format!("ORT load model: {e}")))?;

        info!(
            model = %config.model_path.display(),
            input_size = config.input_size,
            layout = ?config.layout,
            "Face embedder loaded"
        );

        Ok(Self { session, config })
    }

    fn to_tensor(&self, face: &RgbImage) -> MediaResult<Value> {
        let size = self.config.input_size as usize;
        let data = normalize_pixels(face, self.config.layout, self.config.mean, self.config.std);
        let shape = match self.config.layout {
            TensorLayout::Nchw => vec![1usize, 3, size, size],
            TensorLayout::Nhwc => vec![1usize, size, size, 3],
        };
        Tensor::from_array((shape, data.into_boxed_slice()))
            .map(Value::from)
            .map_err(|e| MediaError::inference_failed(format!("ORT tensor: {e}")))
    }
}

fn read_model(path: &Path) -> MediaResult<Vec<u8>> {
    if !path.exists() {
        return Err(MediaError::model_not_found(path.display().to_string()));
    }
    std::fs::read(path)
        .map_err(|e| MediaError::inference_failed(format!("ORT read model file: {e}")))
}

/// Flatten an RGB image into normalized floats in the requested layout.
fn normalize_pixels(face: &RgbImage, layout: TensorLayout, mean: f32, std: f32) -> Vec<f32> {
    let (w, h) = face.dimensions();
    let raw = face.as_raw();
    let norm = |v: u8| (v as f32 - mean) / std;

    match layout {
        TensorLayout::Nhwc => raw.iter().map(|&v| norm(v)).collect(),
        TensorLayout::Nchw => {
            let plane = (w * h) as usize;
            let mut chw = vec![0.0f32; plane * 3];
            for (i, pixel) in raw.chunks_exact(3).enumerate() {
                for c in 0..3 {
                    chw[c * plane + i] = norm(pixel[c]);
                }
            }
            chw
        }
    }
}

impl FaceEmbedder for OnnxEmbedder {
    fn input_size(&self) -> (u32, u32) {
        (self.config.input_size, self.config.input_size)
    }

    fn embed(&mut self, face: &RgbImage) -> MediaResult<EmbeddingVector> {
        let expected = self.input_size();
        if face.dimensions() != expected {
            return Err(MediaError::inference_failed(format!(
                "embedder expects {}x{} input, got {}x{}",
                expected.0,
                expected.1,
                face.width(),
                face.height()
            )));
        }

        let tensor = self.to_tensor(face)?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .map_err(|e| MediaError::inference_failed(format!("ORT run failed: {e}")))?;

        let (_, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| MediaError::inference_failed(format!("ORT extract: {e}")))?;

        Ok(EmbeddingVector::new(data.to_vec())?)
    }

    fn name(&self) -> &'static str {
        "onnx"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nchw_puts_channels_in_planes() {
        let mut face = RgbImage::new(2, 1);
        face.put_pixel(0, 0, image::Rgb([255, 0, 0]));
        face.put_pixel(1, 0, image::Rgb([0, 255, 0]));

        let data = normalize_pixels(&face, TensorLayout::Nchw, 0.0, 255.0);
        assert_eq!(data, vec![1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);

        let data = normalize_pixels(&face, TensorLayout::Nhwc, 0.0, 255.0);
        assert_eq!(data, vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_presets() {
        assert_eq!(OnnxEmbedderConfig::facenet("f.onnx").input_size, 160);
        assert_eq!(OnnxEmbedderConfig::arcface("a.onnx").input_size, 112);
    }

    #[test]
    fn test_missing_model() {
        let err = OnnxEmbedder::load(OnnxEmbedderConfig::arcface("/nope/model.onnx"))
            .err()
            .unwrap();
        assert!(matches!(err, MediaError::ModelNotFound(_)));
    }
}
