//! Face detection and embedding.
//!
//! | Component | Role | Backend |
//! |-----------|------|---------|
//! | [`FaceDetector`] | image -> face boxes | YuNet (`opencv` feature) |
//! | [`FaceEmbedder`] | face crop -> vector | ONNX model (`onnx` feature) |
//! | [`FaceAnalyzer`] | clip, crop, resize and embed every face | any of the above |
//!
//! Detectors and embedders are constructed by the caller and injected; no
//! model is loaded implicitly.

use image::RgbImage;

use facetrace_models::{EmbeddingVector, FaceBox};

use crate::error::MediaResult;

pub mod analyzer;
#[cfg(feature = "onnx")]
pub mod onnx;
#[cfg(feature = "opencv")]
pub mod yunet;

pub use analyzer::{DetectedFace, FaceAnalyzer};
#[cfg(feature = "onnx")]
pub use onnx::{OnnxEmbedder, OnnxEmbedderConfig, TensorLayout};
#[cfg(feature = "opencv")]
pub use yunet::YuNetDetector;

/// Finds faces in a frame.
pub trait FaceDetector {
    /// Face boxes in source pixel coordinates, in detector order.
    ///
    /// Boxes may extend past the frame; callers clip them.
    fn detect(&mut self, image: &RgbImage) -> MediaResult<Vec<FaceBox>>;

    /// Detector name for logging.
    fn name(&self) -> &'static str;
}

/// Turns a face crop into an embedding.
pub trait FaceEmbedder {
    /// Square or rectangular input the model expects, as (width, height).
    ///
    /// Crops are resized to this before [`FaceEmbedder::embed`] is called.
    fn input_size(&self) -> (u32, u32);

    /// Embed a crop already resized to [`FaceEmbedder::input_size`].
    fn embed(&mut self, face: &RgbImage) -> MediaResult<EmbeddingVector>;

    /// Embedder name for logging.
    fn name(&self) -> &'static str;
}

impl<T: FaceDetector + ?Sized> FaceDetector for Box<T> {
    fn detect(&mut self, image: &RgbImage) -> MediaResult<Vec<FaceBox>> {
        (**self).detect(image)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

impl<T: FaceEmbedder + ?Sized> FaceEmbedder for Box<T> {
    fn input_size(&self) -> (u32, u32) {
        (**self).input_size()
    }

    fn embed(&mut self, face: &RgbImage) -> MediaResult<EmbeddingVector> {
        (**self).embed(face)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}
