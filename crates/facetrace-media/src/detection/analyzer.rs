//! Detect-then-embed over one image.

use image::imageops::{self, FilterType};
use image::RgbImage;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use facetrace_models::{CropRect, EmbeddingVector};

use super::{FaceDetector, FaceEmbedder};
use crate::error::{MediaError, MediaResult};

/// Inference slower than this is reported.
const SLOW_INFERENCE: Duration = Duration::from_secs(2);

/// A face found in an image, with its embedding.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    /// Crop box, clipped to the image
    pub crop: CropRect,
    /// Detector confidence, when reported
    pub score: Option<f64>,
    pub embedding: EmbeddingVector,
}

/// Runs a detector and an embedder together.
pub struct FaceAnalyzer<D, E> {
    detector: D,
    embedder: E,
}

impl<D: FaceDetector, E: FaceEmbedder> FaceAnalyzer<D, E> {
    pub fn new(detector: D, embedder: E) -> Self {
        Self { detector, embedder }
    }

    /// Every face in `image`, in detector order.
    pub fn detect_and_embed(&mut self, image: &RgbImage) -> MediaResult<Vec<DetectedFace>> {
        self.detect_and_embed_limited(image, None)
    }

    /// Like [`Self::detect_and_embed`], embedding at most `limit` faces.
    ///
    /// Boxes that clip to nothing are dropped before the limit applies.
    /// Faces whose embedding is degenerate are dropped with a warning.
    /// Detector or embedder errors fail the whole image.
    pub fn detect_and_embed_limited(
        &mut self,
        image: &RgbImage,
        limit: Option<usize>,
    ) -> MediaResult<Vec<DetectedFace>> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }

        let started = Instant::now();
        let boxes = self.detector.detect(image).map_err(as_inference_failure)?;

        let crops = boxes
            .iter()
            .filter_map(|face| face.clip_to(width, height).map(|crop| (crop, face.score)))
            .take(limit.unwrap_or(usize::MAX));

        let (input_w, input_h) = self.embedder.input_size();
        let mut faces = Vec::new();
        for (crop, score) in crops {
            let patch =
                imageops::crop_imm(image, crop.x, crop.y, crop.width, crop.height).to_image();
            let patch = if patch.dimensions() == (input_w, input_h) {
                patch
            } else {
                imageops::resize(&patch, input_w, input_h, FilterType::Triangle)
            };

            let embedding = self.embedder.embed(&patch).map_err(as_inference_failure)?;
            if embedding.is_degenerate() {
                warn!(
                    embedder = self.embedder.name(),
                    x = crop.x,
                    y = crop.y,
                    "Dropping face with degenerate embedding"
                );
                continue;
            }
            faces.push(DetectedFace {
                crop,
                score,
                embedding,
            });
        }

        let elapsed = started.elapsed();
        if elapsed > SLOW_INFERENCE {
            warn!(
                detector = self.detector.name(),
                embedder = self.embedder.name(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Slow face inference"
            );
        }
        debug!(
            detected = boxes.len(),
            embedded = faces.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Analyzed image"
        );

        Ok(faces)
    }
}

fn as_inference_failure(error: MediaError) -> MediaError {
    match error {
        MediaError::InferenceFailed(_) => error,
        other => MediaError::inference_failed(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facetrace_models::FaceBox;

    struct FixedDetector(Vec<FaceBox>);

    impl FaceDetector for FixedDetector {
        fn detect(&mut self, _image: &RgbImage) -> MediaResult<Vec<FaceBox>> {
            Ok(self.0.clone())
        }

        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    struct FailingDetector;

    impl FaceDetector for FailingDetector {
        fn detect(&mut self, _image: &RgbImage) -> MediaResult<Vec<FaceBox>> {
            Err(MediaError::internal("model exploded"))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    /// Embeds the crop's mean red value; records every crop size it sees.
    #[derive(Default)]
    struct RecordingEmbedder {
        sizes: Vec<(u32, u32)>,
    }

    impl FaceEmbedder for RecordingEmbedder {
        fn input_size(&self) -> (u32, u32) {
            (4, 4)
        }

        fn embed(&mut self, face: &RgbImage) -> MediaResult<EmbeddingVector> {
            self.sizes.push(face.dimensions());
            let red = face.pixels().map(|p| p[0] as f32).sum::<f32>();
            Ok(EmbeddingVector::new(vec![red, 1.0])?)
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    #[test]
    fn test_crops_are_clipped_and_resized() {
        let image = RgbImage::new(20, 10);
        let detector = FixedDetector(vec![
            FaceBox::new(-5.0, -5.0, 10.0, 10.0),
            FaceBox::new(15.0, 2.0, 30.0, 30.0),
        ]);
        let mut analyzer = FaceAnalyzer::new(detector, RecordingEmbedder::default());

        let faces = analyzer.detect_and_embed(&image).unwrap();
        assert_eq!(faces.len(), 2);
        assert_eq!((faces[0].crop.x, faces[0].crop.y), (0, 0));
        assert_eq!((faces[0].crop.width, faces[0].crop.height), (5, 5));
        assert_eq!(faces[1].crop.x + faces[1].crop.width, 20);
        assert!(analyzer.embedder.sizes.iter().all(|s| *s == (4, 4)));
    }

    #[test]
    fn test_boxes_outside_the_frame_are_dropped() {
        let image = RgbImage::new(20, 10);
        let detector = FixedDetector(vec![
            FaceBox::new(50.0, 50.0, 10.0, 10.0),
            FaceBox::new(2.0, 2.0, 4.0, 4.0),
        ]);
        let mut analyzer = FaceAnalyzer::new(detector, RecordingEmbedder::default());

        let faces = analyzer.detect_and_embed_limited(&image, Some(1)).unwrap();
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].crop.x, 2);
    }

    #[test]
    fn test_limit_skips_embedding_extra_faces() {
        let image = RgbImage::new(20, 10);
        let detector = FixedDetector(vec![
            FaceBox::new(0.0, 0.0, 4.0, 4.0),
            FaceBox::new(8.0, 0.0, 4.0, 4.0),
            FaceBox::new(12.0, 0.0, 4.0, 4.0),
        ]);
        let mut analyzer = FaceAnalyzer::new(detector, RecordingEmbedder::default());

        analyzer.detect_and_embed_limited(&image, Some(1)).unwrap();
        assert_eq!(analyzer.embedder.sizes.len(), 1);
    }

    #[test]
    fn test_degenerate_embedding_is_dropped() {
        // A black crop embeds to [0, 1], a usable vector; force a zero vector instead
        struct ZeroEmbedder;
        impl FaceEmbedder for ZeroEmbedder {
            fn input_size(&self) -> (u32, u32) {
                (2, 2)
            }
            fn embed(&mut self, _face: &RgbImage) -> MediaResult<EmbeddingVector> {
                Ok(EmbeddingVector::new(vec![0.0, 0.0])?)
            }
            fn name(&self) -> &'static str {
                "zero"
            }
        }

        let image = RgbImage::new(8, 8);
        let detector = FixedDetector(vec![FaceBox::new(1.0, 1.0, 3.0, 3.0)]);
        let mut analyzer = FaceAnalyzer::new(detector, ZeroEmbedder);
        assert!(analyzer.detect_and_embed(&image).unwrap().is_empty());
    }

    #[test]
    fn test_detector_error_is_inference_failure() {
        let image = RgbImage::new(8, 8);
        let mut analyzer = FaceAnalyzer::new(FailingDetector, RecordingEmbedder::default());
        let err = analyzer.detect_and_embed(&image).unwrap_err();
        assert!(matches!(err, MediaError::InferenceFailed(_)));
        assert!(err.is_frame_recoverable());
    }
}
