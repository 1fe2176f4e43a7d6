//! Face bounding boxes.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Face bounding box in source-image pixel coordinates.
///
/// Detectors may report boxes that extend past the frame edge; use
/// [`FaceBox::clip_to`] before extracting a crop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FaceBox {
    /// Left edge x-coordinate
    pub x: f64,
    /// Top edge y-coordinate
    pub y: f64,
    /// Box width
    pub width: f64,
    /// Box height
    pub height: f64,
    /// Detector confidence, when the detector reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl FaceBox {
    /// Create a new box without a confidence score.
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
            score: None,
        }
    }

    /// Attach a detector confidence.
    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    /// Right edge x-coordinate.
    #[inline]
    pub fn x2(&self) -> f64 {
        self.x + self.width
    }

    /// Bottom edge y-coordinate.
    #[inline]
    pub fn y2(&self) -> f64 {
        self.y + self.height
    }

    /// Box area in pixels.
    #[inline]
    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    /// Clip the box to `[0, frame_width) x [0, frame_height)` in whole pixels.
    ///
    /// Returns `None` when nothing of the box lies inside the frame. A box
    /// that survives is at least 1×1.
    pub fn clip_to(&self, frame_width: u32, frame_height: u32) -> Option<CropRect> {
        if frame_width == 0 || frame_height == 0 {
            return None;
        }
        let values = [self.x, self.y, self.width, self.height];
        if values.iter().any(|v| !v.is_finite()) {
            return None;
        }

        let fw = frame_width as f64;
        let fh = frame_height as f64;

        let x1 = self.x.floor().clamp(0.0, fw);
        let y1 = self.y.floor().clamp(0.0, fh);
        let x2 = self.x2().ceil().clamp(0.0, fw);
        let y2 = self.y2().ceil().clamp(0.0, fh);

        if x2 <= x1 || y2 <= y1 {
            return None;
        }

        Some(CropRect {
            x: x1 as u32,
            y: y1 as u32,
            width: ((x2 - x1) as u32).max(1),
            height: ((y2 - y1) as u32).max(1),
        })
    }
}

/// Integer crop rectangle that lies fully inside a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRect {
    /// Area in pixels.
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl From<CropRect> for FaceBox {
    fn from(rect: CropRect) -> Self {
        FaceBox::new(
            rect.x as f64,
            rect.y as f64,
            rect.width as f64,
            rect.height as f64,
        )
    }
}
