//! Scripted collaborators for driving scans without models or videos.
//!
//! A scripted frame is a 1-pixel-high image with one column per face. The
//! column's red value is the identity id; the green channel marks a face.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};

use facetrace_media::{
    ArtifactSink, FaceDetector, FaceEmbedder, Frame, FrameSource, MediaError, MediaResult,
};
use facetrace_models::{ClipWindow, EmbeddingVector, FaceBox};

/// Frames at fixed timestamps, each showing a list of identities.
pub struct ScriptedVideo {
    frames: VecDeque<(f64, Vec<u8>)>,
    duration: Option<f64>,
}

impl ScriptedVideo {
    pub fn new(frames: Vec<(f64, Vec<u8>)>, duration: f64) -> Self {
        Self {
            frames: frames.into(),
            duration: Some(duration),
        }
    }

    /// `count` frames at `fps`; `faces(t)` gives the identities visible at `t`.
    pub fn uniform(count: usize, fps: f64, faces: impl Fn(f64) -> Vec<u8>) -> Self {
        let frames = (0..count)
            .map(|i| {
                let t = i as f64 / fps;
                (t, faces(t))
            })
            .collect::<Vec<_>>();
        Self::new(frames, count as f64 / fps)
    }
}

impl FrameSource for ScriptedVideo {
    fn read_frame(&mut self) -> MediaResult<Option<Frame>> {
        let Some((timestamp, faces)) = self.frames.pop_front() else {
            return Ok(None);
        };
        let mut image = RgbImage::new(faces.len().max(1) as u32, 1);
        for (x, id) in faces.iter().enumerate() {
            image.put_pixel(x as u32, 0, Rgb([*id, 255, 0]));
        }
        Ok(Some(Frame::new(image, timestamp)))
    }

    fn duration(&self) -> Option<f64> {
        self.duration
    }
}

/// One 1x1 box per marked column.
pub struct ColumnDetector;

impl FaceDetector for ColumnDetector {
    fn detect(&mut self, image: &RgbImage) -> MediaResult<Vec<FaceBox>> {
        Ok((0..image.width())
            .filter(|&x| image.get_pixel(x, 0)[1] == 255)
            .map(|x| FaceBox::new(x as f64, 0.0, 1.0, 1.0).with_score(0.9))
            .collect())
    }

    fn name(&self) -> &'static str {
        "column"
    }
}

/// Looks identities up in a table; unknown ids fail inference.
pub struct TableEmbedder {
    table: HashMap<u8, Vec<f32>>,
}

impl TableEmbedder {
    pub fn new(entries: impl IntoIterator<Item = (u8, Vec<f32>)>) -> Self {
        Self {
            table: entries.into_iter().collect(),
        }
    }
}

impl FaceEmbedder for TableEmbedder {
    fn input_size(&self) -> (u32, u32) {
        (1, 1)
    }

    fn embed(&mut self, face: &RgbImage) -> MediaResult<EmbeddingVector> {
        let id = face.get_pixel(0, 0)[0];
        let values = self
            .table
            .get(&id)
            .cloned()
            .ok_or_else(|| MediaError::inference_failed(format!("unknown identity {}", id)))?;
        Ok(EmbeddingVector::new(values)?)
    }

    fn name(&self) -> &'static str {
        "table"
    }
}

/// Unit vector whose cosine similarity to `[1, 0]` is `similarity`.
pub fn at_similarity(similarity: f32) -> Vec<f32> {
    vec![similarity, (1.0 - similarity * similarity).max(0.0).sqrt()]
}

pub fn reference() -> EmbeddingVector {
    EmbeddingVector::new(vec![1.0, 0.0]).unwrap()
}

/// A persisted artifact call.
#[derive(Debug, Clone, PartialEq)]
pub enum Persisted {
    Frame { sequence: usize, timestamp: f64 },
    Clip { index: usize, window: ClipWindow },
}

/// Records artifact calls; optionally fails some of them.
#[derive(Default)]
pub struct RecordingSink {
    pub calls: Vec<Persisted>,
    /// Timestamps whose artifact write fails
    pub fail_at: Vec<f64>,
}

impl RecordingSink {
    fn check(&self, timestamp: f64, path: &Path) -> MediaResult<()> {
        if self.fail_at.iter().any(|t| (t - timestamp).abs() < 1e-9) {
            return Err(MediaError::artifact_failed(path, "disk full"));
        }
        Ok(())
    }
}

impl ArtifactSink for RecordingSink {
    fn persist_frame(&mut self, sequence: usize, frame: &Frame) -> MediaResult<PathBuf> {
        let path = PathBuf::from(format!("match_{}.jpg", sequence));
        self.check(frame.timestamp, &path)?;
        self.calls.push(Persisted::Frame {
            sequence,
            timestamp: frame.timestamp,
        });
        Ok(path)
    }

    fn persist_clip(
        &mut self,
        index: usize,
        _source: Option<&Path>,
        window: &ClipWindow,
        frame: &Frame,
    ) -> MediaResult<PathBuf> {
        let path = PathBuf::from(format!("preview_{}.gif", index));
        self.check(frame.timestamp, &path)?;
        self.calls.push(Persisted::Clip {
            index,
            window: *window,
        });
        Ok(path)
    }
}
