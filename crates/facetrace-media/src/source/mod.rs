//! Video frame sources.
//!
//! A source decodes frames in presentation order and reports each frame's
//! native timestamp. Running out of frames is `Ok(None)`, not an error.

use image::RgbImage;
use std::path::Path;

use crate::error::MediaResult;

mod ffmpeg;
#[cfg(feature = "opencv")]
mod capture;

pub use ffmpeg::FfmpegFrameSource;
#[cfg(feature = "opencv")]
pub use capture::OpenCvFrameSource;

/// One decoded frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// RGB pixels
    pub image: RgbImage,
    /// Position in the source, in seconds
    pub timestamp: f64,
}

impl Frame {
    pub fn new(image: RgbImage, timestamp: f64) -> Self {
        Self { image, timestamp }
    }
}

/// Sequential frame decoder.
///
/// Implementations release their decoder when dropped.
pub trait FrameSource {
    /// Decode the next frame, or `None` once the source is exhausted.
    fn read_frame(&mut self) -> MediaResult<Option<Frame>>;

    /// Total duration in seconds, when known.
    fn duration(&self) -> Option<f64>;

    /// File backing the source, used to cut preview clips.
    fn path(&self) -> Option<&Path> {
        None
    }
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn read_frame(&mut self) -> MediaResult<Option<Frame>> {
        (**self).read_frame()
    }

    fn duration(&self) -> Option<f64> {
        (**self).duration()
    }

    fn path(&self) -> Option<&Path> {
        (**self).path()
    }
}

/// Open the default source for a file.
pub fn open_source(path: impl AsRef<Path>) -> MediaResult<Box<dyn FrameSource>> {
    #[cfg(feature = "opencv")]
    {
        match OpenCvFrameSource::open(path.as_ref()) {
            Ok(source) => return Ok(Box::new(source)),
            Err(e) => tracing::warn!(
                "OpenCV could not open {}, falling back to FFmpeg: {}",
                path.as_ref().display(),
                e
            ),
        }
    }
    Ok(Box::new(FfmpegFrameSource::open(path)?))
}
