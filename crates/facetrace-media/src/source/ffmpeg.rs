//! Frame source backed by an `ffmpeg` rawvideo pipe.

use image::RgbImage;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use tracing::{debug, warn};

use super::{Frame, FrameSource};
use crate::command::check_ffmpeg;
use crate::error::{MediaError, MediaResult};
use crate::probe::{probe_frame_timestamps_blocking, probe_video_blocking};

/// Decodes frames by piping `rgb24` rawvideo out of FFmpeg.
///
/// Frame timestamps come from ffprobe's per-frame presentation times, so
/// variable frame rate sources report their real positions.
pub struct FfmpegFrameSource {
    path: PathBuf,
    child: Child,
    stdout: ChildStdout,
    width: u32,
    height: u32,
    fps: f64,
    duration: Option<f64>,
    timestamps: Vec<f64>,
    next_index: usize,
    last_timestamp: Option<f64>,
}

impl FfmpegFrameSource {
    /// Probe and open a video file.
    pub fn open(path: impl AsRef<Path>) -> MediaResult<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(MediaError::source_unavailable(format!(
                "{} does not exist",
                path.display()
            )));
        }
        check_ffmpeg()?;

        let info = probe_video_blocking(path).map_err(|e| unavailable(path, e))?;
        if info.width == 0 || info.height == 0 {
            return Err(MediaError::source_unavailable(format!(
                "{} has no decodable video geometry",
                path.display()
            )));
        }
        let timestamps = probe_frame_timestamps_blocking(path).map_err(|e| unavailable(path, e))?;

        let mut child = Command::new("ffmpeg")
            .args(["-v", "error", "-noautorotate", "-i"])
            .arg(path)
            .args([
                "-map",
                "0:v:0",
                "-fps_mode",
                "passthrough",
                "-f",
                "rawvideo",
                "-pix_fmt",
                "rgb24",
                "pipe:1",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(MediaError::internal("FFmpeg stdout was not captured"));
            }
        };

        debug!(
            path = %path.display(),
            width = info.width,
            height = info.height,
            frames = timestamps.len(),
            "Opened FFmpeg frame source"
        );

        Ok(Self {
            path: path.to_path_buf(),
            child,
            stdout,
            width: info.width,
            height: info.height,
            fps: info.fps,
            duration: info.known_duration(),
            timestamps,
            next_index: 0,
            last_timestamp: None,
        })
    }

    fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    fn timestamp_for(&self, index: usize) -> f64 {
        if let Some(ts) = self.timestamps.get(index) {
            return *ts;
        }
        // Frames beyond the probed list continue at the nominal rate
        match self.last_timestamp {
            Some(last) if self.fps > 0.0 => last + 1.0 / self.fps,
            _ if self.fps > 0.0 => index as f64 / self.fps,
            _ => 0.0,
        }
    }
}

fn unavailable(path: &Path, error: MediaError) -> MediaError {
    match error {
        MediaError::FfprobeNotFound => MediaError::FfprobeNotFound,
        MediaError::SourceUnavailable(message) => MediaError::source_unavailable(format!(
            "{}: {}",
            path.display(),
            message
        )),
        other => MediaError::source_unavailable(format!("{}: {}", path.display(), other)),
    }
}

impl FrameSource for FfmpegFrameSource {
    fn read_frame(&mut self) -> MediaResult<Option<Frame>> {
        let mut buffer = vec![0u8; self.frame_len()];
        match self.stdout.read_exact(&mut buffer) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let image = RgbImage::from_raw(self.width, self.height, buffer)
            .ok_or_else(|| MediaError::frame_conversion("raw frame size does not match geometry"))?;

        let timestamp = self.timestamp_for(self.next_index);
        self.next_index += 1;
        self.last_timestamp = Some(timestamp);

        Ok(Some(Frame::new(image, timestamp)))
    }

    fn duration(&self) -> Option<f64> {
        self.duration
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

impl Drop for FfmpegFrameSource {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            if let Err(e) = self.child.kill() {
                warn!("Failed to stop FFmpeg decoder: {}", e);
            }
        }
        let _ = self.child.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_unavailable() {
        let err = FfmpegFrameSource::open("/definitely/not/here.mp4").err().unwrap();
        assert!(matches!(err, MediaError::SourceUnavailable(_)));
        assert!(err.is_input_rejection());
    }

    #[test]
    fn test_probe_errors_become_unavailable() {
        let err = unavailable(
            Path::new("clip.mp4"),
            MediaError::FfprobeFailed {
                message: "FFprobe failed".to_string(),
                stderr: None,
            },
        );
        assert!(matches!(err, MediaError::SourceUnavailable(ref m) if m.contains("clip.mp4")));
    }
}
